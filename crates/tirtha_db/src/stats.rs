//! Store-wide counts for the statistics report.

use crate::error::Result;
use crate::types::StoreStats;
use crate::TirthaDb;
use sqlx::Row;
use std::collections::BTreeMap;

impl TirthaDb {
    pub async fn store_stats(&self) -> Result<StoreStats> {
        let row = sqlx::query(
            r#"
            SELECT
                (SELECT COUNT(*) FROM sites) AS sites,
                (SELECT COUNT(*) FROM sites WHERE completed = 1) AS sites_completed,
                (SELECT COUNT(*) FROM contributors) AS contributors,
                (SELECT COUNT(*) FROM contributions) AS contributions,
                (SELECT COUNT(*) FROM contributions WHERE processed = 1) AS contributions_processed,
                (SELECT COUNT(*) FROM images) AS images,
                (SELECT COUNT(*) FROM runs) AS runs,
                (SELECT COUNT(*) FROM arks) AS arks
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        let count = |name: &str| -> Result<u64> { Ok(row.try_get::<i64, _>(name)? as u64) };

        Ok(StoreStats {
            sites: count("sites")?,
            sites_completed: count("sites_completed")?,
            contributors: count("contributors")?,
            contributions: count("contributions")?,
            contributions_processed: count("contributions_processed")?,
            images: count("images")?,
            runs: count("runs")?,
            arks: count("arks")?,
            runs_by_status: self.grouped_counts("runs", "status").await?,
            runs_by_kind: self.grouped_counts("runs", "kind").await?,
            images_by_label: self.grouped_counts("images", "label").await?,
            contributions_by_gate: self.grouped_counts("contributions", "gate_status").await?,
        })
    }

    /// `SELECT column, COUNT(*) ... GROUP BY column`. Table and column are
    /// compile-time literals from `store_stats`, never user input.
    async fn grouped_counts(&self, table: &str, column: &str) -> Result<BTreeMap<String, u64>> {
        let sql = format!(
            "SELECT {column} AS value, COUNT(*) AS n FROM {table} GROUP BY {column}",
            column = column,
            table = table
        );
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        let mut counts = BTreeMap::new();
        for row in rows {
            let value: String = row.try_get("value")?;
            let n: i64 = row.try_get("n")?;
            counts.insert(value, n as u64);
        }
        Ok(counts)
    }
}
