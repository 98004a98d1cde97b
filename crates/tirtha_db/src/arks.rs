//! Identifier records.

use crate::error::{DbError, Result};
use crate::types::ArkRecord;
use crate::{datetime_column, parse_column, TirthaDb};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tirtha_ids::RunId;

impl TirthaDb {
    /// Store a freshly minted record.
    ///
    /// A taken identifier string fails with [`DbError::Constraint`] (the
    /// minter regenerates and retries). A Run that already owns a record
    /// fails with [`DbError::InvalidState`]; retrying would never succeed.
    pub async fn insert_ark(&self, record: &ArkRecord) -> Result<()> {
        let metadata = serde_json::to_string(&record.metadata)?;
        let result = sqlx::query(
            r#"
            INSERT INTO arks (ark, naan, shoulder, assigned_name, url, metadata,
                              collisions, run_id, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.ark)
        .bind(record.naan as i64)
        .bind(&record.shoulder)
        .bind(&record.assigned_name)
        .bind(&record.url)
        .bind(metadata)
        .bind(record.collisions as i64)
        .bind(record.run_id.as_str())
        .bind(record.created_at.timestamp_millis())
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(err) => match DbError::from(err) {
                DbError::Constraint(msg) if msg.contains("run_id") => Err(DbError::invalid_state(
                    format!("run {} already has an identifier", record.run_id),
                )),
                other => Err(other),
            },
        }
    }

    pub async fn get_ark(&self, ark: &str) -> Result<Option<ArkRecord>> {
        let row = sqlx::query("SELECT * FROM arks WHERE ark = ?")
            .bind(ark)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_ark).transpose()
    }

    pub async fn ark_for_run(&self, run_id: &RunId) -> Result<Option<ArkRecord>> {
        let row = sqlx::query("SELECT * FROM arks WHERE run_id = ?")
            .bind(run_id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_ark).transpose()
    }

    pub async fn ark_exists(&self, ark: &str) -> Result<bool> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM arks WHERE ark = ?")
            .bind(ark)
            .fetch_one(&self.pool)
            .await?;
        Ok(count > 0)
    }
}

fn row_to_ark(row: &SqliteRow) -> Result<ArkRecord> {
    let metadata: String = row.try_get("metadata")?;
    Ok(ArkRecord {
        ark: row.try_get("ark")?,
        naan: row.try_get::<i64, _>("naan")? as u64,
        shoulder: row.try_get("shoulder")?,
        assigned_name: row.try_get("assigned_name")?,
        url: row.try_get("url")?,
        metadata: serde_json::from_str(&metadata)?,
        collisions: row.try_get::<i64, _>("collisions")? as u32,
        run_id: parse_column(row, "run_id")?,
        created_at: datetime_column(row, "created_at")?,
    })
}
