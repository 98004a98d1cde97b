//! Persistence layer for Tirtha.
//!
//! Every component that needs shared state goes through [`TirthaDb`]; worker
//! processes share nothing else, so anything that must survive a task
//! invocation lives in these tables.
//!
//! # Usage
//!
//! ```rust,ignore
//! use tirtha_db::TirthaDb;
//!
//! let db = TirthaDb::open("~/.tirtha/tirtha.sqlite").await?;
//! let task = db.pop_task(TirthaDb::now_millis()).await?;
//! ```

mod error;
mod schema;
mod types;

mod arks;
mod runs;
mod sites;
mod stats;
pub mod tasks;

pub use error::{DbError, Result};
pub use tasks::QueueStats;
pub use types::*;

use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::path::Path;
use std::str::FromStr;
use tracing::info;

/// Handle to the Tirtha state store.
#[derive(Clone)]
pub struct TirthaDb {
    pool: SqlitePool,
}

impl TirthaDb {
    /// Open or create a database at the given path.
    ///
    /// Creates all tables if they don't exist.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let url = format!("sqlite:{}?mode=rwc", path.display());

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await?;

        let db = Self { pool };
        db.ensure_schema().await?;

        info!(path = %path.display(), "Database opened");

        Ok(db)
    }

    /// Open an existing database (fails if not exists).
    pub async fn open_existing(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(DbError::NotFound(format!(
                "Database not found: {}",
                path.display()
            )));
        }

        let url = format!("sqlite:{}?mode=rw", path.display());

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await?;

        let db = Self { pool };
        db.ensure_schema().await?;
        Ok(db)
    }

    /// Underlying pool, for ad hoc queries in tests and diagnostics.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(self) {
        self.pool.close().await;
    }
}

// Timestamp utilities
impl TirthaDb {
    /// Current time as milliseconds since Unix epoch.
    pub fn now_millis() -> i64 {
        chrono::Utc::now().timestamp_millis()
    }

    pub fn millis_to_datetime(millis: i64) -> chrono::DateTime<chrono::Utc> {
        chrono::DateTime::from_timestamp_millis(millis).unwrap_or_else(chrono::Utc::now)
    }
}

/// Read a string column and parse it into a typed value (ids, enums).
pub(crate) fn parse_column<T>(row: &SqliteRow, column: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let raw: String = row.try_get(column)?;
    raw.parse::<T>()
        .map_err(|e| DbError::invalid_state(format!("column {}: {}", column, e)))
}

pub(crate) fn parse_optional_column<T>(row: &SqliteRow, column: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let raw: Option<String> = row.try_get(column)?;
    raw.map(|value| {
        value
            .parse::<T>()
            .map_err(|e| DbError::invalid_state(format!("column {}: {}", column, e)))
    })
    .transpose()
}

pub(crate) fn datetime_column(
    row: &SqliteRow,
    column: &str,
) -> Result<chrono::DateTime<chrono::Utc>> {
    let millis: i64 = row.try_get(column)?;
    Ok(TirthaDb::millis_to_datetime(millis))
}

pub(crate) fn optional_datetime_column(
    row: &SqliteRow,
    column: &str,
) -> Result<Option<chrono::DateTime<chrono::Utc>>> {
    let millis: Option<i64> = row.try_get(column)?;
    Ok(millis.map(TirthaDb::millis_to_datetime))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_open_creates_database() {
        let tmp = TempDir::new().unwrap();
        let db_path = tmp.path().join("nested").join("test.db");

        let db = TirthaDb::open(&db_path).await.unwrap();
        assert!(db_path.exists());

        db.close().await;
    }

    #[tokio::test]
    async fn test_open_existing_fails_if_not_exists() {
        let tmp = TempDir::new().unwrap();
        let db_path = tmp.path().join("nonexistent.db");

        let result = TirthaDb::open_existing(&db_path).await;
        assert!(matches!(result, Err(DbError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_reopen_keeps_schema() {
        let tmp = TempDir::new().unwrap();
        let db_path = tmp.path().join("test.db");

        TirthaDb::open(&db_path).await.unwrap().close().await;
        let db = TirthaDb::open_existing(&db_path).await.unwrap();
        let stats = db.queue_stats().await.unwrap();
        assert_eq!(stats.total, 0);
    }
}
