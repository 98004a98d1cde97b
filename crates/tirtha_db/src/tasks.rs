//! Persisted task queue.
//!
//! Delivery is at-least-once: a claimed task whose worker dies is handed
//! out again once its lease expires, so handlers must tolerate duplicates.

use crate::error::{DbError, Result};
use crate::types::*;
use crate::{datetime_column, optional_datetime_column, parse_column, TirthaDb};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tirtha_ids::ContributionId;
use tirtha_protocol::{TaskKind, TaskStatus};
use tracing::{debug, warn};

impl TirthaDb {
    /// Enqueue a task.
    ///
    /// A `recon` task for a (contribution, recons) pair that is still queued
    /// is not duplicated; the existing task id is returned instead.
    pub async fn enqueue_task(&self, task: &NewTask) -> Result<i64> {
        let mut tx = self.pool.begin().await?;

        if task.kind == TaskKind::Recon {
            let existing: Option<i64> = sqlx::query_scalar(
                r#"
                SELECT id FROM tasks
                WHERE kind = ? AND contribution_id = ? AND recons = ? AND status = 'QUEUED'
                ORDER BY id
                LIMIT 1
                "#,
            )
            .bind(task.kind.as_str())
            .bind(task.contribution_id.as_str())
            .bind(task.recons.as_str())
            .fetch_optional(&mut *tx)
            .await?;

            if let Some(id) = existing {
                tx.rollback().await?;
                debug!(task_id = id, contribution_id = %task.contribution_id, "Recon task already queued");
                return Ok(id);
            }
        }

        let result = sqlx::query(
            r#"
            INSERT INTO tasks (kind, contribution_id, recons, status, eta, max_attempts, created_at)
            VALUES (?, ?, ?, 'QUEUED', ?, ?, ?)
            "#,
        )
        .bind(task.kind.as_str())
        .bind(task.contribution_id.as_str())
        .bind(task.recons.as_str())
        .bind(task.eta.timestamp_millis())
        .bind(task.max_attempts.max(1) as i64)
        .bind(Self::now_millis())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(result.last_insert_rowid())
    }

    /// Claim the next due task (eta <= now), oldest eta first.
    pub async fn pop_task(&self, now_millis: i64) -> Result<Option<Task>> {
        let mut tx = self.pool.begin().await?;

        let task_id: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT id FROM tasks
            WHERE status = 'QUEUED' AND eta <= ?
            ORDER BY eta ASC, id ASC
            LIMIT 1
            "#,
        )
        .bind(now_millis)
        .fetch_optional(&mut *tx)
        .await?;

        let task_id = match task_id {
            Some(id) => id,
            None => {
                tx.rollback().await?;
                return Ok(None);
            }
        };

        let claimed = sqlx::query(
            r#"
            UPDATE tasks SET
                status = 'RUNNING',
                claim_time = ?,
                attempts = attempts + 1
            WHERE id = ? AND status = 'QUEUED'
            "#,
        )
        .bind(now_millis)
        .bind(task_id)
        .execute(&mut *tx)
        .await?;

        if claimed.rows_affected() == 0 {
            // Another worker won the race
            tx.rollback().await?;
            return Ok(None);
        }

        tx.commit().await?;
        self.get_task(task_id).await
    }

    pub async fn get_task(&self, id: i64) -> Result<Option<Task>> {
        let row = sqlx::query("SELECT * FROM tasks WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_task).transpose()
    }

    /// Most recent tasks first.
    pub async fn list_tasks(&self, status: Option<TaskStatus>, limit: usize) -> Result<Vec<Task>> {
        let mut builder = sqlx::QueryBuilder::new("SELECT * FROM tasks");
        if let Some(status) = status {
            builder.push(" WHERE status = ").push_bind(status.as_str());
        }
        builder.push(" ORDER BY id DESC LIMIT ").push_bind(limit as i64);
        let rows = builder.build().fetch_all(&self.pool).await?;
        rows.iter().map(row_to_task).collect()
    }

    pub async fn tasks_for_contribution(&self, contribution_id: &ContributionId) -> Result<Vec<Task>> {
        let rows = sqlx::query("SELECT * FROM tasks WHERE contribution_id = ? ORDER BY id")
            .bind(contribution_id.as_str())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_task).collect()
    }

    pub async fn complete_task(&self, id: i64, summary: Option<&str>) -> Result<()> {
        self.finish_task(id, TaskStatus::Completed, summary, None).await
    }

    pub async fn fail_task(&self, id: i64, error: &str) -> Result<()> {
        self.finish_task(id, TaskStatus::Failed, None, Some(error)).await
    }

    /// Settle a task. A task whose claim expired and that went back to the
    /// queue can still be settled by the worker that held it; the outcome of
    /// the work it actually did wins over the pending redelivery.
    async fn finish_task(
        &self,
        id: i64,
        status: TaskStatus,
        summary: Option<&str>,
        error: Option<&str>,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE tasks SET
                status = ?,
                end_time = ?,
                result_summary = COALESCE(?, result_summary),
                last_error = COALESCE(?, last_error)
            WHERE id = ? AND status IN ('RUNNING', 'QUEUED')
            "#,
        )
        .bind(status.as_str())
        .bind(Self::now_millis())
        .bind(summary)
        .bind(error)
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::invalid_state(format!(
                "task {} is already settled; cannot mark {}",
                id, status
            )));
        }
        Ok(())
    }

    /// Push a running task's claim time forward so housekeeping does not
    /// hand it to another worker. Returns false once the claim was lost.
    pub async fn renew_claim(&self, id: i64, now_millis: i64) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE tasks SET claim_time = ? WHERE id = ? AND status = 'RUNNING'",
        )
        .bind(now_millis)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Put a running task back in the queue, not deliverable before `eta`.
    pub async fn requeue_task(&self, id: i64, eta_millis: i64, error: &str) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE tasks SET
                status = 'QUEUED',
                eta = ?,
                claim_time = NULL,
                last_error = ?
            WHERE id = ? AND status = 'RUNNING'
            "#,
        )
        .bind(eta_millis)
        .bind(error)
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::invalid_state(format!("task {} is not running", id)));
        }
        Ok(())
    }

    /// Return tasks claimed before `claimed_before` (millis) to the queue.
    pub async fn recover_expired_claims(&self, claimed_before: i64) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE tasks SET
                status = 'QUEUED',
                claim_time = NULL,
                last_error = 'claim expired; redelivered'
            WHERE status = 'RUNNING' AND claim_time < ?
            "#,
        )
        .bind(claimed_before)
        .execute(&self.pool)
        .await?;

        let recovered = result.rows_affected();
        if recovered > 0 {
            warn!(recovered, "Recovered tasks with expired claims");
        }
        Ok(recovered)
    }

    pub async fn queue_stats(&self) -> Result<QueueStats> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) as total,
                COALESCE(SUM(CASE WHEN status = 'QUEUED' THEN 1 ELSE 0 END), 0) as queued,
                COALESCE(SUM(CASE WHEN status = 'RUNNING' THEN 1 ELSE 0 END), 0) as running,
                COALESCE(SUM(CASE WHEN status = 'COMPLETED' THEN 1 ELSE 0 END), 0) as completed,
                COALESCE(SUM(CASE WHEN status = 'FAILED' THEN 1 ELSE 0 END), 0) as failed
            FROM tasks
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(QueueStats {
            total: row.get::<i64, _>("total") as u64,
            queued: row.get::<i64, _>("queued") as u64,
            running: row.get::<i64, _>("running") as u64,
            completed: row.get::<i64, _>("completed") as u64,
            failed: row.get::<i64, _>("failed") as u64,
        })
    }
}

fn row_to_task(row: &SqliteRow) -> Result<Task> {
    Ok(Task {
        id: row.try_get("id")?,
        kind: parse_column(row, "kind")?,
        contribution_id: parse_column(row, "contribution_id")?,
        recons: parse_column(row, "recons")?,
        status: parse_column(row, "status")?,
        eta: datetime_column(row, "eta")?,
        attempts: row.try_get::<i64, _>("attempts")? as u32,
        max_attempts: row.try_get::<i64, _>("max_attempts")? as u32,
        created_at: datetime_column(row, "created_at")?,
        claim_time: optional_datetime_column(row, "claim_time")?,
        end_time: optional_datetime_column(row, "end_time")?,
        last_error: row.try_get("last_error")?,
        result_summary: row.try_get("result_summary")?,
    })
}

/// Queue statistics
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct QueueStats {
    pub total: u64,
    pub queued: u64,
    pub running: u64,
    pub completed: u64,
    pub failed: u64,
}
