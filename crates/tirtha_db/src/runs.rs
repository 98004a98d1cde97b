//! Run records, their image/contributor bindings and state transitions.

use crate::error::{DbError, Result};
use crate::sites::row_to_contributor;
use crate::types::*;
use crate::{datetime_column, optional_datetime_column, parse_column, parse_optional_column, TirthaDb};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tirtha_ids::{ContributionId, ContributorId, ImageId, RunId};
use tirtha_protocol::{ReconKind, RunStatus, ViewerParams};

impl TirthaDb {
    /// Insert a Run. A second live-or-successful Run for the same
    /// (contribution, kind) pair fails with [`DbError::Constraint`].
    pub async fn insert_run(&self, run: &NewRun) -> Result<Run> {
        let now = Self::now_millis();
        let ended_at = run.status.is_terminal().then_some(now);
        sqlx::query(
            r#"
            INSERT INTO runs (id, site_id, contribution_id, kind, status,
                              started_at, ended_at, directory, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(run.id.as_str())
        .bind(run.site_id.as_str())
        .bind(run.contribution_id.as_ref().map(|id| id.as_str()))
        .bind(run.kind.as_str())
        .bind(run.status.as_str())
        .bind(now)
        .bind(ended_at)
        .bind(&run.directory)
        .bind(now)
        .execute(&self.pool)
        .await?;

        self.get_run(&run.id)
            .await?
            .ok_or_else(|| DbError::not_found(format!("run {}", run.id)))
    }

    pub async fn get_run(&self, id: &RunId) -> Result<Option<Run>> {
        let row = sqlx::query("SELECT * FROM runs WHERE id = ?")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_run).transpose()
    }

    /// Fetch a Run or fail with `NotFound`.
    pub async fn require_run(&self, id: &RunId) -> Result<Run> {
        self.get_run(id)
            .await?
            .ok_or_else(|| DbError::not_found(format!("run {}", id)))
    }

    /// All Runs ever created for a (contribution, kind) pair, newest first.
    pub async fn runs_for_pair(
        &self,
        contribution_id: &ContributionId,
        kind: ReconKind,
    ) -> Result<Vec<Run>> {
        let rows = sqlx::query(
            "SELECT * FROM runs WHERE contribution_id = ? AND kind = ? ORDER BY started_at DESC",
        )
        .bind(contribution_id.as_str())
        .bind(kind.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_run).collect()
    }

    /// The Run currently occupying the pair (Running, Done or Archived), if any.
    pub async fn active_run_for_pair(
        &self,
        contribution_id: &ContributionId,
        kind: ReconKind,
    ) -> Result<Option<Run>> {
        let row = sqlx::query(
            r#"
            SELECT * FROM runs
            WHERE contribution_id = ? AND kind = ?
              AND status IN ('Running', 'Done', 'Archived')
            LIMIT 1
            "#,
        )
        .bind(contribution_id.as_str())
        .bind(kind.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_run).transpose()
    }

    pub async fn list_runs(&self, filter: &RunFilter) -> Result<Vec<Run>> {
        let mut builder = sqlx::QueryBuilder::new("SELECT * FROM runs WHERE 1=1");
        if let Some(site_id) = &filter.site_id {
            builder.push(" AND site_id = ").push_bind(site_id.as_str().to_string());
        }
        if let Some(status) = filter.status {
            builder.push(" AND status = ").push_bind(status.as_str());
        }
        if let Some(kind) = filter.kind {
            builder.push(" AND kind = ").push_bind(kind.as_str());
        }
        builder.push(" ORDER BY started_at DESC");
        if let Some(limit) = filter.limit {
            builder.push(" LIMIT ").push_bind(limit as i64);
        }

        let rows = builder.build().fetch_all(&self.pool).await?;
        rows.iter().map(row_to_run).collect()
    }

    /// Runs still `Running` that started before `started_before` (millis).
    pub async fn stale_running_runs(&self, started_before: i64) -> Result<Vec<Run>> {
        let rows = sqlx::query(
            "SELECT * FROM runs WHERE status = 'Running' AND started_at < ? ORDER BY started_at",
        )
        .bind(started_before)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_run).collect()
    }

    /// Compare-and-set status transition along a documented edge.
    ///
    /// Returns `InvalidState` when the edge is not allowed or when the Run is
    /// no longer in `from` (another writer got there first). An optional
    /// note is appended to the audit trail in the same statement.
    pub async fn transition_run(
        &self,
        id: &RunId,
        from: RunStatus,
        to: RunStatus,
        note: Option<&str>,
    ) -> Result<Run> {
        if !from.can_transition_to(to) {
            return Err(DbError::invalid_state(format!(
                "run {}: transition {} -> {} is not allowed",
                id, from, to
            )));
        }

        let now = Self::now_millis();
        let ended_at = (from == RunStatus::Running).then_some(now);
        let result = sqlx::query(
            r#"
            UPDATE runs SET
                status = ?,
                ended_at = COALESCE(?, ended_at),
                notes = CASE
                    WHEN ? IS NULL THEN notes
                    WHEN notes = '' THEN ?
                    ELSE notes || char(10) || ?
                END,
                updated_at = ?
            WHERE id = ? AND status = ?
            "#,
        )
        .bind(to.as_str())
        .bind(ended_at)
        .bind(note)
        .bind(note)
        .bind(note)
        .bind(now)
        .bind(id.as_str())
        .bind(from.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            let current = self.require_run(id).await?;
            return Err(DbError::invalid_state(format!(
                "run {}: expected status {}, found {}",
                id, from, current.status
            )));
        }

        self.require_run(id).await
    }

    /// Append one line to the Run's notes. Existing notes are never rewritten.
    pub async fn append_run_note(&self, id: &RunId, note: &str) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE runs SET
                notes = CASE WHEN notes = '' THEN ? ELSE notes || char(10) || ? END,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(note)
        .bind(note)
        .bind(Self::now_millis())
        .bind(id.as_str())
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::not_found(format!("run {}", id)));
        }
        Ok(())
    }

    pub async fn set_published_file(&self, id: &RunId, file_name: &str) -> Result<()> {
        sqlx::query("UPDATE runs SET published_file = ?, updated_at = ? WHERE id = ?")
            .bind(file_name)
            .bind(Self::now_millis())
            .bind(id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn set_viewer_params(&self, id: &RunId, params: &ViewerParams) -> Result<()> {
        let json = serde_json::to_string(params)?;
        let result = sqlx::query("UPDATE runs SET viewer_params = ?, updated_at = ? WHERE id = ?")
            .bind(json)
            .bind(Self::now_millis())
            .bind(id.as_str())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::not_found(format!("run {}", id)));
        }
        Ok(())
    }

    // ========================================================================
    // Bindings
    // ========================================================================

    pub async fn bind_run_images(&self, id: &RunId, images: &[ImageId]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for image in images {
            sqlx::query("INSERT OR IGNORE INTO run_images (run_id, image_id) VALUES (?, ?)")
                .bind(id.as_str())
                .bind(image.as_str())
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn bind_run_contributors(&self, id: &RunId, contributors: &[ContributorId]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for contributor in contributors {
            sqlx::query(
                "INSERT OR IGNORE INTO run_contributors (run_id, contributor_id) VALUES (?, ?)",
            )
            .bind(id.as_str())
            .bind(contributor.as_str())
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn run_image_count(&self, id: &RunId) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM run_images WHERE run_id = ?")
            .bind(id.as_str())
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    pub async fn run_contributors(&self, id: &RunId) -> Result<Vec<Contributor>> {
        let rows = sqlx::query(
            r#"
            SELECT p.* FROM contributors p
            JOIN run_contributors rc ON rc.contributor_id = p.id
            WHERE rc.run_id = ?
            ORDER BY p.name
            "#,
        )
        .bind(id.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_contributor).collect()
    }
}

fn row_to_run(row: &SqliteRow) -> Result<Run> {
    let viewer_json: String = row.try_get("viewer_params")?;
    let viewer_params = if viewer_json.trim().is_empty() {
        ViewerParams::default()
    } else {
        serde_json::from_str(&viewer_json)?
    };

    Ok(Run {
        id: parse_column(row, "id")?,
        site_id: parse_column(row, "site_id")?,
        contribution_id: parse_optional_column(row, "contribution_id")?,
        kind: parse_column(row, "kind")?,
        status: parse_column(row, "status")?,
        started_at: datetime_column(row, "started_at")?,
        ended_at: optional_datetime_column(row, "ended_at")?,
        directory: row.try_get("directory")?,
        published_file: row.try_get("published_file")?,
        notes: row.try_get("notes")?,
        viewer_params,
    })
}
