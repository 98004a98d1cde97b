//! Database schema creation for all Tirtha tables.
//!
//! All CREATE TABLE statements live here - single source of truth.

use crate::error::Result;
use crate::TirthaDb;
use tracing::info;

impl TirthaDb {
    /// Ensure all tables exist.
    pub(crate) async fn ensure_schema(&self) -> Result<()> {
        // WAL lets the CLI read while a worker writes
        sqlx::query("PRAGMA journal_mode=WAL")
            .execute(&self.pool)
            .await?;
        sqlx::query("PRAGMA synchronous=NORMAL")
            .execute(&self.pool)
            .await?;
        sqlx::query("PRAGMA foreign_keys=ON")
            .execute(&self.pool)
            .await?;
        sqlx::query("PRAGMA busy_timeout=5000")
            .execute(&self.pool)
            .await?;

        self.create_site_tables().await?;
        self.create_run_tables().await?;
        self.create_queue_tables().await?;

        info!("Database schema verified");
        Ok(())
    }

    /// Sites, contributors, contributions and their images.
    async fn create_site_tables(&self) -> Result<()> {
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS sites (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                verbose_id TEXT NOT NULL UNIQUE,
                district TEXT NOT NULL DEFAULT '',
                state TEXT NOT NULL DEFAULT '',
                country TEXT NOT NULL DEFAULT '',
                description TEXT NOT NULL DEFAULT '',
                thumbnail TEXT,
                completed INTEGER NOT NULL DEFAULT 0,
                hidden INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )"#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS contributors (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                email TEXT NOT NULL UNIQUE,
                created_at INTEGER NOT NULL
            )"#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS contributions (
                id TEXT PRIMARY KEY,
                site_id TEXT NOT NULL REFERENCES sites(id),
                contributor_id TEXT NOT NULL REFERENCES contributors(id),
                submitted_at INTEGER NOT NULL,
                processed INTEGER NOT NULL DEFAULT 0,
                processed_at INTEGER,
                gate_status TEXT NOT NULL DEFAULT 'pending',
                gate_reason TEXT
            )"#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS images (
                id TEXT PRIMARY KEY,
                contribution_id TEXT NOT NULL REFERENCES contributions(id),
                path TEXT NOT NULL,
                label TEXT NOT NULL DEFAULT 'unchecked',
                remark TEXT,
                created_at INTEGER NOT NULL
            )"#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_contributions_site ON contributions(site_id)",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_images_contribution ON images(contribution_id)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Runs, their bindings and identifier records.
    async fn create_run_tables(&self) -> Result<()> {
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS runs (
                id TEXT PRIMARY KEY,
                site_id TEXT NOT NULL REFERENCES sites(id),
                contribution_id TEXT REFERENCES contributions(id),
                kind TEXT NOT NULL,
                status TEXT NOT NULL,
                started_at INTEGER NOT NULL,
                ended_at INTEGER,
                directory TEXT NOT NULL,
                published_file TEXT,
                notes TEXT NOT NULL DEFAULT '',
                viewer_params TEXT NOT NULL DEFAULT '{}',
                updated_at INTEGER NOT NULL
            )"#,
        )
        .execute(&self.pool)
        .await?;

        // One live-or-successful Run per (contribution, kind); failed Runs
        // do not block a re-trigger. Manual runs have no contribution and
        // NULLs never collide.
        sqlx::query(
            r#"CREATE UNIQUE INDEX IF NOT EXISTS idx_runs_active_pair
               ON runs(contribution_id, kind)
               WHERE status IN ('Running', 'Done', 'Archived')"#,
        )
        .execute(&self.pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_runs_site ON runs(site_id)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_runs_status ON runs(status)")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS run_images (
                run_id TEXT NOT NULL REFERENCES runs(id),
                image_id TEXT NOT NULL REFERENCES images(id),
                PRIMARY KEY (run_id, image_id)
            )"#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS run_contributors (
                run_id TEXT NOT NULL REFERENCES runs(id),
                contributor_id TEXT NOT NULL REFERENCES contributors(id),
                PRIMARY KEY (run_id, contributor_id)
            )"#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS arks (
                ark TEXT PRIMARY KEY,
                naan INTEGER NOT NULL,
                shoulder TEXT NOT NULL,
                assigned_name TEXT NOT NULL,
                url TEXT NOT NULL,
                metadata TEXT NOT NULL,
                collisions INTEGER NOT NULL DEFAULT 0,
                run_id TEXT NOT NULL UNIQUE REFERENCES runs(id),
                created_at INTEGER NOT NULL
            )"#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// The persisted task queue.
    async fn create_queue_tables(&self) -> Result<()> {
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS tasks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                kind TEXT NOT NULL,
                contribution_id TEXT NOT NULL,
                recons TEXT NOT NULL DEFAULT 'all',
                status TEXT NOT NULL DEFAULT 'QUEUED',
                eta INTEGER NOT NULL,
                attempts INTEGER NOT NULL DEFAULT 0,
                max_attempts INTEGER NOT NULL DEFAULT 1,
                created_at INTEGER NOT NULL,
                claim_time INTEGER,
                end_time INTEGER,
                last_error TEXT,
                result_summary TEXT
            )"#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_tasks_status_eta ON tasks(status, eta)")
            .execute(&self.pool)
            .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_tasks_contribution ON tasks(contribution_id, kind)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
