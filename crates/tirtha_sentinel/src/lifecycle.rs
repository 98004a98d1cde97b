//! Run Lifecycle Manager.
//!
//! Every status change is a compare-and-set in the store, so two writers
//! can never move one Run along two edges. Published artifacts always land
//! at `<models_root>/<site>/published/<site>_<run>.<ext>` by rename.

use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tirtha_db::{DbError, Run, TirthaDb};
use tirtha_ids::RunId;
use tirtha_protocol::naming;
use tirtha_protocol::{OrchestratorConfig, RunStatus, ViewerParams};
use tracing::{info, warn};

use crate::error::{OrchestratorError, Result};
use crate::fsops;
use crate::metrics::METRICS;

#[derive(Clone)]
pub struct RunLifecycle {
    db: TirthaDb,
    config: Arc<OrchestratorConfig>,
}

impl RunLifecycle {
    pub fn new(db: TirthaDb, config: Arc<OrchestratorConfig>) -> Self {
        Self { db, config }
    }

    /// Archived Runs resolve against the archive root, everything else
    /// against the models root.
    pub fn resolve_run_dir(&self, run: &Run) -> PathBuf {
        let base = if run.status == RunStatus::Archived {
            &self.config.paths.archive_root
        } else {
            &self.config.paths.models_root
        };
        base.join(&run.directory)
    }

    pub fn published_dir(&self, run: &Run) -> PathBuf {
        naming::published_dir(&self.config.paths.models_root, &run.site_id)
    }

    /// Current published artifact, if one was recorded.
    pub fn published_path(&self, run: &Run) -> Option<PathBuf> {
        run.published_file
            .as_ref()
            .map(|file| self.published_dir(run).join(file))
    }

    /// Copy `source` to the Run's published path: temp file, fsync, rename.
    /// The extension must be one the Run's kind allows.
    pub async fn publish_artifact(&self, run: &Run, source: &Path) -> Result<PathBuf> {
        let ext = naming::extension_of(source)
            .filter(|ext| run.kind.accepts_extension(ext))
            .ok_or_else(|| {
                OrchestratorError::invalid_input(format!(
                    "{} is not a valid {} artifact (allowed: {})",
                    source.display(),
                    run.kind,
                    run.kind.allowed_extensions().join(", ")
                ))
            })?;

        let dir = self.published_dir(run);
        let file_name = naming::published_file_name(&run.site_id, &run.id, &ext);
        let dest = dir.join(&file_name);
        let source = source.to_path_buf();
        let tag = run.id.short().to_string();
        let final_name = file_name.clone();
        let target = dest.clone();

        tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            let temp = fsops::stage_durable_copy(&source, &dir, &final_name, &tag)?;
            if let Err(e) = std::fs::rename(&temp, &target) {
                let _ = std::fs::remove_file(&temp);
                return Err(e);
            }
            fsops::sync_dir(&dir);
            Ok(())
        })
        .await
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))??;

        self.db.set_published_file(&run.id, &file_name).await?;
        info!(run_id = %run.id, path = %dest.display(), "Artifact published");
        Ok(dest)
    }

    async fn transition(
        &self,
        run_id: &RunId,
        from: RunStatus,
        to: RunStatus,
        note: Option<&str>,
    ) -> Result<Run> {
        self.db
            .transition_run(run_id, from, to, note)
            .await
            .map_err(|e| match e {
                DbError::InvalidState(_) => OrchestratorError::InvalidTransition {
                    run_id: run_id.clone(),
                    from,
                    to,
                },
                other => OrchestratorError::Db(other),
            })
    }

    pub async fn complete_run(&self, run_id: &RunId, note: &str) -> Result<Run> {
        let run = self
            .transition(run_id, RunStatus::Running, RunStatus::Done, Some(note))
            .await?;
        METRICS.inc_runs_done();
        Ok(run)
    }

    pub async fn fail_run(&self, run_id: &RunId, reason: &str) -> Result<Run> {
        let note = format!("error: {}", reason);
        let run = self
            .transition(run_id, RunStatus::Running, RunStatus::Error, Some(&note))
            .await?;
        METRICS.inc_runs_failed();
        Ok(run)
    }

    pub async fn cancel_run(&self, run_id: &RunId, reason: &str) -> Result<Run> {
        let note = format!("cancelled: {}", reason);
        self.transition(run_id, RunStatus::Running, RunStatus::Cancelled, Some(&note))
            .await
    }

    /// Move a Done Run's working directory to long-term storage.
    pub async fn archive_run(&self, run_id: &RunId) -> Result<Run> {
        let run = self.db.require_run(run_id).await?;
        if run.status != RunStatus::Done {
            return Err(OrchestratorError::InvalidTransition {
                run_id: run_id.clone(),
                from: run.status,
                to: RunStatus::Archived,
            });
        }

        let source = self.config.paths.models_root.join(&run.directory);
        let dest = self.config.paths.archive_root.join(&run.directory);
        let moved = if source.exists() {
            let (from, to) = (source.clone(), dest.clone());
            tokio::task::spawn_blocking(move || fsops::move_dir(&from, &to))
                .await
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))??;
            true
        } else {
            warn!(
                run_id = %run_id,
                dir = %source.display(),
                "Run directory missing; archiving record only"
            );
            false
        };

        let note = format!(
            "archived at {} to {}",
            Utc::now().to_rfc3339(),
            dest.display()
        );
        match self
            .transition(run_id, RunStatus::Done, RunStatus::Archived, Some(&note))
            .await
        {
            Ok(run) => {
                info!(run_id = %run_id, dir = %dest.display(), "Run archived");
                Ok(run)
            }
            Err(e) => {
                if moved {
                    if let Err(undo) = fsops::move_dir(&dest, &source) {
                        warn!(run_id = %run_id, "Could not move run directory back: {}", undo);
                    }
                }
                Err(e)
            }
        }
    }

    /// Move Runs stuck in `Running` past the tool timeout plus grace to
    /// `Error`. Returns the reaped Runs.
    pub async fn reap_stale_runs(&self) -> Result<Vec<Run>> {
        let limit = self.config.tools.stale_after();
        let cutoff = TirthaDb::now_millis() - limit.as_millis() as i64;
        let mut reaped = Vec::new();
        for run in self.db.stale_running_runs(cutoff).await? {
            let note = format!("reaped: exceeded {}s without finishing", limit.as_secs());
            match self
                .transition(&run.id, RunStatus::Running, RunStatus::Error, Some(&note))
                .await
            {
                Ok(run) => {
                    METRICS.inc_runs_reaped();
                    warn!(run_id = %run.id, kind = %run.kind, "Stale run reaped");
                    reaped.push(run);
                }
                // Finished while we were looking.
                Err(OrchestratorError::InvalidTransition { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(reaped)
    }

    /// Merge operator-supplied viewer parameters. At least one field must
    /// be set; values are stored as given.
    pub async fn update_viewer_params(&self, run_id: &RunId, update: &ViewerParams) -> Result<Run> {
        if update.is_empty() {
            return Err(OrchestratorError::invalid_input("no viewer parameters supplied"));
        }
        let run = self.db.require_run(run_id).await?;
        let mut params = run.viewer_params.clone();
        params.apply(update);
        self.db.set_viewer_params(run_id, &params).await?;
        self.db
            .append_run_note(
                run_id,
                &format!(
                    "viewer params updated at {}: {}",
                    Utc::now().to_rfc3339(),
                    update.updated_fields().join(", ")
                ),
            )
            .await?;
        Ok(self.db.require_run(run_id).await?)
    }
}
