//! Guarded manual replacement of an archived Run's published output.
//!
//! Checks run before anything is touched. The swap itself is: stage the
//! new file next to the original and fsync it, rename the original to a
//! timestamped backup with owner-only permissions, rename the staged file
//! into place. At every point either the original or its backup exists.

use chrono::Utc;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tirtha_db::TirthaDb;
use tirtha_ids::RunId;
use tirtha_protocol::{naming, ReconKind, RunStatus};
use tracing::{error, info, warn};

use crate::error::Result;
use crate::fsops;
use crate::lifecycle::RunLifecycle;
use crate::metrics::METRICS;

#[derive(Debug, Error)]
pub enum ReplaceError {
    #[error("Run {run_id} is {status}; output can only be replaced on Archived runs")]
    NotArchived { run_id: RunId, status: RunStatus },

    #[error("'.{extension}' is not allowed for {kind} runs (allowed: {})", .kind.allowed_extensions().join(", "))]
    DisallowedExtension { kind: ReconKind, extension: String },

    #[error("Run {run_id} has no published output to replace")]
    NoPublishedFile { run_id: RunId },

    #[error("Replacement file not found: {}", .0.display())]
    SourceMissing(PathBuf),

    #[error("Published file missing: {}", .0.display())]
    MissingOriginal(PathBuf),

    #[error("Could not stage replacement (original untouched): {0}")]
    Staging(#[source] std::io::Error),

    #[error("Could not back up original (original untouched): {0}")]
    Backup(#[source] std::io::Error),

    #[error(
        "Could not move replacement into place: {source}. The original is preserved as backup {}",
        .backup.display()
    )]
    Swap {
        backup: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// What a successful replacement did.
#[derive(Debug, Clone)]
pub struct ReplaceReport {
    pub run_id: RunId,
    pub published: PathBuf,
    pub backup: PathBuf,
}

#[derive(Clone)]
pub struct ReplacementGuard {
    db: TirthaDb,
    lifecycle: RunLifecycle,
}

impl ReplacementGuard {
    pub fn new(db: TirthaDb, lifecycle: RunLifecycle) -> Self {
        Self { db, lifecycle }
    }

    pub async fn replace_output(
        &self,
        run_id: &RunId,
        new_file: &Path,
        operator: &str,
    ) -> Result<ReplaceReport> {
        let run = self.db.require_run(run_id).await?;
        if run.status != RunStatus::Archived {
            return Err(ReplaceError::NotArchived {
                run_id: run_id.clone(),
                status: run.status,
            }
            .into());
        }

        let extension = naming::extension_of(new_file).unwrap_or_default();
        if !run.kind.accepts_extension(&extension) {
            return Err(ReplaceError::DisallowedExtension {
                kind: run.kind,
                extension,
            }
            .into());
        }

        let original = self
            .lifecycle
            .published_path(&run)
            .ok_or_else(|| ReplaceError::NoPublishedFile {
                run_id: run_id.clone(),
            })?;
        if !new_file.is_file() {
            return Err(ReplaceError::SourceMissing(new_file.to_path_buf()).into());
        }
        if !original.is_file() {
            return Err(ReplaceError::MissingOriginal(original).into());
        }

        let now = Utc::now();
        let file_name = original
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let backup = original.with_file_name(naming::backup_file_name(&file_name, now));
        let source = new_file.to_path_buf();
        let (target, backup_path) = (original.clone(), backup.clone());
        let tag = format!("replace-{}", now.timestamp_millis());

        tokio::task::spawn_blocking(move || swap(&source, &target, &backup_path, &file_name, &tag))
            .await
            .map_err(|e| {
                ReplaceError::Staging(std::io::Error::new(std::io::ErrorKind::Other, e))
            })??;

        let backup_name = backup
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.db
            .append_run_note(
                run_id,
                &format!(
                    "output replaced by {} at {}; previous output kept as {}",
                    operator,
                    now.to_rfc3339(),
                    backup_name
                ),
            )
            .await?;
        METRICS.inc_replacements();
        info!(run_id = %run_id, operator, backup = %backup.display(), "Published output replaced");

        Ok(ReplaceReport {
            run_id: run_id.clone(),
            published: original,
            backup,
        })
    }
}

fn swap(
    source: &Path,
    original: &Path,
    backup: &Path,
    file_name: &str,
    tag: &str,
) -> std::result::Result<(), ReplaceError> {
    swap_with(source, original, backup, file_name, tag, |from, to| {
        std::fs::rename(from, to)
    })
}

fn swap_with(
    source: &Path,
    original: &Path,
    backup: &Path,
    file_name: &str,
    tag: &str,
    rename: impl Fn(&Path, &Path) -> std::io::Result<()>,
) -> std::result::Result<(), ReplaceError> {
    let dir = original
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));

    let staged =
        fsops::stage_durable_copy(source, &dir, file_name, tag).map_err(ReplaceError::Staging)?;

    if let Err(e) = rename(original, backup) {
        let _ = std::fs::remove_file(&staged);
        return Err(ReplaceError::Backup(e));
    }
    if let Err(e) = fsops::restrict_permissions(backup) {
        warn!(backup = %backup.display(), "Could not restrict backup permissions: {}", e);
    }

    if let Err(e) = rename(&staged, original) {
        error!(
            original = %original.display(),
            backup = %backup.display(),
            "Replacement swap failed; original preserved as backup"
        );
        let _ = std::fs::remove_file(&staged);
        return Err(ReplaceError::Swap {
            backup: backup.to_path_buf(),
            source: e,
        });
    }
    fsops::sync_dir(&dir);
    Ok(())
}
