//! Operator-created Runs from a ready-made artifact.
//!
//! Skips the gates and the tool chains entirely: the file is published as
//! given and the Run gets an identifier like any other.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tirtha_db::{ArkRecord, NewRun, Run, TirthaDb};
use tirtha_ids::RunId;
use tirtha_protocol::naming;
use tirtha_protocol::{OrchestratorConfig, ReconKind, RunStatus};
use tracing::info;

use crate::ark::{mint_metadata, ArkMinter, ArkStore};
use crate::error::{OrchestratorError, Result};
use crate::lifecycle::RunLifecycle;

#[derive(Debug, Clone)]
pub struct ManualRunRequest {
    /// Site id or verbose id.
    pub site: String,
    pub file: PathBuf,
    /// Defaults to the primary operator address.
    pub contributor_email: Option<String>,
    /// Overrides the configured NOID length.
    pub noid_len: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct ManualRunReport {
    pub run: Run,
    pub published: PathBuf,
    pub ark: ArkRecord,
    pub resolver_url: String,
}

#[derive(Clone)]
pub struct ManualRunCreator {
    db: TirthaDb,
    config: Arc<OrchestratorConfig>,
    lifecycle: RunLifecycle,
    minter: Arc<ArkMinter<Arc<dyn ArkStore>>>,
}

impl ManualRunCreator {
    pub fn new(
        db: TirthaDb,
        config: Arc<OrchestratorConfig>,
        lifecycle: RunLifecycle,
        minter: Arc<ArkMinter<Arc<dyn ArkStore>>>,
    ) -> Self {
        Self {
            db,
            config,
            lifecycle,
            minter,
        }
    }

    pub async fn create_manual_run(&self, request: &ManualRunRequest) -> Result<ManualRunReport> {
        let file = request.file.as_path();
        if !file.is_file() {
            return Err(OrchestratorError::not_found(format!(
                "file {}",
                file.display()
            )));
        }
        let site = self
            .db
            .find_site(&request.site)
            .await?
            .ok_or_else(|| OrchestratorError::not_found(format!("site {}", request.site)))?;
        let kind = infer_kind(file)?;

        // Validate the contributor before creating anything.
        let email = request
            .contributor_email
            .clone()
            .unwrap_or_else(|| self.config.notify.primary_admin_email().to_string());
        let contributor = match self.db.contributor_by_email(&email).await? {
            Some(contributor) => contributor,
            None if self.is_operator(&email) => {
                self.db
                    .upsert_contributor(&self.config.notify.admin_name, &email)
                    .await?
            }
            None => {
                return Err(OrchestratorError::not_found(format!(
                    "contributor with email {}",
                    email
                )))
            }
        };

        let run_id = RunId::new();
        let run = self
            .db
            .insert_run(&NewRun {
                id: run_id.clone(),
                site_id: site.id.clone(),
                contribution_id: None,
                kind,
                status: RunStatus::Manual,
                directory: naming::run_dir_rel(&site.id, &run_id)
                    .to_string_lossy()
                    .into_owned(),
            })
            .await?;
        self.db
            .bind_run_contributors(&run.id, &[contributor.id.clone()])
            .await?;

        let published = self.lifecycle.publish_artifact(&run, file).await?;
        self.db
            .append_run_note(
                &run.id,
                &format!("manual run from {} for {}", file.display(), contributor.email),
            )
            .await?;
        let run = self.db.require_run(&run.id).await?;

        let base_url = &self.config.ark.base_url;
        let metadata = mint_metadata(base_url, &site, &run, &[contributor.name.clone()], 0);
        let url = naming::published_url(
            base_url,
            &site.id,
            run.published_file.as_deref().unwrap_or_default(),
        );
        let noid_len = request.noid_len.unwrap_or(self.minter.config().noid_len);
        let ark = self
            .minter
            .mint_with_len(&run, &url, metadata, noid_len)
            .await?;
        let resolver_url = self.minter.resolver_url(&ark);

        info!(
            run_id = %run.id,
            site = %site.verbose_id,
            kind = %kind,
            ark = %ark.ark,
            collisions = ark.collisions,
            "Manual run created"
        );
        Ok(ManualRunReport {
            run,
            published,
            ark,
            resolver_url,
        })
    }

    fn is_operator(&self, email: &str) -> bool {
        self.config
            .notify
            .admin_emails
            .iter()
            .any(|admin| admin.eq_ignore_ascii_case(email))
    }
}

/// `glb`/`gltf` → aV, `splat` → GS.
pub fn infer_kind(file: &Path) -> Result<ReconKind> {
    naming::extension_of(file)
        .and_then(|ext| ReconKind::from_extension(&ext))
        .ok_or_else(|| {
            OrchestratorError::invalid_input(format!(
                "unsupported file type {}; provide a .glb, .gltf or .splat file",
                file.display()
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_follows_extension() {
        assert_eq!(infer_kind(Path::new("a/model.GLB")).unwrap(), ReconKind::Av);
        assert_eq!(infer_kind(Path::new("model.gltf")).unwrap(), ReconKind::Av);
        assert_eq!(infer_kind(Path::new("cloud.splat")).unwrap(), ReconKind::Gs);
        assert!(infer_kind(Path::new("mesh.obj")).is_err());
        assert!(infer_kind(Path::new("noext")).is_err());
    }
}
