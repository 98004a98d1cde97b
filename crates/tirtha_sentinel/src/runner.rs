//! Pipeline Runner: one reconstruction kind for one contribution.
//!
//! Delivery is at-least-once, so every entry point first asks the store
//! whether the (contribution, kind) pair already has a Run. The store's
//! partial unique index settles races between two workers.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tirtha_db::{ArkRecord, ContributionContext, NewRun, Run, TirthaDb};
use tirtha_ids::{ContributionId, RunId};
use tirtha_protocol::naming;
use tirtha_protocol::{GateStatus, OrchestratorConfig, ReconKind, ReconsType, RunStatus};
use tirtha_worker::{CancellationToken, ChainRequest, ToolContext, ToolExecutor};
use tracing::{info, warn};

use crate::ark::{mint_metadata, ArkMinter, ArkStore};
use crate::error::{KindFailure, OrchestratorError, Result};
use crate::lifecycle::RunLifecycle;
use crate::metrics::METRICS;
use crate::notify::{FailureNotice, NotificationFanout, SuccessNotice, STEP_IDENTIFIER_MINTING};
use crate::prerun::PrerunGate;

/// What one `ops_runner` call did.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// A new Run reached `Done` and got an identifier.
    Published { run_id: RunId, ark: String },
    /// The pair already has a successful Run.
    AlreadyDone { run_id: RunId },
    /// Another worker holds the pair.
    InProgress { run_id: RunId },
    /// Not attempted; the reason is logged.
    Skipped { reason: String },
}

impl RunOutcome {
    /// Whether the pair is settled and needs no more work.
    pub fn is_settled(&self) -> bool {
        matches!(self, RunOutcome::Published { .. } | RunOutcome::AlreadyDone { .. })
    }

    pub fn summary(&self) -> String {
        match self {
            RunOutcome::Published { run_id, ark } => format!("published {} ({})", run_id, ark),
            RunOutcome::AlreadyDone { run_id } => format!("already done {}", run_id),
            RunOutcome::InProgress { run_id } => format!("in progress {}", run_id),
            RunOutcome::Skipped { reason } => format!("skipped: {}", reason),
        }
    }
}

#[derive(Clone)]
pub struct PipelineRunner {
    db: TirthaDb,
    config: Arc<OrchestratorConfig>,
    prerun: PrerunGate,
    lifecycle: RunLifecycle,
    minter: Arc<ArkMinter<Arc<dyn ArkStore>>>,
    notifier: NotificationFanout,
    executor: Arc<dyn ToolExecutor>,
}

impl PipelineRunner {
    pub fn new(
        db: TirthaDb,
        config: Arc<OrchestratorConfig>,
        prerun: PrerunGate,
        lifecycle: RunLifecycle,
        minter: Arc<ArkMinter<Arc<dyn ArkStore>>>,
        notifier: NotificationFanout,
        executor: Arc<dyn ToolExecutor>,
    ) -> Self {
        Self {
            db,
            config,
            prerun,
            lifecycle,
            minter,
            notifier,
            executor,
        }
    }

    /// Run every kind in `recons`, each independently. The contribution is
    /// marked processed once every kind is settled.
    pub async fn run_recons(
        &self,
        contribution_id: &ContributionId,
        recons: ReconsType,
        cancel: &CancellationToken,
    ) -> Result<Vec<(ReconKind, RunOutcome)>> {
        self.run_recons_for_task(contribution_id, recons, None, cancel)
            .await
    }

    /// As [`run_recons`](Self::run_recons), renewing the claim on `task_id`
    /// before each kind after the first.
    pub async fn run_recons_for_task(
        &self,
        contribution_id: &ContributionId,
        recons: ReconsType,
        task_id: Option<i64>,
        cancel: &CancellationToken,
    ) -> Result<Vec<(ReconKind, RunOutcome)>> {
        let kinds = recons.kinds();
        let mut outcomes = Vec::with_capacity(kinds.len());
        let mut failures = Vec::new();
        let mut last_error = None;

        for (index, kind) in kinds.into_iter().enumerate() {
            if let (Some(task_id), true) = (task_id, index > 0) {
                if !self.db.renew_claim(task_id, TirthaDb::now_millis()).await? {
                    warn!(task_id, kind = %kind, "Task claim expired; another worker may pick it up");
                }
            }
            match self.ops_runner(contribution_id, kind, cancel).await {
                Ok(outcome) => outcomes.push((kind, outcome)),
                // Stop everything; the task goes back to the queue.
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => {
                    failures.push(KindFailure {
                        kind,
                        message: e.to_string(),
                        retryable: e.is_retryable(),
                    });
                    last_error = Some(e);
                }
            }
        }

        if failures.is_empty() {
            if outcomes.iter().all(|(_, outcome)| outcome.is_settled()) {
                self.db.set_contribution_processed(contribution_id, true).await?;
            }
            return Ok(outcomes);
        }

        match (recons, last_error) {
            (ReconsType::Only(_), Some(e)) => Err(e),
            _ => Err(OrchestratorError::ReconFailed {
                contribution_id: contribution_id.clone(),
                failures,
            }),
        }
    }

    /// Reconstruct one kind. Failures are reported to operators and then
    /// returned so the queue's accounting sees them.
    pub async fn ops_runner(
        &self,
        contribution_id: &ContributionId,
        kind: ReconKind,
        cancel: &CancellationToken,
    ) -> Result<RunOutcome> {
        let context = self.db.contribution_context(contribution_id).await?;
        if context.contribution.gate_status != GateStatus::Accepted {
            let reason = format!(
                "contribution is {} at the ingestion gate",
                context.contribution.gate_status
            );
            info!(
                contribution_id = %contribution_id,
                kind = %kind,
                "Not reconstructing: {}",
                reason
            );
            return Ok(RunOutcome::Skipped { reason });
        }

        if let Some(existing) = self.db.active_run_for_pair(contribution_id, kind).await? {
            return self.existing_outcome(&context, existing).await;
        }

        let decision = self.prerun.prerun_check(contribution_id, kind).await?;
        if !decision.proceed {
            METRICS.inc_prerun_rejections();
            return Ok(RunOutcome::Skipped {
                reason: decision.reason,
            });
        }

        let run_id = RunId::new();
        let new_run = NewRun {
            id: run_id.clone(),
            site_id: context.site.id.clone(),
            contribution_id: Some(contribution_id.clone()),
            kind,
            status: RunStatus::Running,
            directory: naming::run_dir_rel(&context.site.id, &run_id)
                .to_string_lossy()
                .into_owned(),
        };
        let run = match self.db.insert_run(&new_run).await {
            Ok(run) => run,
            Err(e) if e.is_constraint() => {
                // Lost the race to another delivery of the same trigger.
                return match self.db.active_run_for_pair(contribution_id, kind).await? {
                    Some(existing) => self.existing_outcome(&context, existing).await,
                    None => Err(e.into()),
                };
            }
            Err(e) => return Err(e.into()),
        };
        METRICS.inc_runs_started();
        self.db
            .append_run_note(&run.id, &format!("prerun: {}", decision.reason))
            .await?;
        info!(
            contribution_id = %contribution_id,
            run_id = %run.id,
            kind = %kind,
            "Run started"
        );

        let run_dir = self.lifecycle.resolve_run_dir(&run);
        let log_path = run_dir.join(naming::RUN_LOG_FILE);

        let executed = match self.prepare(&run, &run_dir).await {
            Ok(image_count) => {
                info!(run_id = %run.id, images = image_count, "Images staged");
                self.execute(&run, &run_dir, &log_path, cancel).await
            }
            Err(e) => Err(e),
        };

        match executed {
            Ok(output) => self.finish(&context, &run, &output).await,
            Err(e) => {
                self.abandon(&context, &run, &e, &log_path).await;
                Err(e)
            }
        }
    }

    async fn existing_outcome(
        &self,
        context: &ContributionContext,
        run: Run,
    ) -> Result<RunOutcome> {
        match run.status {
            RunStatus::Running => {
                info!(run_id = %run.id, kind = %run.kind, "Run already in progress");
                Ok(RunOutcome::InProgress { run_id: run.id })
            }
            _ => {
                // A delivery that died between Done and minting left the
                // Run without an identifier.
                if self.db.ark_for_run(&run.id).await?.is_none() && run.published_file.is_some() {
                    warn!(run_id = %run.id, "Successful run has no identifier; minting now");
                    self.mint_for(context, &run).await?;
                }
                info!(run_id = %run.id, kind = %run.kind, "Run already done");
                Ok(RunOutcome::AlreadyDone { run_id: run.id })
            }
        }
    }

    /// Bind the eligible images and contributors and stage the images.
    async fn prepare(&self, run: &Run, run_dir: &Path) -> Result<usize> {
        let images = self.db.eligible_images(&run.site_id).await?;
        let contributors = self.db.eligible_contributors(&run.site_id).await?;
        let image_ids: Vec<_> = images.iter().map(|image| image.id.clone()).collect();
        let contributor_ids: Vec<_> = contributors.iter().map(|c| c.id.clone()).collect();
        self.db.bind_run_images(&run.id, &image_ids).await?;
        self.db.bind_run_contributors(&run.id, &contributor_ids).await?;

        let images_dir = run_dir.join(naming::RUN_IMAGES_DIR);
        tokio::fs::create_dir_all(&images_dir).await?;
        tokio::fs::create_dir_all(run_dir.join(naming::RUN_OUTPUT_DIR)).await?;

        let mut staged = 0;
        for image in &images {
            let source = PathBuf::from(&image.path);
            let ext = naming::extension_of(&source).unwrap_or_else(|| "jpg".to_string());
            let dest = images_dir.join(format!("{}.{}", image.id, ext));
            match tokio::fs::copy(&source, &dest).await {
                Ok(_) => staged += 1,
                Err(e) => {
                    warn!(run_id = %run.id, image = %source.display(), "Image not staged: {}", e)
                }
            }
        }
        Ok(staged)
    }

    async fn execute(
        &self,
        run: &Run,
        run_dir: &Path,
        log_path: &Path,
        cancel: &CancellationToken,
    ) -> Result<PathBuf> {
        let output = run_dir.join(naming::RUN_OUTPUT_DIR).join(naming::published_file_name(
            &run.site_id,
            &run.id,
            run.kind.default_extension(),
        ));
        let tools = ToolContext {
            images_dir: run_dir.join(naming::RUN_IMAGES_DIR),
            run_dir: run_dir.to_path_buf(),
            output: output.clone(),
            max_iter: self.config.tools.gs_max_iter,
            site_id: run.site_id.to_string(),
            run_id: run.id.to_string(),
        };
        let request = ChainRequest {
            label: format!("{} {}", run.kind.ops_name(), run.id.short()),
            steps: tools.resolve(self.config.tools.chain(run.kind)),
            working_dir: run_dir.to_path_buf(),
            log_path: log_path.to_path_buf(),
            output,
            timeout: self.config.tools.timeout(),
        };
        let outcome = self.executor.run_chain(&request, cancel).await?;
        info!(
            run_id = %run.id,
            steps = outcome.steps_run,
            elapsed_secs = outcome.elapsed.as_secs(),
            "Tool chain finished"
        );
        Ok(outcome.output)
    }

    /// Publish, move to Done, mint, notify.
    async fn finish(
        &self,
        context: &ContributionContext,
        run: &Run,
        output: &Path,
    ) -> Result<RunOutcome> {
        let log_path = self.lifecycle.resolve_run_dir(run).join(naming::RUN_LOG_FILE);
        if let Err(e) = self.lifecycle.publish_artifact(run, output).await {
            self.abandon(context, run, &e, &log_path).await;
            return Err(e);
        }
        // The artifact is already public; a Run that cannot reach Done
        // still needs an operator.
        let run = match self
            .lifecycle
            .complete_run(&run.id, "done: artifact published")
            .await
        {
            Ok(run) => run,
            Err(e) => {
                self.abandon(context, run, &e, &log_path).await;
                return Err(e);
            }
        };
        let record = self.mint_for(context, &run).await?;

        let duration = run
            .duration()
            .and_then(|d| d.to_std().ok())
            .unwrap_or(Duration::ZERO);
        self.notifier
            .success(SuccessNotice {
                contribution_id: Some(context.contribution.id.clone()),
                site_id: context.site.id.clone(),
                site_name: context.site.name.clone(),
                contributor_email: Some(context.contributor.email.clone()),
                contributor_name: Some(context.contributor.name.clone()),
                op_type: run.kind.ops_name().to_string(),
                run_id: Some(run.id.clone()),
                output_url: Some(record.url.clone()),
                duration: Some(duration),
                identifier_url: Some(self.minter.resolver_url(&record)),
                identifier_id: Some(record.ark.clone()),
                recipients: Vec::new(),
            })
            .await;
        info!(run_id = %run.id, kind = %run.kind, ark = %record.ark, "Run published");

        Ok(RunOutcome::Published {
            run_id: run.id,
            ark: record.ark,
        })
    }

    /// Mint the identifier. A failure here leaves a Done Run without one;
    /// operators are told and the next delivery repairs it.
    async fn mint_for(&self, context: &ContributionContext, run: &Run) -> Result<ArkRecord> {
        let minted: std::result::Result<ArkRecord, tirtha_db::DbError> = async {
            let contributors: Vec<String> = self
                .db
                .run_contributors(&run.id)
                .await?
                .into_iter()
                .map(|c| c.name)
                .collect();
            let images = self.db.run_image_count(&run.id).await?;
            let base_url = &self.config.ark.base_url;
            let metadata = mint_metadata(base_url, &context.site, run, &contributors, images);
            let file = run.published_file.clone().unwrap_or_default();
            let url = naming::published_url(base_url, &run.site_id, &file);
            self.minter.mint(run, &url, metadata).await
        }
        .await;

        match minted {
            Ok(record) => Ok(record),
            Err(e) => {
                let err = OrchestratorError::Db(e);
                self.notifier
                    .failure(FailureNotice {
                        contribution_id: Some(context.contribution.id.clone()),
                        site_id: context.site.id.clone(),
                        site_name: context.site.name.clone(),
                        contributor_email: Some(context.contributor.email.clone()),
                        step: STEP_IDENTIFIER_MINTING.to_string(),
                        error: err.to_string(),
                        log_path: None,
                        run_id: Some(run.id.clone()),
                        op_type: Some(run.kind.ops_name().to_string()),
                        admin_url: String::new(),
                        recipients: Vec::new(),
                    })
                    .await;
                Err(err)
            }
        }
    }

    /// Move the Run off `Running` and tell operators. Partial artifacts stay
    /// in the Run directory. Cancellation is not reported; the task will be
    /// delivered again.
    async fn abandon(
        &self,
        context: &ContributionContext,
        run: &Run,
        err: &OrchestratorError,
        log_path: &Path,
    ) {
        if err.is_cancelled() {
            warn!(run_id = %run.id, kind = %run.kind, "Run cancelled: {}", err);
            if let Err(e) = self.lifecycle.cancel_run(&run.id, &err.to_string()).await {
                warn!(run_id = %run.id, "Could not mark run cancelled: {}", e);
            }
            return;
        }

        warn!(run_id = %run.id, kind = %run.kind, "Run failed: {}", err);
        if let Err(e) = self.lifecycle.fail_run(&run.id, &err.to_string()).await {
            warn!(run_id = %run.id, "Could not mark run failed: {}", e);
        }
        self.notifier
            .failure(FailureNotice {
                contribution_id: Some(context.contribution.id.clone()),
                site_id: context.site.id.clone(),
                site_name: context.site.name.clone(),
                contributor_email: Some(context.contributor.email.clone()),
                step: run.kind.ops_name().to_string(),
                error: err.to_string(),
                log_path: Some(log_path.to_path_buf()),
                run_id: Some(run.id.clone()),
                op_type: Some(run.kind.ops_name().to_string()),
                admin_url: String::new(),
                recipients: Vec::new(),
            })
            .await;
    }
}
