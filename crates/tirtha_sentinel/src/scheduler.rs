//! Scheduler: gate a contribution now, reconstruct it later.
//!
//! The debounce delay is a queue-level `eta`, not a sleep. Contributions
//! that arrive while another Run is going are picked up by the next cycle.

use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use tirtha_db::{NewTask, TirthaDb};
use tirtha_ids::ContributionId;
use tirtha_protocol::{OrchestratorConfig, ReconsType, TaskKind};
use tracing::{info, warn};

use crate::error::{OrchestratorError, Result};
use crate::gate::{GateReport, IngestionGate};
use crate::notify::{FailureNotice, NotificationFanout, OP_IMAGE_OPS, STEP_IMAGE_PROCESSING};

/// A reconstruction trigger waiting in the queue.
#[derive(Debug, Clone)]
pub struct Scheduled {
    pub task_id: i64,
    pub eta: chrono::DateTime<Utc>,
    pub report: GateReport,
}

#[derive(Clone)]
pub struct Scheduler {
    db: TirthaDb,
    gate: IngestionGate,
    notifier: NotificationFanout,
    config: Arc<OrchestratorConfig>,
}

impl Scheduler {
    pub fn new(
        db: TirthaDb,
        gate: IngestionGate,
        notifier: NotificationFanout,
        config: Arc<OrchestratorConfig>,
    ) -> Self {
        Self {
            db,
            gate,
            notifier,
            config,
        }
    }

    fn new_task(
        &self,
        kind: TaskKind,
        contribution_id: &ContributionId,
        recons: ReconsType,
        eta: chrono::DateTime<Utc>,
    ) -> NewTask {
        NewTask {
            kind,
            contribution_id: contribution_id.clone(),
            recons,
            eta,
            max_attempts: self.config.retry.max_attempts.max(1),
        }
    }

    /// Queue image processing for a freshly submitted contribution.
    pub async fn submit(&self, contribution_id: &ContributionId, recons: ReconsType) -> Result<i64> {
        // Surface a bad id here rather than in a worker.
        self.db
            .get_contribution(contribution_id)
            .await?
            .ok_or_else(|| {
                OrchestratorError::not_found(format!("contribution {}", contribution_id))
            })?;
        let task = self.new_task(TaskKind::ImageOps, contribution_id, recons, Utc::now());
        let task_id = self.db.enqueue_task(&task).await?;
        info!(contribution_id = %contribution_id, task_id, recons = %recons, "Contribution submitted");
        Ok(task_id)
    }

    /// Operator re-trigger: clear `processed` and start over, either from
    /// the image checks or straight from reconstruction.
    pub async fn retrigger(
        &self,
        contribution_id: &ContributionId,
        recons: ReconsType,
        recon_only: bool,
    ) -> Result<i64> {
        self.db.set_contribution_processed(contribution_id, false).await?;
        if recon_only {
            let task = self.new_task(TaskKind::Recon, contribution_id, recons, Utc::now());
            let task_id = self.db.enqueue_task(&task).await?;
            info!(contribution_id = %contribution_id, task_id, "Reconstruction re-triggered");
            return Ok(task_id);
        }
        self.db.reset_image_labels(contribution_id).await?;
        self.submit(contribution_id, recons).await
    }

    /// Gate the contribution and, if it passes, enqueue a deferred
    /// reconstruction trigger. A gate failure is reported to operators and
    /// returned; nothing is enqueued.
    pub async fn schedule(
        &self,
        contribution_id: &ContributionId,
        recons: ReconsType,
    ) -> Result<Scheduled> {
        let report = match self.gate.check_images(contribution_id).await {
            Ok(report) => report,
            Err(e) => {
                self.report_gate_failure(contribution_id, &e).await;
                return Err(e);
            }
        };

        let delay = self.config.scheduler.contrib_delay();
        let eta = Utc::now()
            + ChronoDuration::from_std(delay).unwrap_or_else(|_| ChronoDuration::zero());
        let task = self.new_task(TaskKind::Recon, contribution_id, recons, eta);
        let task_id = self.db.enqueue_task(&task).await?;
        info!(
            contribution_id = %contribution_id,
            task_id,
            recons = %recons,
            eta = %eta,
            "Reconstruction scheduled"
        );
        Ok(Scheduled { task_id, eta, report })
    }

    async fn report_gate_failure(&self, contribution_id: &ContributionId, err: &OrchestratorError) {
        let context = match self.db.contribution_context(contribution_id).await {
            Ok(context) => context,
            Err(lookup) => {
                warn!(
                    contribution_id = %contribution_id,
                    "Cannot notify gate failure ({}): {}",
                    lookup,
                    err
                );
                return;
            }
        };
        self.notifier
            .failure(FailureNotice {
                contribution_id: Some(contribution_id.clone()),
                site_id: context.site.id.clone(),
                site_name: context.site.name.clone(),
                contributor_email: Some(context.contributor.email.clone()),
                step: STEP_IMAGE_PROCESSING.to_string(),
                error: err.to_string(),
                log_path: err.log_path().cloned(),
                run_id: None,
                op_type: Some(OP_IMAGE_OPS.to_string()),
                admin_url: String::new(),
                recipients: Vec::new(),
            })
            .await;
    }
}
