//! Worker loop over the persisted task queue.
//!
//! One task in flight per worker. Each poll first does housekeeping (reap
//! stuck Runs, return expired claims to the queue), then claims the next
//! due task. The loop exits after `max_tasks_per_worker` tasks so the
//! process can be recycled, or when cancelled.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tirtha_db::{DbError, Task, TirthaDb};
use tirtha_protocol::naming;
use tirtha_protocol::{OrchestratorConfig, TaskKind};
use tirtha_worker::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{OrchestratorError, Result};
use crate::lifecycle::RunLifecycle;
use crate::metrics::METRICS;
use crate::notify::{FailureNotice, NotificationFanout, STEP_STALE_RUN};
use crate::retry::{RetryDecision, RetryPolicy};
use crate::runner::{PipelineRunner, RunOutcome};
use crate::scheduler::Scheduler;

/// What happened to a claimed task.
#[derive(Debug, Clone, PartialEq)]
pub enum Disposition {
    Completed { summary: String },
    Requeued { delay: Duration, error: String },
    /// Another worker still holds one of the task's Runs; tried again later.
    Deferred { delay: Duration, reason: String },
    Failed { error: String },
}

/// What handling a task produced, before the queue is updated.
enum Handled {
    Done(String),
    Busy(String),
}

#[derive(Debug, Clone)]
pub struct TaskReport {
    pub task_id: i64,
    pub kind: TaskKind,
    pub disposition: Disposition,
}

#[derive(Clone)]
pub struct Dispatcher {
    db: TirthaDb,
    config: Arc<OrchestratorConfig>,
    scheduler: Scheduler,
    runner: PipelineRunner,
    lifecycle: RunLifecycle,
    notifier: NotificationFanout,
    retry: RetryPolicy,
}

impl Dispatcher {
    pub fn new(
        db: TirthaDb,
        config: Arc<OrchestratorConfig>,
        scheduler: Scheduler,
        runner: PipelineRunner,
        lifecycle: RunLifecycle,
        notifier: NotificationFanout,
    ) -> Self {
        let retry = RetryPolicy::from_config(&config.retry);
        Self {
            db,
            config,
            scheduler,
            runner,
            lifecycle,
            notifier,
            retry,
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Poll until cancelled or until `max_tasks` tasks were handled
    /// (`None` takes the configured limit; zero means no limit).
    pub async fn run(
        &self,
        cancel: &CancellationToken,
        max_tasks: Option<u32>,
    ) -> Result<Vec<TaskReport>> {
        let limit = max_tasks.unwrap_or(self.config.worker.max_tasks_per_worker);
        let poll = self.config.worker.poll_interval();
        let mut reports = Vec::new();
        info!(max_tasks = limit, poll_ms = poll.as_millis() as u64, "Worker started");

        loop {
            if cancel.is_cancelled() {
                info!("Worker cancelled");
                break;
            }
            if limit > 0 && reports.len() as u64 >= u64::from(limit) {
                info!(handled = reports.len(), "Task limit reached; worker exiting for recycle");
                break;
            }

            match self.run_once(cancel).await {
                Ok(Some(report)) => reports.push(report),
                Ok(None) => {
                    tokio::select! {
                        _ = tokio::time::sleep(poll) => {}
                        _ = cancel.cancelled() => {}
                    }
                }
                Err(e) => {
                    // Store trouble; back off and try again.
                    error!("Dispatch iteration failed: {}", e);
                    tokio::select! {
                        _ = tokio::time::sleep(poll) => {}
                        _ = cancel.cancelled() => {}
                    }
                }
            }
        }

        info!("{}", METRICS.snapshot().summary());
        Ok(reports)
    }

    /// Housekeeping plus at most one task.
    pub async fn run_once(&self, cancel: &CancellationToken) -> Result<Option<TaskReport>> {
        self.housekeeping().await?;

        let Some(task) = self.db.pop_task(TirthaDb::now_millis()).await? else {
            return Ok(None);
        };
        METRICS.inc_tasks_claimed();
        info!(
            task_id = task.id,
            kind = %task.kind,
            contribution_id = %task.contribution_id,
            attempt = task.attempts,
            "Task claimed"
        );

        let disposition = match self.handle(&task, cancel).await {
            Ok(Handled::Done(summary)) => {
                self.db.complete_task(task.id, Some(&summary)).await?;
                METRICS.inc_tasks_completed();
                info!(task_id = task.id, "Task completed: {}", summary);
                Disposition::Completed { summary }
            }
            Ok(Handled::Busy(reason)) => self.defer(&task, reason).await?,
            Err(e) => self.settle_failure(&task, e).await?,
        };

        Ok(Some(TaskReport {
            task_id: task.id,
            kind: task.kind,
            disposition,
        }))
    }

    async fn handle(&self, task: &Task, cancel: &CancellationToken) -> Result<Handled> {
        match task.kind {
            TaskKind::ImageOps => {
                let scheduled = self
                    .scheduler
                    .schedule(&task.contribution_id, task.recons)
                    .await?;
                Ok(Handled::Done(format!(
                    "reconstruction task {} due {}",
                    scheduled.task_id,
                    scheduled.eta.to_rfc3339()
                )))
            }
            TaskKind::Recon => {
                let outcomes = self
                    .runner
                    .run_recons_for_task(&task.contribution_id, task.recons, Some(task.id), cancel)
                    .await?;
                let summary = outcomes
                    .iter()
                    .map(|(kind, outcome)| format!("{}: {}", kind, outcome.summary()))
                    .collect::<Vec<_>>()
                    .join("; ");
                let busy = outcomes
                    .iter()
                    .any(|(_, outcome)| matches!(outcome, RunOutcome::InProgress { .. }));
                Ok(if busy {
                    Handled::Busy(summary)
                } else {
                    Handled::Done(summary)
                })
            }
        }
    }

    /// Put the task back until the worker holding its Run is finished. If
    /// that worker already settled the task, there is nothing left to do.
    async fn defer(&self, task: &Task, reason: String) -> Result<Disposition> {
        let delay = self.config.worker.busy_requeue();
        let eta = TirthaDb::now_millis() + delay.as_millis() as i64;
        match self.db.requeue_task(task.id, eta, &reason).await {
            Ok(()) => {
                info!(
                    task_id = task.id,
                    delay_secs = delay.as_secs(),
                    "Run held elsewhere; task deferred: {}",
                    reason
                );
            }
            Err(DbError::InvalidState(_)) => {
                debug!(task_id = task.id, "Task settled by its previous holder");
            }
            Err(e) => return Err(e.into()),
        }
        Ok(Disposition::Deferred { delay, reason })
    }

    async fn settle_failure(&self, task: &Task, err: OrchestratorError) -> Result<Disposition> {
        let message = err.to_string();

        if err.is_cancelled() {
            self.db
                .requeue_task(task.id, TirthaDb::now_millis(), &message)
                .await?;
            METRICS.inc_tasks_retried();
            warn!(task_id = task.id, "Task interrupted; returned to queue");
            return Ok(Disposition::Requeued {
                delay: Duration::ZERO,
                error: message,
            });
        }

        match self
            .retry
            .decide(task.attempts, task.max_attempts, err.is_retryable())
        {
            RetryDecision::Retry { delay } => {
                let eta = TirthaDb::now_millis() + delay.as_millis() as i64;
                self.db.requeue_task(task.id, eta, &message).await?;
                METRICS.inc_tasks_retried();
                warn!(
                    task_id = task.id,
                    attempt = task.attempts,
                    delay_secs = delay.as_secs(),
                    "Task failed; retrying: {}",
                    message
                );
                Ok(Disposition::Requeued {
                    delay,
                    error: message,
                })
            }
            RetryDecision::GiveUp => {
                self.db.fail_task(task.id, &message).await?;
                METRICS.inc_tasks_failed();
                error!(task_id = task.id, kind = %task.kind, "Task failed: {}", message);
                Ok(Disposition::Failed { error: message })
            }
        }
    }

    /// Reap stuck Runs and recover claims whose worker went away.
    pub async fn housekeeping(&self) -> Result<()> {
        for run in self.lifecycle.reap_stale_runs().await? {
            let site_name = match self.db.get_site(&run.site_id).await? {
                Some(site) => site.name,
                None => run.site_id.to_string(),
            };
            let contributor_email = match &run.contribution_id {
                Some(id) => self
                    .db
                    .contribution_context(id)
                    .await
                    .ok()
                    .map(|context| context.contributor.email),
                None => None,
            };
            self.notifier
                .failure(FailureNotice {
                    contribution_id: run.contribution_id.clone(),
                    site_id: run.site_id.clone(),
                    site_name,
                    contributor_email,
                    step: STEP_STALE_RUN.to_string(),
                    error: format!(
                        "{} run exceeded {}s without finishing",
                        run.kind,
                        self.config.tools.stale_after().as_secs()
                    ),
                    log_path: Some(
                        self.lifecycle
                            .resolve_run_dir(&run)
                            .join(naming::RUN_LOG_FILE),
                    ),
                    run_id: Some(run.id.clone()),
                    op_type: Some(run.kind.ops_name().to_string()),
                    admin_url: String::new(),
                    recipients: Vec::new(),
                })
                .await;
        }

        let lease = chrono::Duration::from_std(self.config.worker.lease())
            .unwrap_or_else(|_| chrono::Duration::hours(26));
        let cutoff = (Utc::now() - lease).timestamp_millis();
        let recovered = self.db.recover_expired_claims(cutoff).await?;
        if recovered > 0 {
            warn!(recovered, "Expired task claims returned to queue");
        } else {
            debug!("No expired task claims");
        }
        Ok(())
    }
}
