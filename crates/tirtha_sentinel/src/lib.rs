//! Tirtha reconstruction orchestrator.
//!
//! Decides when and whether to run the expensive reconstruction tool chains
//! for a contribution, tracks each resulting Run through its lifecycle,
//! mints a persistent identifier for every successful Run and tells the
//! right people what happened.
//!
//! The pieces, leaves first:
//! - [`ark::ArkMinter`]: collision-tolerant identifier minting
//! - [`gate::IngestionGate`]: per-image classification of a contribution
//! - [`scheduler::Scheduler`]: gate now, reconstruct after the debounce delay
//! - [`prerun::PrerunGate`]: image volume/ratio thresholds
//! - [`runner::PipelineRunner`]: one kind, one Run, one tool chain
//! - [`lifecycle::RunLifecycle`]: status transitions, publishing, archival
//! - [`replace::ReplacementGuard`]: guarded output replacement
//! - [`notify::NotificationFanout`]: who hears about it
//! - [`dispatch::Dispatcher`]: the worker loop over the task queue
//!
//! [`Orchestrator`] wires them together from one injected
//! [`OrchestratorConfig`].

pub mod ark;
pub mod dispatch;
pub mod error;
pub mod gate;
pub mod lifecycle;
pub mod manual;
pub mod metrics;
pub mod notify;
pub mod prerun;
pub mod replace;
pub mod retry;
pub mod runner;
pub mod scheduler;

mod fsops;

pub use error::{KindFailure, OrchestratorError, Result};
pub use metrics::{MetricsSnapshot, METRICS};
pub use runner::RunOutcome;

use std::path::Path;
use std::sync::Arc;
use tirtha_db::{Run, TirthaDb};
use tirtha_ids::{ContributionId, RunId};
use tirtha_protocol::{OrchestratorConfig, ReconKind, ReconsType, ViewerParams};
use tirtha_worker::{
    CancellationToken, CommandClassifier, ImageClassifier, ProcessExecutor, ToolExecutor,
};

use crate::ark::{ArkMinter, ArkStore};
use crate::dispatch::{Dispatcher, TaskReport};
use crate::gate::{GateReport, IngestionGate};
use crate::lifecycle::RunLifecycle;
use crate::manual::{ManualRunCreator, ManualRunReport, ManualRunRequest};
use crate::notify::{NotificationFanout, Notifier, OutboxNotifier, TracingNotifier};
use crate::prerun::{PrerunDecision, PrerunGate};
use crate::replace::{ReplaceReport, ReplacementGuard};
use crate::retry::RetryPolicy;
use crate::runner::PipelineRunner;
use crate::scheduler::{Scheduled, Scheduler};

/// Every orchestrator component, built from one configuration.
#[derive(Clone)]
pub struct Orchestrator {
    db: TirthaDb,
    config: Arc<OrchestratorConfig>,
    gate: IngestionGate,
    scheduler: Scheduler,
    prerun: PrerunGate,
    runner: PipelineRunner,
    lifecycle: RunLifecycle,
    replacer: ReplacementGuard,
    manual: ManualRunCreator,
    dispatcher: Dispatcher,
    notifier: NotificationFanout,
}

impl Orchestrator {
    pub fn builder(db: TirthaDb, config: OrchestratorConfig) -> OrchestratorBuilder {
        OrchestratorBuilder {
            db,
            config,
            executor: None,
            classifier: None,
            sinks: Vec::new(),
            ark_store: None,
            retry: None,
        }
    }

    /// Production wiring: process executor, command classifier (if
    /// configured), log and outbox notification sinks.
    pub fn new(db: TirthaDb, config: OrchestratorConfig) -> Self {
        Self::builder(db, config).build()
    }

    pub fn db(&self) -> &TirthaDb {
        &self.db
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn notifier(&self) -> &NotificationFanout {
        &self.notifier
    }

    pub fn lifecycle(&self) -> &RunLifecycle {
        &self.lifecycle
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Queue image processing for a new contribution.
    pub async fn submit(&self, contribution_id: &ContributionId, recons: ReconsType) -> Result<i64> {
        self.scheduler.submit(contribution_id, recons).await
    }

    pub async fn retrigger(
        &self,
        contribution_id: &ContributionId,
        recons: ReconsType,
        recon_only: bool,
    ) -> Result<i64> {
        self.scheduler
            .retrigger(contribution_id, recons, recon_only)
            .await
    }

    pub async fn check_images(&self, contribution_id: &ContributionId) -> Result<GateReport> {
        self.gate.check_images(contribution_id).await
    }

    pub async fn schedule(
        &self,
        contribution_id: &ContributionId,
        recons: ReconsType,
    ) -> Result<Scheduled> {
        self.scheduler.schedule(contribution_id, recons).await
    }

    pub async fn prerun_check(
        &self,
        contribution_id: &ContributionId,
        kind: ReconKind,
    ) -> Result<PrerunDecision> {
        self.prerun.prerun_check(contribution_id, kind).await
    }

    pub async fn ops_runner(
        &self,
        contribution_id: &ContributionId,
        kind: ReconKind,
        cancel: &CancellationToken,
    ) -> Result<RunOutcome> {
        self.runner.ops_runner(contribution_id, kind, cancel).await
    }

    pub async fn run_recons(
        &self,
        contribution_id: &ContributionId,
        recons: ReconsType,
        cancel: &CancellationToken,
    ) -> Result<Vec<(ReconKind, RunOutcome)>> {
        self.runner.run_recons(contribution_id, recons, cancel).await
    }

    pub async fn archive_run(&self, run_id: &RunId) -> Result<Run> {
        self.lifecycle.archive_run(run_id).await
    }

    pub async fn replace_output(
        &self,
        run_id: &RunId,
        new_file: &Path,
        operator: &str,
    ) -> Result<ReplaceReport> {
        self.replacer.replace_output(run_id, new_file, operator).await
    }

    pub async fn create_manual_run(&self, request: &ManualRunRequest) -> Result<ManualRunReport> {
        self.manual.create_manual_run(request).await
    }

    pub async fn update_viewer_params(&self, run_id: &RunId, update: &ViewerParams) -> Result<Run> {
        self.lifecycle.update_viewer_params(run_id, update).await
    }

    /// Run the worker loop; see [`Dispatcher::run`].
    pub async fn work(
        &self,
        cancel: &CancellationToken,
        max_tasks: Option<u32>,
    ) -> Result<Vec<TaskReport>> {
        self.dispatcher.run(cancel, max_tasks).await
    }

    pub async fn work_once(&self, cancel: &CancellationToken) -> Result<Option<TaskReport>> {
        self.dispatcher.run_once(cancel).await
    }
}

/// Swaps collaborators for tests or alternative deployments.
pub struct OrchestratorBuilder {
    db: TirthaDb,
    config: OrchestratorConfig,
    executor: Option<Arc<dyn ToolExecutor>>,
    classifier: Option<Option<Arc<dyn ImageClassifier>>>,
    sinks: Vec<Arc<dyn Notifier>>,
    ark_store: Option<Arc<dyn ArkStore>>,
    retry: Option<RetryPolicy>,
}

impl OrchestratorBuilder {
    pub fn executor(mut self, executor: Arc<dyn ToolExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// `None` removes the classifier even if one is configured.
    pub fn classifier(mut self, classifier: Option<Arc<dyn ImageClassifier>>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    /// Additional notification sink, next to the log sink.
    pub fn notifier(mut self, sink: Arc<dyn Notifier>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn ark_store(mut self, store: Arc<dyn ArkStore>) -> Self {
        self.ark_store = Some(store);
        self
    }

    pub fn retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn build(self) -> Orchestrator {
        let config = Arc::new(self.config);
        let db = self.db;

        let executor = self
            .executor
            .unwrap_or_else(|| Arc::new(ProcessExecutor::new()));
        let classifier = self.classifier.unwrap_or_else(|| {
            config.tools.classifier.clone().map(|step| {
                Arc::new(CommandClassifier::new(step, config.tools.timeout()))
                    as Arc<dyn ImageClassifier>
            })
        });

        let mut notifier = NotificationFanout::new(config.notify.clone(), config.ark.base_url.clone())
            .with_sink(Arc::new(TracingNotifier));
        if let Some(path) = &config.notify.outbox_path {
            notifier = notifier.with_sink(Arc::new(OutboxNotifier::new(path)));
        }
        for sink in self.sinks {
            notifier = notifier.with_sink(sink);
        }

        let store = self
            .ark_store
            .unwrap_or_else(|| Arc::new(db.clone()) as Arc<dyn ArkStore>);
        let minter = Arc::new(ArkMinter::new(config.ark.clone(), store));

        let gate = IngestionGate::new(
            db.clone(),
            classifier,
            config.scheduler.image_checks,
            config.paths.jobs_log_dir(),
        );
        let scheduler = Scheduler::new(db.clone(), gate.clone(), notifier.clone(), config.clone());
        let prerun = PrerunGate::new(db.clone(), config.prerun.clone());
        let lifecycle = RunLifecycle::new(db.clone(), config.clone());
        let runner = PipelineRunner::new(
            db.clone(),
            config.clone(),
            prerun.clone(),
            lifecycle.clone(),
            minter.clone(),
            notifier.clone(),
            executor,
        );
        let replacer = ReplacementGuard::new(db.clone(), lifecycle.clone());
        let manual = ManualRunCreator::new(db.clone(), config.clone(), lifecycle.clone(), minter);
        let mut dispatcher = Dispatcher::new(
            db.clone(),
            config.clone(),
            scheduler.clone(),
            runner.clone(),
            lifecycle.clone(),
            notifier.clone(),
        );
        if let Some(retry) = self.retry {
            dispatcher = dispatcher.with_retry_policy(retry);
        }

        Orchestrator {
            db,
            config,
            gate,
            scheduler,
            prerun,
            runner,
            lifecycle,
            replacer,
            manual,
            dispatcher,
            notifier,
        }
    }
}
