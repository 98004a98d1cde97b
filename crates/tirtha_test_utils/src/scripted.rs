//! Scripted stand-ins for external collaborators.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tirtha_db::{ArkRecord, DbError};
use tirtha_protocol::{ImageLabel, ReconKind};
use tirtha_sentinel::ark::ArkStore;
use tirtha_sentinel::notify::{FailureNotice, Notifier, SuccessNotice};
use tirtha_worker::{
    CancellationToken, ChainOutcome, ChainRequest, ImageClassifier, ToolError, ToolExecutor,
};

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ============================================================================
// Notifications
// ============================================================================

/// Keeps every notice it receives.
#[derive(Default)]
pub struct RecordingNotifier {
    failures: Mutex<Vec<FailureNotice>>,
    successes: Mutex<Vec<SuccessNotice>>,
}

impl RecordingNotifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failures(&self) -> Vec<FailureNotice> {
        lock(&self.failures).clone()
    }

    pub fn successes(&self) -> Vec<SuccessNotice> {
        lock(&self.successes).clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify_failure(&self, notice: &FailureNotice) -> std::io::Result<()> {
        lock(&self.failures).push(notice.clone());
        Ok(())
    }

    async fn notify_success(&self, notice: &SuccessNotice) -> std::io::Result<()> {
        lock(&self.successes).push(notice.clone());
        Ok(())
    }
}

// ============================================================================
// Classifier
// ============================================================================

/// Answers with a fixed label, per-file overrides, or an error.
pub struct ScriptedClassifier {
    default: Result<ImageLabel, String>,
    overrides: HashMap<String, ImageLabel>,
    calls: AtomicU32,
}

impl ScriptedClassifier {
    /// Every image gets `label`.
    pub fn all(label: ImageLabel) -> Self {
        Self {
            default: Ok(label),
            overrides: HashMap::new(),
            calls: AtomicU32::new(0),
        }
    }

    /// Every call fails as if the model crashed.
    pub fn broken(message: &str) -> Self {
        Self {
            default: Err(message.to_string()),
            overrides: HashMap::new(),
            calls: AtomicU32::new(0),
        }
    }

    /// Label for the image whose file name is `file_name`.
    pub fn with(mut self, file_name: &str, label: ImageLabel) -> Self {
        self.overrides.insert(file_name.to_string(), label);
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ImageClassifier for ScriptedClassifier {
    async fn classify(&self, image: &Path, _log_path: &Path) -> Result<ImageLabel, ToolError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let name = image
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if let Some(label) = self.overrides.get(&name) {
            return Ok(*label);
        }
        match &self.default {
            Ok(label) => Ok(*label),
            Err(message) => Err(ToolError::Transient {
                message: message.clone(),
            }),
        }
    }
}

// ============================================================================
// Tool chains
// ============================================================================

/// How a scripted chain ends.
#[derive(Debug, Clone)]
pub enum ScriptedOutcome {
    /// Writes `bytes` to the requested output.
    Succeed(Vec<u8>),
    /// Non-zero exit with the given code.
    Exit(i32),
    /// Exit 0 without leaving an artifact.
    NoArtifact,
    Timeout,
    /// Waits for the cancellation token.
    Hang,
}

/// Plays back an outcome per reconstruction kind and records the requests.
pub struct ScriptedExecutor {
    outcomes: Mutex<HashMap<ReconKind, ScriptedOutcome>>,
    delays: Mutex<HashMap<ReconKind, Duration>>,
    requests: Mutex<Vec<ChainRequest>>,
}

impl Default for ScriptedExecutor {
    fn default() -> Self {
        Self {
            outcomes: Mutex::new(HashMap::new()),
            delays: Mutex::new(HashMap::new()),
            requests: Mutex::new(Vec::new()),
        }
    }
}

impl ScriptedExecutor {
    /// Both kinds succeed.
    pub fn succeeding() -> Self {
        Self::default()
            .on(ReconKind::Av, ScriptedOutcome::Succeed(b"glTF-fixture".to_vec()))
            .on(ReconKind::Gs, ScriptedOutcome::Succeed(b"splat-fixture".to_vec()))
    }

    pub fn on(self, kind: ReconKind, outcome: ScriptedOutcome) -> Self {
        lock(&self.outcomes).insert(kind, outcome);
        self
    }

    /// `kind`'s chain takes `delay` before its outcome.
    pub fn delayed(self, kind: ReconKind, delay: Duration) -> Self {
        lock(&self.delays).insert(kind, delay);
        self
    }

    /// Change the script between calls.
    pub fn set(&self, kind: ReconKind, outcome: ScriptedOutcome) {
        lock(&self.outcomes).insert(kind, outcome);
    }

    pub fn requests(&self) -> Vec<ChainRequest> {
        lock(&self.requests).clone()
    }

    pub fn calls_for(&self, kind: ReconKind) -> usize {
        lock(&self.requests)
            .iter()
            .filter(|request| request.label.starts_with(kind.ops_name()))
            .count()
    }

    fn kind_of(request: &ChainRequest) -> Option<ReconKind> {
        ReconKind::ALL
            .into_iter()
            .find(|kind| request.label.starts_with(kind.ops_name()))
    }
}

#[async_trait]
impl ToolExecutor for ScriptedExecutor {
    async fn run_chain(
        &self,
        request: &ChainRequest,
        cancel: &CancellationToken,
    ) -> Result<ChainOutcome, ToolError> {
        lock(&self.requests).push(request.clone());
        let step = request
            .steps
            .first()
            .map(|step| step.name.clone())
            .unwrap_or_else(|| "scripted".to_string());
        let kind = Self::kind_of(request);
        let outcome = kind
            .and_then(|kind| lock(&self.outcomes).get(&kind).cloned())
            .unwrap_or(ScriptedOutcome::Exit(1));
        let delay = kind.and_then(|kind| lock(&self.delays).get(&kind).copied());
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        match outcome {
            ScriptedOutcome::Succeed(bytes) => {
                if let Some(parent) = request.output.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::write(&request.output, bytes)?;
                Ok(ChainOutcome {
                    output: request.output.clone(),
                    elapsed: Duration::from_millis(5),
                    steps_run: request.steps.len(),
                })
            }
            ScriptedOutcome::Exit(code) => {
                Err(ToolError::from_exit_code(&step, code, "scripted failure"))
            }
            ScriptedOutcome::NoArtifact => Err(ToolError::MissingArtifact {
                path: request.output.clone(),
            }),
            ScriptedOutcome::Timeout => Err(ToolError::Timeout {
                step,
                after: request.timeout,
            }),
            ScriptedOutcome::Hang => {
                cancel.cancelled().await;
                Err(ToolError::Cancelled { step })
            }
        }
    }
}

// ============================================================================
// Identifier store
// ============================================================================

/// Rejects the first `collisions` inserts as duplicates, then delegates.
pub struct CollidingArkStore<S> {
    inner: S,
    remaining: AtomicU32,
    attempted: Mutex<Vec<String>>,
}

impl<S: ArkStore> CollidingArkStore<S> {
    pub fn new(inner: S, collisions: u32) -> Self {
        Self {
            inner,
            remaining: AtomicU32::new(collisions),
            attempted: Mutex::new(Vec::new()),
        }
    }

    /// Every identifier string offered, in order.
    pub fn attempted(&self) -> Vec<String> {
        lock(&self.attempted).clone()
    }
}

#[async_trait]
impl<S: ArkStore> ArkStore for CollidingArkStore<S> {
    async fn insert_ark(&self, record: &ArkRecord) -> Result<(), DbError> {
        lock(&self.attempted).push(record.ark.clone());
        let collide = self
            .remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if collide {
            return Err(DbError::constraint("UNIQUE constraint failed: arks.ark"));
        }
        self.inner.insert_ark(record).await
    }
}
