//! Orchestrator configuration.
//!
//! One immutable struct, built once by the launcher and handed to every
//! component at construction (usually behind an `Arc`). Every section
//! deserializes with defaults so a partial TOML file is enough.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::defaults::*;
use crate::paths;
use crate::types::ReconKind;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub paths: PathsConfig,
    pub scheduler: SchedulerConfig,
    pub prerun: PrerunConfig,
    pub ark: ArkConfig,
    pub notify: NotifyConfig,
    pub tools: ToolsConfig,
    pub worker: WorkerSettings,
    pub retry: RetryConfig,
}

impl OrchestratorConfig {
    /// Defaults with every path rooted under `home` (tests, isolated installs).
    pub fn for_home(home: &Path) -> Self {
        // Spelled out so the home-directory defaults are never evaluated.
        Self {
            paths: PathsConfig::under(home),
            scheduler: SchedulerConfig::default(),
            prerun: PrerunConfig::default(),
            ark: ArkConfig::default(),
            notify: NotifyConfig::default(),
            tools: ToolsConfig::default(),
            worker: WorkerSettings::default(),
            retry: RetryConfig::default(),
        }
    }

    /// Longest a worker can hold one claim: every kind's chain at its
    /// timeout, plus the grace before a stuck Run is reaped.
    pub fn worst_case_claim(&self) -> Duration {
        let kinds = ReconKind::ALL.len() as u64;
        Duration::from_secs(
            self.tools
                .timeout_secs
                .saturating_mul(kinds)
                .saturating_add(self.tools.stale_grace_secs),
        )
    }

    /// Reject settings that would hand a task still being worked on to a
    /// second worker.
    pub fn validate(&self) -> Result<(), String> {
        let needed = self.worst_case_claim();
        if self.worker.lease() <= needed {
            return Err(format!(
                "worker.lease_secs ({}) must exceed {} x tools.timeout_secs + tools.stale_grace_secs ({})",
                self.worker.lease_secs,
                ReconKind::ALL.len(),
                needed.as_secs()
            ));
        }
        Ok(())
    }
}

// ============================================================================
// Paths
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// SQLite state store file.
    pub state_store: PathBuf,
    /// Short-term storage: `<models_root>/<site>/{runs,published}`.
    pub models_root: PathBuf,
    /// Long-term storage for archived run directories.
    pub archive_root: PathBuf,
    pub log_dir: PathBuf,
}

impl PathsConfig {
    pub fn under(home: &Path) -> Self {
        Self {
            state_store: home.join(STATE_STORE_FILE_NAME),
            models_root: home.join("static").join("models"),
            archive_root: home.join("archive").join("archives"),
            log_dir: home.join("logs"),
        }
    }

    /// Per-job diagnostic logs (classifier runs, stale-run reaping).
    pub fn jobs_log_dir(&self) -> PathBuf {
        self.log_dir.join("jobs")
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            state_store: paths::default_state_store_path(),
            models_root: paths::default_models_root(),
            archive_root: paths::default_archive_root(),
            log_dir: paths::default_logs_dir(),
        }
    }
}

// ============================================================================
// Scheduler / gates
// ============================================================================

/// Whether the Ingestion Gate consults the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageCheckPolicy {
    Enforce,
    /// Skip classification and accept the batch. Production currently runs
    /// this way because the classifier contends for GPU memory with the
    /// reconstruction jobs.
    #[default]
    Bypass,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Debounce window in hours.
    pub contrib_delay_hours: f64,
    pub image_checks: ImageCheckPolicy,
}

impl SchedulerConfig {
    pub fn contrib_delay(&self) -> Duration {
        Duration::from_secs_f64((self.contrib_delay_hours * 3600.0).max(0.0))
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            contrib_delay_hours: DEFAULT_CONTRIB_DELAY_HOURS,
            image_checks: ImageCheckPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PrerunConfig {
    pub min_matched_images: u32,
    pub min_match_ratio: f64,
}

impl Default for PrerunConfig {
    fn default() -> Self {
        Self {
            min_matched_images: DEFAULT_MIN_MATCHED_IMAGES,
            min_match_ratio: DEFAULT_MIN_MATCH_RATIO,
        }
    }
}

// ============================================================================
// Identifiers
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArkConfig {
    pub naan: u64,
    /// Includes the leading slash, e.g. "/a".
    pub shoulder: String,
    pub noid_len: usize,
    pub base_url: String,
    pub fallback_resolver: String,
}

impl Default for ArkConfig {
    fn default() -> Self {
        Self {
            naan: DEFAULT_ARK_NAAN,
            shoulder: DEFAULT_ARK_SHOULDER.to_string(),
            noid_len: DEFAULT_NOID_LEN,
            base_url: DEFAULT_BASE_URL.to_string(),
            fallback_resolver: DEFAULT_FALLBACK_RESOLVER.to_string(),
        }
    }
}

// ============================================================================
// Notifications
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    pub admin_emails: Vec<String>,
    pub admin_name: String,
    /// Contributors only ever receive success notices, and only when enabled.
    pub notify_contributors: bool,
    /// JSON-lines outbox consumed by the external mail sender.
    pub outbox_path: Option<PathBuf>,
}

impl NotifyConfig {
    pub fn primary_admin_email(&self) -> &str {
        self.admin_emails
            .first()
            .map(String::as_str)
            .unwrap_or(DEFAULT_ADMIN_EMAIL)
    }
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            admin_emails: vec![DEFAULT_ADMIN_EMAIL.to_string()],
            admin_name: DEFAULT_ADMIN_NAME.to_string(),
            notify_contributors: true,
            outbox_path: None,
        }
    }
}

// ============================================================================
// External tools
// ============================================================================

/// One external program invocation in a tool chain.
///
/// Arguments may contain `{images_dir}`, `{run_dir}`, `{output}`,
/// `{max_iter}`, `{site_id}`, `{run_id}` and (classifier only) `{image}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolStep {
    pub name: String,
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl ToolStep {
    pub fn new(name: &str, program: &str, args: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub timeout_secs: u64,
    pub stale_grace_secs: u64,
    pub gs_max_iter: u32,
    pub av: Vec<ToolStep>,
    pub gs: Vec<ToolStep>,
    /// Image classifier used when `scheduler.image_checks = "enforce"`.
    pub classifier: Option<ToolStep>,
}

impl ToolsConfig {
    pub fn chain(&self, kind: ReconKind) -> &[ToolStep] {
        match kind {
            ReconKind::Av => &self.av,
            ReconKind::Gs => &self.gs,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// How long a Run may sit in `Running` before it is considered stuck.
    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.saturating_add(self.stale_grace_secs))
    }
}

fn sparse_steps() -> Vec<ToolStep> {
    vec![
        ToolStep::new(
            "feature_extractor",
            "colmap",
            &[
                "feature_extractor",
                "--database_path",
                "{run_dir}/colmap.db",
                "--image_path",
                "{images_dir}",
            ],
        ),
        ToolStep::new(
            "exhaustive_matcher",
            "colmap",
            &["exhaustive_matcher", "--database_path", "{run_dir}/colmap.db"],
        ),
        ToolStep::new(
            "mapper",
            "colmap",
            &[
                "mapper",
                "--database_path",
                "{run_dir}/colmap.db",
                "--image_path",
                "{images_dir}",
                "--output_path",
                "{run_dir}/sparse",
            ],
        ),
    ]
}

fn default_av_chain() -> Vec<ToolStep> {
    let mut steps = sparse_steps();
    steps.extend([
        ToolStep::new(
            "image_undistorter",
            "colmap",
            &[
                "image_undistorter",
                "--image_path",
                "{images_dir}",
                "--input_path",
                "{run_dir}/sparse/0",
                "--output_path",
                "{run_dir}/dense",
            ],
        ),
        ToolStep::new(
            "patch_match_stereo",
            "colmap",
            &["patch_match_stereo", "--workspace_path", "{run_dir}/dense"],
        ),
        ToolStep::new(
            "stereo_fusion",
            "colmap",
            &[
                "stereo_fusion",
                "--workspace_path",
                "{run_dir}/dense",
                "--output_path",
                "{run_dir}/dense/fused.ply",
            ],
        ),
        ToolStep::new(
            "poisson_mesher",
            "colmap",
            &[
                "poisson_mesher",
                "--input_path",
                "{run_dir}/dense/fused.ply",
                "--output_path",
                "{run_dir}/dense/meshed.ply",
            ],
        ),
        ToolStep::new(
            "export_glb",
            "assimp",
            &["export", "{run_dir}/dense/meshed.ply", "{output}"],
        ),
    ]);
    steps
}

fn default_gs_chain() -> Vec<ToolStep> {
    let mut steps = sparse_steps();
    steps.push(ToolStep::new(
        "splat_train",
        "splat-train",
        &[
            "--source",
            "{run_dir}",
            "--images",
            "{images_dir}",
            "--iterations",
            "{max_iter}",
            "--output",
            "{output}",
        ],
    ));
    steps
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_TOOL_TIMEOUT_SECS,
            stale_grace_secs: DEFAULT_STALE_GRACE_SECS,
            gs_max_iter: DEFAULT_GS_MAX_ITER,
            av: default_av_chain(),
            gs: default_gs_chain(),
            classifier: None,
        }
    }
}

// ============================================================================
// Worker loop / retries
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerSettings {
    pub poll_interval_ms: u64,
    /// Exit after this many tasks so the process is recycled; 0 means never.
    pub max_tasks_per_worker: u32,
    /// Claimed tasks older than this are delivered again.
    pub lease_secs: u64,
    /// A recon task that finds its Run held by another worker goes back to
    /// the queue for this long.
    pub busy_requeue_secs: u64,
}

impl WorkerSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn lease(&self) -> Duration {
        Duration::from_secs(self.lease_secs)
    }

    pub fn busy_requeue(&self) -> Duration {
        Duration::from_secs(self.busy_requeue_secs)
    }
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            max_tasks_per_worker: DEFAULT_MAX_TASKS_PER_WORKER,
            lease_secs: DEFAULT_LEASE_SECS,
            busy_requeue_secs: DEFAULT_BUSY_REQUEUE_SECS,
        }
    }
}

/// Queue-level retry settings. `max_attempts = 1` disables retries.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_secs: u64,
    pub multiplier: f64,
    pub max_delay_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            base_delay_secs: 60,
            multiplier: 2.0,
            max_delay_secs: 3600,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_toml_keeps_defaults() {
        let config: OrchestratorConfig = toml::from_str(
            r#"
            [scheduler]
            contrib_delay_hours = 0.5
            image_checks = "enforce"

            [prerun]
            min_matched_images = 25

            [ark]
            naan = 12345
            "#,
        )
        .unwrap();

        assert_eq!(config.scheduler.image_checks, ImageCheckPolicy::Enforce);
        assert_eq!(config.scheduler.contrib_delay(), Duration::from_secs(1800));
        assert_eq!(config.prerun.min_matched_images, 25);
        assert_eq!(config.prerun.min_match_ratio, DEFAULT_MIN_MATCH_RATIO);
        assert_eq!(config.ark.naan, 12345);
        assert_eq!(config.ark.shoulder, "/a");
        assert_eq!(config.retry.max_attempts, 1);
        assert!(!config.tools.av.is_empty());
    }

    #[test]
    fn tool_steps_from_toml() {
        let config: ToolsConfig = toml::from_str(
            r#"
            timeout_secs = 60
            gs = [{ name = "train", program = "/opt/gs/train", args = ["{images_dir}", "{output}"] }]
            "#,
        )
        .unwrap();
        assert_eq!(config.chain(ReconKind::Gs).len(), 1);
        assert_eq!(config.chain(ReconKind::Gs)[0].program, "/opt/gs/train");
        assert_eq!(config.stale_after(), Duration::from_secs(60 + DEFAULT_STALE_GRACE_SECS));
        assert_eq!(config.chain(ReconKind::Av), default_av_chain().as_slice());
    }

    #[test]
    fn default_lease_outlives_an_all_task() {
        let config = OrchestratorConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.worker.lease() > config.worst_case_claim());
    }

    #[test]
    fn lease_shorter_than_both_chains_is_rejected() {
        let mut config = OrchestratorConfig::default();
        config.tools.timeout_secs = 100;
        config.tools.stale_grace_secs = 10;
        config.worker.lease_secs = 210;
        let err = config.validate().unwrap_err();
        assert!(err.contains("worker.lease_secs (210)"), "{err}");
        assert!(err.ends_with("stale_grace_secs (210)"), "{err}");

        config.worker.lease_secs = 211;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn negative_delay_clamps_to_zero() {
        let scheduler = SchedulerConfig {
            contrib_delay_hours: -1.0,
            ..Default::default()
        };
        assert_eq!(scheduler.contrib_delay(), Duration::ZERO);
    }
}
