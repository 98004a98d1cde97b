//! Canonical default values shared by the orchestrator and the CLI.

/// Debounce window between acceptance and reconstruction (hours).
pub const DEFAULT_CONTRIB_DELAY_HOURS: f64 = 0.1;
pub const DEFAULT_MIN_MATCHED_IMAGES: u32 = 10;
pub const DEFAULT_MIN_MATCH_RATIO: f64 = 0.10;

/// NAAN 999999 is the reserved testing authority; production overrides it.
pub const DEFAULT_ARK_NAAN: u64 = 999999;
pub const DEFAULT_ARK_SHOULDER: &str = "/a";
pub const DEFAULT_NOID_LEN: usize = 16;
pub const DEFAULT_BASE_URL: &str = "http://localhost:8000";
pub const DEFAULT_FALLBACK_RESOLVER: &str = "https://n2t.net";

pub const DEFAULT_GS_MAX_ITER: u32 = 20000;
/// Per-Run wall clock limit for a whole tool chain.
pub const DEFAULT_TOOL_TIMEOUT_SECS: u64 = 12 * 60 * 60;
/// Extra slack before a Run stuck in `Running` is reaped.
pub const DEFAULT_STALE_GRACE_SECS: u64 = 30 * 60;

pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;
pub const DEFAULT_MAX_TASKS_PER_WORKER: u32 = 1;
/// Must cover both kinds of an `all` task back to back plus the grace.
pub const DEFAULT_LEASE_SECS: u64 = 26 * 60 * 60;
/// Delay before a task whose Run another worker still holds is tried again.
pub const DEFAULT_BUSY_REQUEUE_SECS: u64 = 10 * 60;

pub const DEFAULT_ADMIN_EMAIL: &str = "tadmin@example.com";
pub const DEFAULT_ADMIN_NAME: &str = "Tirtha Admin";

pub const STATE_STORE_FILE_NAME: &str = "tirtha.sqlite";
pub const CONFIG_FILE_NAME: &str = "tirtha.toml";
