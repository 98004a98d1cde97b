//! Per-test homes.

use anyhow::Result;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tirtha_db::TirthaDb;
use tirtha_protocol::OrchestratorConfig;
use tracing::debug;

/// Operator address used by [`test_config`].
pub const TEST_ADMIN_EMAIL: &str = "ops@tirtha.test";

/// Defaults rooted under `home`, tuned for tests: no debounce delay, fast
/// polling, a single operator address.
pub fn test_config(home: &Path) -> OrchestratorConfig {
    let mut config = OrchestratorConfig::for_home(home);
    config.scheduler.contrib_delay_hours = 0.0;
    config.worker.poll_interval_ms = 10;
    config.worker.max_tasks_per_worker = 0;
    config.notify.admin_emails = vec![TEST_ADMIN_EMAIL.to_string()];
    config.ark.base_url = "http://tirtha.test".to_string();
    config
}

/// RAII test home: a temp directory holding the state store, models root,
/// archive root and logs. Everything is removed on Drop.
pub struct TestEnv {
    pub db: TirthaDb,
    pub config: OrchestratorConfig,
    home: TempDir,
}

impl TestEnv {
    pub async fn new() -> Result<Self> {
        let home = TempDir::new()?;
        let config = test_config(home.path());
        Self::with_config(home, config).await
    }

    /// Adjust the test configuration before the store is opened.
    pub async fn with(adjust: impl FnOnce(&mut OrchestratorConfig)) -> Result<Self> {
        let home = TempDir::new()?;
        let mut config = test_config(home.path());
        adjust(&mut config);
        Self::with_config(home, config).await
    }

    async fn with_config(home: TempDir, config: OrchestratorConfig) -> Result<Self> {
        let db = TirthaDb::open(&config.paths.state_store).await?;
        debug!(home = %home.path().display(), "Test home created");
        Ok(Self { db, config, home })
    }

    pub fn home(&self) -> &Path {
        self.home.path()
    }

    /// Write `bytes` to `<home>/<relative>`, creating parents.
    pub fn write_file(&self, relative: &str, bytes: &[u8]) -> Result<PathBuf> {
        let path = self.home.path().join(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, bytes)?;
        Ok(path)
    }
}
