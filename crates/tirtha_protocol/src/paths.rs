use std::path::PathBuf;
use std::sync::Once;

use crate::defaults::{CONFIG_FILE_NAME, STATE_STORE_FILE_NAME};

static CREATE_DIR_WARNED: Once = Once::new();

/// Resolve the Tirtha home directory.
///
/// Priority:
/// 1) TIRTHA_HOME
/// 2) HOME/USERPROFILE
/// 3) ./.tirtha
pub fn tirtha_home() -> PathBuf {
    if let Ok(override_path) = std::env::var("TIRTHA_HOME") {
        return PathBuf::from(override_path);
    }
    if let Ok(home) = std::env::var("HOME").or_else(|_| std::env::var("USERPROFILE")) {
        return PathBuf::from(home).join(".tirtha");
    }
    PathBuf::from(".").join(".tirtha")
}

fn ensure_home_dir(home: &PathBuf) {
    if let Err(err) = std::fs::create_dir_all(home) {
        CREATE_DIR_WARNED.call_once(|| {
            eprintln!(
                "Warning: failed to create Tirtha home directory {}: {}. Set TIRTHA_HOME or pass --config.",
                home.display(),
                err
            );
        });
    }
}

/// Default state store path: ~/.tirtha/tirtha.sqlite
pub fn default_state_store_path() -> PathBuf {
    let home = tirtha_home();
    ensure_home_dir(&home);
    home.join(STATE_STORE_FILE_NAME)
}

/// Default config path: ~/.tirtha/tirtha.toml
pub fn default_config_path() -> PathBuf {
    tirtha_home().join(CONFIG_FILE_NAME)
}

/// Default published-models root: ~/.tirtha/static/models
pub fn default_models_root() -> PathBuf {
    tirtha_home().join("static").join("models")
}

/// Default long-term storage for archived runs: ~/.tirtha/archive/archives
pub fn default_archive_root() -> PathBuf {
    tirtha_home().join("archive").join("archives")
}

/// Default logs directory: ~/.tirtha/logs
pub fn default_logs_dir() -> PathBuf {
    tirtha_home().join("logs")
}
