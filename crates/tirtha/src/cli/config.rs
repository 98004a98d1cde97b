//! Configuration loading for the Tirtha CLI
//!
//! `<home>/tirtha.toml` (or `--config`) layered over the built-in defaults,
//! then `TIRTHA_DB` on top. A missing default file is not an error.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tirtha_protocol::paths::{default_config_path, tirtha_home};
use tirtha_protocol::OrchestratorConfig;

use crate::cli::error::HelpfulError;

/// Overrides `paths.state_store`.
pub const DB_ENV_VAR: &str = "TIRTHA_DB";

/// Resolve the effective configuration.
pub fn load_config(explicit: Option<&Path>) -> Result<OrchestratorConfig> {
    let path = explicit
        .map(Path::to_path_buf)
        .unwrap_or_else(default_config_path);

    let mut config = if path.exists() {
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        parse_config(&text).map_err(|err| {
            HelpfulError::new(format!("Invalid config file: {}", path.display()))
                .with_context(err.to_string())
                .with_suggestion("TRY: Show the effective defaults: tirtha config")
        })?
    } else if explicit.is_some() {
        return Err(HelpfulError::file_not_found(&path)
            .with_context("The --config file does not exist")
            .into());
    } else {
        OrchestratorConfig::default()
    };

    apply_env_overrides(&mut config, std::env::var(DB_ENV_VAR).ok());
    check_config(&config, &path)?;
    Ok(config)
}

fn check_config(config: &OrchestratorConfig, path: &Path) -> Result<()> {
    config.validate().map_err(|problem| {
        HelpfulError::new(format!("Invalid config file: {}", path.display()))
            .with_context(problem)
            .with_suggestion("TRY: Raise [worker] lease_secs or lower [tools] timeout_secs")
            .into()
    })
}

fn parse_config(text: &str) -> Result<OrchestratorConfig, toml::de::Error> {
    toml::from_str(text)
}

fn apply_env_overrides(config: &mut OrchestratorConfig, db: Option<String>) {
    if let Some(db) = db.filter(|value| !value.trim().is_empty()) {
        config.paths.state_store = PathBuf::from(db);
    }
}

/// Arguments for the config command
#[derive(Debug, clap::Args)]
pub struct ConfigArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

/// Show the effective configuration.
pub fn run(args: ConfigArgs, config: &OrchestratorConfig) -> Result<()> {
    if args.json {
        let payload = serde_json::json!({
            "home": tirtha_home(),
            "config_file": default_config_path(),
            "config": config,
        });
        println!("{}", serde_json::to_string_pretty(&payload)?);
        return Ok(());
    }

    println!("# home: {}", tirtha_home().display());
    println!("# state store exists: {}", config.paths.state_store.exists());
    println!("{}", toml::to_string_pretty(config).context("Failed to render config")?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tirtha_protocol::ImageCheckPolicy;

    #[test]
    fn partial_file_keeps_other_defaults() {
        let config = parse_config(
            r#"
            [prerun]
            min_matched_images = 25

            [scheduler]
            image_checks = "enforce"
            "#,
        )
        .unwrap();
        assert_eq!(config.prerun.min_matched_images, 25);
        assert_eq!(config.prerun.min_match_ratio, 0.10);
        assert_eq!(config.scheduler.image_checks, ImageCheckPolicy::Enforce);
        assert_eq!(config.ark.naan, 999999);
    }

    #[test]
    fn db_override_replaces_state_store() {
        let mut config = OrchestratorConfig::for_home(Path::new("/srv/tirtha"));
        apply_env_overrides(&mut config, Some("/data/tirtha.sqlite".to_string()));
        assert_eq!(config.paths.state_store, PathBuf::from("/data/tirtha.sqlite"));

        apply_env_overrides(&mut config, Some("  ".to_string()));
        assert_eq!(config.paths.state_store, PathBuf::from("/data/tirtha.sqlite"));
    }

    #[test]
    fn short_lease_is_rejected() {
        let config = parse_config("[worker]\nlease_secs = 3600\n").unwrap();
        let err = check_config(&config, Path::new("tirtha.toml")).unwrap_err();
        let helpful = err.downcast_ref::<HelpfulError>().unwrap();
        assert!(helpful.context.as_deref().unwrap().contains("lease_secs (3600)"));

        let config = parse_config("[worker]\npoll_interval_ms = 50\n").unwrap();
        assert!(check_config(&config, Path::new("tirtha.toml")).is_ok());
    }

    #[test]
    fn unknown_policy_is_rejected() {
        assert!(parse_config("[scheduler]\nimage_checks = \"sometimes\"\n").is_err());
    }
}
