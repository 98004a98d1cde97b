//! Shared state for commands that touch the store.

use anyhow::{Context, Result};
use tirtha_db::{Run, Site, TirthaDb};
use tirtha_ids::{ContributionId, RunId};
use tirtha_protocol::OrchestratorConfig;
use tirtha_sentinel::Orchestrator;

use crate::cli::error::HelpfulError;

pub struct CliContext {
    pub orch: Orchestrator,
}

impl CliContext {
    /// Open (creating if needed) the state store and wire the orchestrator.
    pub async fn open(config: OrchestratorConfig) -> Result<Self> {
        let db = TirthaDb::open(&config.paths.state_store)
            .await
            .with_context(|| {
                format!(
                    "Failed to open state store {}",
                    config.paths.state_store.display()
                )
            })?;
        Ok(Self {
            orch: Orchestrator::new(db, config),
        })
    }

    pub fn db(&self) -> &TirthaDb {
        self.orch.db()
    }

    pub fn config(&self) -> &OrchestratorConfig {
        self.orch.config()
    }

    /// Site by ID or verbose ID.
    pub async fn require_site(&self, key: &str) -> Result<Site> {
        self.db()
            .find_site(key)
            .await?
            .ok_or_else(|| HelpfulError::site_not_found(key).into())
    }

    pub async fn require_run(&self, raw: &str) -> Result<Run> {
        let id = parse_run_id(raw)?;
        self.db()
            .get_run(&id)
            .await?
            .ok_or_else(|| HelpfulError::run_not_found(raw).into())
    }

    pub async fn require_contribution(&self, raw: &str) -> Result<ContributionId> {
        let id = ContributionId::parse(raw)
            .map_err(|err| HelpfulError::invalid_id(raw, &err.to_string()))?;
        match self.db().get_contribution(&id).await? {
            Some(contribution) => Ok(contribution.id),
            None => Err(HelpfulError::contribution_not_found(raw).into()),
        }
    }
}

pub fn parse_run_id(raw: &str) -> Result<RunId> {
    RunId::parse(raw).map_err(|err| HelpfulError::invalid_id(raw, &err.to_string()).into())
}
