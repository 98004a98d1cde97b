//! Orchestrator error taxonomy.
//!
//! Business logic returns these as typed values; the dispatcher asks
//! [`OrchestratorError::is_retryable`] and lets its [`crate::retry::RetryPolicy`]
//! decide what happens to the task.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;
use tirtha_db::DbError;
use tirtha_ids::{ContributionId, RunId};
use tirtha_protocol::{ReconKind, RunStatus};
use tirtha_worker::ToolError;

use crate::replace::ReplaceError;

pub type Result<T> = std::result::Result<T, OrchestratorError>;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Database error: {0}")]
    Db(#[from] DbError),

    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    /// The batch did not pass the Ingestion Gate.
    #[error("Contribution {contribution_id} failed image checks: {reason}")]
    GateRejected {
        contribution_id: ContributionId,
        reason: String,
        log_path: Option<PathBuf>,
    },

    /// The classifier itself broke; the batch is left unvalidated.
    #[error("Image classifier failed for contribution {contribution_id}: {source}")]
    Classifier {
        contribution_id: ContributionId,
        #[source]
        source: ToolError,
        log_path: Option<PathBuf>,
    },

    #[error("Run {run_id}: cannot move from {from} to {to}")]
    InvalidTransition {
        run_id: RunId,
        from: RunStatus,
        to: RunStatus,
    },

    #[error(transparent)]
    Replace(#[from] ReplaceError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// One or more kinds failed in a multi-kind request. Each kind was
    /// attempted regardless of the others.
    #[error("Reconstruction failed for contribution {contribution_id}: {}", KindFailures(.failures))]
    ReconFailed {
        contribution_id: ContributionId,
        failures: Vec<KindFailure>,
    },
}

/// Outcome of one failed kind inside [`OrchestratorError::ReconFailed`].
#[derive(Debug, Clone)]
pub struct KindFailure {
    pub kind: ReconKind,
    pub message: String,
    pub retryable: bool,
}

struct KindFailures<'a>(&'a [KindFailure]);

impl fmt::Display for KindFailures<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, failure) in self.0.iter().enumerate() {
            if idx > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{}: {}", failure.kind, failure.message)?;
        }
        Ok(())
    }
}

impl OrchestratorError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Whether the queue may deliver the task again.
    ///
    /// Validation failures and permanent tool errors are final. Transient
    /// tool errors, cancellations and database hiccups are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            OrchestratorError::Tool(err) => err.is_transient() || err.is_cancelled(),
            OrchestratorError::Classifier { source, .. } => source.is_transient(),
            OrchestratorError::Db(err) => matches!(err, DbError::Sqlx(_) | DbError::Io(_)),
            OrchestratorError::Io(_) => true,
            OrchestratorError::ReconFailed { failures, .. } => {
                failures.iter().any(|failure| failure.retryable)
            }
            OrchestratorError::GateRejected { .. }
            | OrchestratorError::InvalidTransition { .. }
            | OrchestratorError::Replace(_)
            | OrchestratorError::NotFound(_)
            | OrchestratorError::InvalidInput(_)
            | OrchestratorError::Serialization(_) => false,
        }
    }

    /// The tool chain was stopped by the worker rather than failing.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, OrchestratorError::Tool(err) if err.is_cancelled())
    }

    /// Diagnostic log attached to the failure, if any.
    pub fn log_path(&self) -> Option<&PathBuf> {
        match self {
            OrchestratorError::GateRejected { log_path, .. }
            | OrchestratorError::Classifier { log_path, .. } => log_path.as_ref(),
            _ => None,
        }
    }
}
