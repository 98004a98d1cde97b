//! Tool execution errors with retry classification.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

const MAX_DETAIL_LEN: usize = 500;

/// External tool errors.
///
/// Exit code conventions for reconstruction tools:
/// - 0: Success
/// - 1: Permanent error (no retry) - e.g., too few registered images
/// - Other: Transient (may succeed on retry) - e.g., GPU out of memory
#[derive(Debug, Error)]
pub enum ToolError {
    /// Permanent error - retrying will not help
    #[error("Permanent error (no retry): {message}")]
    Permanent { message: String },

    /// Transient error - may succeed on retry
    #[error("Transient error (retry eligible): {message}")]
    Transient { message: String },

    /// The chain exceeded its wall clock budget and was killed
    #[error("Step '{step}' timed out after {}s", .after.as_secs())]
    Timeout { step: String, after: Duration },

    /// The worker asked the chain to stop
    #[error("Step '{step}' cancelled")]
    Cancelled { step: String },

    #[error("Failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// Zero exit but no artifact where the chain promised one
    #[error("Missing artifact: {}", .path.display())]
    MissingArtifact { path: PathBuf },

    /// Classifier answered with something we cannot interpret
    #[error("Classifier error: {message}")]
    Classifier { message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ToolError {
    /// Check if this error is transient (eligible for retry)
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ToolError::Transient { .. } | ToolError::Spawn { .. } | ToolError::Io(_)
        )
    }

    /// Check if this error is permanent (no retry)
    pub fn is_permanent(&self) -> bool {
        !self.is_transient() && !self.is_cancelled()
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, ToolError::Cancelled { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, ToolError::Timeout { .. })
    }

    /// Classify a non-zero exit. `detail` is usually the tail of the job log.
    pub fn from_exit_code(step: &str, code: i32, detail: &str) -> Self {
        let message = describe(format!("Step '{}' exited with code {}", step, code), detail);
        match code {
            1 => ToolError::Permanent { message },
            _ => ToolError::Transient { message },
        }
    }

    /// Create from signal termination
    pub fn from_signal(step: &str, detail: &str) -> Self {
        ToolError::Transient {
            message: describe(format!("Step '{}' terminated by signal", step), detail),
        }
    }
}

fn describe(head: String, detail: &str) -> String {
    let detail = detail.trim();
    if detail.is_empty() {
        return head;
    }
    if detail.len() > MAX_DETAIL_LEN {
        let mut cut = MAX_DETAIL_LEN;
        while !detail.is_char_boundary(cut) {
            cut -= 1;
        }
        format!("{}: {}... (truncated)", head, &detail[..cut])
    } else {
        format!("{}: {}", head, detail)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_code_one_is_permanent() {
        let err = ToolError::from_exit_code("mapper", 1, "no good initial pair");
        assert!(err.is_permanent());
        assert!(err.to_string().contains("Step 'mapper' exited with code 1"));
        assert!(err.to_string().contains("no good initial pair"));
    }

    #[test]
    fn other_exit_codes_are_transient() {
        assert!(ToolError::from_exit_code("train", 2, "").is_transient());
        assert!(ToolError::from_exit_code("train", 137, "").is_transient());
        assert!(ToolError::from_signal("train", "SIGKILL").is_transient());
    }

    #[test]
    fn long_detail_is_truncated() {
        let detail = "x".repeat(2000);
        let err = ToolError::from_exit_code("mapper", 1, &detail);
        assert!(err.to_string().ends_with("... (truncated)"));
        assert!(err.to_string().len() < 700);
    }

    #[test]
    fn timeouts_and_missing_artifacts_are_not_retried() {
        let timeout = ToolError::Timeout {
            step: "train".into(),
            after: Duration::from_secs(5),
        };
        assert!(timeout.is_permanent());
        assert!(timeout.is_timeout());
        assert_eq!(timeout.to_string(), "Step 'train' timed out after 5s");

        let cancelled = ToolError::Cancelled { step: "train".into() };
        assert!(!cancelled.is_permanent());
        assert!(!cancelled.is_transient());

        let missing = ToolError::MissingArtifact {
            path: PathBuf::from("/tmp/out.splat"),
        };
        assert!(missing.is_permanent());
    }
}
