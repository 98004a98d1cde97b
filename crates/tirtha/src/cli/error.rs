//! Helpful error types for CLI commands
//!
//! Every error includes:
//! - What went wrong
//! - Context about the situation
//! - Suggestions for how to fix it

use std::fmt;
use std::path::Path;

use tirtha_sentinel::replace::ReplaceError;
use tirtha_sentinel::OrchestratorError;

/// An error with helpful context and suggestions
#[derive(Debug)]
pub struct HelpfulError {
    /// The main error message
    pub message: String,
    /// Additional context about what was happening
    pub context: Option<String>,
    /// Suggestions for how to fix the error
    pub suggestions: Vec<String>,
}

impl HelpfulError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            context: None,
            suggestions: Vec::new(),
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestions.push(suggestion.into());
        self
    }

    pub fn with_suggestions(
        mut self,
        suggestions: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.suggestions.extend(suggestions.into_iter().map(|s| s.into()));
        self
    }

    // === Common error constructors ===

    /// File does not exist
    pub fn file_not_found(path: &Path) -> Self {
        Self::new(format!("File not found: {}", path.display()))
            .with_context("The specified file does not exist")
            .with_suggestions([
                format!("TRY: Check if the file exists: ls -la {}", path.display()),
                format!(
                    "TRY: Look for similar files: ls {}",
                    path.parent()
                        .map(|p| p.display().to_string())
                        .unwrap_or_else(|| ".".to_string())
                ),
            ])
    }

    /// Path exists but is not a directory
    pub fn not_a_directory(path: &Path) -> Self {
        Self::new(format!("Not a directory: {}", path.display()))
            .with_context("Contributions are ingested from a directory of images")
            .with_suggestion(format!(
                "TRY: Point at the folder holding the images: tirtha ingest <site> {}",
                path.parent()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| ".".to_string())
            ))
    }

    pub fn no_images(path: &Path) -> Self {
        Self::new(format!("No images found in {}", path.display()))
            .with_context("Only .jpg, .jpeg and .png files are picked up")
            .with_suggestion(format!("TRY: ls {}", path.display()))
    }

    pub fn site_not_found(key: &str) -> Self {
        Self::new(format!("Site not found: {}", key))
            .with_context("Sites are looked up by ID or verbose ID")
            .with_suggestions([
                "TRY: List known sites: tirtha site list".to_string(),
                format!("TRY: Register it first: tirtha site add \"<name>\" --verbose-id {}", key),
            ])
    }

    pub fn run_not_found(id: &str) -> Self {
        Self::new(format!("Run not found: {}", id))
            .with_suggestion("TRY: List recent runs: tirtha runs --limit 20")
    }

    pub fn contribution_not_found(id: &str) -> Self {
        Self::new(format!("Contribution not found: {}", id))
            .with_suggestion("TRY: Check the ID printed by `tirtha ingest`")
    }

    pub fn invalid_id(value: &str, reason: &str) -> Self {
        Self::new(format!("Invalid identifier: '{}'", value))
            .with_context(reason.to_string())
            .with_suggestion("TRY: Identifiers are UUIDs, e.g. 0b0e5d0c-7c4a-4f3e-9d0a-2f1b8c6e4d21")
    }

    /// Translate orchestration failures into operator-facing guidance.
    pub fn from_orchestrator(err: &OrchestratorError) -> Self {
        let base = Self::new(err.to_string());
        let base = match err.log_path() {
            Some(path) => base.with_context(format!("Diagnostic log: {}", path.display())),
            None => base,
        };
        match err {
            OrchestratorError::Replace(ReplaceError::NotArchived { run_id, .. }) => base
                .with_suggestion(format!("TRY: Archive the run first: tirtha archive-run {}", run_id)),
            OrchestratorError::Replace(ReplaceError::DisallowedExtension { kind, .. }) => base
                .with_suggestion(format!(
                    "TRY: Supply a file with one of: {}",
                    kind.allowed_extensions().join(", ")
                )),
            OrchestratorError::Replace(ReplaceError::Swap { backup, .. }) => base.with_suggestion(
                format!("TRY: Restore manually from {}", backup.display()),
            ),
            OrchestratorError::InvalidTransition { run_id, .. } => base.with_suggestion(format!(
                "TRY: Inspect the run: tirtha runs --json | grep {}",
                run_id
            )),
            OrchestratorError::GateRejected { contribution_id, .. } => base.with_suggestion(
                format!(
                    "TRY: Re-run the checks after fixing the images: tirtha trigger {}",
                    contribution_id
                ),
            ),
            _ => base,
        }
    }
}

impl fmt::Display for HelpfulError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "ERROR: {}", self.message)?;

        if let Some(ctx) = &self.context {
            writeln!(f, "CONTEXT: {}", ctx)?;
        }

        if !self.suggestions.is_empty() {
            writeln!(f)?;
            for suggestion in &self.suggestions {
                writeln!(f, "  {}", suggestion)?;
            }
        }

        Ok(())
    }
}

impl std::error::Error for HelpfulError {}

/// Machine-readable error on stdout for `--json` callers.
pub fn print_json_error(err: &anyhow::Error) {
    let payload = match err.downcast_ref::<HelpfulError>() {
        Some(helpful) => serde_json::json!({
            "error": {
                "message": helpful.message,
                "context": helpful.context,
                "suggestions": helpful.suggestions,
            }
        }),
        None => serde_json::json!({
            "error": {
                "message": format!("{:#}", err),
                "context": null,
                "suggestions": [],
            }
        }),
    };
    println!("{}", payload);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tirtha_ids::RunId;
    use tirtha_protocol::{ReconKind, RunStatus};

    #[test]
    fn test_helpful_error_display() {
        let err = HelpfulError::new("Something went wrong")
            .with_context("While processing data")
            .with_suggestion("Try again");

        let display = format!("{}", err);
        assert!(display.contains("ERROR: Something went wrong"));
        assert!(display.contains("CONTEXT: While processing data"));
        assert!(display.contains("Try again"));
    }

    #[test]
    fn test_file_not_found() {
        let path = PathBuf::from("/nonexistent/model.glb");
        let display = HelpfulError::file_not_found(&path).to_string();
        assert!(display.contains("/nonexistent/model.glb"));
        assert!(display.contains("TRY:"));
    }

    #[test]
    fn unarchived_replacement_suggests_archiving() {
        let run_id = RunId::new();
        let err = OrchestratorError::Replace(ReplaceError::NotArchived {
            run_id: run_id.clone(),
            status: RunStatus::Done,
        });
        let display = HelpfulError::from_orchestrator(&err).to_string();
        assert!(display.contains(&format!("tirtha archive-run {}", run_id)));
    }

    #[test]
    fn extension_rejection_lists_allowed_types() {
        let err = OrchestratorError::Replace(ReplaceError::DisallowedExtension {
            kind: ReconKind::Gs,
            extension: "glb".to_string(),
        });
        let display = HelpfulError::from_orchestrator(&err).to_string();
        assert!(display.contains("splat"));
    }
}
