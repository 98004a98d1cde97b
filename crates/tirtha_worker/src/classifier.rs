//! Image quality / NSFW classification through an external program.

use async_trait::async_trait;
use serde::Deserialize;
use std::fs::OpenOptions;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tirtha_protocol::{ImageLabel, ToolStep};
use tokio::process::Command;

use crate::error::ToolError;
use crate::joblog;
use crate::toolchain::resolve_for_image;

/// Classifies one image as good, bad or nsfw.
#[async_trait]
pub trait ImageClassifier: Send + Sync {
    /// Diagnostics go to `log_path`. An error aborts the whole gate.
    async fn classify(&self, image: &Path, log_path: &Path) -> Result<ImageLabel, ToolError>;
}

#[derive(Debug, Deserialize)]
struct ClassifierReply {
    label: String,
}

/// Runs a configured program per image and reads `{"label": "..."}` from
/// the last non-empty stdout line.
#[derive(Debug, Clone)]
pub struct CommandClassifier {
    step: ToolStep,
    timeout: Duration,
}

impl CommandClassifier {
    pub fn new(step: ToolStep, timeout: Duration) -> Self {
        Self { step, timeout }
    }
}

#[async_trait]
impl ImageClassifier for CommandClassifier {
    async fn classify(&self, image: &Path, log_path: &Path) -> Result<ImageLabel, ToolError> {
        let resolved = resolve_for_image(&self.step, image);
        joblog::append_line(log_path, &format!("== classify: {}", resolved.command_line()))?;

        let stderr_log = OpenOptions::new().create(true).append(true).open(log_path)?;
        let child = Command::new(&resolved.program)
            .args(&resolved.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::from(stderr_log))
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ToolError::Spawn {
                program: resolved.program.clone(),
                source,
            })?;

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(output) => output?,
            Err(_elapsed) => {
                // kill_on_drop reaps the child
                return Err(ToolError::Timeout {
                    step: self.step.name.clone(),
                    after: self.timeout,
                });
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        joblog::append_line(log_path, stdout.trim())?;

        if !output.status.success() {
            let detail = joblog::tail(log_path, 1024);
            return Err(match output.status.code() {
                Some(code) => ToolError::from_exit_code(&self.step.name, code, &detail),
                None => ToolError::from_signal(&self.step.name, &detail),
            });
        }

        parse_reply(&stdout)
    }
}

/// Parse the classifier's answer. `unchecked` is not a valid verdict.
pub fn parse_reply(stdout: &str) -> Result<ImageLabel, ToolError> {
    let line = stdout
        .lines()
        .rev()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .ok_or_else(|| ToolError::Classifier {
            message: "classifier returned empty output".to_string(),
        })?;

    let reply: ClassifierReply = serde_json::from_str(line).map_err(|e| ToolError::Classifier {
        message: format!("classifier output is not valid JSON ({}): {}", e, line),
    })?;

    match reply.label.parse::<ImageLabel>() {
        Ok(ImageLabel::Unchecked) | Err(_) => Err(ToolError::Classifier {
            message: format!("unknown label '{}'", reply.label),
        }),
        Ok(label) => Ok(label),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_last_json_line() {
        let out = "loading model\n{\"label\": \"nsfw\", \"score\": 0.97}\n";
        assert_eq!(parse_reply(out).unwrap(), ImageLabel::Nsfw);
        assert_eq!(parse_reply("{\"label\":\"GOOD\"}").unwrap(), ImageLabel::Good);
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!(parse_reply(""), Err(ToolError::Classifier { .. })));
        assert!(matches!(parse_reply("ok"), Err(ToolError::Classifier { .. })));
        assert!(matches!(
            parse_reply("{\"label\": \"unchecked\"}"),
            Err(ToolError::Classifier { .. })
        ));
        assert!(matches!(
            parse_reply("{\"label\": \"meh\"}"),
            Err(ToolError::Classifier { .. })
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn command_classifier_reads_label() {
        let tmp = tempfile::TempDir::new().unwrap();
        let image = tmp.path().join("blurry.jpg");
        std::fs::write(&image, b"jpeg").unwrap();
        let step = ToolStep::new(
            "quality",
            "sh",
            &["-c", "case \"$0\" in *blurry*) echo '{\"label\":\"bad\"}';; *) echo '{\"label\":\"good\"}';; esac", "{image}"],
        );
        let classifier = CommandClassifier::new(step, Duration::from_secs(10));
        let log = tmp.path().join("classify.log");

        assert_eq!(classifier.classify(&image, &log).await.unwrap(), ImageLabel::Bad);
        assert_eq!(
            classifier
                .classify(&tmp.path().join("sharp.jpg"), &log)
                .await
                .unwrap(),
            ImageLabel::Good
        );
        assert!(std::fs::read_to_string(&log).unwrap().contains("== classify"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn command_classifier_failure_is_an_error() {
        let tmp = tempfile::TempDir::new().unwrap();
        let step = ToolStep::new("quality", "sh", &["-c", "echo 'CUDA out of memory' >&2; exit 1"]);
        let classifier = CommandClassifier::new(step, Duration::from_secs(10));
        let err = classifier
            .classify(&tmp.path().join("a.jpg"), &tmp.path().join("c.log"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("CUDA out of memory"));
    }
}
