//! Running tool chains as child processes.

use async_trait::async_trait;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use crate::cancel::CancellationToken;
use crate::error::ToolError;
use crate::joblog;
use crate::toolchain::ResolvedStep;

const LOG_TAIL_BYTES: u64 = 2048;

/// One chain execution.
#[derive(Debug, Clone)]
pub struct ChainRequest {
    /// For log lines, e.g. "GSOps 1a2b3c4d".
    pub label: String,
    pub steps: Vec<ResolvedStep>,
    pub working_dir: PathBuf,
    /// stdout/stderr of every step is appended here.
    pub log_path: PathBuf,
    /// Artifact the chain must produce.
    pub output: PathBuf,
    /// Wall clock budget for the whole chain.
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct ChainOutcome {
    pub output: PathBuf,
    pub elapsed: Duration,
    pub steps_run: usize,
}

/// Executes a resolved tool chain. The production implementation spawns
/// processes; tests substitute scripted outcomes.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn run_chain(
        &self,
        request: &ChainRequest,
        cancel: &CancellationToken,
    ) -> Result<ChainOutcome, ToolError>;
}

/// Spawns each step in order, one at a time.
#[derive(Debug, Clone, Default)]
pub struct ProcessExecutor;

impl ProcessExecutor {
    pub fn new() -> Self {
        Self
    }
}

enum Waited {
    Exited(std::io::Result<ExitStatus>),
    TimedOut,
    Cancelled,
}

#[async_trait]
impl ToolExecutor for ProcessExecutor {
    async fn run_chain(
        &self,
        request: &ChainRequest,
        cancel: &CancellationToken,
    ) -> Result<ChainOutcome, ToolError> {
        let started = Instant::now();
        let deadline = tokio::time::Instant::now() + request.timeout;
        let total = request.steps.len();

        joblog::append_line(
            &request.log_path,
            &format!("== {} starting ({} steps)", request.label, total),
        )?;

        for (index, step) in request.steps.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(ToolError::Cancelled {
                    step: step.name.clone(),
                });
            }

            joblog::append_line(
                &request.log_path,
                &format!("== step {}/{} '{}': {}", index + 1, total, step.name, step.command_line()),
            )?;
            info!(chain = %request.label, step = %step.name, "Running tool step");

            let mut child = spawn_step(step, request)?;
            let waited = tokio::select! {
                status = child.wait() => Waited::Exited(status),
                _ = tokio::time::sleep_until(deadline) => Waited::TimedOut,
                _ = cancel.cancelled() => Waited::Cancelled,
            };

            let status = match waited {
                Waited::Exited(status) => status?,
                Waited::TimedOut => {
                    kill(&mut child, &step.name).await;
                    let _ = joblog::append_line(&request.log_path, "== timed out; killed");
                    return Err(ToolError::Timeout {
                        step: step.name.clone(),
                        after: request.timeout,
                    });
                }
                Waited::Cancelled => {
                    kill(&mut child, &step.name).await;
                    let _ = joblog::append_line(&request.log_path, "== cancelled; killed");
                    return Err(ToolError::Cancelled {
                        step: step.name.clone(),
                    });
                }
            };

            if !status.success() {
                let detail = joblog::tail(&request.log_path, LOG_TAIL_BYTES);
                let err = match status.code() {
                    Some(code) => ToolError::from_exit_code(&step.name, code, &detail),
                    None => ToolError::from_signal(&step.name, &detail),
                };
                let _ = joblog::append_line(&request.log_path, &format!("== failed: {}", err));
                return Err(err);
            }
            debug!(chain = %request.label, step = %step.name, "Tool step finished");
        }

        if !request.output.is_file() {
            let _ = joblog::append_line(&request.log_path, "== finished without artifact");
            return Err(ToolError::MissingArtifact {
                path: request.output.clone(),
            });
        }

        let elapsed = started.elapsed();
        joblog::append_line(
            &request.log_path,
            &format!("== {} finished in {:.1}s", request.label, elapsed.as_secs_f64()),
        )?;

        Ok(ChainOutcome {
            output: request.output.clone(),
            elapsed,
            steps_run: total,
        })
    }
}

fn spawn_step(step: &ResolvedStep, request: &ChainRequest) -> Result<Child, ToolError> {
    let log = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&request.log_path)?;
    let stderr = log.try_clone()?;

    Command::new(&step.program)
        .args(&step.args)
        .current_dir(&request.working_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::from(log))
        .stderr(Stdio::from(stderr))
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| ToolError::Spawn {
            program: step.program.clone(),
            source,
        })
}

async fn kill(child: &mut Child, step: &str) {
    if let Err(e) = child.start_kill() {
        warn!(step, "Failed to kill tool process: {}", e);
        return;
    }
    if let Err(e) = child.wait().await {
        warn!(step, "Failed to reap tool process: {}", e);
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sh(name: &str, script: &str) -> ResolvedStep {
        ResolvedStep {
            name: name.to_string(),
            program: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
        }
    }

    fn request(tmp: &TempDir, steps: Vec<ResolvedStep>, timeout: Duration) -> ChainRequest {
        ChainRequest {
            label: "test chain".into(),
            steps,
            working_dir: tmp.path().to_path_buf(),
            log_path: tmp.path().join("run.log"),
            output: tmp.path().join("out.splat"),
            timeout,
        }
    }

    #[tokio::test]
    async fn successful_chain_produces_artifact() {
        let tmp = TempDir::new().unwrap();
        let req = request(
            &tmp,
            vec![sh("prepare", "echo preparing"), sh("train", "printf splat > out.splat")],
            Duration::from_secs(10),
        );

        let outcome = ProcessExecutor::new()
            .run_chain(&req, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.steps_run, 2);
        assert_eq!(std::fs::read_to_string(&outcome.output).unwrap(), "splat");

        let log = std::fs::read_to_string(&req.log_path).unwrap();
        assert!(log.contains("preparing"));
        assert!(log.contains("step 2/2 'train'"));
    }

    #[tokio::test]
    async fn exit_one_is_permanent_and_stops_chain() {
        let tmp = TempDir::new().unwrap();
        let req = request(
            &tmp,
            vec![
                sh("mapper", "echo 'no good initial pair' >&2; exit 1"),
                sh("never", "touch ran-anyway"),
            ],
            Duration::from_secs(10),
        );

        let err = ProcessExecutor::new()
            .run_chain(&req, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.is_permanent());
        assert!(err.to_string().contains("no good initial pair"));
        assert!(!tmp.path().join("ran-anyway").exists());
    }

    #[tokio::test]
    async fn other_exit_codes_are_transient() {
        let tmp = TempDir::new().unwrap();
        let req = request(&tmp, vec![sh("train", "exit 3")], Duration::from_secs(10));
        let err = ProcessExecutor::new()
            .run_chain(&req, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn zero_exit_without_artifact_fails() {
        let tmp = TempDir::new().unwrap();
        let req = request(&tmp, vec![sh("train", "true")], Duration::from_secs(10));
        let err = ProcessExecutor::new()
            .run_chain(&req, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::MissingArtifact { .. }));
    }

    #[tokio::test]
    async fn timeout_kills_the_step() {
        let tmp = TempDir::new().unwrap();
        let req = request(&tmp, vec![sh("train", "sleep 30")], Duration::from_millis(200));
        let started = Instant::now();
        let err = ProcessExecutor::new()
            .run_chain(&req, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.is_timeout());
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn cancellation_kills_the_step() {
        let tmp = TempDir::new().unwrap();
        let req = request(&tmp, vec![sh("train", "sleep 30")], Duration::from_secs(60));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let err = ProcessExecutor::new().run_chain(&req, &cancel).await.unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn missing_program_is_a_spawn_error() {
        let tmp = TempDir::new().unwrap();
        let step = ResolvedStep {
            name: "ghost".into(),
            program: "/nonexistent/tirtha-tool".into(),
            args: vec![],
        };
        let req = request(&tmp, vec![step], Duration::from_secs(5));
        let err = ProcessExecutor::new()
            .run_chain(&req, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Spawn { .. }));
        assert!(err.is_transient());
    }
}
