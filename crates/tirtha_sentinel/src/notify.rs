//! Notification fan-out.
//!
//! The orchestrator decides when to notify and with what payload; rendering
//! and delivering mail belongs to whoever drains the sinks. Sink failures
//! are logged and counted, never propagated: they must not mask the error
//! that caused the notice.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tirtha_ids::{ContributionId, RunId, SiteId};
use tirtha_protocol::NotifyConfig;
use tracing::{error, info, warn};

use crate::metrics::METRICS;

pub const STEP_IMAGE_PROCESSING: &str = "Image Processing";
pub const STEP_IDENTIFIER_MINTING: &str = "Identifier Minting";
pub const STEP_STALE_RUN: &str = "Stale Run";
pub const OP_IMAGE_OPS: &str = "ImageOps";

/// Something went wrong; operators only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureNotice {
    pub contribution_id: Option<ContributionId>,
    pub site_id: SiteId,
    pub site_name: String,
    pub contributor_email: Option<String>,
    pub step: String,
    pub error: String,
    pub log_path: Option<PathBuf>,
    pub run_id: Option<RunId>,
    pub op_type: Option<String>,
    pub admin_url: String,
    #[serde(default)]
    pub recipients: Vec<String>,
}

/// A Run was published.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuccessNotice {
    pub contribution_id: Option<ContributionId>,
    pub site_id: SiteId,
    pub site_name: String,
    pub contributor_email: Option<String>,
    pub contributor_name: Option<String>,
    pub op_type: String,
    pub run_id: Option<RunId>,
    pub output_url: Option<String>,
    pub duration: Option<Duration>,
    pub identifier_url: Option<String>,
    pub identifier_id: Option<String>,
    #[serde(default)]
    pub recipients: Vec<String>,
}

/// A delivery sink.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify_failure(&self, notice: &FailureNotice) -> std::io::Result<()>;
    async fn notify_success(&self, notice: &SuccessNotice) -> std::io::Result<()>;
}

/// Writes one structured log line per notice.
#[derive(Debug, Clone, Default)]
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn notify_failure(&self, notice: &FailureNotice) -> std::io::Result<()> {
        error!(
            step = %notice.step,
            site = %notice.site_name,
            contribution_id = ?notice.contribution_id.as_ref().map(|id| id.to_string()),
            run_id = ?notice.run_id.as_ref().map(|id| id.to_string()),
            op_type = ?notice.op_type,
            log_path = ?notice.log_path,
            recipients = ?notice.recipients,
            "Failure: {}",
            notice.error
        );
        Ok(())
    }

    async fn notify_success(&self, notice: &SuccessNotice) -> std::io::Result<()> {
        info!(
            op_type = %notice.op_type,
            site = %notice.site_name,
            run_id = ?notice.run_id.as_ref().map(|id| id.to_string()),
            output_url = ?notice.output_url,
            identifier = ?notice.identifier_id,
            recipients = ?notice.recipients,
            "Published"
        );
        Ok(())
    }
}

/// One line in the outbox file.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum OutboxEntry {
    Failure(FailureNotice),
    Success(SuccessNotice),
}

/// Appends JSON lines for the external mail sender.
#[derive(Debug, Clone)]
pub struct OutboxNotifier {
    path: PathBuf,
}

impl OutboxNotifier {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn append(&self, entry: &OutboxEntry) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let line = serde_json::to_string(entry)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{}", line)
    }

    /// Every entry currently in the outbox, oldest first.
    pub fn read_all(&self) -> std::io::Result<Vec<OutboxEntry>> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        text.lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).map_err(std::io::Error::from))
            .collect()
    }
}

#[async_trait]
impl Notifier for OutboxNotifier {
    async fn notify_failure(&self, notice: &FailureNotice) -> std::io::Result<()> {
        self.append(&OutboxEntry::Failure(notice.clone()))
    }

    async fn notify_success(&self, notice: &SuccessNotice) -> std::io::Result<()> {
        self.append(&OutboxEntry::Success(notice.clone()))
    }
}

/// Decides recipients and hands each notice to every sink.
#[derive(Clone)]
pub struct NotificationFanout {
    config: NotifyConfig,
    base_url: String,
    sinks: Vec<Arc<dyn Notifier>>,
}

impl NotificationFanout {
    pub fn new(config: NotifyConfig, base_url: impl Into<String>) -> Self {
        Self {
            config,
            base_url: base_url.into(),
            sinks: Vec::new(),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn Notifier>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// `<base_url>/admin/`
    pub fn admin_url(&self) -> String {
        format!("{}/admin/", self.base_url.trim_end_matches('/'))
    }

    /// Operators always; the contributor never.
    pub async fn failure(&self, mut notice: FailureNotice) {
        notice.recipients = self.config.admin_emails.clone();
        if notice.admin_url.is_empty() {
            notice.admin_url = self.admin_url();
        }
        for sink in &self.sinks {
            if let Err(e) = sink.notify_failure(&notice).await {
                METRICS.inc_notification_failures();
                warn!(step = %notice.step, "Failure notification not delivered: {}", e);
            }
        }
    }

    /// Operators always; the contributor when enabled.
    pub async fn success(&self, mut notice: SuccessNotice) {
        let mut recipients = self.config.admin_emails.clone();
        if self.config.notify_contributors {
            if let Some(email) = &notice.contributor_email {
                if !recipients.iter().any(|r| r.eq_ignore_ascii_case(email)) {
                    recipients.push(email.clone());
                }
            }
        }
        notice.recipients = recipients;
        for sink in &self.sinks {
            if let Err(e) = sink.notify_success(&notice).await {
                METRICS.inc_notification_failures();
                warn!(op_type = %notice.op_type, "Success notification not delivered: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[derive(Default)]
    struct Capture {
        failures: Mutex<Vec<FailureNotice>>,
        successes: Mutex<Vec<SuccessNotice>>,
    }

    #[async_trait]
    impl Notifier for Capture {
        async fn notify_failure(&self, notice: &FailureNotice) -> std::io::Result<()> {
            self.failures.lock().unwrap().push(notice.clone());
            Ok(())
        }

        async fn notify_success(&self, notice: &SuccessNotice) -> std::io::Result<()> {
            self.successes.lock().unwrap().push(notice.clone());
            Ok(())
        }
    }

    struct Broken;

    #[async_trait]
    impl Notifier for Broken {
        async fn notify_failure(&self, _: &FailureNotice) -> std::io::Result<()> {
            Err(std::io::Error::new(std::io::ErrorKind::Other, "smtp down"))
        }

        async fn notify_success(&self, _: &SuccessNotice) -> std::io::Result<()> {
            Err(std::io::Error::new(std::io::ErrorKind::Other, "smtp down"))
        }
    }

    fn success_notice(email: &str) -> SuccessNotice {
        SuccessNotice {
            contribution_id: None,
            site_id: SiteId::new(),
            site_name: "Lingaraja".into(),
            contributor_email: Some(email.into()),
            contributor_name: Some("Asha".into()),
            op_type: "GSOps".into(),
            run_id: None,
            output_url: None,
            duration: None,
            identifier_url: None,
            identifier_id: None,
            recipients: Vec::new(),
        }
    }

    fn failure_notice() -> FailureNotice {
        FailureNotice {
            contribution_id: None,
            site_id: SiteId::new(),
            site_name: "Lingaraja".into(),
            contributor_email: Some("asha@example.com".into()),
            step: STEP_IMAGE_PROCESSING.into(),
            error: "boom".into(),
            log_path: None,
            run_id: None,
            op_type: Some(OP_IMAGE_OPS.into()),
            admin_url: String::new(),
            recipients: Vec::new(),
        }
    }

    #[tokio::test]
    async fn contributor_gets_success_only_when_enabled() {
        let capture = Arc::new(Capture::default());
        let fanout = NotificationFanout::new(NotifyConfig::default(), "http://t.example/")
            .with_sink(capture.clone());
        fanout.success(success_notice("asha@example.com")).await;
        fanout.failure(failure_notice()).await;

        let successes = capture.successes.lock().unwrap();
        assert!(successes[0].recipients.contains(&"asha@example.com".to_string()));
        let failures = capture.failures.lock().unwrap();
        assert!(!failures[0].recipients.contains(&"asha@example.com".to_string()));
        assert_eq!(failures[0].admin_url, "http://t.example/admin/");

        let quiet = NotificationFanout::new(
            NotifyConfig {
                notify_contributors: false,
                ..NotifyConfig::default()
            },
            "http://t.example",
        )
        .with_sink(capture.clone());
        drop(successes);
        quiet.success(success_notice("asha@example.com")).await;
        let successes = capture.successes.lock().unwrap();
        assert!(!successes[1].recipients.contains(&"asha@example.com".to_string()));
    }

    #[tokio::test]
    async fn broken_sink_does_not_stop_others() {
        let capture = Arc::new(Capture::default());
        let fanout = NotificationFanout::new(NotifyConfig::default(), "http://t.example")
            .with_sink(Arc::new(Broken))
            .with_sink(capture.clone());
        fanout.failure(failure_notice()).await;
        assert_eq!(capture.failures.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn outbox_appends_json_lines() {
        let tmp = TempDir::new().unwrap();
        let outbox = OutboxNotifier::new(tmp.path().join("mail").join("outbox.jsonl"));
        outbox.notify_failure(&failure_notice()).await.unwrap();
        outbox
            .notify_success(&success_notice("asha@example.com"))
            .await
            .unwrap();

        let entries = outbox.read_all().unwrap();
        assert_eq!(entries.len(), 2);
        assert!(matches!(&entries[0], OutboxEntry::Failure(n) if n.step == STEP_IMAGE_PROCESSING));
        assert!(matches!(&entries[1], OutboxEntry::Success(n) if n.op_type == "GSOps"));
    }
}
