//! Ingestion Gate: per-image quality/NSFW classification of a contribution.
//!
//! The gate can be switched to bypass (production currently runs that way
//! because the classifier contends for the GPU); in bypass mode images stay
//! `unchecked` and the batch is accepted.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tirtha_db::TirthaDb;
use tirtha_ids::{ContributionId, ImageId};
use tirtha_protocol::{GateStatus, ImageCheckPolicy, ImageLabel};
use tirtha_worker::joblog;
use tirtha_worker::ImageClassifier;
use tracing::{info, warn};

use crate::error::{OrchestratorError, Result};
use crate::metrics::METRICS;

/// Per-image verdicts and the batch decision.
#[derive(Debug, Clone)]
pub struct GateReport {
    pub contribution_id: ContributionId,
    pub verdicts: Vec<(ImageId, ImageLabel)>,
    pub accepted: usize,
    pub rejected: usize,
    pub bypassed: bool,
    pub log_path: Option<PathBuf>,
    /// Why the batch failed; `None` when it passed.
    pub failure: Option<String>,
}

impl GateReport {
    pub fn passed(&self) -> bool {
        self.failure.is_none()
    }
}

#[derive(Clone)]
pub struct IngestionGate {
    db: TirthaDb,
    classifier: Option<Arc<dyn ImageClassifier>>,
    policy: ImageCheckPolicy,
    jobs_log_dir: PathBuf,
}

impl IngestionGate {
    pub fn new(
        db: TirthaDb,
        classifier: Option<Arc<dyn ImageClassifier>>,
        policy: ImageCheckPolicy,
        jobs_log_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            db,
            classifier,
            policy,
            jobs_log_dir: jobs_log_dir.into(),
        }
    }

    pub fn policy(&self) -> ImageCheckPolicy {
        self.policy
    }

    /// Classify every image without touching stored state.
    pub async fn evaluate(&self, contribution_id: &ContributionId) -> Result<GateReport> {
        let images = self.db.contribution_images(contribution_id).await?;
        let mut report = GateReport {
            contribution_id: contribution_id.clone(),
            verdicts: Vec::with_capacity(images.len()),
            accepted: 0,
            rejected: 0,
            bypassed: self.policy == ImageCheckPolicy::Bypass,
            log_path: None,
            failure: None,
        };

        if images.is_empty() {
            report.failure = Some("contribution has no images".to_string());
            return Ok(report);
        }

        if report.bypassed {
            warn!(
                contribution_id = %contribution_id,
                images = images.len(),
                "Image checks bypassed; accepting batch unchecked"
            );
            report.verdicts = images
                .iter()
                .map(|image| (image.id.clone(), ImageLabel::Unchecked))
                .collect();
            report.accepted = images.len();
            return Ok(report);
        }

        let classifier = self.classifier.as_ref().ok_or_else(|| {
            OrchestratorError::invalid_input("image checks enforced but no classifier configured")
        })?;
        let log_path = joblog::job_log_path(&self.jobs_log_dir, "imageops", contribution_id.short());
        report.log_path = Some(log_path.clone());

        for image in &images {
            let label = classifier
                .classify(Path::new(&image.path), &log_path)
                .await
                .map_err(|source| OrchestratorError::Classifier {
                    contribution_id: contribution_id.clone(),
                    source,
                    log_path: Some(log_path.clone()),
                })?;
            if label.is_usable() {
                report.accepted += 1;
            } else {
                report.rejected += 1;
            }
            report.verdicts.push((image.id.clone(), label));
        }

        if report.accepted == 0 {
            report.failure = Some(format!(
                "no acceptable images ({} rejected)",
                report.rejected
            ));
        }
        Ok(report)
    }

    /// Run the gate and record the outcome: labels on the images and the
    /// contribution's gate status. A failed batch comes back as
    /// [`OrchestratorError::GateRejected`]; a broken classifier leaves the
    /// contribution pending.
    pub async fn check_images(&self, contribution_id: &ContributionId) -> Result<GateReport> {
        let report = match self.evaluate(contribution_id).await {
            Ok(report) => report,
            Err(e) => {
                METRICS.inc_gate_failures();
                return Err(e);
            }
        };

        if !report.bypassed {
            for (image_id, label) in &report.verdicts {
                let remark = (!label.is_usable()).then(|| format!("classifier: {}", label));
                self.db
                    .set_image_label(image_id, *label, remark.as_deref())
                    .await?;
            }
        }

        match &report.failure {
            None => {
                self.db
                    .set_gate_status(contribution_id, GateStatus::Accepted, None)
                    .await?;
                info!(
                    contribution_id = %contribution_id,
                    accepted = report.accepted,
                    rejected = report.rejected,
                    "Contribution passed image checks"
                );
                Ok(report)
            }
            Some(reason) => {
                METRICS.inc_gate_failures();
                self.db
                    .set_gate_status(contribution_id, GateStatus::Rejected, Some(reason))
                    .await?;
                warn!(contribution_id = %contribution_id, "Contribution failed image checks: {}", reason);
                Err(OrchestratorError::GateRejected {
                    contribution_id: contribution_id.clone(),
                    reason: reason.clone(),
                    log_path: report.log_path.clone(),
                })
            }
        }
    }
}
