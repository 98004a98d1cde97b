//! Prerun Gate: is the site's accumulated image pool big enough to be worth
//! a reconstruction? Read-only; safe to call any number of times.

use tirtha_db::{ImageCounts, TirthaDb};
use tirtha_ids::ContributionId;
use tirtha_protocol::{PrerunConfig, ReconKind};
use tracing::info;

use crate::error::{OrchestratorError, Result};

#[derive(Debug, Clone, PartialEq)]
pub struct PrerunDecision {
    pub proceed: bool,
    /// Human-readable in every case; goes into logs and Run notes.
    pub reason: String,
    pub counts: ImageCounts,
}

impl PrerunDecision {
    pub fn into_tuple(self) -> (bool, String) {
        (self.proceed, self.reason)
    }
}

/// Apply both thresholds to a set of counts.
pub fn evaluate(config: &PrerunConfig, counts: ImageCounts) -> PrerunDecision {
    let min_images = u64::from(config.min_matched_images);
    if counts.usable < min_images {
        return PrerunDecision {
            proceed: false,
            reason: format!("insufficient images: {} < {}", counts.usable, min_images),
            counts,
        };
    }
    let ratio = counts.ratio();
    if ratio < config.min_match_ratio {
        return PrerunDecision {
            proceed: false,
            reason: format!(
                "insufficient match ratio: {:.2} < {:.2}",
                ratio, config.min_match_ratio
            ),
            counts,
        };
    }
    PrerunDecision {
        proceed: true,
        reason: format!("ok: {} usable images (ratio {:.2})", counts.usable, ratio),
        counts,
    }
}

#[derive(Clone)]
pub struct PrerunGate {
    db: TirthaDb,
    config: PrerunConfig,
}

impl PrerunGate {
    pub fn new(db: TirthaDb, config: PrerunConfig) -> Self {
        Self { db, config }
    }

    pub async fn prerun_check(
        &self,
        contribution_id: &ContributionId,
        kind: ReconKind,
    ) -> Result<PrerunDecision> {
        let contribution = self
            .db
            .get_contribution(contribution_id)
            .await?
            .ok_or_else(|| {
                OrchestratorError::not_found(format!("contribution {}", contribution_id))
            })?;
        let counts = self.db.site_image_counts(&contribution.site_id).await?;
        let decision = evaluate(&self.config, counts);
        info!(
            contribution_id = %contribution_id,
            kind = %kind,
            proceed = decision.proceed,
            "Prerun check: {}",
            decision.reason
        );
        Ok(decision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> PrerunConfig {
        PrerunConfig {
            min_matched_images: 10,
            min_match_ratio: 0.10,
        }
    }

    #[test]
    fn too_few_images() {
        let decision = evaluate(&config(), ImageCounts { total: 8, usable: 8 });
        assert!(!decision.proceed);
        assert_eq!(decision.reason, "insufficient images: 8 < 10");
    }

    #[test]
    fn ratio_below_threshold() {
        let decision = evaluate(&config(), ImageCounts { total: 200, usable: 12 });
        assert!(!decision.proceed);
        assert_eq!(decision.reason, "insufficient match ratio: 0.06 < 0.10");
    }

    #[test]
    fn enough_images_proceed() {
        let decision = evaluate(&config(), ImageCounts { total: 40, usable: 30 });
        assert!(decision.proceed);
        assert_eq!(decision.reason, "ok: 30 usable images (ratio 0.75)");
    }

    #[test]
    fn thresholds_are_inclusive() {
        let decision = evaluate(&config(), ImageCounts { total: 100, usable: 10 });
        assert!(decision.proceed);
    }
}
