//! Row types returned by [`crate::TirthaDb`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tirtha_ids::{ContributionId, ContributorId, ImageId, RunId, SiteId};
use tirtha_protocol::{
    GateStatus, ImageLabel, ReconKind, ReconsType, RunStatus, TaskKind, TaskStatus, ViewerParams,
};

// ============================================================================
// Sites and contributions
// ============================================================================

/// A heritage site.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Site {
    pub id: SiteId,
    pub name: String,
    /// Human-friendly unique slug used in URLs and on the command line.
    pub verbose_id: String,
    pub district: String,
    pub state: String,
    pub country: String,
    pub description: String,
    pub thumbnail: Option<String>,
    pub completed: bool,
    pub hidden: bool,
    pub created_at: DateTime<Utc>,
}

impl Site {
    /// "district, state, country", skipping empty parts.
    pub fn location(&self) -> String {
        [&self.district, &self.state, &self.country]
            .iter()
            .filter(|part| !part.is_empty())
            .map(|part| part.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

#[derive(Debug, Clone, Default)]
pub struct NewSite {
    pub name: String,
    pub verbose_id: String,
    pub district: String,
    pub state: String,
    pub country: String,
    pub description: String,
    pub thumbnail: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contributor {
    pub id: ContributorId,
    pub name: String,
    pub email: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contribution {
    pub id: ContributionId,
    pub site_id: SiteId,
    pub contributor_id: ContributorId,
    pub submitted_at: DateTime<Utc>,
    pub processed: bool,
    pub processed_at: Option<DateTime<Utc>>,
    pub gate_status: GateStatus,
    pub gate_reason: Option<String>,
}

/// A contribution with the site and contributor it belongs to; what
/// notifications and identifier metadata need.
#[derive(Debug, Clone)]
pub struct ContributionContext {
    pub contribution: Contribution,
    pub site: Site,
    pub contributor: Contributor,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Image {
    pub id: ImageId,
    pub contribution_id: ContributionId,
    pub path: String,
    pub label: ImageLabel,
    pub remark: Option<String>,
}

/// Aggregate image counts for a site, as seen by the Prerun Gate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImageCounts {
    /// Images of gated contributions (accepted or rejected).
    pub total: u64,
    /// Usable images of accepted contributions.
    pub usable: u64,
}

impl ImageCounts {
    pub fn ratio(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.usable as f64 / self.total as f64
        }
    }
}

// ============================================================================
// Runs
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: RunId,
    pub site_id: SiteId,
    /// Triggering contribution; `None` for manual runs.
    pub contribution_id: Option<ContributionId>,
    pub kind: ReconKind,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    /// Relative to the models root, or to the archive root once archived.
    pub directory: String,
    /// File name under `<models_root>/<site>/published/`.
    pub published_file: Option<String>,
    /// Append-only audit trail, one entry per line.
    pub notes: String,
    pub viewer_params: ViewerParams,
}

impl Run {
    pub fn duration(&self) -> Option<chrono::Duration> {
        self.ended_at.map(|end| end - self.started_at)
    }
}

#[derive(Debug, Clone)]
pub struct NewRun {
    pub id: RunId,
    pub site_id: SiteId,
    pub contribution_id: Option<ContributionId>,
    pub kind: ReconKind,
    pub status: RunStatus,
    pub directory: String,
}

/// Filter for listing Runs.
#[derive(Debug, Clone, Default)]
pub struct RunFilter {
    pub site_id: Option<SiteId>,
    pub status: Option<RunStatus>,
    pub kind: Option<ReconKind>,
    pub limit: Option<usize>,
}

/// An identifier record. Immutable once stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArkRecord {
    /// `<naan><shoulder><noid><check>`
    pub ark: String,
    pub naan: u64,
    pub shoulder: String,
    /// NOID plus check character.
    pub assigned_name: String,
    pub url: String,
    pub metadata: serde_json::Value,
    pub collisions: u32,
    pub run_id: RunId,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// Task queue
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: i64,
    pub kind: TaskKind,
    pub contribution_id: ContributionId,
    pub recons: ReconsType,
    pub status: TaskStatus,
    /// Not delivered before this instant.
    pub eta: DateTime<Utc>,
    pub attempts: u32,
    pub max_attempts: u32,
    pub created_at: DateTime<Utc>,
    pub claim_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub result_summary: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewTask {
    pub kind: TaskKind,
    pub contribution_id: ContributionId,
    pub recons: ReconsType,
    pub eta: DateTime<Utc>,
    pub max_attempts: u32,
}

// ============================================================================
// Statistics
// ============================================================================

/// Store-wide counts for the `stats` report.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreStats {
    pub sites: u64,
    pub sites_completed: u64,
    pub contributors: u64,
    pub contributions: u64,
    pub contributions_processed: u64,
    pub images: u64,
    pub runs: u64,
    pub arks: u64,
    pub runs_by_status: BTreeMap<String, u64>,
    pub runs_by_kind: BTreeMap<String, u64>,
    pub images_by_label: BTreeMap<String, u64>,
    pub contributions_by_gate: BTreeMap<String, u64>,
}
