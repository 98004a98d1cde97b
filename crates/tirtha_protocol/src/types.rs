//! Canonical enums for Tirtha.
//!
//! The string forms returned by `as_str()` are what the database stores and
//! what operators type on the command line; keep them stable.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// Reconstruction kinds
// ============================================================================

/// The two independent reconstruction pipelines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ReconKind {
    /// Photogrammetry: textured mesh (`.glb` / `.gltf`).
    #[serde(rename = "aV")]
    Av,
    /// Gaussian splatting: point cloud (`.splat`).
    #[serde(rename = "GS")]
    Gs,
}

impl ReconKind {
    pub const ALL: [ReconKind; 2] = [ReconKind::Gs, ReconKind::Av];

    pub fn as_str(&self) -> &'static str {
        match self {
            ReconKind::Av => "aV",
            ReconKind::Gs => "GS",
        }
    }

    /// Operation name used in logs and notifications ("aVOps", "GSOps").
    pub fn ops_name(&self) -> &'static str {
        match self {
            ReconKind::Av => "aVOps",
            ReconKind::Gs => "GSOps",
        }
    }

    /// File-type allow-list for published artifacts of this kind.
    pub fn allowed_extensions(&self) -> &'static [&'static str] {
        match self {
            ReconKind::Av => &["glb", "gltf"],
            ReconKind::Gs => &["splat"],
        }
    }

    /// Extension the pipeline produces.
    pub fn default_extension(&self) -> &'static str {
        self.allowed_extensions()[0]
    }

    pub fn accepts_extension(&self, ext: &str) -> bool {
        let ext = ext.trim_start_matches('.').to_ascii_lowercase();
        self.allowed_extensions().iter().any(|allowed| *allowed == ext)
    }

    /// Infer the kind from an artifact extension (`glb` -> aV, `splat` -> GS).
    pub fn from_extension(ext: &str) -> Option<Self> {
        ReconKind::ALL
            .into_iter()
            .find(|kind| kind.accepts_extension(ext))
    }
}

impl fmt::Display for ReconKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ReconKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "av" => Ok(ReconKind::Av),
            "gs" => Ok(ReconKind::Gs),
            _ => Err(format!("Invalid reconstruction kind: '{}'. Expected: aV or GS", s)),
        }
    }
}

/// What a trigger asks for: one kind, or both ("all").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ReconsType {
    #[default]
    All,
    Only(ReconKind),
}

impl ReconsType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReconsType::All => "all",
            ReconsType::Only(kind) => kind.as_str(),
        }
    }

    /// Kinds to run, in execution order.
    pub fn kinds(&self) -> Vec<ReconKind> {
        match self {
            ReconsType::All => ReconKind::ALL.to_vec(),
            ReconsType::Only(kind) => vec![*kind],
        }
    }
}

impl fmt::Display for ReconsType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ReconsType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().eq_ignore_ascii_case("all") {
            return Ok(ReconsType::All);
        }
        s.parse::<ReconKind>()
            .map(ReconsType::Only)
            .map_err(|_| format!("Invalid reconstruction type: '{}'. Expected: all, aV or GS", s))
    }
}

impl Serialize for ReconsType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ReconsType {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

// ============================================================================
// Run lifecycle
// ============================================================================

/// Run state machine.
///
/// ```text
/// Running -> Done -> Archived
///         -> Error
///         -> Cancelled
/// Manual (entry state for operator-supplied artifacts)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RunStatus {
    Running,
    Done,
    Error,
    Archived,
    Manual,
    Cancelled,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "Running",
            RunStatus::Done => "Done",
            RunStatus::Error => "Error",
            RunStatus::Archived => "Archived",
            RunStatus::Manual => "Manual",
            RunStatus::Cancelled => "Cancelled",
        }
    }

    /// No automatic transition leaves a terminal state.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::Running)
    }

    /// Terminal on the success path (has a published artifact).
    pub fn is_success(&self) -> bool {
        matches!(self, RunStatus::Done | RunStatus::Archived | RunStatus::Manual)
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, RunStatus::Error | RunStatus::Cancelled)
    }

    /// The documented edges. `Manual` is only ever an entry state.
    pub fn can_transition_to(&self, next: RunStatus) -> bool {
        matches!(
            (self, next),
            (RunStatus::Running, RunStatus::Done)
                | (RunStatus::Running, RunStatus::Error)
                | (RunStatus::Running, RunStatus::Cancelled)
                | (RunStatus::Done, RunStatus::Archived)
        )
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "running" => Ok(RunStatus::Running),
            "done" => Ok(RunStatus::Done),
            "error" => Ok(RunStatus::Error),
            "archived" => Ok(RunStatus::Archived),
            "manual" => Ok(RunStatus::Manual),
            "cancelled" | "canceled" => Ok(RunStatus::Cancelled),
            _ => Err(format!("Invalid run status: '{}'", s)),
        }
    }
}

// ============================================================================
// Ingestion
// ============================================================================

/// Per-image classification outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageLabel {
    /// Not classified (gate bypassed or not yet run).
    #[default]
    Unchecked,
    Good,
    Bad,
    Nsfw,
}

impl ImageLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImageLabel::Unchecked => "unchecked",
            ImageLabel::Good => "good",
            ImageLabel::Bad => "bad",
            ImageLabel::Nsfw => "nsfw",
        }
    }

    /// Usable images feed reconstructions and the prerun thresholds.
    pub fn is_usable(&self) -> bool {
        matches!(self, ImageLabel::Good | ImageLabel::Unchecked)
    }
}

impl fmt::Display for ImageLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ImageLabel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "unchecked" | "" => Ok(ImageLabel::Unchecked),
            "good" => Ok(ImageLabel::Good),
            "bad" => Ok(ImageLabel::Bad),
            "nsfw" => Ok(ImageLabel::Nsfw),
            _ => Err(format!("Invalid image label: '{}'", s)),
        }
    }
}

/// Ingestion Gate outcome recorded on a contribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GateStatus {
    #[default]
    Pending,
    Accepted,
    Rejected,
}

impl GateStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            GateStatus::Pending => "pending",
            GateStatus::Accepted => "accepted",
            GateStatus::Rejected => "rejected",
        }
    }
}

impl fmt::Display for GateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for GateStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(GateStatus::Pending),
            "accepted" => Ok(GateStatus::Accepted),
            "rejected" => Ok(GateStatus::Rejected),
            _ => Err(format!("Invalid gate status: '{}'", s)),
        }
    }
}

// ============================================================================
// Task queue
// ============================================================================

/// Work item types carried by the task queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    /// Ingestion Gate + deferred trigger (post-save hook).
    ImageOps,
    /// Prerun Gate + Pipeline Runner for each requested kind.
    Recon,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::ImageOps => "imageops",
            TaskKind::Recon => "recon",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TaskKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "imageops" => Ok(TaskKind::ImageOps),
            "recon" => Ok(TaskKind::Recon),
            _ => Err(format!("Invalid task kind: '{}'", s)),
        }
    }
}

/// Lifecycle of a task in the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    #[default]
    Queued,
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Queued => "QUEUED",
            TaskStatus::Running => "RUNNING",
            TaskStatus::Completed => "COMPLETED",
            TaskStatus::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "QUEUED" => Ok(TaskStatus::Queued),
            "RUNNING" => Ok(TaskStatus::Running),
            "COMPLETED" | "COMPLETE" => Ok(TaskStatus::Completed),
            "FAILED" => Ok(TaskStatus::Failed),
            _ => Err(format!("Invalid task status: '{}'", s)),
        }
    }
}

// ============================================================================
// Viewer parameters
// ============================================================================

/// Viewer/camera parameters stored on a Run. Passed through untouched.
///
/// GS viewers use the camera triplets; aV viewers use rotation (Z, X, Y in
/// degrees), focal adjustment and antialiasing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ViewerParams {
    pub init_cam_pos: Option<[f64; 3]>,
    pub init_cam_look_at: Option<[f64; 3]>,
    pub cam_up: Option<[f64; 3]>,
    /// Z, X, Y rotation in whole degrees.
    pub rota: Option<[i32; 3]>,
    pub focal_adjustment: Option<f64>,
    pub antialiased: Option<bool>,
}

impl ViewerParams {
    pub fn is_empty(&self) -> bool {
        self.updated_fields().is_empty()
    }

    /// Names of the fields this value sets.
    pub fn updated_fields(&self) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if self.init_cam_pos.is_some() {
            fields.push("init_cam_pos");
        }
        if self.init_cam_look_at.is_some() {
            fields.push("init_cam_look_at");
        }
        if self.cam_up.is_some() {
            fields.push("cam_up");
        }
        if self.rota.is_some() {
            fields.push("rota");
        }
        if self.focal_adjustment.is_some() {
            fields.push("focal_adjustment");
        }
        if self.antialiased.is_some() {
            fields.push("antialiased");
        }
        fields
    }

    /// Overlay the fields set in `update`, leaving the others alone.
    pub fn apply(&mut self, update: &ViewerParams) {
        if update.init_cam_pos.is_some() {
            self.init_cam_pos = update.init_cam_pos;
        }
        if update.init_cam_look_at.is_some() {
            self.init_cam_look_at = update.init_cam_look_at;
        }
        if update.cam_up.is_some() {
            self.cam_up = update.cam_up;
        }
        if update.rota.is_some() {
            self.rota = update.rota;
        }
        if update.focal_adjustment.is_some() {
            self.focal_adjustment = update.focal_adjustment;
        }
        if update.antialiased.is_some() {
            self.antialiased = update.antialiased;
        }
    }
}

/// Parse an `x,y,z` triplet.
pub fn parse_triplet(value: &str) -> Result<[f64; 3], String> {
    let parts: Vec<f64> = value
        .split(',')
        .map(|part| part.trim().parse::<f64>())
        .collect::<Result<_, _>>()
        .map_err(|_| format!("Invalid triplet: '{}'. Expected format: x,y,z", value))?;
    match parts.as_slice() {
        [x, y, z] => Ok([*x, *y, *z]),
        _ => Err(format!("Invalid triplet: '{}'. Expected format: x,y,z", value)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_extensions() {
        assert_eq!(ReconKind::from_extension("glb"), Some(ReconKind::Av));
        assert_eq!(ReconKind::from_extension(".GLTF"), Some(ReconKind::Av));
        assert_eq!(ReconKind::from_extension("splat"), Some(ReconKind::Gs));
        assert_eq!(ReconKind::from_extension("ply"), None);
        assert!(!ReconKind::Gs.accepts_extension("glb"));
        assert_eq!(ReconKind::Av.default_extension(), "glb");
    }

    #[test]
    fn recons_type_parsing() {
        assert_eq!("all".parse::<ReconsType>().unwrap(), ReconsType::All);
        assert_eq!(
            "aV".parse::<ReconsType>().unwrap(),
            ReconsType::Only(ReconKind::Av)
        );
        assert_eq!(ReconsType::All.kinds(), vec![ReconKind::Gs, ReconKind::Av]);
        assert!("mesh".parse::<ReconsType>().is_err());
    }

    #[test]
    fn run_status_edges() {
        use RunStatus::*;
        assert!(Running.can_transition_to(Done));
        assert!(Running.can_transition_to(Error));
        assert!(Done.can_transition_to(Archived));
        assert!(!Error.can_transition_to(Done));
        assert!(!Archived.can_transition_to(Done));
        assert!(!Running.can_transition_to(Manual));
        assert!(!Manual.can_transition_to(Archived));
        for status in [Done, Error, Archived, Manual, Cancelled] {
            assert!(status.is_terminal());
            assert!(status.is_success() != status.is_failure());
        }
    }

    #[test]
    fn status_strings_roundtrip_through_from_str() {
        for status in [
            RunStatus::Running,
            RunStatus::Done,
            RunStatus::Error,
            RunStatus::Archived,
            RunStatus::Manual,
            RunStatus::Cancelled,
        ] {
            assert_eq!(status.as_str().parse::<RunStatus>().unwrap(), status);
        }
        assert_eq!("complete".parse::<TaskStatus>().unwrap(), TaskStatus::Completed);
    }

    #[test]
    fn triplets() {
        assert_eq!(parse_triplet("-15, -5, -16").unwrap(), [-15.0, -5.0, -16.0]);
        assert!(parse_triplet("1,2").is_err());
        assert!(parse_triplet("a,b,c").is_err());
    }

    #[test]
    fn viewer_params_apply_only_set_fields() {
        let mut params = ViewerParams {
            rota: Some([0, 90, 0]),
            ..Default::default()
        };
        let update = ViewerParams {
            antialiased: Some(true),
            ..Default::default()
        };
        params.apply(&update);
        assert_eq!(params.rota, Some([0, 90, 0]));
        assert_eq!(params.antialiased, Some(true));
        assert_eq!(update.updated_fields(), vec!["antialiased"]);
    }
}
