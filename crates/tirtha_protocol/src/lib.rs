//! Tirtha protocol: the vocabulary shared by the store, the workers and the
//! orchestrator.
//!
//! Nothing in here touches the database or the filesystem; it only defines
//! the canonical enums (reconstruction kinds, Run status, task status), the
//! injected configuration struct and the published-artifact naming rules.

pub mod config;
pub mod defaults;
pub mod naming;
pub mod paths;
pub mod types;

pub use config::{
    ArkConfig, ImageCheckPolicy, NotifyConfig, OrchestratorConfig, PathsConfig, PrerunConfig,
    RetryConfig, SchedulerConfig, ToolStep, ToolsConfig, WorkerSettings,
};
pub use types::{
    parse_triplet, GateStatus, ImageLabel, ReconKind, ReconsType, RunStatus, TaskKind, TaskStatus,
    ViewerParams,
};
