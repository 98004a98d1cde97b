//! External process execution for Tirtha.
//!
//! Reconstruction tools and the image classifier are black boxes: the
//! orchestrator only sees an exit status, a diagnostic log and (for tool
//! chains) an artifact at a promised path.

pub mod cancel;
pub mod classifier;
pub mod error;
pub mod executor;
pub mod joblog;
pub mod toolchain;

pub use cancel::CancellationToken;
pub use classifier::{CommandClassifier, ImageClassifier};
pub use error::ToolError;
pub use executor::{ChainOutcome, ChainRequest, ProcessExecutor, ToolExecutor};
pub use toolchain::{ResolvedStep, ToolContext};
