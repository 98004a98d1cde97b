//! CLI module for Tirtha
//!
//! Operator commands over the state store and the reconstruction queue.
//! Everything except `config` opens the store; only `worker` runs tool
//! chains.

pub mod config;
pub mod context;
pub mod error;
pub mod ingest;
pub mod manual;
pub mod output;
pub mod queue;
pub mod runs;
pub mod site;
pub mod stats;
pub mod trigger;
pub mod worker;

pub use error::HelpfulError;
