//! Tirtha Test Utilities
//!
//! Isolated homes, fixture builders and scripted stand-ins for the external
//! collaborators (classifier, tool chains, notification sinks, identifier
//! store).
//!
//! # Usage
//!
//! ```rust,ignore
//! use tirtha_test_utils::{ContributionFixture, SiteFixture, TestEnv};
//!
//! #[tokio::test]
//! async fn test_something() {
//!     let env = TestEnv::new().await.unwrap();
//!     let site = SiteFixture::new("Konark Sun Temple").insert(&env.db).await.unwrap();
//!     let seeded = ContributionFixture::new(&site).images(12).insert(&env).await.unwrap();
//!     // Home directory removed on Drop
//! }
//! ```

pub mod env;
pub mod fixtures;
pub mod scripted;

pub use env::{test_config, TestEnv};
pub use fixtures::{ContributionFixture, SeededContribution, SiteFixture};
pub use scripted::{
    CollidingArkStore, RecordingNotifier, ScriptedClassifier, ScriptedExecutor, ScriptedOutcome,
};
