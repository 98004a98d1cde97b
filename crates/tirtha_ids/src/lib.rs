//! Shared identifier wrappers for Tirtha.
//!
//! Every persisted entity is keyed by a UUID string. The wrappers keep the
//! different keys from being mixed up at call sites (a `RunId` cannot be
//! passed where a `SiteId` is expected).

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Error returned when parsing a UUID-backed identifier fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdParseError {
    label: &'static str,
    message: String,
}

impl IdParseError {
    fn new(label: &'static str, message: impl Into<String>) -> Self {
        Self {
            label,
            message: message.into(),
        }
    }

    /// Which identifier kind failed to parse (e.g. "run ID").
    pub fn label(&self) -> &'static str {
        self.label
    }
}

impl fmt::Display for IdParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid {}: {}", self.label, self.message)
    }
}

impl std::error::Error for IdParseError {}

macro_rules! define_uuid_id {
    ($(#[$meta:meta])* $name:ident, $label:expr) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4().to_string())
            }

            /// Parse and normalise (lowercase hyphenated form).
            pub fn parse(value: &str) -> Result<Self, IdParseError> {
                let uuid = Uuid::parse_str(value.trim())
                    .map_err(|e| IdParseError::new($label, e.to_string()))?;
                Ok(Self(uuid.hyphenated().to_string()))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// First eight characters, used in file names and log lines.
            pub fn short(&self) -> &str {
                &self.0[..self.0.len().min(8)]
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = IdParseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

define_uuid_id!(
    /// A heritage site (the "mesh" entity that aggregates contributions and Runs).
    SiteId,
    "site ID"
);
define_uuid_id!(
    /// One batch of images submitted for a site.
    ContributionId,
    "contribution ID"
);
define_uuid_id!(ContributorId, "contributor ID");
define_uuid_id!(ImageId, "image ID");
define_uuid_id!(
    /// One reconstruction execution for a site.
    RunId,
    "run ID"
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_normalises_case() {
        let raw = "6F1C2E4A-0B3D-4C5E-8F70-112233445566";
        let id = RunId::parse(raw).unwrap();
        assert_eq!(id.as_str(), "6f1c2e4a-0b3d-4c5e-8f70-112233445566");
        assert_eq!(id.short(), "6f1c2e4a");
    }

    #[test]
    fn parse_rejects_garbage_with_label() {
        let err = SiteId::parse("site123").unwrap_err();
        assert_eq!(err.label(), "site ID");
        assert!(err.to_string().starts_with("Invalid site ID"));
    }

    #[test]
    fn new_ids_are_distinct() {
        assert_ne!(ContributionId::new(), ContributionId::new());
    }
}
