//! Identifier types shared across the orchestrator.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies a desired managed runtime kit independent of vendor.
///
/// Equality is by value; the pair serves as the cache key for resolved kit
/// installations, so a given `(version, variant)` resolves to a stable path
/// for the orchestrator's lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RuntimeId {
    pub version: String,
    pub variant: String,
}

impl RuntimeId {
    pub fn new(version: impl Into<String>, variant: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            variant: variant.into(),
        }
    }

    /// Directory-name form, used under `runtime/` in the install tree.
    pub fn dir_name(&self) -> String {
        format!("{}-{}", self.version, self.variant)
    }
}

impl fmt::Display for RuntimeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.version, self.variant)
    }
}
