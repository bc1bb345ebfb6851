//! Strongly-typed envelope identifier.
//!
//! IDs are validated at construction time and implement common traits.
//! Fan-out children get fresh IDs; lineage is tracked through the
//! envelope's `parent_id` field rather than through the ID itself.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Process-wide unique envelope identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EnvelopeId(String);

impl EnvelopeId {
    /// Generate a fresh v4 identifier.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn from_string(s: String) -> Result<Self, &'static str> {
        if s.is_empty() {
            return Err("EnvelopeId cannot be empty");
        }
        Ok(Self(s))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for EnvelopeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EnvelopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
