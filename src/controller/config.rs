//! Controller configuration.

use crate::error::Result;
use crate::types::Reference;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Controller configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Sections may expand items into nested child sources.
    pub hierarchical: bool,

    /// Wrap every reference with its section id. Implied by `hierarchical`.
    pub use_wrapped_identifiers: bool,

    /// Animate model changes by default.
    pub animate_differences: bool,

    /// How long update requests are folded together before a cycle runs.
    #[serde(rename = "coalesce_delay_ms", with = "duration_millis")]
    pub coalesce_delay: Duration,

    /// Update cycles an item without an insertion anchor is retried for
    /// before it is left out.
    pub max_insertion_retries: u32,

    /// Highlight this reference once it first appears in the model.
    pub initial_highlight: Option<Reference>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            hierarchical: false,
            use_wrapped_identifiers: false,
            animate_differences: true,
            coalesce_delay: Duration::ZERO,
            max_insertion_retries: 3,
            initial_highlight: None,
        }
    }
}

impl ControllerConfig {
    /// Configuration for an outline-style controller.
    pub fn hierarchical() -> Self {
        Self {
            hierarchical: true,
            ..Self::default()
        }
    }

    /// Whether model identities carry their section.
    pub fn wraps_identifiers(&self) -> bool {
        self.hierarchical || self.use_wrapped_identifiers
    }

    /// Parse a configuration from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
