//! Runtime configuration
//!
//! Deserialized from JSON; every field falls back to its default, so `{}` is a
//! valid configuration.

use serde::{Deserialize, Serialize};

use crate::store::DEFAULT_SOFT_SIZE_LIMIT;
use crate::url::SUPPORTED_PROTOCOLS;

/// What to do with navigation events that arrive before defaults are ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum EarlyEventPolicy {
    /// Queue up to `capacity` events, dropping the oldest when full.
    Buffer { capacity: usize },
    /// Drop early events.
    Reject,
}

impl Default for EarlyEventPolicy {
    fn default() -> Self {
        Self::Buffer { capacity: 32 }
    }
}

/// URIs of the default resources, relative to the background page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceUris {
    pub helper_library: String,
    pub prelude: String,
    pub generic: String,
    pub domain: String,
}

impl Default for ResourceUris {
    fn default() -> Self {
        Self {
            helper_library: "./lib.js".to_string(),
            prelude: "../defaults/prelude.js".to_string(),
            generic: "../defaults/generic.js".to_string(),
            domain: "../defaults/domain.js".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InjectorConfig {
    pub supported_protocols: Vec<String>,
    /// Popup save debounce, in milliseconds.
    pub debounce_ms: u32,
    /// Soft limit on a script body before compression, in UTF-16 units.
    pub soft_size_limit: usize,
    /// Timeout for each default resource fetch, in milliseconds.
    pub fetch_timeout_ms: u32,
    pub early_events: EarlyEventPolicy,
    pub resources: ResourceUris,
    /// Largest accepted import document, in bytes.
    pub max_import_bytes: usize,
}

impl Default for InjectorConfig {
    fn default() -> Self {
        Self {
            supported_protocols: SUPPORTED_PROTOCOLS.iter().map(|p| p.to_string()).collect(),
            debounce_ms: 500,
            soft_size_limit: DEFAULT_SOFT_SIZE_LIMIT,
            fetch_timeout_ms: 10_000,
            early_events: EarlyEventPolicy::default(),
            resources: ResourceUris::default(),
            max_import_bytes: 1024 * 1024,
        }
    }
}

impl InjectorConfig {
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_object_is_default() {
        assert_eq!(InjectorConfig::from_json("{}").unwrap(), InjectorConfig::default());
    }

    #[test]
    fn test_partial_override() {
        let config = InjectorConfig::from_json(
            r#"{ "debounce_ms": 250, "early_events": { "mode": "reject" }, "resources": { "prelude": "p.js" } }"#,
        )
        .unwrap();
        assert_eq!(config.debounce_ms, 250);
        assert_eq!(config.early_events, EarlyEventPolicy::Reject);
        assert_eq!(config.resources.prelude, "p.js");
        assert_eq!(config.resources.domain, "../defaults/domain.js");
        assert_eq!(config.supported_protocols.len(), 5);
    }

    #[test]
    fn test_buffer_policy_json() {
        let policy: EarlyEventPolicy = serde_json::from_str(r#"{ "mode": "buffer", "capacity": 4 }"#).unwrap();
        assert_eq!(policy, EarlyEventPolicy::Buffer { capacity: 4 });
    }
}
