//! Runtime and cell configuration.
//!
//! Both types are plain data and deserialize with defaults for every field,
//! so a host can keep them in a JSON settings file and only spell out what it
//! wants to change.

use serde::{Deserialize, Serialize};

/// Configuration for a [`Runtime`](crate::reactive::Runtime).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Collapse repeated reads of the same cell within one capture session
    /// into a single dependency.
    ///
    /// With this off, a getter that reads a cell twice subscribes twice and
    /// recomputes twice per change.
    pub dedupe_dependencies: bool,

    /// Optional name attached to the runtime's tracing events.
    pub label: Option<String>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            dedupe_dependencies: true,
            label: None,
        }
    }
}

impl RuntimeConfig {
    /// Parse a configuration from JSON. Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// Per-cell options for a value cell.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValueOptions {
    /// Store composite values verbatim instead of deep-wrapping them.
    ///
    /// Nested mutations of a shallow cell's value do not notify the cell.
    pub shallow: bool,
}

impl ValueOptions {
    /// Options for a shallow cell.
    pub fn shallow() -> Self {
        Self { shallow: true }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults() {
        let config = RuntimeConfig::default();
        assert!(config.dedupe_dependencies);
        assert!(config.label.is_none());
    }

    #[test]
    fn config_from_partial_json() {
        let config = RuntimeConfig::from_json_str(r#"{ "label": "app" }"#).unwrap();
        assert!(config.dedupe_dependencies);
        assert_eq!(config.label.as_deref(), Some("app"));

        let config = RuntimeConfig::from_json_str(r#"{ "dedupe_dependencies": false }"#).unwrap();
        assert!(!config.dedupe_dependencies);
    }

    #[test]
    fn value_options_from_json() {
        let options: ValueOptions = serde_json::from_str(r#"{ "shallow": true }"#).unwrap();
        assert_eq!(options, ValueOptions::shallow());

        let options: ValueOptions = serde_json::from_str("{}").unwrap();
        assert!(!options.shallow);
    }
}
