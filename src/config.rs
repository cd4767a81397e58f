//! Engine configuration.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::events::PortKind;

// Reference deployment is a 120x120 matrix
pub const DEFAULT_MATRIX_PORTS: u32 = 120;
// Videohub front panels display at most 20 characters per label
pub const DEFAULT_MAX_LABEL_CHARS: usize = 20;

// Tuning for one engine instance. The defaults mirror the reference
// deployment; none of the values are a protocol contract.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    // Matrix geometry; indices are validated against these
    pub video_inputs: u32,
    pub video_outputs: u32,
    // Label length ceiling, counted after trimming
    pub max_label_chars: usize,
    // TCP connect window
    pub connect_timeout: Duration,
    // Window from socket establishment to the prelude terminator
    pub handshake_timeout: Duration,
    // Reconnect backoff: min(base * growth^attempts, cap), up to max attempts
    pub reconnect_base: Duration,
    pub reconnect_growth: f64,
    pub reconnect_cap: Duration,
    pub max_reconnect_attempts: u32,
    // Bounded queue between command callers and the socket writer
    pub command_queue_depth: usize,
    // Broadcast capacity per subscriber before it observes a lag
    pub event_capacity: usize,
    // Fallback names for ports the device has not labeled
    pub default_labels: DefaultLabels,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            video_inputs: DEFAULT_MATRIX_PORTS,
            video_outputs: DEFAULT_MATRIX_PORTS,
            max_label_chars: DEFAULT_MAX_LABEL_CHARS,
            connect_timeout: Duration::from_secs(5),
            handshake_timeout: Duration::from_secs(5),
            reconnect_base: Duration::from_secs(5),
            reconnect_growth: 1.5,
            reconnect_cap: Duration::from_secs(30),
            max_reconnect_attempts: 10,
            command_queue_depth: 32,
            event_capacity: 256,
            default_labels: DefaultLabels::default(),
        }
    }
}

// Default label tables, injected configuration rather than device state.
// Consulted by `VideohubClient::label_for` only when the device has not
// provided a label for the index.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DefaultLabels {
    #[serde(default)]
    pub inputs: HashMap<u32, String>,
    #[serde(default)]
    pub outputs: HashMap<u32, String>,
}

impl DefaultLabels {
    // Load from a JSON file of the shape
    // `{"inputs": {"0": "Camera 1"}, "outputs": {"0": "Main Monitor"}}`
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading default labels from {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("parsing default labels from {}", path.display()))
    }

    pub fn get(&self, kind: PortKind, index: u32) -> Option<&str> {
        let table = match kind {
            PortKind::Input => &self.inputs,
            PortKind::Output => &self.outputs,
        };
        table.get(&index).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_reference_deployment() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.video_inputs, 120);
        assert_eq!(cfg.video_outputs, 120);
        assert_eq!(cfg.max_label_chars, 20);
        assert_eq!(cfg.reconnect_base, Duration::from_secs(5));
        assert_eq!(cfg.reconnect_cap, Duration::from_secs(30));
        assert_eq!(cfg.max_reconnect_attempts, 10);
    }

    #[test]
    fn default_labels_parse_from_json() {
        let labels: DefaultLabels = serde_json::from_str(
            r#"{"inputs": {"0": "Camera 1", "119": "Test Pattern"}, "outputs": {"0": "Main Monitor"}}"#,
        )
        .unwrap();
        assert_eq!(labels.get(PortKind::Input, 0), Some("Camera 1"));
        assert_eq!(labels.get(PortKind::Input, 119), Some("Test Pattern"));
        assert_eq!(labels.get(PortKind::Output, 0), Some("Main Monitor"));
        assert_eq!(labels.get(PortKind::Output, 1), None);
    }

    #[test]
    fn missing_tables_default_to_empty() {
        let labels: DefaultLabels = serde_json::from_str(r#"{"inputs": {}}"#).unwrap();
        assert!(labels.outputs.is_empty());
    }
}
