//! Tracing and logging (shared setup).

use serde::{Deserialize, Serialize};

/// Tracing configuration (filters, output format).
pub mod tracing;

/// Log output settings, usually read from the `log` table of the config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    /// Default filter directive, e.g. `warn` or `pharmacy_store=debug`.
    pub level: String,
    /// One JSON object per event instead of compact text.
    pub json: bool,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            json: false,
        }
    }
}

/// Initialize process-wide tracing/logging.
///
/// Safe to call multiple times; subsequent calls are no-ops.
pub fn init(settings: &LogSettings) {
    tracing::init(settings);
}
