//! Binding configuration

use serde::{Deserialize, Serialize};

use crate::error::{BindingError, Result};

/// Tunables for a [`BindingContext`](crate::BindingContext).
///
/// Loaded from JSON with [`BindingConfig::from_json_str`] or built in code
/// with the `with_*` methods. Missing JSON fields take their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BindingConfig {
    /// Forward native size deltas to the pressure sink
    pub memory_pressure: bool,

    /// Re-report native size after every in-place mutation of an owned
    /// wrapper, not only on ownership transitions
    pub report_after_mutation: bool,

    /// Log every handle resolution at trace level
    pub trace_resolution: bool,
}

impl Default for BindingConfig {
    fn default() -> Self {
        Self {
            memory_pressure: true,
            report_after_mutation: false,
            trace_resolution: false,
        }
    }
}

impl BindingConfig {
    /// Create a configuration with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a configuration from a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| BindingError::Config(e.to_string()))
    }

    /// Enable or disable memory pressure accounting.
    pub fn with_memory_pressure(mut self, enabled: bool) -> Self {
        self.memory_pressure = enabled;
        self
    }

    /// Enable or disable size re-reporting after in-place mutation.
    pub fn with_report_after_mutation(mut self, enabled: bool) -> Self {
        self.report_after_mutation = enabled;
        self
    }

    /// Enable or disable resolution tracing.
    pub fn with_trace_resolution(mut self, enabled: bool) -> Self {
        self.trace_resolution = enabled;
        self
    }
}
