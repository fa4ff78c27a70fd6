//! Engine configuration.

use serde::{Deserialize, Serialize};

/// Recognized engine options.
///
/// Also readable from a JSON document of the form
/// `{"AtomicRefinement": true, "LogConsoleToTrace": false}`; unknown keys
/// are rejected and omitted keys take their defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", deny_unknown_fields)]
pub struct EngineOptions {
    /// Keep refinements atomic: once an IOSTS leaves its initial state,
    /// only it may fire until it returns. Only `true` is supported; the
    /// scheduler rejects `false` at construction.
    #[serde(default = "default_true")]
    pub atomic_refinement: bool,
    /// Emit dispatch diagnostics at `info` level instead of `debug`.
    #[serde(default)]
    pub log_console_to_trace: bool,
}

fn default_true() -> bool {
    true
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            atomic_refinement: true,
            log_console_to_trace: false,
        }
    }
}

impl EngineOptions {
    /// Parse an options document.
    pub fn from_json(document: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(document)
    }
}
