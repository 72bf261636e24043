use serde::{Deserialize, Serialize};

/// Datalayer settings. Every field has a default, so a partial JSON object
/// (or `{}`) is a valid configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatalayerConfig {
    /// `top_n` of a `like` call that does not pass `n`.
    pub default_top_n: usize,
    /// Publish a change after every successful mutation.
    pub notify_changes: bool,
}

impl Default for DatalayerConfig {
    fn default() -> Self {
        Self {
            default_top_n: 100,
            notify_changes: true,
        }
    }
}

impl DatalayerConfig {
    pub fn from_json_str(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}
