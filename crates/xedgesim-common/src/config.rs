//! Scenario-facing configuration records.

use serde::{Deserialize, Serialize};

/// Configuration delivered to a node in the INIT message.
///
/// The seed is the scenario seed passed through verbatim; `params` is the
/// node-specific configuration block, opaque to the core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitConfig {
    /// Scenario seed; nodes seed any local RNG from it.
    pub seed: u64,
    /// Node-specific parameters, forwarded untouched.
    #[serde(default)]
    pub params: serde_json::Value,
}

impl InitConfig {
    /// Configuration with a seed and no node-specific parameters.
    pub fn new(seed: u64) -> Self {
        InitConfig {
            seed,
            params: serde_json::Value::Null,
        }
    }

    /// Attach node-specific parameters.
    pub fn with_params(mut self, params: serde_json::Value) -> Self {
        self.params = params;
        self
    }
}
