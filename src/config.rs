//! Forwarding engine configuration

use serde::{Deserialize, Serialize};

/// Per-receiver forwarding configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForwardingConfig {
    /// Initial maximum number of endpoints whose video is forwarded to the
    /// receiver. `-1` means no limit (forward everything).
    pub initial_last_n: i32,
    /// Start with bandwidth-adaptive last-N enabled
    pub adaptive_last_n: bool,
    /// Start with bandwidth-adaptive simulcast enabled
    pub adaptive_simulcast: bool,
}

impl Default for ForwardingConfig {
    fn default() -> Self {
        Self {
            initial_last_n: -1,
            adaptive_last_n: false,
            adaptive_simulcast: false,
        }
    }
}
