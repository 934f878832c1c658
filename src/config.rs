use serde::{Deserialize, Serialize};

use crate::crypto::DEFAULT_KDF_ITERATIONS;

/// Engine tunables
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    /// PBKDF2 iteration count for new accounts
    pub kdf_iterations: u32,
    /// How long a pulled snapshot is considered fresh
    pub snapshot_ttl_secs: u64,
    /// Debounce window collapsing bursts of deep-check requests
    pub deep_check_debounce_ms: u64,
    /// How many remote note objects a deep check samples
    pub deep_check_note_samples: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            kdf_iterations: DEFAULT_KDF_ITERATIONS,
            snapshot_ttl_secs: 15 * 60,
            deep_check_debounce_ms: 2000,
            deep_check_note_samples: 5,
        }
    }
}
