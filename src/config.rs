use chrono::Duration;
use serde::Deserialize;
use std::path::Path;

/// Tunables for the payment lifecycle engine.
///
/// Loaded from a JSON file by the binary, or built in code. Every field has
/// a default so partial config files work.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Failed attempts tolerated per session before it locks.
    pub attempt_limit: u32,
    /// Length of the fixed attempt-counting window, in seconds.
    pub attempt_window_secs: i64,
    /// Confirmation token lifetime, in seconds.
    pub token_ttl_secs: i64,
    /// Hard deadline for a single provider call, in milliseconds.
    pub provider_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            attempt_limit: 3,
            attempt_window_secs: 15 * 60,
            token_ttl_secs: 10 * 60,
            provider_timeout_ms: 30_000,
        }
    }
}

impl EngineConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> crate::error::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn attempt_window(&self) -> Duration {
        Duration::seconds(self.attempt_window_secs)
    }

    pub fn token_ttl(&self) -> Duration {
        Duration::seconds(self.token_ttl_secs)
    }

    pub fn provider_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.provider_timeout_ms)
    }
}
