use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// The `mcp` section of the engine config: how to reach the memory store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct McpSettings {
    pub connection_timeout_seconds: u64,
    pub query_timeout_seconds: u64,
    pub retry_attempts: u32,
    pub retry_backoff_seconds: f64,
    /// Graph file; relative paths are resolved against `$HOME` by the engine.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_file: Option<PathBuf>,
}

impl Default for McpSettings {
    fn default() -> Self {
        Self {
            connection_timeout_seconds: 5,
            query_timeout_seconds: 3,
            retry_attempts: 2,
            retry_backoff_seconds: 1.0,
            memory_file: None,
        }
    }
}

impl McpSettings {
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout_seconds)
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_seconds)
    }

    /// Delay before retry number `attempt + 1`: `backoff * 2^attempt`.
    /// Saturates at `Duration::MAX`; a NaN backoff means no delay.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let secs = self.retry_backoff_seconds.max(0.0) * 2f64.powi(exponent);
        if secs.is_nan() {
            return Duration::ZERO;
        }
        Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
    }
}
