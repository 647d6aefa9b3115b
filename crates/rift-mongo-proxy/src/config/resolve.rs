//! Primary resolution retry policy.

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ResolveConfig {
    /// Full passes over the candidate list before giving up
    #[serde(default = "default_attempts")]
    pub attempts: u32,
    /// Fixed pause between passes
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
}

impl ResolveConfig {
    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }
}

impl Default for ResolveConfig {
    fn default() -> Self {
        Self {
            attempts: default_attempts(),
            backoff_ms: default_backoff_ms(),
        }
    }
}

fn default_attempts() -> u32 {
    5
}

fn default_backoff_ms() -> u64 {
    1000
}
