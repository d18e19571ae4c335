use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Fixed-interval polling policy.
///
/// Used both for waiting on mirror state transitions and for retrying
/// `createdb`/`dropdb`, which race with lingering sessions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollConfig {
    /// Delay, in milliseconds, between two probes.
    pub interval_ms: u64,
    /// Maximum number of probes after the first one.
    pub max_attempts: u32,
}

impl PollConfig {
    /// Default policy for mirror transitions: every 30 seconds, 80 times.
    pub const fn transition() -> Self {
        Self {
            interval_ms: 30_000,
            max_attempts: 80,
        }
    }

    /// Default policy for database creation and removal: every second, 10 times.
    pub const fn database_retry() -> Self {
        Self {
            interval_ms: 1_000,
            max_attempts: 10,
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self::transition()
    }
}
