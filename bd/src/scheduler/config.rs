//! Scheduler configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Seconds between due-broadcast sweeps
    #[serde(rename = "poll-interval-secs", default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Max sends in flight for one broadcast's fan-out
    #[serde(rename = "max-concurrent-sends", default = "default_max_concurrent_sends")]
    pub max_concurrent_sends: usize,
}

fn default_poll_interval_secs() -> u64 {
    30
}

fn default_max_concurrent_sends() -> usize {
    8
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            max_concurrent_sends: default_max_concurrent_sends(),
        }
    }
}

impl SchedulerConfig {
    /// Get the poll interval as a Duration
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}
