//! TTL reaper configuration.

use std::time::Duration;

use serde::Deserialize;

/// Configuration for the background TTL reaper.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ReaperConfig {
    /// Run the reaper at all. Reads apply lazy expiry either way.
    pub enabled: bool,

    /// How often to sweep for expired records, in seconds.
    pub interval_secs: u64,

    /// Expired keys fetched and reaped per batch. The write section is
    /// released between batches.
    pub batch_size: usize,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: default_interval_secs(),
            batch_size: default_batch_size(),
        }
    }
}

impl ReaperConfig {
    /// Get the sweep interval duration.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

fn default_interval_secs() -> u64 {
    30
}

fn default_batch_size() -> usize {
    100
}
