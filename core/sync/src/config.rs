//! Sync configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the repositories and their resource streams.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// How long an owner's repository list stays fresh before a refetch.
    #[serde(default = "default_repo_list_freshness_secs")]
    pub repo_list_freshness_secs: u64,
    /// Buffered resource states per stream before the engine waits.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_repo_list_freshness_secs() -> u64 {
    600
}

fn default_channel_capacity() -> usize {
    16
}

impl SyncConfig {
    pub fn repo_list_freshness(&self) -> Duration {
        Duration::from_secs(self.repo_list_freshness_secs)
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            repo_list_freshness_secs: default_repo_list_freshness_secs(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SyncConfig::default();
        assert_eq!(config.repo_list_freshness(), Duration::from_secs(600));
        assert_eq!(config.channel_capacity, 16);
    }

    #[test]
    fn test_partial_json() {
        let config: SyncConfig = serde_json::from_str(r#"{"channel_capacity": 4}"#).unwrap();
        assert_eq!(config.channel_capacity, 4);
        assert_eq!(config.repo_list_freshness_secs, 600);
    }
}
