//! CLI configuration file.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use reposync_remote::ClientConfig;
use reposync_storage::StoreConfig;
use reposync_sync::SyncConfig;

/// Everything the CLI wires together. Every section is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

impl Config {
    /// Load from a JSON file, or defaults when no file is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("Invalid config {}", path.display()))
    }

    /// Apply command line overrides.
    pub fn with_overrides(
        mut self,
        db: Option<PathBuf>,
        base_url: Option<String>,
        token: Option<String>,
    ) -> Self {
        if db.is_some() {
            self.store.path = db;
        }
        if let Some(base_url) = base_url {
            self.client.base_url = base_url;
        }
        if token.is_some() {
            self.client.token = token;
        }
        self
    }
}
