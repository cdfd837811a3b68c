//! Local store configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use reposync_common::Result;

use crate::memory::MemoryStore;
use crate::sqlite::SqliteStore;
use crate::store::LocalStore;

/// Where cached entities live.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// SQLite database file. `None` keeps everything in memory.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl StoreConfig {
    pub fn sqlite(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
        }
    }

    pub fn memory() -> Self {
        Self { path: None }
    }
}

/// Open the store described by `config`.
pub fn open_store(config: &StoreConfig) -> Result<Arc<dyn LocalStore>> {
    match &config.path {
        Some(path) => Ok(Arc::new(SqliteStore::open(path)?)),
        None => {
            info!("Using in-memory store");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}
