//! JSON inventory cache file.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::asset::AssetRecord;
use crate::error::{MigrateError, Result};

/// Snapshot of a listing, keyed by the prefix it was taken for.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryCache {
    pub prefix: String,
    pub assets: Vec<AssetRecord>,
    pub fetched_at: DateTime<Utc>,
    /// The listing stopped early; the cache does not hold every asset.
    #[serde(default)]
    pub partial: bool,
    /// Listing calls it took to build.
    #[serde(default)]
    pub page_count: usize,
}

impl InventoryCache {
    pub fn new(prefix: String, assets: Vec<AssetRecord>, partial: bool, page_count: usize) -> Self {
        Self {
            prefix,
            assets,
            fetched_at: Utc::now(),
            partial,
            page_count,
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| MigrateError::Cache(format!("read {:?}: {}", path, e)))?;
        serde_json::from_str(&content)
            .map_err(|e| MigrateError::Cache(format!("parse {:?}: {}", path, e)))
    }

    /// Write via a sibling temp file and rename, so a crash never leaves a
    /// truncated cache behind.
    pub async fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_vec_pretty(self)?;
        let mut temp = path.as_os_str().to_owned();
        temp.push(".tmp");

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| MigrateError::Cache(format!("create {:?}: {}", parent, e)))?;
        }
        tokio::fs::write(&temp, json)
            .await
            .map_err(|e| MigrateError::Cache(format!("write {:?}: {}", temp, e)))?;
        tokio::fs::rename(&temp, path)
            .await
            .map_err(|e| MigrateError::Cache(format!("rename to {:?}: {}", path, e)))
    }
}
