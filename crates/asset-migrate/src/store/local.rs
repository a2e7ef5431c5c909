//! Local filesystem store.
//!
//! Asset paths map to files below a root directory. Listing walks the
//! directory tree and pages through the sorted keys the way ListObjectsV2
//! does, using the last returned key as the cursor.

use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Component, Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use walkdir::WalkDir;

use super::{AssetSink, AssetSource, ListPage, StoreError, StoreOutcome};
use crate::asset::AssetRecord;

/// Prefix of in-progress writes; such files are never listed.
const PARTIAL_PREFIX: &str = ".partial-";

/// Directory-backed asset store.
#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn location(&self) -> String {
        format!("file://{}", self.root.display())
    }

    /// Resolve an asset path to a file below the root.
    fn resolve(&self, path: &str) -> Result<PathBuf, StoreError> {
        let relative = Path::new(path);
        let escapes = path.is_empty()
            || relative
                .components()
                .any(|c| !matches!(c, Component::Normal(_)));
        if escapes {
            return Err(StoreError::permanent(format!("invalid asset path '{}'", path)));
        }
        Ok(self.root.join(relative))
    }

    /// All keys under `prefix`, sorted.
    fn walk_keys(root: &Path, prefix: &str) -> Vec<AssetRecord> {
        // Only descend into the directory the prefix names
        let start = match prefix.rfind('/') {
            Some(idx) => root.join(&prefix[..idx]),
            None => root.to_path_buf(),
        };
        if !start.is_dir() {
            return Vec::new();
        }

        let mut assets = Vec::new();
        for entry in WalkDir::new(&start).follow_links(false) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Skipping unreadable entry under {:?}: {}", start, e);
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            if entry
                .file_name()
                .to_str()
                .is_some_and(|name| name.starts_with(PARTIAL_PREFIX))
            {
                continue;
            }
            let Some(key) = relative_key(root, entry.path()) else {
                warn!("Skipping non UTF-8 path {:?}", entry.path());
                continue;
            };
            if !key.starts_with(prefix) {
                continue;
            }
            let size = entry.metadata().ok().map(|m| m.len());
            assets.push(AssetRecord {
                path: key,
                size_bytes: size,
            });
        }
        assets.sort_by(|a, b| a.path.cmp(&b.path));
        assets
    }
}

fn relative_key(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts = relative
        .components()
        .map(|c| c.as_os_str().to_str())
        .collect::<Option<Vec<_>>>()?;
    Some(parts.join("/"))
}

#[async_trait]
impl AssetSource for FsStore {
    async fn list_page(
        &self,
        prefix: &str,
        cursor: Option<String>,
        limit: usize,
    ) -> Result<ListPage, StoreError> {
        let root = self.root.clone();
        let owned_prefix = prefix.to_string();
        let all = tokio::task::spawn_blocking(move || Self::walk_keys(&root, &owned_prefix))
            .await
            .map_err(|e| StoreError::permanent(format!("listing task failed: {}", e)))?;

        let mut remaining = all
            .into_iter()
            .filter(|a| cursor.as_deref().map_or(true, |c| a.path.as_str() > c))
            .peekable();
        let assets: Vec<AssetRecord> = remaining.by_ref().take(limit.max(1)).collect();
        let next_cursor = match remaining.peek() {
            Some(_) => assets.last().map(|a| a.path.clone()),
            None => None,
        };

        debug!(
            "Listed {} assets under '{}' in {:?}",
            assets.len(),
            prefix,
            self.root
        );
        Ok(ListPage {
            assets,
            next_cursor,
        })
    }

    async fn fetch(&self, path: &str) -> Result<Bytes, StoreError> {
        let file = self.resolve(path)?;
        tokio::fs::read(&file)
            .await
            .map(Bytes::from)
            .map_err(|e| StoreError::io(format!("read {}", path), &e))
    }
}

#[async_trait]
impl AssetSink for FsStore {
    async fn exists(&self, path: &str) -> Result<bool, StoreError> {
        let target = self.resolve(path)?;
        tokio::fs::try_exists(&target)
            .await
            .map_err(|e| StoreError::io(format!("stat {}", path), &e))
    }

    async fn store(&self, path: &str, body: Bytes) -> Result<StoreOutcome, StoreError> {
        let target = self.resolve(path)?;
        if tokio::fs::try_exists(&target).await.unwrap_or(false) {
            return Ok(StoreOutcome::AlreadyExists);
        }

        let dir = target
            .parent()
            .ok_or_else(|| StoreError::permanent(format!("no parent directory for '{}'", path)))?;
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| StoreError::io(format!("create directory for {}", path), &e))?;

        // Write a private temp file, then link it into place; the link fails
        // if the target appeared meanwhile, so nothing is ever overwritten.
        let temp = dir.join(format!("{}{}", PARTIAL_PREFIX, uuid::Uuid::new_v4()));
        let written = write_synced(&temp, &body).await;
        if let Err(e) = written {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(StoreError::io(format!("write {}", path), &e));
        }

        let linked = tokio::fs::hard_link(&temp, &target).await;
        let _ = tokio::fs::remove_file(&temp).await;
        match linked {
            Ok(()) => Ok(StoreOutcome::Stored),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                Ok(StoreOutcome::AlreadyExists)
            }
            Err(e) => Err(StoreError::io(format!("link {}", path), &e)),
        }
    }
}

async fn write_synced(path: &Path, body: &[u8]) -> std::io::Result<()> {
    let mut file = tokio::fs::File::create(path).await?;
    file.write_all(body).await?;
    file.flush().await?;
    file.sync_all().await
}
