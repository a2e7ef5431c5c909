//! Inventory enumeration: which assets exist under the run's prefix.
//!
//! [`Inventory::stream`] is a lazy, paginated listing straight from the
//! source store. [`Inventory::collect`] drains it into memory and keeps an
//! optional JSON cache so that a rate-limited listing does not have to be
//! repeated on the next run. The inventory never looks at the ledger.

mod cache;

pub use cache::InventoryCache;

use futures::stream::{self, Stream, StreamExt, TryStreamExt};
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

use crate::asset::AssetRecord;
use crate::config::MigrationConfig;
use crate::error::{MigrateError, Result};
use crate::store::{AssetSource, StoreError};

/// Listing behavior.
#[derive(Debug, Clone)]
pub struct InventoryOptions {
    /// Keys requested per page.
    pub page_size: usize,
    /// Pause between pages.
    pub page_delay: Duration,
    /// JSON cache file, if caching is enabled.
    pub cache_path: Option<PathBuf>,
    /// Ignore an existing cache and list again.
    pub refresh: bool,
}

impl Default for InventoryOptions {
    fn default() -> Self {
        Self::from_config(&MigrationConfig::default())
    }
}

impl InventoryOptions {
    pub fn from_config(config: &MigrationConfig) -> Self {
        Self {
            page_size: config.get_page_size(),
            page_delay: Duration::from_millis(config.get_page_delay_ms()),
            cache_path: config.inventory_cache.clone(),
            refresh: false,
        }
    }

    pub fn with_refresh(mut self, refresh: bool) -> Self {
        self.refresh = refresh;
        self
    }

    pub fn with_cache_path(mut self, cache_path: Option<PathBuf>) -> Self {
        self.cache_path = cache_path;
        self
    }

    pub fn with_page_delay(mut self, delay: Duration) -> Self {
        self.page_delay = delay;
        self
    }
}

/// A fully enumerated candidate set.
#[derive(Debug, Clone, Default)]
pub struct Listing {
    /// Unique assets in listing order.
    pub assets: Vec<AssetRecord>,
    /// Listing stopped early on a transient error.
    pub partial: bool,
    /// Loaded from the inventory cache instead of the store.
    pub from_cache: bool,
}

enum PageState {
    First,
    Next(String),
    Done,
}

/// Enumerates the assets under one prefix of a source store.
pub struct Inventory<'a, S> {
    source: &'a S,
    prefix: String,
    options: InventoryOptions,
}

impl<'a, S: AssetSource> Inventory<'a, S> {
    pub fn new(source: &'a S, prefix: impl Into<String>, options: InventoryOptions) -> Self {
        Self {
            source,
            prefix: prefix.into(),
            options,
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Lazy listing. Each call starts over from the first page.
    pub fn stream(&self) -> impl Stream<Item = std::result::Result<AssetRecord, StoreError>> + '_ {
        self.pages()
            .map_ok(|page| stream::iter(page.into_iter().map(Ok::<_, StoreError>)))
            .try_flatten()
    }

    fn pages(&self) -> impl Stream<Item = std::result::Result<Vec<AssetRecord>, StoreError>> + '_ {
        let source = self.source;
        let prefix = self.prefix.as_str();
        let page_size = self.options.page_size;
        let page_delay = self.options.page_delay;

        stream::try_unfold(PageState::First, move |state| async move {
            let cursor = match state {
                PageState::Done => return Ok(None),
                PageState::First => None,
                PageState::Next(cursor) => {
                    tokio::time::sleep(page_delay).await;
                    Some(cursor)
                }
            };
            let page = source.list_page(prefix, cursor, page_size).await?;
            let next = match page.next_cursor {
                Some(cursor) => PageState::Next(cursor),
                None => PageState::Done,
            };
            Ok(Some((page.assets, next)))
        })
    }

    /// Enumerate every asset, using and refreshing the cache.
    ///
    /// A transient error after at least one asset has been listed ends the
    /// listing early and returns a partial set; any other error is fatal.
    pub async fn collect(&self) -> Result<Listing> {
        if let Some(listing) = self.load_cached() {
            return Ok(listing);
        }

        info!("Listing source assets under '{}'", self.prefix);
        let mut seen = HashSet::new();
        let mut assets = Vec::new();
        let mut partial = false;
        let mut page_count = 0usize;

        let mut pages = Box::pin(self.pages());
        while let Some(page) = pages.next().await {
            match page {
                Ok(page) => {
                    page_count += 1;
                    let fetched = page.len();
                    assets.extend(page.into_iter().filter(|a| seen.insert(a.path.clone())));
                    info!(
                        "Fetched {} assets (total: {}) [page {}]",
                        fetched,
                        assets.len(),
                        page_count
                    );
                }
                Err(e) if e.is_transient() && !assets.is_empty() => {
                    warn!(
                        "Listing interrupted after {} assets, continuing with a partial inventory: {}",
                        assets.len(),
                        e.message
                    );
                    partial = true;
                    break;
                }
                Err(e) => {
                    return Err(MigrateError::enumeration(&self.prefix, e.message));
                }
            }
        }

        if !assets.is_empty() {
            self.save_cache(&assets, partial, page_count).await;
        }
        info!("Total assets found: {}", assets.len());

        Ok(Listing {
            assets,
            partial,
            from_cache: false,
        })
    }

    fn load_cached(&self) -> Option<Listing> {
        let path = self.options.cache_path.as_ref()?;
        if self.options.refresh || !path.exists() {
            return None;
        }

        let cache = match InventoryCache::load(path) {
            Ok(cache) => cache,
            Err(e) => {
                warn!("Ignoring unreadable inventory cache {:?}: {}", path, e);
                return None;
            }
        };
        if cache.prefix != self.prefix {
            info!(
                "Inventory cache {:?} is for '{}', listing '{}' instead",
                path, cache.prefix, self.prefix
            );
            return None;
        }

        info!(
            "Using cached inventory: {} assets, fetched at {}{}",
            cache.assets.len(),
            cache.fetched_at.to_rfc3339(),
            if cache.partial { " (partial)" } else { "" }
        );
        let mut seen = HashSet::new();
        let assets = cache
            .assets
            .into_iter()
            .filter(|a| seen.insert(a.path.clone()))
            .collect();
        Some(Listing {
            assets,
            partial: cache.partial,
            from_cache: true,
        })
    }

    async fn save_cache(&self, assets: &[AssetRecord], partial: bool, page_count: usize) {
        let Some(path) = &self.options.cache_path else {
            return;
        };
        let cache = InventoryCache::new(self.prefix.clone(), assets.to_vec(), partial, page_count);
        match cache.save(path).await {
            Ok(()) => info!("Cached {} assets to {:?}", assets.len(), path),
            Err(e) => warn!("Could not save inventory cache {:?}: {}", path, e),
        }
    }
}
