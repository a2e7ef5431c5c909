//! Configuration type definitions.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Store the assets are read from.
    pub source: StoreConfig,

    /// Store the assets are written to.
    pub destination: StoreConfig,

    /// Migration behavior configuration.
    #[serde(default)]
    pub migration: MigrationConfig,
}

/// Which side of the migration a store sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreSide {
    Source,
    Destination,
}

impl StoreSide {
    /// Environment variable prefix used when the store config does not set one.
    pub fn default_env_prefix(self) -> &'static str {
        match self {
            StoreSide::Source => "SOURCE",
            StoreSide::Destination => "DEST",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StoreSide::Source => "source",
            StoreSide::Destination => "destination",
        }
    }
}

/// Object store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StoreConfig {
    /// A directory on the local filesystem.
    Local(LocalStoreConfig),

    /// An S3-compatible bucket (AWS S3, Cloudflare R2, MinIO).
    S3(S3StoreConfig),
}

impl StoreConfig {
    /// Short type name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            StoreConfig::Local(_) => "local",
            StoreConfig::S3(_) => "s3",
        }
    }
}

/// Local filesystem store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalStoreConfig {
    /// Root directory; asset paths are resolved relative to it.
    pub root: PathBuf,
}

/// S3-compatible store configuration.
///
/// Credentials are never part of the file. They are read from
/// `<env_prefix>_ACCESS_KEY_ID` and `<env_prefix>_SECRET_ACCESS_KEY`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3StoreConfig {
    /// Bucket name.
    pub bucket: String,

    /// Custom endpoint URL (required for R2 and MinIO).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    /// Region (default: "auto").
    #[serde(default = "default_region")]
    pub region: String,

    /// Use path-style addressing (default: true).
    #[serde(default = "default_true")]
    pub force_path_style: bool,

    /// Environment variable prefix for credentials (default: SOURCE / DEST).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env_prefix: Option<String>,
}

impl S3StoreConfig {
    /// Effective credential variable prefix for this store.
    pub fn env_prefix(&self, side: StoreSide) -> String {
        self.env_prefix
            .clone()
            .unwrap_or_else(|| side.default_env_prefix().to_string())
    }

    /// Names of the credential environment variables.
    pub fn credential_vars(&self, side: StoreSide) -> [String; 2] {
        let prefix = self.env_prefix(side);
        [
            format!("{}_ACCESS_KEY_ID", prefix),
            format!("{}_SECRET_ACCESS_KEY", prefix),
        ]
    }
}

/// Access key pair for an S3-compatible store.
#[derive(Clone)]
pub struct S3Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
}

impl fmt::Debug for S3Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("S3Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"[REDACTED]")
            .finish()
    }
}

/// Migration behavior configuration.
///
/// Tunables use `Option<T>` to distinguish "not set" (use default) from
/// "explicitly set"; the `get_*` accessors return the effective value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationConfig {
    /// Number of parallel workers (default: 10).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workers: Option<usize>,

    /// Soft time budget in seconds after which no new work is dispatched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_budget_secs: Option<u64>,

    /// Seconds in-flight work may take to drain after the budget expires.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grace_period_secs: Option<u64>,

    /// Emit a checkpoint every N completed assets (default: 50).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint_interval: Option<usize>,

    /// Top-level prefix all collections live under (default: "manga").
    #[serde(default = "default_base_prefix")]
    pub base_prefix: String,

    /// Restrict the run to one collection. The CLI argument overrides this.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection: Option<String>,

    /// Keys requested per listing page (default: 500).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_size: Option<usize>,

    /// Pause between listing pages in milliseconds (default: 500).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_delay_ms: Option<u64>,

    /// Attempts per asset for transient errors, including the first (default: 3).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,

    /// First retry delay in milliseconds, doubled per attempt (default: 500).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_base_delay_ms: Option<u64>,

    /// Upper bound for a single retry delay in milliseconds (default: 30000).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_max_delay_ms: Option<u64>,

    /// Ledger CSV file (default: "migration_log.csv").
    #[serde(default = "default_ledger_path")]
    pub ledger_path: PathBuf,

    /// Inventory cache file; `null` disables caching.
    #[serde(default = "default_inventory_cache")]
    pub inventory_cache: Option<PathBuf>,

    /// Failed assets tolerated before the run exits non-zero. Unset means
    /// failures never affect the exit code; they are retried next run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_tolerance: Option<u64>,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            workers: None,
            time_budget_secs: None,
            grace_period_secs: None,
            checkpoint_interval: None,
            base_prefix: default_base_prefix(),
            collection: None,
            page_size: None,
            page_delay_ms: None,
            max_attempts: None,
            retry_base_delay_ms: None,
            retry_max_delay_ms: None,
            ledger_path: default_ledger_path(),
            inventory_cache: default_inventory_cache(),
            failure_tolerance: None,
        }
    }
}

impl MigrationConfig {
    pub fn get_workers(&self) -> usize {
        self.workers.unwrap_or(10)
    }

    /// 5h30m keeps a run inside a 6 hour CI job limit.
    pub fn get_time_budget_secs(&self) -> u64 {
        self.time_budget_secs.unwrap_or(5 * 3600 + 30 * 60)
    }

    pub fn get_grace_period_secs(&self) -> u64 {
        self.grace_period_secs.unwrap_or(300)
    }

    pub fn get_checkpoint_interval(&self) -> usize {
        self.checkpoint_interval.unwrap_or(50)
    }

    pub fn get_page_size(&self) -> usize {
        self.page_size.unwrap_or(500)
    }

    pub fn get_page_delay_ms(&self) -> u64 {
        self.page_delay_ms.unwrap_or(500)
    }

    pub fn get_max_attempts(&self) -> u32 {
        self.max_attempts.unwrap_or(3)
    }

    pub fn get_retry_base_delay_ms(&self) -> u64 {
        self.retry_base_delay_ms.unwrap_or(500)
    }

    pub fn get_retry_max_delay_ms(&self) -> u64 {
        self.retry_max_delay_ms.unwrap_or(30_000)
    }
}

// Default value functions for serde
fn default_region() -> String {
    "auto".to_string()
}

fn default_true() -> bool {
    true
}

fn default_base_prefix() -> String {
    "manga".to_string()
}

fn default_ledger_path() -> PathBuf {
    PathBuf::from("migration_log.csv")
}

fn default_inventory_cache() -> Option<PathBuf> {
    Some(PathBuf::from("resource_cache.json"))
}
