//! # asset-migrate
//!
//! Resumable, parallel migration of binary assets between object stores.
//!
//! A run lists the assets under a prefix of the source store, drops every
//! path the ledger already records as migrated, and transfers the rest on a
//! fixed pool of workers under a wall-clock budget:
//!
//! - **Ledger**: append-only CSV of per-asset outcomes, the only state
//!   carried between runs
//! - **Non-destructive writes**: an existing destination object is never
//!   overwritten and is recorded as skipped
//! - **Deadline governor**: stops handing out work when the budget expires,
//!   then gives in-flight transfers a grace period
//! - **Stores**: local filesystem and S3-compatible buckets (S3, R2, MinIO)
//!
//! ## Example
//!
//! ```rust,no_run
//! use asset_migrate::{Config, StoreMigration};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> asset_migrate::Result<()> {
//!     let config = Config::load("config.yaml")?;
//!     let run_config = config.run_config(Some("one-piece"))?;
//!     let orchestrator = StoreMigration::from_config(&config, run_config)?;
//!     let result = orchestrator.run(CancellationToken::new(), false).await?;
//!     println!("Migrated {} assets", result.succeeded);
//!     Ok(())
//! }
//! ```

pub mod asset;
pub mod config;
pub mod error;
pub mod governor;
pub mod inventory;
pub mod ledger;
pub mod orchestrator;
pub mod pool;
pub mod report;
pub mod store;
pub mod transfer;

// Re-exports for convenient access
pub use asset::{AssetRecord, Scope};
pub use config::{Config, MigrationConfig, RunConfig, StoreConfig};
pub use error::{MigrateError, Result};
pub use governor::{DeadlineGovernor, DrainReason, GovernorState};
pub use inventory::{Inventory, InventoryOptions, Listing};
pub use ledger::{Ledger, LedgerEntry, LedgerSnapshot, LedgerStatus, LedgerSummary};
pub use orchestrator::{MigrationResult, Orchestrator, StoreMigration};
pub use pool::{PoolReport, WorkerPool};
pub use report::{Reporter, RunStatistics, StatsSnapshot};
pub use store::{AssetSink, AssetSource, FsStore, S3Store, StoreImpl};
pub use transfer::{AssetTransfer, RetryPolicy, RetryingTransfer, StoreTransfer, TransferError, TransferOutcome};
