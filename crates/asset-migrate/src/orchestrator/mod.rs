//! Migration orchestrator - coordinates the full migration workflow.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::asset::AssetRecord;
use crate::config::{Config, RunConfig, StoreSide};
use crate::error::{MigrateError, Result};
use crate::governor::{DeadlineGovernor, DrainReason};
use crate::inventory::{Inventory, InventoryOptions};
use crate::ledger::Ledger;
use crate::pool::{PoolReport, WorkerPool};
use crate::report::{format_duration, Reporter, StatsSnapshot};
use crate::store::{AssetSource, StoreImpl};
use crate::transfer::{AssetTransfer, RetryingTransfer, StoreTransfer};

/// Orchestrator wired to the stores named in the configuration.
pub type StoreMigration =
    Orchestrator<StoreImpl, RetryingTransfer<StoreTransfer<StoreImpl, StoreImpl>>>;

/// Migration orchestrator.
pub struct Orchestrator<S, T> {
    config: RunConfig,
    inventory: InventoryOptions,
    source: S,
    transfer: T,
    ledger: Arc<Ledger>,
}

/// Result of a migration run.
#[derive(Debug, Clone, Serialize)]
pub struct MigrationResult {
    /// Unique run identifier.
    pub run_id: String,

    /// Final status: `completed`, `drained` or `cancelled`.
    pub status: String,

    /// Plan only; nothing was transferred.
    pub dry_run: bool,

    /// Listing prefix the run covered.
    pub prefix: String,

    /// When the migration started.
    pub started_at: DateTime<Utc>,

    /// When the migration completed.
    pub completed_at: DateTime<Utc>,

    /// Total duration in seconds.
    pub duration_seconds: f64,

    /// Assets found by the inventory.
    pub listed: usize,

    /// The inventory stopped early on a transient error.
    pub partial_inventory: bool,

    /// Listed assets the ledger already records as success or skipped.
    pub already_resolved: usize,

    /// Assets this run had to process.
    pub pending: usize,

    /// Pending assets a worker started on.
    pub dispatched: usize,

    /// Pending assets left for a later run because intake stopped.
    pub not_dispatched: usize,

    /// Transfers abandoned when the grace period ran out.
    pub aborted_in_flight: usize,

    pub attempted: u64,
    pub succeeded: u64,
    pub skipped: u64,
    pub failed: u64,

    /// Bytes written to the destination.
    pub bytes_transferred: u64,

    /// Average throughput.
    pub items_per_minute: f64,

    /// Paths that failed during this run.
    pub failed_paths: Vec<String>,
}

impl MigrationResult {
    /// Convert to JSON string.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Whether this run left more failures than `tolerance` allows.
    /// Without a tolerance, failures never fail the run.
    pub fn exceeds_tolerance(&self, tolerance: Option<u64>) -> bool {
        tolerance.is_some_and(|t| self.failed > t)
    }
}

impl StoreMigration {
    /// Build stores and adapter from configuration.
    ///
    /// Fails with a configuration error listing every missing credential
    /// variable.
    pub fn from_config(config: &Config, run_config: RunConfig) -> Result<Self> {
        config.check_environment()?;
        let source = StoreImpl::from_config(&config.source, StoreSide::Source)?;
        let destination = StoreImpl::from_config(&config.destination, StoreSide::Destination)?;
        info!(
            "Migrating {} -> {}",
            source.location(),
            destination.location()
        );

        let transfer = RetryingTransfer::new(
            StoreTransfer::new(source.clone(), destination),
            run_config.retry,
        );
        let ledger = Ledger::new(&config.migration.ledger_path);
        Ok(Orchestrator::new(run_config, source, transfer, ledger)
            .with_inventory(InventoryOptions::from_config(&config.migration)))
    }
}

impl<S, T> Orchestrator<S, T>
where
    S: AssetSource,
    T: AssetTransfer + Clone + 'static,
{
    /// Create a new orchestrator.
    pub fn new(config: RunConfig, source: S, transfer: T, ledger: Ledger) -> Self {
        Self {
            config,
            inventory: InventoryOptions::default(),
            source,
            transfer,
            ledger: Arc::new(ledger),
        }
    }

    /// Set the inventory listing options.
    pub fn with_inventory(mut self, inventory: InventoryOptions) -> Self {
        self.inventory = inventory;
        self
    }

    /// Force a fresh listing even if a cached inventory exists.
    pub fn with_refresh_inventory(mut self, refresh: bool) -> Self {
        self.inventory = self.inventory.with_refresh(refresh);
        self
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Run the migration.
    ///
    /// `cancel` is the external shutdown signal. It stops intake like an
    /// expired budget does; if it fires before any asset was dispatched the
    /// run returns [`MigrateError::Cancelled`]. The soft budget is measured
    /// from the start of the run, so listing time counts against it. A
    /// listing with no assets at all is an enumeration error.
    pub async fn run(&self, cancel: CancellationToken, dry_run: bool) -> Result<MigrationResult> {
        let started_at = Utc::now();
        let run_clock = Instant::now();
        let run_id = uuid::Uuid::new_v4().to_string();
        let prefix = self.config.prefix();

        info!("Starting migration run: {}", run_id);
        info!(
            "Scope: {} (prefix '{}'), {} workers, budget {}, grace {}",
            self.config.scope,
            prefix,
            self.config.workers,
            format_duration(self.config.soft_budget),
            format_duration(self.config.grace_period)
        );

        // Phase 1: Enumerate
        info!("Phase 1: Enumerating source assets");
        let listing = Inventory::new(&self.source, prefix.clone(), self.inventory.clone())
            .collect()
            .await?;
        if listing.assets.is_empty() {
            return Err(MigrateError::enumeration(&prefix, "no assets found"));
        }

        // Phase 2: Filter against the ledger
        info!("Phase 2: Loading ledger {:?}", self.ledger.path());
        let snapshot = self.ledger.load().await?;
        let listed = listing.assets.len();
        let pending: Vec<AssetRecord> = listing
            .assets
            .into_iter()
            .filter(|a| !snapshot.is_resolved(&a.path))
            .collect();
        let already_resolved = listed - pending.len();
        info!(
            "{} assets listed, {} already migrated, {} pending",
            listed,
            already_resolved,
            pending.len()
        );

        let mut result = MigrationResult {
            run_id,
            status: "completed".to_string(),
            dry_run,
            prefix,
            started_at,
            completed_at: started_at,
            duration_seconds: 0.0,
            listed,
            partial_inventory: listing.partial,
            already_resolved,
            pending: pending.len(),
            dispatched: 0,
            not_dispatched: 0,
            aborted_in_flight: 0,
            attempted: 0,
            succeeded: 0,
            skipped: 0,
            failed: 0,
            bytes_transferred: 0,
            items_per_minute: 0.0,
            failed_paths: Vec::new(),
        };

        if dry_run {
            info!("Dry run: {} assets would be transferred", result.pending);
            result.not_dispatched = result.pending;
            return Ok(self.finish(result));
        }

        // Phase 3: Transfer
        self.ledger.open_for_append().await?;
        info!("Phase 3: Transferring {} assets", pending.len());
        let pending_count = pending.len();
        let remaining = self.config.soft_budget.saturating_sub(run_clock.elapsed());
        info!("{} of the time budget left for transfers", format_duration(remaining));
        let governor = DeadlineGovernor::start(
            remaining,
            self.config.grace_period,
            &cancel,
        );
        let reporter = Arc::new(Reporter::new(pending_count, self.config.checkpoint_interval));
        let pool = WorkerPool::new(
            self.transfer.clone(),
            self.ledger.clone(),
            reporter.clone(),
            self.config.workers,
        );

        let pool_result = pool.run(pending, &governor).await;
        let reason = governor.drain_reason();
        governor.stop();
        let stats = reporter.finish();

        let report = pool_result?;
        if reason == Some(DrainReason::Cancelled) && report.dispatched == 0 && pending_count > 0 {
            warn!("Cancelled before any asset was dispatched");
            return Err(MigrateError::Cancelled);
        }

        result.status = run_status(reason, &report).to_string();
        self.apply(&mut result, &report, &stats, reporter.failed_paths());
        Ok(self.finish(result))
    }

    fn apply(
        &self,
        result: &mut MigrationResult,
        report: &PoolReport,
        stats: &StatsSnapshot,
        failed_paths: Vec<String>,
    ) {
        result.dispatched = report.dispatched;
        result.not_dispatched = report.not_dispatched;
        result.aborted_in_flight = report.aborted_in_flight;
        result.attempted = stats.attempted;
        result.succeeded = stats.succeeded;
        result.skipped = stats.skipped;
        result.failed = stats.failed;
        result.bytes_transferred = stats.bytes;
        result.items_per_minute = stats.items_per_minute();
        result.failed_paths = failed_paths;
    }

    fn finish(&self, mut result: MigrationResult) -> MigrationResult {
        result.completed_at = Utc::now();
        result.duration_seconds = (result.completed_at - result.started_at)
            .num_milliseconds()
            .max(0) as f64
            / 1000.0;

        info!(
            "Migration {}: {} ok, {} skipped, {} failed, {} not dispatched in {:.1}s",
            result.status,
            result.succeeded,
            result.skipped,
            result.failed,
            result.not_dispatched,
            result.duration_seconds
        );
        result
    }
}

/// Final status from the drain reason and what the pool left undone.
fn run_status(reason: Option<DrainReason>, report: &PoolReport) -> &'static str {
    match reason {
        Some(DrainReason::Cancelled) => "cancelled",
        Some(_) if report.not_dispatched > 0 || report.aborted_in_flight > 0 => "drained",
        _ => "completed",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(not_dispatched: usize, aborted_in_flight: usize) -> PoolReport {
        PoolReport {
            dispatched: 1,
            not_dispatched,
            aborted_in_flight,
        }
    }

    #[test]
    fn test_run_status() {
        assert_eq!(run_status(None, &report(0, 0)), "completed");
        assert_eq!(run_status(Some(DrainReason::Budget), &report(0, 0)), "completed");
        assert_eq!(run_status(Some(DrainReason::Budget), &report(3, 0)), "drained");
        assert_eq!(run_status(Some(DrainReason::Budget), &report(0, 1)), "drained");
        assert_eq!(run_status(Some(DrainReason::Cancelled), &report(0, 0)), "cancelled");
    }

    #[test]
    fn test_exceeds_tolerance() {
        let mut result = MigrationResult {
            run_id: "r".into(),
            status: "completed".into(),
            dry_run: false,
            prefix: "manga".into(),
            started_at: Utc::now(),
            completed_at: Utc::now(),
            duration_seconds: 0.0,
            listed: 0,
            partial_inventory: false,
            already_resolved: 0,
            pending: 0,
            dispatched: 0,
            not_dispatched: 0,
            aborted_in_flight: 0,
            attempted: 0,
            succeeded: 0,
            skipped: 0,
            failed: 3,
            bytes_transferred: 0,
            items_per_minute: 0.0,
            failed_paths: vec![],
        };
        assert!(!result.exceeds_tolerance(None));
        assert!(!result.exceeds_tolerance(Some(3)));
        assert!(result.exceeds_tolerance(Some(2)));
        result.failed = 0;
        assert!(!result.exceeds_tolerance(Some(0)));
        assert!(result.to_json().unwrap().contains("\"status\": \"completed\""));
    }
}
