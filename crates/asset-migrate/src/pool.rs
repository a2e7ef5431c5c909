//! Worker pool: a fixed number of symmetric workers fed from a bounded queue.
//!
//! For every asset a worker runs the adapter, turns the outcome into a
//! ledger row, appends it, and only then updates statistics and prints the
//! progress line. Workers check the governor's intake signal between
//! assets, never in the middle of one. When the grace period ends only the
//! transfer itself is abandoned; a row that is being appended is always
//! finished and counted.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::asset::AssetRecord;
use crate::error::{MigrateError, Result};
use crate::governor::{DeadlineGovernor, DrainReason};
use crate::ledger::{Ledger, LedgerEntry};
use crate::report::Reporter;
use crate::transfer::{AssetTransfer, TransferOutcome};

/// Paths currently being transferred.
///
/// A path can be claimed by only one worker at a time.
#[derive(Debug, Default)]
pub struct InFlight {
    paths: Mutex<HashSet<String>>,
}

impl InFlight {
    /// Claim `path`; false if another worker already holds it.
    pub fn claim(&self, path: &str) -> bool {
        self.paths
            .lock()
            .map(|mut p| p.insert(path.to_string()))
            .unwrap_or(false)
    }

    pub fn release(&self, path: &str) {
        if let Ok(mut p) = self.paths.lock() {
            p.remove(path);
        }
    }

    pub fn len(&self) -> usize {
        self.paths.lock().map(|p| p.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// What the pool did with its input.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolReport {
    /// Assets a worker started transferring.
    pub dispatched: usize,
    /// Assets never handed to a worker because intake stopped.
    pub not_dispatched: usize,
    /// Transfers dropped when the grace period expired; they have no ledger
    /// row and remain candidates for the next run.
    pub aborted_in_flight: usize,
}

/// Map an adapter outcome to the row that records it.
pub fn ledger_entry(path: &str, outcome: TransferOutcome) -> LedgerEntry {
    match outcome {
        TransferOutcome::Success { size_bytes } => LedgerEntry::success(path, size_bytes),
        TransferOutcome::AlreadyExists => LedgerEntry::skipped(path),
        TransferOutcome::Error(e) => LedgerEntry::failed(path, e.message),
    }
}

/// Runs transfers on a fixed number of workers.
pub struct WorkerPool<T> {
    transfer: T,
    ledger: Arc<Ledger>,
    reporter: Arc<Reporter>,
    workers: usize,
}

impl<T> WorkerPool<T>
where
    T: AssetTransfer + Clone + 'static,
{
    pub fn new(transfer: T, ledger: Arc<Ledger>, reporter: Arc<Reporter>, workers: usize) -> Self {
        Self {
            transfer,
            ledger,
            reporter,
            workers: workers.max(1),
        }
    }

    /// Process `pending` until it is exhausted or the governor stops intake.
    ///
    /// Returns the first ledger error if one occurred; the remaining workers
    /// finish their current asset before the error is returned.
    pub async fn run(
        &self,
        pending: Vec<AssetRecord>,
        governor: &DeadlineGovernor,
    ) -> Result<PoolReport> {
        let total = pending.len();
        let intake = governor.intake_token();

        let (tx, rx) = async_channel::bounded::<AssetRecord>(self.workers);
        let in_flight = Arc::new(InFlight::default());
        let dispatched = Arc::new(AtomicUsize::new(0));
        let aborted = Arc::new(AtomicUsize::new(0));
        let fatal: Arc<Mutex<Option<MigrateError>>> = Arc::new(Mutex::new(None));

        let feeder_intake = intake.clone();
        let feeder = tokio::spawn(async move {
            for asset in pending {
                tokio::select! {
                    biased;
                    _ = feeder_intake.cancelled() => break,
                    sent = tx.send(asset) => {
                        if sent.is_err() {
                            break;
                        }
                    }
                }
            }
        });

        info!("Starting {} workers for {} assets", self.workers, total);
        let mut set = JoinSet::new();
        for worker_id in 0..self.workers {
            let ctx = WorkerContext {
                id: worker_id,
                rx: rx.clone(),
                transfer: self.transfer.clone(),
                ledger: self.ledger.clone(),
                reporter: self.reporter.clone(),
                governor: governor.clone(),
                in_flight: in_flight.clone(),
                dispatched: dispatched.clone(),
                aborted: aborted.clone(),
                fatal: fatal.clone(),
            };
            set.spawn(ctx.run());
        }
        drop(rx);

        while let Some(joined) = set.join_next().await {
            if let Err(e) = joined {
                error!("Worker task failed: {}", e);
                if let Ok(mut slot) = fatal.lock() {
                    slot.get_or_insert(MigrateError::Worker(e.to_string()));
                }
                governor.drain(DrainReason::Fatal);
            }
        }

        feeder.abort();
        let _ = feeder.await;

        let dispatched = dispatched.load(Ordering::SeqCst);
        let aborted_in_flight = aborted.load(Ordering::SeqCst);
        if aborted_in_flight > 0 {
            warn!(
                "Abandoned {} in-flight transfers; they stay pending for the next run",
                aborted_in_flight
            );
        }
        let report = PoolReport {
            dispatched,
            not_dispatched: total.saturating_sub(dispatched),
            aborted_in_flight,
        };
        debug!("Worker pool finished: {:?}", report);

        let fatal = fatal.lock().ok().and_then(|mut slot| slot.take());
        match fatal {
            Some(e) => Err(e),
            None => Ok(report),
        }
    }
}

struct WorkerContext<T> {
    id: usize,
    rx: async_channel::Receiver<AssetRecord>,
    transfer: T,
    ledger: Arc<Ledger>,
    reporter: Arc<Reporter>,
    governor: DeadlineGovernor,
    in_flight: Arc<InFlight>,
    dispatched: Arc<AtomicUsize>,
    aborted: Arc<AtomicUsize>,
    fatal: Arc<Mutex<Option<MigrateError>>>,
}

impl<T: AssetTransfer> WorkerContext<T> {
    async fn run(self) {
        let intake = self.governor.intake_token();
        let abort = self.governor.abort_token();
        loop {
            let asset = tokio::select! {
                biased;
                _ = intake.cancelled() => break,
                received = self.rx.recv() => match received {
                    Ok(asset) => asset,
                    Err(_) => break,
                },
            };
            // Draining may have started while this worker waited
            if intake.is_cancelled() {
                break;
            }
            if !self.in_flight.claim(&asset.path) {
                warn!(
                    "Worker {}: {} is already in flight, not starting it twice",
                    self.id, asset.path
                );
                continue;
            }
            self.dispatched.fetch_add(1, Ordering::SeqCst);

            let outcome = tokio::select! {
                biased;
                outcome = self.transfer.transfer(&asset.path) => outcome,
                _ = abort.cancelled() => {
                    debug!("Worker {}: abandoning {}", self.id, asset.path);
                    self.in_flight.release(&asset.path);
                    self.aborted.fetch_add(1, Ordering::SeqCst);
                    break;
                }
            };
            let entry = ledger_entry(&asset.path, outcome);
            let appended = self.ledger.append(&entry).await;
            self.in_flight.release(&asset.path);

            match appended {
                Ok(()) => self.reporter.record(&entry),
                Err(e) => {
                    error!("Worker {}: {}", self.id, e);
                    if let Ok(mut slot) = self.fatal.lock() {
                        slot.get_or_insert(e);
                    }
                    self.governor.drain(DrainReason::Fatal);
                    break;
                }
            }
        }
        debug!("Worker {} exiting", self.id);
    }
}
