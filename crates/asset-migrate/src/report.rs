//! Run statistics, progress lines and periodic checkpoints.

use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::info;

use crate::asset::display_name;
use crate::ledger::{LedgerEntry, LedgerStatus};

/// Live counters for the current run.
///
/// Only completions whose ledger row is durable are recorded, so the
/// counters always agree with the rows this run appended.
#[derive(Debug)]
pub struct RunStatistics {
    attempted: AtomicU64,
    succeeded: AtomicU64,
    skipped: AtomicU64,
    failed: AtomicU64,
    bytes: AtomicU64,
    start_time: Instant,
}

impl Default for RunStatistics {
    fn default() -> Self {
        Self::new()
    }
}

impl RunStatistics {
    pub fn new() -> Self {
        Self {
            attempted: AtomicU64::new(0),
            succeeded: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            bytes: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// Count one completion. Returns its 1-based completion number.
    pub fn record(&self, status: LedgerStatus, size_bytes: Option<u64>) -> u64 {
        match status {
            LedgerStatus::Success => {
                self.succeeded.fetch_add(1, Ordering::Relaxed);
                self.bytes
                    .fetch_add(size_bytes.unwrap_or(0), Ordering::Relaxed);
            }
            LedgerStatus::Skipped => {
                self.skipped.fetch_add(1, Ordering::Relaxed);
            }
            LedgerStatus::Failed => {
                self.failed.fetch_add(1, Ordering::Relaxed);
            }
        }
        self.attempted.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Point-in-time copy of the counters.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            attempted: self.attempted.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            bytes: self.bytes.load(Ordering::Relaxed),
            elapsed: self.elapsed(),
        }
    }
}

/// Counters at one moment, with derived rates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub attempted: u64,
    pub succeeded: u64,
    pub skipped: u64,
    pub failed: u64,
    pub bytes: u64,
    #[serde(serialize_with = "serialize_secs")]
    pub elapsed: Duration,
}

fn serialize_secs<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64())
}

impl StatsSnapshot {
    /// Completions per minute.
    pub fn items_per_minute(&self) -> f64 {
        let minutes = self.elapsed.as_secs_f64() / 60.0;
        if minutes > 0.0 {
            self.attempted as f64 / minutes
        } else {
            0.0
        }
    }

    /// Time left for `remaining` items at the current rate.
    pub fn eta(&self, remaining: u64) -> Option<Duration> {
        if remaining == 0 {
            return Some(Duration::ZERO);
        }
        if self.attempted == 0 {
            return None;
        }
        let per_item = self.elapsed.as_secs_f64() / self.attempted as f64;
        Some(Duration::from_secs_f64(per_item * remaining as f64))
    }

    /// Share of successes among attempts that did something; skips excluded.
    pub fn success_rate(&self) -> Option<f64> {
        let acted = self.succeeded + self.failed;
        (acted > 0).then(|| self.succeeded as f64 * 100.0 / acted as f64)
    }

    pub fn megabytes(&self) -> f64 {
        self.bytes as f64 / 1_048_576.0
    }
}

/// Formats a duration as `H:MM:SS`.
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    format!("{}:{:02}:{:02}", secs / 3600, (secs / 60) % 60, secs % 60)
}

/// A checkpoint report for `total` pending items.
#[derive(Debug, Clone, Copy)]
pub struct Checkpoint {
    pub total: u64,
    pub stats: StatsSnapshot,
}

impl Checkpoint {
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            100.0
        } else {
            self.stats.attempted as f64 * 100.0 / self.total as f64
        }
    }

    pub fn eta(&self) -> Option<Duration> {
        self.stats
            .eta(self.total.saturating_sub(self.stats.attempted))
    }
}

impl fmt::Display for Checkpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = &self.stats;
        write!(
            f,
            "{}/{} ({:.1}%) | {} ok, {} failed, {} skipped | elapsed {} | {:.1}/min | ETA {} | {:.2} MB",
            s.attempted,
            self.total,
            self.percent(),
            s.succeeded,
            s.failed,
            s.skipped,
            format_duration(s.elapsed),
            s.items_per_minute(),
            self.eta()
                .map(format_duration)
                .unwrap_or_else(|| "n/a".to_string()),
            s.megabytes()
        )?;
        if let Some(rate) = s.success_rate() {
            write!(f, " | success rate {:.1}%", rate)?;
        }
        Ok(())
    }
}

/// Emits one progress line per completion and a checkpoint every N.
///
/// Reads and updates [`RunStatistics`] only; it never touches the ledger
/// or the pool.
#[derive(Debug)]
pub struct Reporter {
    stats: RunStatistics,
    total: u64,
    checkpoint_interval: u64,
    failed_paths: Mutex<Vec<String>>,
}

impl Reporter {
    pub fn new(total: usize, checkpoint_interval: usize) -> Self {
        Self {
            stats: RunStatistics::new(),
            total: total as u64,
            checkpoint_interval: checkpoint_interval.max(1) as u64,
            failed_paths: Mutex::new(Vec::new()),
        }
    }

    pub fn stats(&self) -> &RunStatistics {
        &self.stats
    }

    /// Record a completion whose ledger row has been written.
    pub fn record(&self, entry: &LedgerEntry) {
        let n = self.stats.record(entry.status, entry.size_bytes);
        let name = display_name(&entry.path);

        match entry.status {
            LedgerStatus::Success => info!("[{}/{}] OK {}", n, self.total, name),
            LedgerStatus::Skipped => info!("[{}/{}] SKIP {} (already exists)", n, self.total, name),
            LedgerStatus::Failed => {
                info!(
                    "[{}/{}] FAIL {}: {}",
                    n,
                    self.total,
                    name,
                    entry.error_message.as_deref().unwrap_or("unknown error")
                );
                if let Ok(mut failed) = self.failed_paths.lock() {
                    failed.push(entry.path.clone());
                }
            }
        }

        if n % self.checkpoint_interval == 0 {
            info!("CHECKPOINT {}", self.checkpoint());
        }
    }

    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            total: self.total,
            stats: self.stats.snapshot(),
        }
    }

    /// Paths that failed during this run, sorted.
    pub fn failed_paths(&self) -> Vec<String> {
        let mut failed = self
            .failed_paths
            .lock()
            .map(|f| f.clone())
            .unwrap_or_default();
        failed.sort();
        failed
    }

    /// Log the final report and return the final counters.
    pub fn finish(&self) -> StatsSnapshot {
        let checkpoint = self.checkpoint();
        info!("FINAL {}", checkpoint);
        checkpoint.stats
    }
}
