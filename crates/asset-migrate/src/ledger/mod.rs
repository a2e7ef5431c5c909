//! Append-only CSV ledger of per-asset migration outcomes.
//!
//! The ledger is the only state carried between runs. Every transfer attempt
//! appends one row; the most recent row for a path decides whether that path
//! is migrated again.
//!
//! # File format
//!
//! ```text
//! timestamp,path,status,size_bytes,error_message
//! 2024-05-01T10:00:00.000000Z,manga/slug/chapter-001/panel-001,success,48213,
//! 2024-05-01T10:00:01.000000Z,manga/slug/chapter-001/panel-002,failed,,timeout
//! ```
//!
//! Rows are written whole under a single async mutex and `fsync`ed before
//! [`Ledger::append`] returns, so a crash loses at most the row being written.
//! [`Ledger::load`] skips malformed rows instead of failing, and the first
//! append of a run cuts off a row left unterminated by a crash.

mod entry;

pub use entry::{LedgerEntry, LedgerStatus};

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{MigrateError, Result};

/// Column names, in file order.
pub const LEDGER_COLUMNS: [&str; 5] = ["timestamp", "path", "status", "size_bytes", "error_message"];

/// Durable, append-only migration ledger.
pub struct Ledger {
    path: PathBuf,
    /// Append handle; holding the lock is the single-writer critical section.
    writer: Mutex<Option<File>>,
}

/// Effective status of every path in the ledger, loaded once at startup.
#[derive(Debug, Default, Clone)]
pub struct LedgerSnapshot {
    effective: HashMap<String, Effective>,
    /// Well-formed rows read.
    pub rows: usize,
    /// Rows that could not be parsed and were ignored.
    pub malformed_rows: usize,
}

#[derive(Debug, Clone)]
struct Effective {
    status: LedgerStatus,
    timestamp: DateTime<Utc>,
}

/// Counts of paths by effective status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LedgerSummary {
    pub paths: usize,
    pub success: usize,
    pub skipped: usize,
    pub failed: usize,
    /// Paths whose latest row is a failure, sorted.
    pub failed_paths: Vec<String>,
}

impl LedgerSnapshot {
    /// Effective status of `path`, if it has any row.
    pub fn status(&self, path: &str) -> Option<LedgerStatus> {
        self.effective.get(path).map(|e| e.status)
    }

    /// True when `path` must not be attempted again.
    pub fn is_resolved(&self, path: &str) -> bool {
        self.status(path).is_some_and(LedgerStatus::is_resolved)
    }

    /// Number of distinct paths with at least one row.
    pub fn len(&self) -> usize {
        self.effective.len()
    }

    pub fn is_empty(&self) -> bool {
        self.effective.is_empty()
    }

    /// Number of paths that are resolved (success or skipped).
    pub fn resolved_count(&self) -> usize {
        self.effective
            .values()
            .filter(|e| e.status.is_resolved())
            .count()
    }

    /// Fold one row into the snapshot. Later timestamps win; on equal
    /// timestamps the row read later wins.
    fn apply(&mut self, entry: LedgerEntry) {
        match self.effective.get_mut(&entry.path) {
            Some(current) if current.timestamp > entry.timestamp => {}
            Some(current) => {
                current.status = entry.status;
                current.timestamp = entry.timestamp;
            }
            None => {
                self.effective.insert(
                    entry.path,
                    Effective {
                        status: entry.status,
                        timestamp: entry.timestamp,
                    },
                );
            }
        }
    }

    /// Summarize paths by effective status.
    pub fn summary(&self) -> LedgerSummary {
        let mut summary = LedgerSummary {
            paths: self.effective.len(),
            ..Default::default()
        };
        for (path, e) in &self.effective {
            match e.status {
                LedgerStatus::Success => summary.success += 1,
                LedgerStatus::Skipped => summary.skipped += 1,
                LedgerStatus::Failed => {
                    summary.failed += 1;
                    summary.failed_paths.push(path.clone());
                }
            }
        }
        summary.failed_paths.sort();
        summary
    }
}

impl Ledger {
    /// Create a ledger backed by `path`. No file is touched until
    /// [`load`](Self::load) or [`append`](Self::append).
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            writer: Mutex::new(None),
        }
    }

    /// Path of the ledger file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn error(&self, message: impl Into<String>) -> MigrateError {
        MigrateError::ledger(self.path.display().to_string(), message)
    }

    /// Read the whole ledger into an in-memory snapshot.
    ///
    /// A missing or empty file yields an empty snapshot.
    pub async fn load(&self) -> Result<LedgerSnapshot> {
        let content = match tokio::fs::read(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No ledger at {:?}, starting fresh", self.path);
                return Ok(LedgerSnapshot::default());
            }
            Err(e) => return Err(self.error(format!("read failed: {}", e))),
        };

        if is_incomplete_header(&content) {
            warn!("Ledger {:?} has no complete header, treating as empty", self.path);
            return Ok(LedgerSnapshot::default());
        }

        let (complete, torn) = content.split_at(complete_len(&content));
        if complete.is_empty() {
            return Err(self.error("no complete header line"));
        }

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(complete);

        let headers = reader
            .headers()
            .map_err(|e| self.error(format!("unreadable header: {}", e)))?;
        if !headers.iter().eq(LEDGER_COLUMNS.iter().copied()) {
            return Err(self.error(format!(
                "unexpected header '{}', expected '{}'",
                headers.iter().collect::<Vec<_>>().join(","),
                LEDGER_COLUMNS.join(",")
            )));
        }

        let mut snapshot = LedgerSnapshot::default();
        for (idx, record) in reader.records().enumerate() {
            // Header is line 1
            let line = idx + 2;
            let parsed = record
                .map_err(|e| e.to_string())
                .and_then(|r| LedgerEntry::from_record(&r));
            match parsed {
                Ok(entry) => {
                    snapshot.rows += 1;
                    snapshot.apply(entry);
                }
                Err(reason) => {
                    snapshot.malformed_rows += 1;
                    warn!("Ignoring malformed ledger row {}: {}", line, reason);
                }
            }
        }

        if !torn.is_empty() {
            snapshot.malformed_rows += 1;
            warn!(
                "Ignoring unterminated last ledger row ({} bytes)",
                torn.len()
            );
        }

        info!(
            "Loaded ledger {:?}: {} rows, {} paths, {} resolved",
            self.path,
            snapshot.rows,
            snapshot.len(),
            snapshot.resolved_count()
        );
        Ok(snapshot)
    }

    /// Open the append handle, creating the file and header if needed.
    ///
    /// Called by the orchestrator before any work is dispatched so that an
    /// unwritable ledger fails the run up front. [`append`](Self::append)
    /// opens lazily if this was not called.
    pub async fn open_for_append(&self) -> Result<()> {
        let mut writer = self.writer.lock().await;
        if writer.is_none() {
            *writer = Some(self.open_file().await?);
        }
        Ok(())
    }

    async fn open_file(&self) -> Result<File> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| self.error(format!("cannot create directory: {}", e)))?;
        }

        let existing = match tokio::fs::read(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(self.error(format!("read failed: {}", e))),
        };

        let fresh = existing.is_empty() || is_incomplete_header(&existing);
        let mut options = OpenOptions::new();
        if fresh {
            options.write(true).create(true).truncate(true);
        } else {
            options.append(true);
        }
        let mut file = options
            .open(&self.path)
            .await
            .map_err(|e| self.error(format!("open failed: {}", e)))?;

        if fresh {
            let mut header = LEDGER_COLUMNS.join(",").into_bytes();
            header.push(b'\n');
            write_durably(&mut file, &header)
                .await
                .map_err(|e| self.error(format!("write failed: {}", e)))?;
        } else {
            let keep = complete_len(&existing);
            if keep == 0 {
                return Err(self.error("no complete header line"));
            }
            if keep < existing.len() {
                // Drop a row cut short by a crash; its asset stays pending
                warn!(
                    "Ledger {:?} ends with a partial row, removing {} bytes",
                    self.path,
                    existing.len() - keep
                );
                truncate_durably(&mut file, keep as u64)
                    .await
                    .map_err(|e| self.error(format!("truncate failed: {}", e)))?;
            }
        }

        debug!("Opened ledger {:?} for append", self.path);
        Ok(file)
    }

    /// Durably append one entry.
    ///
    /// Concurrent callers are serialized; each row is written with a single
    /// `write_all` followed by `fsync`.
    pub async fn append(&self, entry: &LedgerEntry) -> Result<()> {
        let row = entry
            .to_csv_row()
            .map_err(|e| self.error(format!("cannot encode row for {}: {}", entry.path, e)))?;

        let mut writer = self.writer.lock().await;
        if writer.is_none() {
            *writer = Some(self.open_file().await?);
        }
        let file = writer
            .as_mut()
            .ok_or_else(|| self.error("append handle unavailable"))?;

        write_durably(file, &row)
            .await
            .map_err(|e| self.error(format!("append failed for {}: {}", entry.path, e)))
    }
}

async fn write_durably(file: &mut File, bytes: &[u8]) -> std::io::Result<()> {
    file.write_all(bytes).await?;
    file.flush().await?;
    file.sync_data().await
}

async fn truncate_durably(file: &mut File, len: u64) -> std::io::Result<()> {
    file.set_len(len).await?;
    file.sync_data().await
}

/// Length of the longest prefix of `content` made of complete lines.
///
/// A newline inside a quoted field does not end a line, so a row torn in the
/// middle of a quoted message is excluded along with everything after it.
fn complete_len(content: &[u8]) -> usize {
    let mut quoted = false;
    let mut end = 0;
    for (idx, &byte) in content.iter().enumerate() {
        match byte {
            b'"' => quoted = !quoted,
            b'\n' if !quoted => end = idx + 1,
            _ => {}
        }
    }
    end
}

/// A file holding nothing but a prefix of the header line, left behind by a
/// crash while the ledger was being created.
fn is_incomplete_header(content: &[u8]) -> bool {
    let header = LEDGER_COLUMNS.join(",");
    !content.contains(&b'\n') && header.as_bytes().starts_with(content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn ledger_in(dir: &TempDir) -> Ledger {
        Ledger::new(dir.path().join("migration_log.csv"))
    }

    fn at(entry: LedgerEntry, rfc3339: &str) -> LedgerEntry {
        LedgerEntry {
            timestamp: DateTime::parse_from_rfc3339(rfc3339)
                .unwrap()
                .with_timezone(&Utc),
            ..entry
        }
    }

    #[tokio::test]
    async fn test_load_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let snapshot = ledger_in(&dir).load().await.unwrap();
        assert!(snapshot.is_empty());
        assert_eq!(snapshot.rows, 0);
    }

    #[tokio::test]
    async fn test_load_empty_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let ledger = ledger_in(&dir);
        std::fs::write(ledger.path(), "").unwrap();
        assert!(ledger.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_append_writes_header_once() {
        let dir = TempDir::new().unwrap();
        let ledger = ledger_in(&dir);
        ledger.append(&LedgerEntry::success("manga/a/1", 10)).await.unwrap();
        ledger.append(&LedgerEntry::skipped("manga/a/2")).await.unwrap();

        // A second ledger instance appends to the same file without a new header
        let again = ledger_in(&dir);
        again.append(&LedgerEntry::failed("manga/a/3", "boom")).await.unwrap();

        let content = std::fs::read_to_string(ledger.path()).unwrap();
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], "timestamp,path,status,size_bytes,error_message");
        assert_eq!(content.matches("timestamp,path").count(), 1);
        assert!(lines[1].ends_with(",manga/a/1,success,10,"));
        assert!(lines[2].ends_with(",manga/a/2,skipped,,"));
        assert!(lines[3].ends_with(",manga/a/3,failed,,boom"));
    }

    #[tokio::test]
    async fn test_round_trip_statuses() {
        let dir = TempDir::new().unwrap();
        let ledger = ledger_in(&dir);
        ledger.append(&LedgerEntry::success("p/ok", 100)).await.unwrap();
        ledger.append(&LedgerEntry::skipped("p/exists")).await.unwrap();
        ledger
            .append(&LedgerEntry::failed("p/bad", "quota, exceeded\nsecond line"))
            .await
            .unwrap();

        let snapshot = ledger.load().await.unwrap();
        assert_eq!(snapshot.rows, 3);
        assert_eq!(snapshot.malformed_rows, 0);
        assert_eq!(snapshot.status("p/ok"), Some(LedgerStatus::Success));
        assert_eq!(snapshot.status("p/exists"), Some(LedgerStatus::Skipped));
        assert_eq!(snapshot.status("p/bad"), Some(LedgerStatus::Failed));
        assert!(snapshot.is_resolved("p/ok"));
        assert!(snapshot.is_resolved("p/exists"));
        assert!(!snapshot.is_resolved("p/bad"));
        assert!(!snapshot.is_resolved("p/unknown"));
    }

    #[tokio::test]
    async fn test_later_timestamp_wins() {
        let dir = TempDir::new().unwrap();
        let ledger = ledger_in(&dir);
        ledger
            .append(&at(LedgerEntry::failed("p", "timeout"), "2024-01-01T00:00:00Z"))
            .await
            .unwrap();
        ledger
            .append(&at(LedgerEntry::success("p", 50), "2024-01-01T00:00:05Z"))
            .await
            .unwrap();
        assert_eq!(
            ledger.load().await.unwrap().status("p"),
            Some(LedgerStatus::Success)
        );
    }

    #[tokio::test]
    async fn test_out_of_order_rows_use_timestamp() {
        let dir = TempDir::new().unwrap();
        let ledger = ledger_in(&dir);
        // Written second but older
        ledger
            .append(&at(LedgerEntry::success("p", 50), "2024-01-01T00:00:05Z"))
            .await
            .unwrap();
        ledger
            .append(&at(LedgerEntry::failed("p", "late"), "2024-01-01T00:00:01Z"))
            .await
            .unwrap();
        assert_eq!(
            ledger.load().await.unwrap().status("p"),
            Some(LedgerStatus::Success)
        );
    }

    #[tokio::test]
    async fn test_equal_timestamps_later_row_wins() {
        let dir = TempDir::new().unwrap();
        let ledger = ledger_in(&dir);
        let ts = "2024-01-01T00:00:00Z";
        ledger.append(&at(LedgerEntry::success("p", 1), ts)).await.unwrap();
        ledger.append(&at(LedgerEntry::failed("p", "x"), ts)).await.unwrap();
        assert_eq!(
            ledger.load().await.unwrap().status("p"),
            Some(LedgerStatus::Failed)
        );
    }

    #[tokio::test]
    async fn test_trailing_partial_row_is_ignored() {
        let dir = TempDir::new().unwrap();
        let ledger = ledger_in(&dir);
        ledger.append(&LedgerEntry::success("p/1", 7)).await.unwrap();

        // Simulate a crash mid-write
        let mut content = std::fs::read_to_string(ledger.path()).unwrap();
        content.push_str("2024-01-01T00:00:00Z,p/2,succ");
        std::fs::write(ledger.path(), &content).unwrap();

        let snapshot = ledger.load().await.unwrap();
        assert_eq!(snapshot.rows, 1);
        assert_eq!(snapshot.malformed_rows, 1);
        assert!(snapshot.is_resolved("p/1"));
        assert_eq!(snapshot.status("p/2"), None);

        // The next append starts on a fresh line and both rows stay readable
        let fresh = ledger_in(&dir);
        fresh.append(&LedgerEntry::success("p/3", 9)).await.unwrap();
        let snapshot = fresh.load().await.unwrap();
        assert_eq!(snapshot.rows, 2);
        assert_eq!(snapshot.malformed_rows, 0);
        assert!(snapshot.is_resolved("p/3"));
        assert!(!std::fs::read_to_string(fresh.path()).unwrap().contains("p/2"));
    }

    #[tokio::test]
    async fn test_torn_quoted_message_does_not_swallow_later_rows() {
        let dir = TempDir::new().unwrap();
        let ledger = ledger_in(&dir);
        ledger.append(&LedgerEntry::success("p/1", 7)).await.unwrap();

        // Crash while writing a failure whose message is quoted
        let mut content = std::fs::read_to_string(ledger.path()).unwrap();
        content.push_str("2024-01-01T00:00:00.000000Z,p/2,failed,,\"get s3://b/p/2: dispatch fail");
        std::fs::write(ledger.path(), &content).unwrap();

        let snapshot = ledger.load().await.unwrap();
        assert_eq!(snapshot.rows, 1);
        assert_eq!(snapshot.malformed_rows, 1);
        assert_eq!(snapshot.status("p/2"), None);

        let fresh = ledger_in(&dir);
        for path in ["p/3", "p/4", "p/5"] {
            fresh.append(&LedgerEntry::success(path, 1)).await.unwrap();
        }

        let snapshot = fresh.load().await.unwrap();
        assert_eq!(snapshot.rows, 4);
        assert_eq!(snapshot.malformed_rows, 0);
        assert_eq!(snapshot.status("p/2"), None);
        for path in ["p/1", "p/3", "p/4", "p/5"] {
            assert_eq!(snapshot.status(path), Some(LedgerStatus::Success), "{}", path);
        }
    }

    #[tokio::test]
    async fn test_torn_multiline_message_is_removed_whole() {
        let dir = TempDir::new().unwrap();
        let ledger = ledger_in(&dir);
        ledger.append(&LedgerEntry::success("p/1", 7)).await.unwrap();

        let mut content = std::fs::read_to_string(ledger.path()).unwrap();
        content.push_str("2024-01-01T00:00:00.000000Z,p/2,failed,,\"first line\nsecond");
        std::fs::write(ledger.path(), &content).unwrap();

        let fresh = ledger_in(&dir);
        fresh.append(&LedgerEntry::success("p/3", 1)).await.unwrap();

        let snapshot = fresh.load().await.unwrap();
        assert_eq!(snapshot.rows, 2);
        assert!(snapshot.is_resolved("p/3"));
        assert_eq!(snapshot.status("p/2"), None);
    }

    #[test]
    fn test_complete_len() {
        assert_eq!(complete_len(b""), 0);
        assert_eq!(complete_len(b"a,b\n"), 4);
        assert_eq!(complete_len(b"a,b\nc,d"), 4);
        assert_eq!(complete_len(b"a,\"x\ny\"\nc"), 8);
        assert_eq!(complete_len(b"a,b\nc,\"open\nstill open"), 4);
        assert_eq!(complete_len(b"a,\"say \"\"hi\"\"\"\n"), 15);
    }

    #[tokio::test]
    async fn test_partial_header_is_rewritten() {
        let dir = TempDir::new().unwrap();
        let ledger = ledger_in(&dir);
        std::fs::write(ledger.path(), "timestamp,pa").unwrap();
        assert!(ledger.load().await.unwrap().is_empty());

        ledger.append(&LedgerEntry::success("p", 1)).await.unwrap();
        let content = std::fs::read_to_string(ledger.path()).unwrap();
        assert!(content.starts_with("timestamp,path,status,size_bytes,error_message\n"));
        assert_eq!(ledger.load().await.unwrap().rows, 1);
    }

    #[tokio::test]
    async fn test_foreign_header_is_error() {
        let dir = TempDir::new().unwrap();
        let ledger = ledger_in(&dir);
        std::fs::write(ledger.path(), "a,b,c\n1,2,3\n").unwrap();
        let err = ledger.load().await.unwrap_err();
        assert!(matches!(err, MigrateError::Ledger { .. }));
    }

    #[tokio::test]
    async fn test_concurrent_appends_are_atomic() {
        let dir = TempDir::new().unwrap();
        let ledger = Arc::new(ledger_in(&dir));
        let n = 64;

        let mut handles = Vec::new();
        for i in 0..n {
            let ledger = ledger.clone();
            handles.push(tokio::spawn(async move {
                let path = format!("manga/slug/chapter-{:03}/panel-{:03}", i / 8, i);
                let entry = if i % 3 == 0 {
                    LedgerEntry::failed(path, "connection reset, retry exhausted")
                } else {
                    LedgerEntry::success(path, i as u64 * 1000)
                };
                ledger.append(&entry).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let snapshot = ledger.load().await.unwrap();
        assert_eq!(snapshot.rows, n);
        assert_eq!(snapshot.malformed_rows, 0);
        assert_eq!(snapshot.len(), n);

        let content = std::fs::read_to_string(ledger.path()).unwrap();
        assert_eq!(content.lines().count(), n + 1);
    }

    #[tokio::test]
    async fn test_unwritable_ledger_fails_open() {
        let dir = TempDir::new().unwrap();
        // A directory where the file should be
        let path = dir.path().join("ledger");
        std::fs::create_dir(&path).unwrap();
        let ledger = Ledger::new(&path);
        let err = ledger.open_for_append().await.unwrap_err();
        assert!(matches!(err, MigrateError::Ledger { .. }));
    }

    #[test]
    fn test_summary() {
        let mut snapshot = LedgerSnapshot::default();
        snapshot.apply(LedgerEntry::success("a", 1));
        snapshot.apply(LedgerEntry::skipped("b"));
        snapshot.apply(LedgerEntry::failed("d", "x"));
        snapshot.apply(LedgerEntry::failed("c", "x"));
        let summary = snapshot.summary();
        assert_eq!(summary.paths, 4);
        assert_eq!(summary.success, 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.failed, 2);
        assert_eq!(summary.failed_paths, vec!["c".to_string(), "d".to_string()]);
    }
}
