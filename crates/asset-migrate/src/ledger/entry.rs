//! Ledger row types.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Outcome recorded for one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LedgerStatus {
    /// Asset was written to the destination.
    Success,
    /// Destination already held the asset.
    Skipped,
    /// Attempt failed; the asset is retried on the next run.
    Failed,
}

impl LedgerStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            LedgerStatus::Success => "success",
            LedgerStatus::Skipped => "skipped",
            LedgerStatus::Failed => "failed",
        }
    }

    /// Resolved paths are never attempted again.
    pub fn is_resolved(self) -> bool {
        matches!(self, LedgerStatus::Success | LedgerStatus::Skipped)
    }
}

impl fmt::Display for LedgerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LedgerStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(LedgerStatus::Success),
            "skipped" => Ok(LedgerStatus::Skipped),
            "failed" => Ok(LedgerStatus::Failed),
            other => Err(format!("unknown status '{}'", other)),
        }
    }
}

/// One ledger row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    pub timestamp: DateTime<Utc>,
    pub path: String,
    pub status: LedgerStatus,
    /// Bytes written; present only for successes.
    pub size_bytes: Option<u64>,
    /// Present only for failures.
    pub error_message: Option<String>,
}

impl LedgerEntry {
    pub fn success(path: impl Into<String>, size_bytes: u64) -> Self {
        Self {
            timestamp: Utc::now(),
            path: path.into(),
            status: LedgerStatus::Success,
            size_bytes: Some(size_bytes),
            error_message: None,
        }
    }

    pub fn skipped(path: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            path: path.into(),
            status: LedgerStatus::Skipped,
            size_bytes: None,
            error_message: None,
        }
    }

    pub fn failed(path: impl Into<String>, error_message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            path: path.into(),
            status: LedgerStatus::Failed,
            size_bytes: None,
            error_message: Some(error_message.into()),
        }
    }

    /// Encode as a single CSV line, newline included.
    pub(crate) fn to_csv_row(&self) -> Result<Vec<u8>, csv::Error> {
        let timestamp = self.timestamp.to_rfc3339_opts(SecondsFormat::Micros, true);
        let size = self.size_bytes.map(|s| s.to_string()).unwrap_or_default();

        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(Vec::with_capacity(128));
        writer.write_record([
            timestamp.as_str(),
            self.path.as_str(),
            self.status.as_str(),
            size.as_str(),
            self.error_message.as_deref().unwrap_or(""),
        ])?;
        writer
            .into_inner()
            .map_err(|e| csv::Error::from(e.into_error()))
    }

    /// Decode a row read back from the ledger.
    pub(crate) fn from_record(record: &csv::StringRecord) -> Result<Self, String> {
        if record.len() != 5 {
            return Err(format!("expected 5 fields, found {}", record.len()));
        }

        let timestamp = DateTime::parse_from_rfc3339(&record[0])
            .map_err(|e| format!("bad timestamp '{}': {}", &record[0], e))?
            .with_timezone(&Utc);
        let path = record[1].to_string();
        if path.is_empty() {
            return Err("empty path".to_string());
        }
        let status: LedgerStatus = record[2].parse()?;
        let size_bytes = match &record[3] {
            "" => None,
            s => Some(
                s.parse::<u64>()
                    .map_err(|e| format!("bad size '{}': {}", s, e))?,
            ),
        };
        let error_message = Some(record[4].to_string()).filter(|m| !m.is_empty());

        Ok(Self {
            timestamp,
            path,
            status,
            size_bytes,
            error_message,
        })
    }
}
