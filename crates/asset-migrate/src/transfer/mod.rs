//! Transfer adapter: move one asset from a source store to a destination.
//!
//! An adapter never returns `Err`. Every call resolves to a
//! [`TransferOutcome`] that the worker pool turns into exactly one ledger
//! row. Retrying transient failures is layered on top by
//! [`RetryingTransfer`].

mod retry;

pub use retry::{RetryPolicy, RetryingTransfer};

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use crate::store::{AssetSink, AssetSource, ErrorKind, StoreError, StoreOutcome};

/// Why a transfer failed, and whether trying again could help.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferError {
    pub kind: ErrorKind,
    pub message: String,
}

impl TransferError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Transient,
            message: message.into(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Permanent,
            message: message.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind.is_transient()
    }
}

impl fmt::Display for TransferError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl From<StoreError> for TransferError {
    fn from(e: StoreError) -> Self {
        Self {
            kind: e.kind,
            message: e.message,
        }
    }
}

/// Result of transferring one asset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferOutcome {
    /// Written to the destination.
    Success { size_bytes: u64 },
    /// The destination already had the asset; nothing was written.
    AlreadyExists,
    /// The transfer failed.
    Error(TransferError),
}

impl TransferOutcome {
    /// Transient failures are the only ones worth retrying.
    pub fn is_transient_error(&self) -> bool {
        matches!(self, TransferOutcome::Error(e) if e.is_transient())
    }
}

/// Moves a single asset identified by its path.
///
/// Implementations must never overwrite an existing destination object;
/// that case is reported as [`TransferOutcome::AlreadyExists`].
#[async_trait]
pub trait AssetTransfer: Send + Sync {
    async fn transfer(&self, path: &str) -> TransferOutcome;
}

#[async_trait]
impl<T: AssetTransfer + ?Sized> AssetTransfer for Arc<T> {
    async fn transfer(&self, path: &str) -> TransferOutcome {
        (**self).transfer(path).await
    }
}

/// Adapter that fetches from any [`AssetSource`] and writes to any
/// [`AssetSink`] under the same path.
#[derive(Debug, Clone)]
pub struct StoreTransfer<S, D> {
    source: S,
    destination: D,
}

impl<S, D> StoreTransfer<S, D>
where
    S: AssetSource,
    D: AssetSink,
{
    pub fn new(source: S, destination: D) -> Self {
        Self {
            source,
            destination,
        }
    }

    async fn try_transfer(&self, path: &str) -> Result<TransferOutcome, StoreError> {
        if self.destination.exists(path).await? {
            return Ok(TransferOutcome::AlreadyExists);
        }
        let body = self.source.fetch(path).await?;
        let size_bytes = body.len() as u64;
        let outcome = match self.destination.store(path, body).await? {
            StoreOutcome::Stored => TransferOutcome::Success { size_bytes },
            StoreOutcome::AlreadyExists => TransferOutcome::AlreadyExists,
        };
        Ok(outcome)
    }
}

#[async_trait]
impl<S, D> AssetTransfer for StoreTransfer<S, D>
where
    S: AssetSource,
    D: AssetSink,
{
    async fn transfer(&self, path: &str) -> TransferOutcome {
        match self.try_transfer(path).await {
            Ok(outcome) => outcome,
            Err(e) => {
                debug!("Transfer of {} failed ({}): {}", path, e.kind, e.message);
                TransferOutcome::Error(e.into())
            }
        }
    }
}
