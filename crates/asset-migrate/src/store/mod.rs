//! Object store abstractions and implementations.
//!
//! A source store lists and fetches assets; a destination store writes them
//! without ever replacing an existing object. [`StoreImpl`] wraps the
//! concrete stores so the rest of the engine can stay generic over a single
//! type picked from configuration.

mod local;
mod s3;

pub use local::FsStore;
pub use s3::S3Store;

use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;

use crate::asset::AssetRecord;
use crate::config::{StoreConfig, StoreSide};
use crate::error::Result;

/// Whether retrying the same operation may succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Timeouts, throttling, server-side failures.
    Transient,
    /// Missing objects, access denied, invalid input.
    Permanent,
}

impl ErrorKind {
    pub fn is_transient(self) -> bool {
        self == ErrorKind::Transient
    }

    /// Classify an HTTP status returned by an object store.
    ///
    /// 420 is the rate-limit status some image CDNs use in place of 429.
    pub fn from_status(status: u16) -> Self {
        match status {
            408 | 420 | 429 | 500..=599 => ErrorKind::Transient,
            _ => ErrorKind::Permanent,
        }
    }

    /// Classify a local I/O error.
    pub fn from_io(err: &std::io::Error) -> Self {
        use std::io::ErrorKind as Io;
        match err.kind() {
            Io::TimedOut
            | Io::Interrupted
            | Io::WouldBlock
            | Io::ConnectionReset
            | Io::ConnectionAborted => ErrorKind::Transient,
            _ => ErrorKind::Permanent,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Transient => f.write_str("transient"),
            ErrorKind::Permanent => f.write_str("permanent"),
        }
    }
}

/// A failed store operation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct StoreError {
    pub kind: ErrorKind,
    pub message: String,
}

impl StoreError {
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

    /// Wrap an I/O error with context.
    pub fn io(context: impl fmt::Display, err: &std::io::Error) -> Self {
        Self {
            kind: ErrorKind::from_io(err),
            message: format!("{}: {}", context, err),
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind.is_transient()
    }
}

/// One page of a listing.
#[derive(Debug, Clone, Default)]
pub struct ListPage {
    pub assets: Vec<AssetRecord>,
    /// Opaque cursor for the next page; `None` on the last page.
    pub next_cursor: Option<String>,
}

/// Result of a non-destructive write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOutcome {
    /// The object was written.
    Stored,
    /// An object already existed at the path and was left untouched.
    AlreadyExists,
}

/// Listing and reading side of a migration.
#[async_trait]
pub trait AssetSource: Send + Sync {
    /// List up to `limit` assets under `prefix`, continuing from `cursor`.
    async fn list_page(
        &self,
        prefix: &str,
        cursor: Option<String>,
        limit: usize,
    ) -> std::result::Result<ListPage, StoreError>;

    /// Read an asset's full body.
    async fn fetch(&self, path: &str) -> std::result::Result<Bytes, StoreError>;
}

/// Writing side of a migration.
#[async_trait]
pub trait AssetSink: Send + Sync {
    /// Whether an object is already stored at `path`.
    async fn exists(&self, path: &str) -> std::result::Result<bool, StoreError>;

    /// Write `body` at `path` unless an object already exists there.
    async fn store(&self, path: &str, body: Bytes) -> std::result::Result<StoreOutcome, StoreError>;
}

/// Store implementation selected from configuration.
#[derive(Clone)]
pub enum StoreImpl {
    Local(FsStore),
    S3(S3Store),
}

impl StoreImpl {
    /// Create a store from configuration.
    ///
    /// S3 stores read their credentials from the environment here.
    pub fn from_config(config: &StoreConfig, side: StoreSide) -> Result<Self> {
        match config {
            StoreConfig::Local(local) => Ok(Self::Local(FsStore::new(&local.root))),
            StoreConfig::S3(s3) => {
                let credentials = s3.credentials(side)?;
                Ok(Self::S3(S3Store::new(s3, &credentials)))
            }
        }
    }

    /// Human-readable location, e.g. `s3://bucket` or `file:///srv/images`.
    pub fn location(&self) -> String {
        match self {
            Self::Local(s) => s.location(),
            Self::S3(s) => s.location(),
        }
    }
}

impl fmt::Debug for StoreImpl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("StoreImpl").field(&self.location()).finish()
    }
}

#[async_trait]
impl AssetSource for StoreImpl {
    async fn list_page(
        &self,
        prefix: &str,
        cursor: Option<String>,
        limit: usize,
    ) -> std::result::Result<ListPage, StoreError> {
        match self {
            Self::Local(s) => s.list_page(prefix, cursor, limit).await,
            Self::S3(s) => s.list_page(prefix, cursor, limit).await,
        }
    }

    async fn fetch(&self, path: &str) -> std::result::Result<Bytes, StoreError> {
        match self {
            Self::Local(s) => s.fetch(path).await,
            Self::S3(s) => s.fetch(path).await,
        }
    }
}

#[async_trait]
impl AssetSink for StoreImpl {
    async fn exists(&self, path: &str) -> std::result::Result<bool, StoreError> {
        match self {
            Self::Local(s) => s.exists(path).await,
            Self::S3(s) => s.exists(path).await,
        }
    }

    async fn store(&self, path: &str, body: Bytes) -> std::result::Result<StoreOutcome, StoreError> {
        match self {
            Self::Local(s) => s.store(path, body).await,
            Self::S3(s) => s.store(path, body).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert_eq!(ErrorKind::from_status(429), ErrorKind::Transient);
        assert_eq!(ErrorKind::from_status(420), ErrorKind::Transient);
        assert_eq!(ErrorKind::from_status(503), ErrorKind::Transient);
        assert_eq!(ErrorKind::from_status(404), ErrorKind::Permanent);
        assert_eq!(ErrorKind::from_status(403), ErrorKind::Permanent);
    }

    #[test]
    fn test_io_classification() {
        let timeout = std::io::Error::new(std::io::ErrorKind::TimedOut, "slow");
        let missing = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        assert!(StoreError::io("read", &timeout).is_transient());
        assert!(!StoreError::io("read", &missing).is_transient());
        assert_eq!(StoreError::io("read a", &missing).message, "read a: gone");
    }
}
