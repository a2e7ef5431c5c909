//! Asset identity and migration scope.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{MigrateError, Result};

/// One migratable unit, identified solely by its path.
///
/// The path is structured as `collection/subcollection/item` (for example
/// `manga/one-piece/chapter-001/panel-001`) and is used both as the
/// destination key and as the ledger key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AssetRecord {
    /// Unique asset path.
    pub path: String,

    /// Size in bytes, when the listing reports it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
}

impl AssetRecord {
    /// Create a record with unknown size.
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            size_bytes: None,
        }
    }

    /// Create a record with a size reported by the listing.
    pub fn with_size(path: impl Into<String>, size_bytes: u64) -> Self {
        Self {
            path: path.into(),
            size_bytes: Some(size_bytes),
        }
    }

    /// Short name for progress lines: the last three path segments.
    pub fn display_name(&self) -> &str {
        display_name(&self.path)
    }
}

/// Last three `/`-separated segments of `path`, or the whole path if it is
/// shorter.
pub fn display_name(path: &str) -> &str {
    let mut slashes = path.rmatch_indices('/').map(|(i, _)| i);
    match slashes.nth(2) {
        Some(idx) => &path[idx + 1..],
        None => path,
    }
}

/// Which part of the source collection a run covers.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Scope {
    /// Every collection under the base prefix.
    #[default]
    All,
    /// A single collection, e.g. one manga slug.
    Collection(String),
}

impl Scope {
    /// Resolve the optional CLI scope argument.
    ///
    /// Absent or blank means [`Scope::All`]. Identifiers that could escape the
    /// base prefix are rejected.
    pub fn parse(arg: Option<&str>) -> Result<Self> {
        let Some(raw) = arg.map(str::trim).filter(|s| !s.is_empty()) else {
            return Ok(Scope::All);
        };

        let collection = raw.trim_end_matches('/');
        if collection.starts_with('/')
            || collection.split('/').any(|seg| seg == ".." || seg == "." || seg.is_empty())
            || collection.chars().any(char::is_control)
        {
            return Err(MigrateError::Config(format!(
                "invalid collection identifier '{}'",
                raw
            )));
        }

        Ok(Scope::Collection(collection.to_string()))
    }

    /// Listing prefix for this scope under `base_prefix`.
    ///
    /// A single collection gets a trailing `/` so that `slug` does not also
    /// match `slug-2`.
    pub fn prefix(&self, base_prefix: &str) -> String {
        let base = base_prefix.trim_matches('/');
        match self {
            Scope::All if base.is_empty() => String::new(),
            Scope::All => base.to_string(),
            Scope::Collection(c) if base.is_empty() => format!("{}/", c),
            Scope::Collection(c) => format!("{}/{}/", base, c),
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::All => write!(f, "all collections"),
            Scope::Collection(c) => write!(f, "collection '{}'", c),
        }
    }
}
