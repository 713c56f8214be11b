//! Checkpoint lookups: is a partition already durably stored?
//!
//! A partition only counts as present when its object exists, is not
//! empty, and (with content validation on) is structurally sound. Anything
//! else is reported as missing so the next run fetches it again.

use std::sync::Arc;

use divvy_lake_ingest_models::{ContentFormat, PartitionKey};
use serde::Serialize;

use crate::{ObjectStore, StoreError};

/// How much of a delimited-text object is read to validate it. The header
/// and first rows are enough to tell a real export from a truncated one.
pub const VALIDATION_PREFIX_BYTES: u64 = 1024 * 1024;

/// What the store holds for a partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PartitionState {
    /// No object at the canonical path.
    Missing,
    /// A zero-byte object (interrupted upload or failed export).
    Empty,
    /// An object whose content fails the structural checks.
    Malformed,
    /// A usable object.
    Present,
}

impl PartitionState {
    #[must_use]
    pub const fn is_present(self) -> bool {
        matches!(self, Self::Present)
    }
}

/// Answers existence queries against an [`ObjectStore`]. Never writes.
#[derive(Clone)]
pub struct ExistenceChecker {
    store: Arc<dyn ObjectStore>,
    validate_content: bool,
}

impl ExistenceChecker {
    /// Creates a checker that validates object content.
    #[must_use]
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self {
            store,
            validate_content: true,
        }
    }

    /// Enables or disables content validation. Without it only the size is
    /// checked. With it, delimited text is judged on its first
    /// [`VALIDATION_PREFIX_BYTES`] and JSON snapshots are read in full.
    #[must_use]
    pub const fn with_content_validation(mut self, enabled: bool) -> Self {
        self.validate_content = enabled;
        self
    }

    /// Whether `key` is durably stored and usable.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store cannot be queried.
    pub async fn exists(&self, key: &PartitionKey) -> Result<bool, StoreError> {
        Ok(self.inspect(key).await?.is_present())
    }

    /// Classifies what the store holds for `key`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store cannot be queried.
    pub async fn inspect(&self, key: &PartitionKey) -> Result<PartitionState, StoreError> {
        let path = key.canonical_path();

        let Some(meta) = self.store.head(&path).await? else {
            return Ok(PartitionState::Missing);
        };
        if meta.size == 0 {
            log::warn!("[{key}] zero-byte object at {path}, will re-fetch");
            return Ok(PartitionState::Empty);
        }
        if !self.validate_content {
            return Ok(PartitionState::Present);
        }

        let format = key.source().format();
        let read = match format {
            ContentFormat::DelimitedText => {
                self.store.get_prefix(&path, VALIDATION_PREFIX_BYTES).await?
            }
            ContentFormat::Json => self.store.get(&path).await?,
        };
        let Some(bytes) = read else {
            // Deleted between head and get.
            return Ok(PartitionState::Missing);
        };
        if is_well_formed(format, &bytes) {
            Ok(PartitionState::Present)
        } else {
            log::warn!("[{key}] malformed object at {path}, will re-fetch");
            Ok(PartitionState::Malformed)
        }
    }
}

/// Structural check of a stored object.
///
/// Delimited text needs a newline-terminated header and at least one data
/// row. JSON must parse as an object.
#[must_use]
pub fn is_well_formed(format: ContentFormat, bytes: &[u8]) -> bool {
    match format {
        ContentFormat::DelimitedText => {
            let Some(header_end) = bytes.iter().position(|b| *b == b'\n') else {
                return false;
            };
            let (header, rest) = bytes.split_at(header_end);
            !header.trim_ascii().is_empty()
                && rest[1..].split(|b| *b == b'\n').any(|line| !line.trim_ascii().is_empty())
        }
        ContentFormat::Json => serde_json::from_slice::<serde_json::Value>(bytes)
            .is_ok_and(|value| value.is_object()),
    }
}
