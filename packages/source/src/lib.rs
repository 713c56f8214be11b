#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Bike-share data source fetchers.
//!
//! Each external source implements the [`SourceFetcher`] trait: given a
//! [`PartitionKey`], it downloads exactly that partition, validates it, and
//! returns the bytes to persist. Fetchers make a single attempt; retrying is
//! the job of [`retry::RetryPolicy`], which relies on
//! [`FetchError::is_transient`] to decide whether another attempt is worth it.

pub mod http;
pub mod locations;
pub mod retry;
pub mod station_feed;
pub mod trip_archive;
pub mod weather;

use async_trait::async_trait;
use divvy_lake_ingest_models::{ContentFormat, PartitionKey, SourceKind};

/// Errors returned by a single fetch attempt.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    /// Timeouts, connection resets, HTTP 429 and 5xx. Worth retrying.
    #[error("Transient fetch failure: {message}")]
    Transient {
        /// Description of what went wrong.
        message: String,
    },

    /// The source refused the request (4xx, unknown scope). Retrying cannot
    /// help.
    #[error("Permanent fetch failure: {message}")]
    Permanent {
        /// Description of what went wrong.
        message: String,
    },

    /// The source answered but the payload is unusable.
    #[error("Invalid payload: {message}")]
    Validation {
        /// Description of what is wrong with the payload.
        message: String,
    },
}

impl FetchError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Permanent {
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Whether another attempt may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    /// The bare error message without the variant prefix.
    #[must_use]
    pub fn message(&self) -> &str {
        match self {
            Self::Transient { message }
            | Self::Permanent { message }
            | Self::Validation { message } => message,
        }
    }
}

/// A validated partition payload ready to be written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawPayload {
    /// Bytes to store under the partition's canonical path.
    pub bytes: Vec<u8>,
    /// Content format of `bytes`.
    pub format: ContentFormat,
    /// Number of data records in the payload (rows, stations, ...).
    pub record_count: u64,
}

/// Trait that every bike-share data source implements.
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    /// The source this fetcher serves.
    fn kind(&self) -> SourceKind;

    /// Downloads and validates the data of a single partition.
    ///
    /// Implementations make exactly one attempt.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError`] classified as transient, permanent, or
    /// validation failure.
    async fn fetch(&self, key: &PartitionKey) -> Result<RawPayload, FetchError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_errors_are_retryable() {
        assert!(FetchError::transient("HTTP 503").is_transient());
        assert!(!FetchError::permanent("HTTP 404").is_transient());
        assert!(!FetchError::validation("no rows").is_transient());
    }

    #[test]
    fn message_strips_variant_prefix() {
        let err = FetchError::permanent("HTTP 404 Not Found");
        assert_eq!(err.message(), "HTTP 404 Not Found");
        assert_eq!(err.to_string(), "Permanent fetch failure: HTTP 404 Not Found");
    }
}
