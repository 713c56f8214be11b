#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Durable partition storage for the Bronze layer.
//!
//! Partitions are stored as whole objects under their canonical path. Two
//! backends implement [`ObjectStore`]:
//!
//! - [`S3Store`](s3::S3Store): an S3 bucket, or any S3-compatible endpoint
//!   such as Cloudflare R2.
//! - [`LocalStore`](local::LocalStore): a directory tree, for development
//!   and tests.
//!
//! Both make a written object visible all at once: readers see either the
//! previous complete object or the new complete object, never a prefix.
//!
//! # Environment Variables
//!
//! | Variable | Description |
//! |---|---|
//! | `CLOUDFLARE_ACCOUNT_ID` | Selects the R2 endpoint for [`S3Store`](s3::S3Store) |
//! | `R2_ACCESS_KEY_ID` | R2 access key (required with `CLOUDFLARE_ACCOUNT_ID`) |
//! | `R2_SECRET_ACCESS_KEY` | R2 secret key (required with `CLOUDFLARE_ACCOUNT_ID`) |
//!
//! Without `CLOUDFLARE_ACCOUNT_ID` the AWS default credential chain is used
//! (`AWS_ACCESS_KEY_ID`, profiles, instance roles, `AWS_ENDPOINT_URL`, ...).

pub mod checker;
pub mod local;
pub mod s3;
pub mod writer;

use async_trait::async_trait;

/// Errors that can occur during store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Missing required environment variable.
    #[error("Missing environment variable: {name}")]
    MissingEnv {
        /// Name of the missing environment variable.
        name: String,
    },

    /// A path cannot be mapped into the store.
    #[error("Invalid object path {path:?}: {reason}")]
    InvalidPath {
        /// The rejected path.
        path: String,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// Local filesystem operation failed.
    #[error("I/O error on {path}: {source}")]
    Io {
        /// File or directory involved.
        path: String,
        /// Underlying error.
        source: std::io::Error,
    },

    /// S3 `GetObject` failed.
    #[error("Failed to download s3://{bucket}/{key}: {source}")]
    Download {
        /// Bucket name.
        bucket: String,
        /// Object key.
        key: String,
        /// Underlying SDK error.
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// S3 `PutObject` failed.
    #[error("Failed to upload s3://{bucket}/{key}: {source}")]
    Upload {
        /// Bucket name.
        bucket: String,
        /// Object key.
        key: String,
        /// Underlying SDK error.
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// S3 `HeadObject` failed.
    #[error("Failed to head s3://{bucket}/{key}: {source}")]
    Head {
        /// Bucket name.
        bucket: String,
        /// Object key.
        key: String,
        /// Underlying SDK error.
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// The stored object's checksum does not match what was uploaded.
    #[error("Checksum mismatch for {key}: expected {expected}, store reported {actual}")]
    ChecksumMismatch {
        /// Object key.
        key: String,
        /// MD5 of the payload.
        expected: String,
        /// `ETag` returned by the store.
        actual: String,
    },

    /// The store cannot be reached or used.
    #[error("Store {target} is unavailable: {message}")]
    Unavailable {
        /// Human-readable store description.
        target: String,
        /// What failed.
        message: String,
    },
}

/// Metadata of a stored object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMeta {
    /// Size in bytes.
    pub size: u64,
    /// `ETag` or content digest, when the store provides one.
    pub etag: Option<String>,
}

/// A store of whole objects addressed by `/`-separated relative paths.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Human-readable location of the store (for logs).
    fn describe(&self) -> String;

    /// Verifies the store is reachable and usable before a run.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store cannot be used.
    async fn check_connectivity(&self) -> Result<(), StoreError>;

    /// Metadata of the object at `path`, or `None` if absent.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store cannot be queried.
    async fn head(&self, path: &str) -> Result<Option<ObjectMeta>, StoreError>;

    /// Contents of the object at `path`, or `None` if absent.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store cannot be read.
    async fn get(&self, path: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// At most the first `max_bytes` of the object at `path`, or `None` if
    /// absent.
    ///
    /// The default reads the whole object and truncates it. Backends that
    /// can read a range should override this.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store cannot be read.
    async fn get_prefix(&self, path: &str, max_bytes: u64) -> Result<Option<Vec<u8>>, StoreError> {
        let limit = usize::try_from(max_bytes).unwrap_or(usize::MAX);
        Ok(self.get(path).await?.map(|mut bytes| {
            bytes.truncate(limit);
            bytes
        }))
    }

    /// Atomically creates or replaces the object at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the write fails. A failed write leaves any
    /// previous object at `path` untouched.
    async fn put(
        &self,
        path: &str,
        bytes: &[u8],
        content_type: &str,
    ) -> Result<ObjectMeta, StoreError>;

    /// Whether an object exists at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store cannot be queried.
    async fn exists(&self, path: &str) -> Result<bool, StoreError> {
        Ok(self.head(path).await?.is_some())
    }
}

/// MD5 hex digest of `bytes` (the `ETag` S3 assigns to single-part uploads).
#[must_use]
pub fn md5_hex(bytes: &[u8]) -> String {
    let mut context = md5::Context::new();
    context.consume(bytes);
    format!("{:x}", context.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn md5_matches_known_digest() {
        assert_eq!(md5_hex(b""), "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(md5_hex(b"hello"), "5d41402abc4b2a76b9719d911017c592");
    }
}
