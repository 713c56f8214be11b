//! Commits fetched partitions to their canonical path.

use std::sync::Arc;

use chrono::Utc;
use divvy_lake_ingest_models::{PartitionKey, StorageObjectDescriptor};
use divvy_lake_source::RawPayload;

use crate::{ObjectStore, StoreError};

/// Errors that can occur while writing a partition.
#[derive(Debug, thiserror::Error)]
pub enum WriteError {
    /// Refused to store an empty object.
    #[error("Refusing to write empty payload to {path}")]
    EmptyPayload {
        /// Canonical path of the partition.
        path: String,
    },

    /// The payload format does not match what the source stores.
    #[error("Payload for {path} is {actual:?}, expected {expected:?}")]
    FormatMismatch {
        /// Canonical path of the partition.
        path: String,
        /// Format the source stores.
        expected: divvy_lake_ingest_models::ContentFormat,
        /// Format of the payload.
        actual: divvy_lake_ingest_models::ContentFormat,
    },

    /// The store rejected the write.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Writes payloads through the store's atomic `put`. Does not retry.
#[derive(Clone)]
pub struct PartitionWriter {
    store: Arc<dyn ObjectStore>,
}

impl PartitionWriter {
    #[must_use]
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// Creates or replaces the object for `key`.
    ///
    /// # Errors
    ///
    /// Returns [`WriteError`] if the payload is empty or of the wrong
    /// format, or if the store write fails. On failure no partial object is
    /// visible at the canonical path.
    pub async fn write(
        &self,
        key: &PartitionKey,
        payload: &RawPayload,
    ) -> Result<StorageObjectDescriptor, WriteError> {
        let path = key.canonical_path();
        if payload.bytes.is_empty() {
            return Err(WriteError::EmptyPayload { path });
        }
        let expected = key.source().format();
        if payload.format != expected {
            return Err(WriteError::FormatMismatch {
                path,
                expected,
                actual: payload.format,
            });
        }

        let meta = self
            .store
            .put(&path, &payload.bytes, expected.content_type())
            .await?;

        log::info!(
            "[{key}] wrote {} ({} bytes, {} records)",
            path,
            meta.size,
            payload.record_count
        );

        Ok(StorageObjectDescriptor {
            path,
            format: payload.format,
            size_bytes: meta.size,
            written_at: Utc::now(),
            checksum: meta.etag,
        })
    }
}

#[cfg(test)]
mod tests {
    use divvy_lake_ingest_models::{ContentFormat, SourceKind, YearMonth};

    use super::*;
    use crate::local::LocalStore;
    use crate::md5_hex;

    fn key() -> PartitionKey {
        PartitionKey::monthly(SourceKind::Weather, "chicago", YearMonth::new(2023, 1).unwrap())
            .unwrap()
    }

    fn csv(body: &[u8]) -> RawPayload {
        RawPayload {
            bytes: body.to_vec(),
            format: ContentFormat::DelimitedText,
            record_count: 1,
        }
    }

    #[tokio::test]
    async fn writes_to_canonical_path() {
        let tmp = tempfile::tempdir().unwrap();
        let store = Arc::new(LocalStore::new(tmp.path()));
        let writer = PartitionWriter::new(store.clone());
        let body = b"date,temp\n2023-01-01,1\n";

        let descriptor = writer.write(&key(), &csv(body)).await.unwrap();
        assert_eq!(descriptor.path, key().canonical_path());
        assert_eq!(descriptor.size_bytes, body.len() as u64);
        assert_eq!(descriptor.checksum, Some(md5_hex(body)));
        assert_eq!(descriptor.format, ContentFormat::DelimitedText);

        assert_eq!(
            store.get(&descriptor.path).await.unwrap().unwrap(),
            body.to_vec()
        );
    }

    #[tokio::test]
    async fn refuses_empty_payloads() {
        let tmp = tempfile::tempdir().unwrap();
        let store = Arc::new(LocalStore::new(tmp.path()));
        let writer = PartitionWriter::new(store.clone());

        let err = writer.write(&key(), &csv(b"")).await.unwrap_err();
        assert!(matches!(err, WriteError::EmptyPayload { .. }));
        assert!(!store.exists(&key().canonical_path()).await.unwrap());
    }

    #[tokio::test]
    async fn refuses_wrong_format() {
        let tmp = tempfile::tempdir().unwrap();
        let writer = PartitionWriter::new(Arc::new(LocalStore::new(tmp.path())));
        let payload = RawPayload {
            bytes: b"{}".to_vec(),
            format: ContentFormat::Json,
            record_count: 1,
        };

        let err = writer.write(&key(), &payload).await.unwrap_err();
        assert!(matches!(err, WriteError::FormatMismatch { .. }));
    }

    #[tokio::test]
    async fn rewrite_replaces_object() {
        let tmp = tempfile::tempdir().unwrap();
        let store = Arc::new(LocalStore::new(tmp.path()));
        let writer = PartitionWriter::new(store.clone());

        writer.write(&key(), &csv(b"a\n1\n2\n3\n")).await.unwrap();
        let second = writer.write(&key(), &csv(b"a\n9\n")).await.unwrap();

        assert_eq!(second.size_bytes, 4);
        assert_eq!(
            store.get(&key().canonical_path()).await.unwrap().unwrap(),
            b"a\n9\n".to_vec()
        );
    }
}
