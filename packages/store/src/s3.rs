//! S3 / Cloudflare R2 object store.
//!
//! A single `PutObject` replaces an object atomically, so no staging is
//! needed. After each upload the returned `ETag` is compared against the
//! payload's MD5 to catch corrupted transfers, and a mismatching object is
//! deleted again.

use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_s3::config::{Credentials, StalledStreamProtectionConfig};
use aws_sdk_s3::operation::get_object::GetObjectError;
use aws_sdk_s3::operation::head_object::HeadObjectError;

use crate::{ObjectMeta, ObjectStore, StoreError, md5_hex};

/// Object store backed by an S3 bucket (AWS or any S3-compatible endpoint).
pub struct S3Store {
    client: aws_sdk_s3::Client,
    bucket: String,
    prefix: Option<String>,
}

/// Joins the optional key prefix and an object path.
#[must_use]
pub fn object_key(prefix: Option<&str>, path: &str) -> String {
    match prefix.map(|p| p.trim_matches('/')).filter(|p| !p.is_empty()) {
        Some(prefix) => format!("{prefix}/{path}"),
        None => path.to_string(),
    }
}

impl S3Store {
    #[must_use]
    pub fn new(client: aws_sdk_s3::Client, bucket: impl Into<String>, prefix: Option<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
            prefix,
        }
    }

    /// Creates a store from the environment.
    ///
    /// When `CLOUDFLARE_ACCOUNT_ID` is set the client targets that account's
    /// R2 endpoint with `R2_ACCESS_KEY_ID` / `R2_SECRET_ACCESS_KEY`.
    /// Otherwise the AWS default configuration chain is used.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::MissingEnv`] if R2 is selected but a credential
    /// variable is unset.
    pub async fn from_env(
        bucket: impl Into<String>,
        prefix: Option<String>,
    ) -> Result<Self, StoreError> {
        let client = if let Ok(account_id) = std::env::var("CLOUDFLARE_ACCOUNT_ID") {
            let access_key = require_env("R2_ACCESS_KEY_ID")?;
            let secret_key = require_env("R2_SECRET_ACCESS_KEY")?;

            let endpoint = format!("https://{account_id}.r2.cloudflarestorage.com");
            let creds = Credentials::new(&access_key, &secret_key, None, None, "r2-env");

            let config = aws_sdk_s3::Config::builder()
                .endpoint_url(&endpoint)
                .region(Region::new("auto"))
                .credentials_provider(creds)
                .force_path_style(true)
                .stalled_stream_protection(StalledStreamProtectionConfig::disabled())
                .build();
            log::debug!("Using R2 endpoint {endpoint}");
            aws_sdk_s3::Client::from_conf(config)
        } else {
            let config = aws_config::defaults(BehaviorVersion::latest()).load().await;
            aws_sdk_s3::Client::new(&config)
        };

        Ok(Self::new(client, bucket, prefix))
    }

    fn key(&self, path: &str) -> String {
        object_key(self.prefix.as_deref(), path)
    }

    /// `GetObject`, optionally limited to an HTTP byte `range`.
    async fn download(
        &self,
        path: &str,
        range: Option<String>,
    ) -> Result<Option<Vec<u8>>, StoreError> {
        let key = self.key(path);
        let output = match self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&key)
            .set_range(range)
            .send()
            .await
        {
            Ok(output) => output,
            Err(err) => {
                if err
                    .as_service_error()
                    .is_some_and(GetObjectError::is_no_such_key)
                {
                    return Ok(None);
                }
                return Err(StoreError::Download {
                    bucket: self.bucket.clone(),
                    key,
                    source: Box::new(err),
                });
            }
        };

        let bytes = output.body.collect().await.map_err(|e| StoreError::Download {
            bucket: self.bucket.clone(),
            key: key.clone(),
            source: Box::new(e),
        })?;
        Ok(Some(bytes.into_bytes().to_vec()))
    }

    /// Removes an object whose upload failed verification so it is not
    /// mistaken for a checkpoint on the next run.
    async fn discard(&self, key: &str) {
        if let Err(e) = self
            .client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            log::warn!(
                "Failed to delete corrupted upload s3://{}/{key}: {}",
                self.bucket,
                aws_sdk_s3::error::DisplayErrorContext(&e)
            );
        }
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    fn describe(&self) -> String {
        format!("s3://{}", object_key(Some(&self.bucket), self.prefix.as_deref().unwrap_or("")))
            .trim_end_matches('/')
            .to_string()
    }

    async fn check_connectivity(&self) -> Result<(), StoreError> {
        self.client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .map_err(|e| StoreError::Unavailable {
                target: self.describe(),
                message: aws_sdk_s3::error::DisplayErrorContext(&e).to_string(),
            })?;
        log::debug!("{} is reachable", self.describe());
        Ok(())
    }

    async fn head(&self, path: &str) -> Result<Option<ObjectMeta>, StoreError> {
        let key = self.key(path);
        let result = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await;

        match result {
            Ok(output) => {
                let size = output.content_length().unwrap_or(0);
                #[allow(clippy::cast_sign_loss)] // S3 content-length is non-negative
                let size = size.max(0) as u64;
                let etag = output.e_tag().map(|t| t.trim_matches('"').to_string());
                Ok(Some(ObjectMeta { size, etag }))
            }
            Err(err) => {
                if err
                    .as_service_error()
                    .is_some_and(HeadObjectError::is_not_found)
                {
                    return Ok(None);
                }
                Err(StoreError::Head {
                    bucket: self.bucket.clone(),
                    key,
                    source: Box::new(err),
                })
            }
        }
    }

    async fn get(&self, path: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.download(path, None).await
    }

    async fn get_prefix(&self, path: &str, max_bytes: u64) -> Result<Option<Vec<u8>>, StoreError> {
        if max_bytes == 0 {
            return Ok(self.head(path).await?.map(|_| Vec::new()));
        }
        self.download(path, Some(format!("bytes=0-{}", max_bytes - 1)))
            .await
    }

    async fn put(
        &self,
        path: &str,
        bytes: &[u8],
        content_type: &str,
    ) -> Result<ObjectMeta, StoreError> {
        let key = self.key(path);
        let expected = md5_hex(bytes);

        let output = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .body(aws_sdk_s3::primitives::ByteStream::from(bytes.to_vec()))
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| StoreError::Upload {
                bucket: self.bucket.clone(),
                key: key.clone(),
                source: Box::new(e),
            })?;

        if let Some(actual) = mismatched_etag(output.e_tag(), &expected) {
            log::warn!("ETag mismatch for s3://{}/{key}, deleting it", self.bucket);
            self.discard(&key).await;
            return Err(StoreError::ChecksumMismatch {
                key,
                expected,
                actual,
            });
        }

        #[allow(clippy::cast_precision_loss)] // display-only KB value
        let kb = bytes.len() as f64 / 1024.0;
        log::debug!("  uploaded s3://{}/{key} ({kb:.1} KB)", self.bucket);

        Ok(ObjectMeta {
            size: bytes.len() as u64,
            etag: Some(expected),
        })
    }
}

/// Single-part `ETag`s are the hex MD5 of the body; multipart ones carry a
/// `-N` suffix and cannot be compared.
fn is_md5_etag(etag: &str) -> bool {
    etag.len() == 32 && etag.chars().all(|c| c.is_ascii_hexdigit())
}

/// The returned `ETag` when it is comparable and differs from `expected`.
fn mismatched_etag(etag: Option<&str>, expected: &str) -> Option<String> {
    let actual = etag?.trim_matches('"');
    (is_md5_etag(actual) && !actual.eq_ignore_ascii_case(expected)).then(|| actual.to_string())
}

fn require_env(name: &str) -> Result<String, StoreError> {
    std::env::var(name).map_err(|_| StoreError::MissingEnv {
        name: name.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_respect_optional_prefix() {
        let path = "trip-data/system=divvy/year=2024/month=11/202411-divvy-tripdata.csv";
        assert_eq!(object_key(None, path), path);
        assert_eq!(object_key(Some(""), path), path);
        assert_eq!(object_key(Some("bronze"), path), format!("bronze/{path}"));
        assert_eq!(object_key(Some("/bronze/"), path), format!("bronze/{path}"));
    }

    #[test]
    fn recognizes_single_part_etags() {
        assert!(is_md5_etag("5d41402abc4b2a76b9719d911017c592"));
        assert!(!is_md5_etag("5d41402abc4b2a76b9719d911017c592-3"));
        assert!(!is_md5_etag("not-an-etag"));
    }

    #[test]
    fn only_comparable_differing_etags_are_mismatches() {
        let expected = md5_hex(b"hello");
        let quoted = format!("\"{expected}\"");
        assert_eq!(mismatched_etag(Some(quoted.as_str()), &expected), None);
        assert_eq!(mismatched_etag(None, &expected), None);
        assert_eq!(
            mismatched_etag(Some("\"5d41402abc4b2a76b9719d911017c592-2\""), &expected),
            None
        );
        assert_eq!(
            mismatched_etag(Some("\"00000000000000000000000000000000\""), &expected),
            Some("00000000000000000000000000000000".to_string())
        );
    }

    #[test]
    fn describes_bucket_and_prefix() {
        let config = aws_sdk_s3::Config::builder()
            .region(Region::new("us-east-1"))
            .build();
        let client = aws_sdk_s3::Client::from_conf(config);

        let store = S3Store::new(client.clone(), "divvy-lake", Some("bronze".to_string()));
        assert_eq!(store.describe(), "s3://divvy-lake/bronze");
        assert_eq!(store.key("a.csv"), "bronze/a.csv");

        let store = S3Store::new(client, "divvy-lake", None);
        assert_eq!(store.describe(), "s3://divvy-lake");
    }
}
