#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Checkpointed ingestion of Divvy trip archives, historical weather, and
//! GBFS station feeds into an object store.
//!
//! A run enumerates every partition of the requested window, skips the ones
//! already stored, and fetches the rest with bounded concurrency. Each
//! partition is written atomically to its canonical path, so an interrupted
//! run picks up where it stopped the next time it is started.

pub mod config;
pub mod coordinator;

use std::sync::Arc;

use divvy_lake_ingest_models::SourceKind;
use divvy_lake_ingest_models::report::ReportError;
use divvy_lake_source::SourceFetcher;
use divvy_lake_source::station_feed::StationFeedFetcher;
use divvy_lake_source::trip_archive::TripArchiveFetcher;
use divvy_lake_source::weather::WeatherFetcher;
use divvy_lake_store::local::LocalStore;
use divvy_lake_store::s3::S3Store;
use divvy_lake_store::{ObjectStore, StoreError};
use strum::IntoEnumIterator as _;

use crate::config::{ConfigError, IngestConfig, StoreConfig};

/// Errors that abort a run before or while it executes.
///
/// Per-partition problems never surface here; they end up in the run
/// summary.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// The run request or configuration is unusable.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The store failed its preflight check; nothing was attempted.
    #[error("Object store {target} is unavailable: {source}")]
    StoreUnavailable {
        /// Store description.
        target: String,
        /// Underlying error.
        source: StoreError,
    },

    /// A store operation outside any single partition failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The run ledger was driven out of order.
    #[error(transparent)]
    Report(#[from] ReportError),
}

impl From<ConfigError> for IngestError {
    fn from(e: ConfigError) -> Self {
        Self::Configuration(e.to_string())
    }
}

/// Builds one fetcher per source kind from the configuration.
///
/// # Errors
///
/// Returns [`IngestError::Configuration`] if the location registry is
/// invalid.
pub fn build_fetchers(
    config: &IngestConfig,
    client: &reqwest::Client,
) -> Result<Vec<Arc<dyn SourceFetcher>>, IngestError> {
    let locations = config.locations()?;

    Ok(SourceKind::iter()
        .map(|kind| -> Arc<dyn SourceFetcher> {
            let base_url = config.base_url(kind);
            match kind {
                SourceKind::TripArchive => {
                    Arc::new(TripArchiveFetcher::new(client.clone(), base_url))
                }
                SourceKind::Weather => Arc::new(WeatherFetcher::new(
                    client.clone(),
                    base_url,
                    config.weather_timezone(),
                    locations.clone(),
                )),
                SourceKind::StationFeed => {
                    Arc::new(StationFeedFetcher::new(client.clone(), base_url))
                }
            }
        })
        .collect())
}

/// Opens the configured object store.
///
/// # Errors
///
/// Returns [`StoreError`] if the S3 client cannot be configured.
pub async fn open_store(config: &StoreConfig) -> Result<Arc<dyn ObjectStore>, StoreError> {
    Ok(match config {
        StoreConfig::S3 { bucket, prefix } => {
            Arc::new(S3Store::from_env(bucket.clone(), prefix.clone()).await?)
        }
        StoreConfig::Local { root } => Arc::new(LocalStore::new(root.clone())),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_a_fetcher_for_every_source() {
        let client = reqwest::Client::new();
        let fetchers = build_fetchers(&IngestConfig::default(), &client).unwrap();
        let kinds: Vec<SourceKind> = fetchers.iter().map(|f| f.kind()).collect();
        assert_eq!(
            kinds,
            vec![
                SourceKind::TripArchive,
                SourceKind::Weather,
                SourceKind::StationFeed
            ]
        );
    }

    #[tokio::test]
    async fn opens_local_store() {
        let tmp = tempfile::tempdir().unwrap();
        let store = open_store(&StoreConfig::Local {
            root: tmp.path().to_path_buf(),
        })
        .await
        .unwrap();
        assert!(store.describe().starts_with("file://"));
        store.check_connectivity().await.unwrap();
    }
}
