//! Real-time GBFS station feed.
//!
//! Each endpoint document is wrapped in an envelope that records when it
//! was fetched and how many records it holds, then stored as one JSON
//! object per snapshot window.

use async_trait::async_trait;
use chrono::{DateTime, Timelike as _, Utc};
use divvy_lake_ingest_models::{ContentFormat, PartitionKey, SourceKind};
use serde::Serialize;
use serde_json::Value;

use crate::{FetchError, RawPayload, SourceFetcher, http};

pub const DEFAULT_BASE_URL: &str = "https://gbfs.lyft.com/gbfs/2.3/chi/en";

/// Endpoints the fetcher knows how to envelope.
pub const ENDPOINTS: &[&str] = &["station_information", "station_status", "system_information"];

const DEFAULT_TTL: i64 = 60;
const DEFAULT_VERSION: &str = "2.3";

/// Stored form of one endpoint snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeedEnvelope {
    pub endpoint_name: String,
    pub fetch_timestamp: String,
    pub fetch_date: String,
    pub fetch_hour: u32,
    /// The feed's `last_updated`, or the fetch time when absent.
    pub data_timestamp: Value,
    pub ttl: Value,
    pub version: Value,
    pub record_count: u64,
    pub raw_data: Value,
}

/// Fetches GBFS endpoint snapshots.
pub struct StationFeedFetcher {
    client: reqwest::Client,
    base_url: String,
}

impl StationFeedFetcher {
    #[must_use]
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    #[must_use]
    pub fn endpoint_url(&self, endpoint: &str) -> String {
        format!("{}/{endpoint}.json", self.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl SourceFetcher for StationFeedFetcher {
    fn kind(&self) -> SourceKind {
        SourceKind::StationFeed
    }

    async fn fetch(&self, key: &PartitionKey) -> Result<RawPayload, FetchError> {
        let endpoint = key.scope();
        if !ENDPOINTS.contains(&endpoint) {
            return Err(FetchError::permanent(format!(
                "unknown GBFS endpoint {endpoint:?}"
            )));
        }

        let url = self.endpoint_url(endpoint);
        log::debug!("[{key}] GET {url}");
        let document = http::send_json(self.client.get(&url)).await?;

        let envelope = build_envelope(endpoint, document, Utc::now())?;
        let record_count = envelope.record_count;
        let bytes = serde_json::to_vec(&envelope)
            .map_err(|e| FetchError::validation(format!("failed to encode envelope: {e}")))?;

        Ok(RawPayload {
            bytes,
            format: ContentFormat::Json,
            record_count,
        })
    }
}

/// Wraps a GBFS document in a [`FeedEnvelope`].
///
/// # Errors
///
/// Returns [`FetchError::Validation`] if the document has no `data` member.
pub fn build_envelope(
    endpoint: &str,
    document: Value,
    fetched_at: DateTime<Utc>,
) -> Result<FeedEnvelope, FetchError> {
    let Some(data) = document.get("data") else {
        return Err(FetchError::validation(format!(
            "GBFS response for {endpoint} has no data member"
        )));
    };

    let record_count = match data.get("stations").and_then(Value::as_array) {
        Some(stations) if endpoint != "system_information" => stations.len() as u64,
        _ => 1,
    };

    Ok(FeedEnvelope {
        endpoint_name: endpoint.to_string(),
        fetch_timestamp: fetched_at.to_rfc3339(),
        fetch_date: fetched_at.format("%Y-%m-%d").to_string(),
        fetch_hour: fetched_at.hour(),
        data_timestamp: document
            .get("last_updated")
            .cloned()
            .unwrap_or_else(|| Value::from(fetched_at.timestamp())),
        ttl: document
            .get("ttl")
            .cloned()
            .unwrap_or_else(|| Value::from(DEFAULT_TTL)),
        version: document
            .get("version")
            .cloned()
            .unwrap_or_else(|| Value::from(DEFAULT_VERSION)),
        record_count,
        raw_data: document,
    })
}
