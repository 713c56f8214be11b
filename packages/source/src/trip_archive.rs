//! Monthly Divvy trip archives.
//!
//! Each month is published as `{YYYY}{MM}-divvy-tripdata.zip` containing a
//! single CSV. The archive is downloaded, the trip CSV is pulled out in
//! memory, and its header and rows are checked before it is handed back for
//! storage as-is.

use std::io::{Cursor, Read as _};

use async_trait::async_trait;
use divvy_lake_ingest_models::{ContentFormat, PartitionKey, SourceKind};

use crate::{FetchError, RawPayload, SourceFetcher, http};

pub const DEFAULT_BASE_URL: &str = "https://divvy-tripdata.s3.amazonaws.com";

/// Columns every trip CSV must carry.
pub const EXPECTED_COLUMNS: &[&str] = &[
    "ride_id",
    "rideable_type",
    "started_at",
    "ended_at",
    "start_station_name",
    "start_station_id",
    "end_station_name",
    "end_station_id",
    "start_lat",
    "start_lng",
    "end_lat",
    "end_lng",
    "member_casual",
];

/// Fetches monthly trip archives for a bike-share system.
pub struct TripArchiveFetcher {
    client: reqwest::Client,
    base_url: String,
}

impl TripArchiveFetcher {
    #[must_use]
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    /// Download URL of the archive for `key`.
    #[must_use]
    pub fn archive_url(&self, key: &PartitionKey) -> String {
        format!(
            "{}/{:04}{:02}-{}-tripdata.zip",
            self.base_url.trim_end_matches('/'),
            key.year(),
            key.month(),
            key.scope()
        )
    }
}

#[async_trait]
impl SourceFetcher for TripArchiveFetcher {
    fn kind(&self) -> SourceKind {
        SourceKind::TripArchive
    }

    async fn fetch(&self, key: &PartitionKey) -> Result<RawPayload, FetchError> {
        let url = self.archive_url(key);
        log::debug!("[{key}] GET {url}");
        let archive = http::send_bytes(self.client.get(&url)).await?;
        log::debug!("[{key}] downloaded {} byte archive", archive.len());

        tokio::task::spawn_blocking(move || {
            let csv = extract_trip_csv(&archive)?;
            let record_count = validate_trip_csv(&csv)?;
            Ok(RawPayload {
                bytes: csv,
                format: ContentFormat::DelimitedText,
                record_count,
            })
        })
        .await
        .map_err(|e| FetchError::permanent(format!("archive processing task failed: {e}")))?
    }
}

fn is_trip_entry(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    lower.ends_with(".csv") && lower.contains("tripdata") && !lower.starts_with("__macosx/")
}

/// Pulls the trip CSV out of a monthly archive.
///
/// # Errors
///
/// Returns [`FetchError::Validation`] if the archive is corrupt or holds no
/// trip CSV.
pub fn extract_trip_csv(archive: &[u8]) -> Result<Vec<u8>, FetchError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(archive))
        .map_err(|e| FetchError::validation(format!("corrupt zip archive: {e}")))?;

    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|e| FetchError::validation(format!("corrupt zip entry {i}: {e}")))?;
        if !entry.is_file() || !is_trip_entry(entry.name()) {
            continue;
        }

        log::debug!("extracting {} ({} bytes)", entry.name(), entry.size());
        let mut csv = Vec::with_capacity(usize::try_from(entry.size()).unwrap_or(0));
        entry
            .read_to_end(&mut csv)
            .map_err(|e| FetchError::validation(format!("corrupt zip entry {i}: {e}")))?;
        return Ok(csv);
    }

    Err(FetchError::validation("archive contains no trip CSV"))
}

/// Checks the trip CSV header and counts its data rows.
///
/// # Errors
///
/// Returns [`FetchError::Validation`] if expected columns are missing, a
/// row cannot be parsed, or there are no data rows.
pub fn validate_trip_csv(csv: &[u8]) -> Result<u64, FetchError> {
    let mut reader = csv::ReaderBuilder::new().flexible(true).from_reader(csv);

    let headers = reader
        .headers()
        .map_err(|e| FetchError::validation(format!("unreadable CSV header: {e}")))?;
    let columns: Vec<&str> = headers
        .iter()
        .map(|h| h.trim().trim_start_matches('\u{feff}'))
        .collect();
    let missing: Vec<&str> = EXPECTED_COLUMNS
        .iter()
        .copied()
        .filter(|c| !columns.contains(c))
        .collect();
    if !missing.is_empty() {
        return Err(FetchError::validation(format!(
            "trip CSV is missing columns: {}",
            missing.join(", ")
        )));
    }

    let mut count = 0u64;
    for record in reader.records() {
        record.map_err(|e| FetchError::validation(format!("malformed CSV row: {e}")))?;
        count += 1;
    }

    if count == 0 {
        return Err(FetchError::validation("trip CSV has no data rows"));
    }
    Ok(count)
}
