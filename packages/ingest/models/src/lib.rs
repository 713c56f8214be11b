#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Partition keys, canonical storage paths, and run report types for the
//! Bronze ingestion pipeline.
//!
//! Every unit of ingestion work is a [`PartitionKey`]. The key alone decides
//! where its data lives in the object store ([`PartitionKey::canonical_path`]),
//! so the existence checker, the fetchers, and the writer can never disagree
//! about the layout.

pub mod progress;
pub mod report;

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Datelike as _, NaiveDate, Timelike as _, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumIter, EnumString};

/// GBFS endpoints whose snapshots are kept per hour. All other feed
/// endpoints are kept per day.
pub const HOURLY_FEED_SCOPES: &[&str] = &["station_status"];

/// Errors raised while building partition keys or run windows.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PartitionError {
    /// No scopes were configured for the run.
    #[error("No scopes configured for {kind}")]
    EmptyScopes {
        /// Source the run was configured for.
        kind: SourceKind,
    },

    /// A scope name cannot be embedded in a storage path.
    #[error("Invalid scope {scope:?}: {reason}")]
    InvalidScope {
        /// The rejected scope.
        scope: String,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// A `YYYY-MM` value could not be parsed or is out of range.
    #[error("Invalid month {value:?} (expected YYYY-MM)")]
    InvalidMonth {
        /// The rejected value.
        value: String,
    },

    /// The closed month range contains no months.
    #[error("Empty date range: {start} is after {end}")]
    EmptyRange {
        /// Range start.
        start: YearMonth,
        /// Range end.
        end: YearMonth,
    },

    /// The run window does not fit the source (e.g. a month range for the
    /// real-time station feed).
    #[error("{kind} does not accept a {window} window")]
    WindowMismatch {
        /// Source the run was configured for.
        kind: SourceKind,
        /// Kind of window that was supplied.
        window: &'static str,
    },
}

/// An external data source feeding the Bronze layer.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
    EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SourceKind {
    /// Monthly Divvy trip archives (`YYYYMM-divvy-tripdata.zip`).
    TripArchive,
    /// Open-Meteo historical weather API.
    Weather,
    /// Real-time GBFS station feed.
    StationFeed,
}

impl SourceKind {
    /// Top-level directory of this source in the object store.
    #[must_use]
    pub const fn storage_prefix(self) -> &'static str {
        match self {
            Self::TripArchive => "trip-data",
            Self::Weather => "weather-data",
            Self::StationFeed => "gbfs-data",
        }
    }

    /// Name of the path dimension the scope is stored under.
    #[must_use]
    pub const fn scope_dimension(self) -> &'static str {
        match self {
            Self::TripArchive => "system",
            Self::Weather => "location",
            Self::StationFeed => "endpoint",
        }
    }

    /// Format of the objects this source produces.
    #[must_use]
    pub const fn format(self) -> ContentFormat {
        match self {
            Self::TripArchive | Self::Weather => ContentFormat::DelimitedText,
            Self::StationFeed => ContentFormat::Json,
        }
    }

    /// Whether this source is keyed by fetch time instead of calendar month.
    #[must_use]
    pub const fn is_snapshot(self) -> bool {
        matches!(self, Self::StationFeed)
    }
}

/// Format of a stored partition object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentFormat {
    /// Comma-delimited text with a header row.
    DelimitedText,
    /// A single JSON document.
    Json,
}

impl ContentFormat {
    /// MIME type used when uploading.
    #[must_use]
    pub const fn content_type(self) -> &'static str {
        match self {
            Self::DelimitedText => "text/csv",
            Self::Json => "application/json",
        }
    }
}

/// Checks that a scope is safe to embed in storage paths and URLs.
///
/// # Errors
///
/// Returns [`PartitionError::InvalidScope`] for empty scopes or scopes
/// containing anything other than lowercase ASCII letters, digits, `_`, `-`.
pub fn validate_scope(scope: &str) -> Result<(), PartitionError> {
    if scope.is_empty() {
        return Err(PartitionError::InvalidScope {
            scope: scope.to_string(),
            reason: "scope is empty",
        });
    }
    if !scope
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
    {
        return Err(PartitionError::InvalidScope {
            scope: scope.to_string(),
            reason: "only lowercase letters, digits, '_' and '-' are allowed",
        });
    }
    Ok(())
}

// ── Calendar months ──────────────────────────────────────────────────────

/// A calendar month (`YYYY-MM`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct YearMonth {
    year: i32,
    month: u32,
}

impl YearMonth {
    /// Creates a month, validating `month` is in `1..=12`.
    ///
    /// # Errors
    ///
    /// Returns [`PartitionError::InvalidMonth`] if the month is out of range.
    pub fn new(year: i32, month: u32) -> Result<Self, PartitionError> {
        if !(1..=12).contains(&month) || !(1..=9999).contains(&year) {
            return Err(PartitionError::InvalidMonth {
                value: format!("{year:04}-{month:02}"),
            });
        }
        Ok(Self { year, month })
    }

    #[must_use]
    pub const fn year(self) -> i32 {
        self.year
    }

    #[must_use]
    pub const fn month(self) -> u32 {
        self.month
    }

    /// The following calendar month.
    #[must_use]
    pub const fn next(self) -> Self {
        if self.month == 12 {
            Self {
                year: self.year + 1,
                month: 1,
            }
        } else {
            Self {
                year: self.year,
                month: self.month + 1,
            }
        }
    }

    /// First day of the month.
    #[must_use]
    pub fn first_day(self) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(self.year, self.month, 1)
    }

    /// Last day of the month (handles leap years).
    #[must_use]
    pub fn last_day(self) -> Option<NaiveDate> {
        self.next().first_day().and_then(|d| d.pred_opt())
    }
}

impl fmt::Display for YearMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for YearMonth {
    type Err = PartitionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || PartitionError::InvalidMonth {
            value: s.to_string(),
        };
        let (year, month) = s.trim().split_once('-').ok_or_else(invalid)?;
        if year.len() != 4 || month.len() != 2 {
            return Err(invalid());
        }
        let year = year.parse::<i32>().map_err(|_| invalid())?;
        let month = month.parse::<u32>().map_err(|_| invalid())?;
        Self::new(year, month).map_err(|_| invalid())
    }
}

impl TryFrom<String> for YearMonth {
    type Error = PartitionError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<YearMonth> for String {
    fn from(value: YearMonth) -> Self {
        value.to_string()
    }
}

/// A closed, non-empty range of calendar months.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MonthRange {
    start: YearMonth,
    end: YearMonth,
}

impl MonthRange {
    /// Creates a range covering `start..=end`.
    ///
    /// # Errors
    ///
    /// Returns [`PartitionError::EmptyRange`] if `end` is before `start`.
    pub fn new(start: YearMonth, end: YearMonth) -> Result<Self, PartitionError> {
        if end < start {
            return Err(PartitionError::EmptyRange { start, end });
        }
        Ok(Self { start, end })
    }

    #[must_use]
    pub const fn start(&self) -> YearMonth {
        self.start
    }

    #[must_use]
    pub const fn end(&self) -> YearMonth {
        self.end
    }

    /// All months in the range, ascending.
    #[must_use]
    pub fn months(&self) -> Vec<YearMonth> {
        let mut months = Vec::new();
        let mut current = self.start;
        while current <= self.end {
            months.push(current);
            current = current.next();
        }
        months
    }
}

impl fmt::Display for MonthRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

/// The time dimension of one ingestion run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunWindow {
    /// Calendar months (trip archives, weather).
    Monthly(MonthRange),
    /// A single point-in-time snapshot (station feed).
    Snapshot(DateTime<Utc>),
}

impl RunWindow {
    const fn label(&self) -> &'static str {
        match self {
            Self::Monthly(_) => "monthly",
            Self::Snapshot(_) => "snapshot",
        }
    }
}

impl fmt::Display for RunWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Monthly(range) => write!(f, "{range}"),
            Self::Snapshot(at) => write!(f, "snapshot@{}", at.format("%Y-%m-%dT%H:%M:%SZ")),
        }
    }
}

/// Granularity of a feed snapshot partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotWindow {
    /// One object per endpoint per hour.
    Hourly,
    /// One object per endpoint per day.
    Daily,
}

impl SnapshotWindow {
    /// Window used for a GBFS endpoint.
    #[must_use]
    pub fn for_scope(scope: &str) -> Self {
        if HOURLY_FEED_SCOPES.contains(&scope) {
            Self::Hourly
        } else {
            Self::Daily
        }
    }
}

// ── Partition keys ───────────────────────────────────────────────────────

/// Identifies one unit of ingestion work and, through
/// [`canonical_path`](Self::canonical_path), exactly one storage object.
///
/// Keys order by `(source, scope, year, month, day, hour)`, which is the
/// dispatch order of a run.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct PartitionKey {
    source: SourceKind,
    scope: String,
    year: i32,
    month: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    day: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    hour: Option<u32>,
}

impl PartitionKey {
    /// Key for one calendar month of a monthly source.
    ///
    /// # Errors
    ///
    /// Returns [`PartitionError`] if the scope is invalid or the source is
    /// snapshot-keyed.
    pub fn monthly(
        source: SourceKind,
        scope: &str,
        month: YearMonth,
    ) -> Result<Self, PartitionError> {
        if source.is_snapshot() {
            return Err(PartitionError::WindowMismatch {
                kind: source,
                window: "monthly",
            });
        }
        validate_scope(scope)?;
        Ok(Self {
            source,
            scope: scope.to_string(),
            year: month.year(),
            month: month.month(),
            day: None,
            hour: None,
        })
    }

    /// Key for a feed snapshot taken at `at`, truncated to `window`.
    ///
    /// # Errors
    ///
    /// Returns [`PartitionError`] if the scope is invalid or the source is
    /// not snapshot-keyed.
    pub fn snapshot(
        source: SourceKind,
        scope: &str,
        at: DateTime<Utc>,
        window: SnapshotWindow,
    ) -> Result<Self, PartitionError> {
        if !source.is_snapshot() {
            return Err(PartitionError::WindowMismatch {
                kind: source,
                window: "snapshot",
            });
        }
        validate_scope(scope)?;
        Ok(Self {
            source,
            scope: scope.to_string(),
            year: at.year(),
            month: at.month(),
            day: Some(at.day()),
            hour: match window {
                SnapshotWindow::Hourly => Some(at.hour()),
                SnapshotWindow::Daily => None,
            },
        })
    }

    #[must_use]
    pub const fn source(&self) -> SourceKind {
        self.source
    }

    #[must_use]
    pub fn scope(&self) -> &str {
        &self.scope
    }

    #[must_use]
    pub const fn year(&self) -> i32 {
        self.year
    }

    #[must_use]
    pub const fn month(&self) -> u32 {
        self.month
    }

    #[must_use]
    pub const fn day(&self) -> Option<u32> {
        self.day
    }

    #[must_use]
    pub const fn hour(&self) -> Option<u32> {
        self.hour
    }

    /// The calendar month this key falls in.
    #[must_use]
    pub const fn year_month(&self) -> YearMonth {
        YearMonth {
            year: self.year,
            month: self.month,
        }
    }

    /// Start of the window this key covers, in UTC.
    #[must_use]
    pub fn window_start(&self) -> Option<DateTime<Utc>> {
        NaiveDate::from_ymd_opt(self.year, self.month, self.day.unwrap_or(1))
            .and_then(|d| d.and_hms_opt(self.hour.unwrap_or(0), 0, 0))
            .map(|dt| dt.and_utc())
    }

    /// Object file name (last path segment).
    #[must_use]
    pub fn file_name(&self) -> String {
        let (y, m, scope) = (self.year, self.month, &self.scope);
        match self.source {
            SourceKind::TripArchive => format!("{y:04}{m:02}-{scope}-tripdata.csv"),
            SourceKind::Weather => format!("weather_data_{scope}_{y:04}_{m:02}.csv"),
            SourceKind::StationFeed => match (self.day, self.hour) {
                (Some(d), Some(h)) => format!("{scope}_{y:04}-{m:02}-{d:02}_{h:02}.json"),
                (Some(d), None) => format!("{scope}_{y:04}-{m:02}-{d:02}.json"),
                _ => format!("{scope}_{y:04}-{m:02}.json"),
            },
        }
    }

    /// The single storage location of this partition:
    /// `{prefix}/{dimension}={scope}/year=YYYY/month=MM[/day=DD[/hour=HH]]/{file}`.
    #[must_use]
    pub fn canonical_path(&self) -> String {
        let mut segments = vec![
            self.source.storage_prefix().to_string(),
            format!("{}={}", self.source.scope_dimension(), self.scope),
            format!("year={:04}", self.year),
            format!("month={:02}", self.month),
        ];
        if let Some(day) = self.day {
            segments.push(format!("day={day:02}"));
        }
        if let Some(hour) = self.hour {
            segments.push(format!("hour={hour:02}"));
        }
        segments.push(self.file_name());
        segments.join("/")
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{:04}-{:02}",
            self.source, self.scope, self.year, self.month
        )?;
        if let Some(day) = self.day {
            write!(f, "-{day:02}")?;
        }
        if let Some(hour) = self.hour {
            write!(f, "T{hour:02}")?;
        }
        Ok(())
    }
}

/// Enumerates the full partition space of a run: every scope crossed with
/// every time unit of the window.
///
/// Duplicate scopes collapse into a single key, so the returned set never
/// assigns the same partition twice. Iteration order is the dispatch order.
///
/// # Errors
///
/// Returns [`PartitionError`] if `scopes` is empty, a scope is invalid, or
/// the window does not fit the source.
pub fn enumerate_partitions(
    source: SourceKind,
    scopes: &[String],
    window: &RunWindow,
) -> Result<BTreeSet<PartitionKey>, PartitionError> {
    if scopes.is_empty() {
        return Err(PartitionError::EmptyScopes { kind: source });
    }

    let mut keys = BTreeSet::new();
    match window {
        RunWindow::Monthly(range) => {
            if source.is_snapshot() {
                return Err(PartitionError::WindowMismatch {
                    kind: source,
                    window: window.label(),
                });
            }
            let months = range.months();
            for scope in scopes {
                for month in &months {
                    keys.insert(PartitionKey::monthly(source, scope, *month)?);
                }
            }
        }
        RunWindow::Snapshot(at) => {
            if !source.is_snapshot() {
                return Err(PartitionError::WindowMismatch {
                    kind: source,
                    window: window.label(),
                });
            }
            for scope in scopes {
                keys.insert(PartitionKey::snapshot(
                    source,
                    scope,
                    *at,
                    SnapshotWindow::for_scope(scope),
                )?);
            }
        }
    }

    Ok(keys)
}

// ── Stored objects and fetch attempts ────────────────────────────────────

/// A fully written partition object.
///
/// Only created after the object is durably committed under `path`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageObjectDescriptor {
    /// Canonical path of the object (relative to the store root).
    pub path: String,
    /// Content format.
    pub format: ContentFormat,
    /// Size in bytes.
    pub size_bytes: u64,
    /// When the write was committed.
    pub written_at: DateTime<Utc>,
    /// MD5 hex digest of the payload, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

/// Outcome of a single fetch attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Success,
    TransientFailure,
    PermanentFailure,
    Timeout,
}

/// One call to an external source made by the retry policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchAttempt {
    /// 1-based attempt number.
    pub attempt: u32,
    /// How the attempt ended.
    pub outcome: AttemptOutcome,
    /// Error detail for failed attempts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// Wall time spent in the attempt (excluding backoff).
    pub elapsed: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone as _;

    fn ym(s: &str) -> YearMonth {
        s.parse().unwrap()
    }

    fn scopes(names: &[&str]) -> Vec<String> {
        names.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn parses_and_formats_year_month() {
        let month = ym("2023-02");
        assert_eq!(month.year(), 2023);
        assert_eq!(month.month(), 2);
        assert_eq!(month.to_string(), "2023-02");
        assert_eq!(
            month.last_day(),
            Some(NaiveDate::from_ymd_opt(2023, 2, 28).unwrap())
        );
        assert_eq!(
            ym("2024-02").last_day(),
            Some(NaiveDate::from_ymd_opt(2024, 2, 29).unwrap())
        );
        assert_eq!(
            ym("2024-12").last_day(),
            Some(NaiveDate::from_ymd_opt(2024, 12, 31).unwrap())
        );
    }

    #[test]
    fn rejects_malformed_months() {
        for bad in ["2023-13", "2023-00", "23-01", "2023/01", "2023-1", ""] {
            assert!(bad.parse::<YearMonth>().is_err(), "{bad:?} should not parse");
        }
    }

    #[test]
    fn month_range_spans_year_boundary() {
        let range = MonthRange::new(ym("2023-11"), ym("2024-02")).unwrap();
        let months: Vec<String> = range.months().iter().map(ToString::to_string).collect();
        assert_eq!(months, vec!["2023-11", "2023-12", "2024-01", "2024-02"]);
    }

    #[test]
    fn inverted_range_is_rejected() {
        let err = MonthRange::new(ym("2024-01"), ym("2023-12")).unwrap_err();
        assert!(matches!(err, PartitionError::EmptyRange { .. }));
    }

    #[test]
    fn weather_path_layout() {
        let key = PartitionKey::monthly(SourceKind::Weather, "chicago", ym("2023-01")).unwrap();
        assert_eq!(
            key.canonical_path(),
            "weather-data/location=chicago/year=2023/month=01/weather_data_chicago_2023_01.csv"
        );
    }

    #[test]
    fn trip_archive_path_layout() {
        let key =
            PartitionKey::monthly(SourceKind::TripArchive, "divvy", ym("2024-11")).unwrap();
        assert_eq!(
            key.canonical_path(),
            "trip-data/system=divvy/year=2024/month=11/202411-divvy-tripdata.csv"
        );
    }

    #[test]
    fn station_feed_paths_follow_snapshot_window() {
        let at = Utc.with_ymd_and_hms(2025, 7, 27, 14, 37, 5).unwrap();

        let status =
            PartitionKey::snapshot(SourceKind::StationFeed, "station_status", at, SnapshotWindow::Hourly)
                .unwrap();
        assert_eq!(
            status.canonical_path(),
            "gbfs-data/endpoint=station_status/year=2025/month=07/day=27/hour=14/station_status_2025-07-27_14.json"
        );

        let info = PartitionKey::snapshot(
            SourceKind::StationFeed,
            "station_information",
            at,
            SnapshotWindow::Daily,
        )
        .unwrap();
        assert_eq!(
            info.canonical_path(),
            "gbfs-data/endpoint=station_information/year=2025/month=07/day=27/station_information_2025-07-27.json"
        );
    }

    #[test]
    fn snapshots_within_one_window_share_a_key() {
        let early = Utc.with_ymd_and_hms(2025, 7, 27, 14, 0, 1).unwrap();
        let late = Utc.with_ymd_and_hms(2025, 7, 27, 14, 59, 59).unwrap();
        let a = PartitionKey::snapshot(SourceKind::StationFeed, "station_status", early, SnapshotWindow::Hourly)
            .unwrap();
        let b = PartitionKey::snapshot(SourceKind::StationFeed, "station_status", late, SnapshotWindow::Hourly)
            .unwrap();
        assert_eq!(a, b);
        assert_eq!(a.canonical_path(), b.canonical_path());
    }

    #[test]
    fn enumeration_is_scopes_times_months() {
        let range = MonthRange::new(ym("2023-01"), ym("2024-12")).unwrap();
        let keys = enumerate_partitions(
            SourceKind::Weather,
            &scopes(&["chicago", "evanston"]),
            &RunWindow::Monthly(range),
        )
        .unwrap();
        assert_eq!(keys.len(), 2 * 24);

        let paths: BTreeSet<String> = keys.iter().map(PartitionKey::canonical_path).collect();
        assert_eq!(paths.len(), keys.len(), "every key maps to a distinct path");
    }

    #[test]
    fn enumeration_deduplicates_scopes_and_orders_keys() {
        let range = MonthRange::new(ym("2023-01"), ym("2023-03")).unwrap();
        let keys: Vec<PartitionKey> = enumerate_partitions(
            SourceKind::Weather,
            &scopes(&["evanston", "chicago", "evanston"]),
            &RunWindow::Monthly(range),
        )
        .unwrap()
        .into_iter()
        .collect();

        assert_eq!(keys.len(), 6);
        assert_eq!(keys[0].scope(), "chicago");
        assert_eq!(keys[0].month(), 1);
        assert_eq!(keys[2].month(), 3);
        assert_eq!(keys[3].scope(), "evanston");
    }

    #[test]
    fn enumeration_rejects_empty_scopes_and_mismatched_windows() {
        let range = MonthRange::new(ym("2023-01"), ym("2023-01")).unwrap();
        assert!(matches!(
            enumerate_partitions(SourceKind::Weather, &[], &RunWindow::Monthly(range)),
            Err(PartitionError::EmptyScopes { .. })
        ));
        assert!(matches!(
            enumerate_partitions(
                SourceKind::StationFeed,
                &scopes(&["station_status"]),
                &RunWindow::Monthly(range)
            ),
            Err(PartitionError::WindowMismatch { .. })
        ));
        assert!(matches!(
            enumerate_partitions(
                SourceKind::Weather,
                &scopes(&["chicago"]),
                &RunWindow::Snapshot(Utc::now())
            ),
            Err(PartitionError::WindowMismatch { .. })
        ));
    }

    #[test]
    fn rejects_scopes_unsafe_for_paths() {
        for bad in ["", "Chicago", "chi/cago", "a b", "../x"] {
            assert!(validate_scope(bad).is_err(), "{bad:?} should be rejected");
        }
        assert!(validate_scope("station_status").is_ok());
        assert!(validate_scope("divvy-2").is_ok());
    }

    #[test]
    fn source_kind_round_trips_through_strings() {
        assert_eq!("trip_archive".parse::<SourceKind>().unwrap(), SourceKind::TripArchive);
        assert_eq!(SourceKind::StationFeed.to_string(), "station_feed");
        assert_eq!(
            serde_json::to_string(&SourceKind::Weather).unwrap(),
            "\"weather\""
        );
    }
}
