//! Ingestion configuration.
//!
//! Loaded once from an optional TOML file, then adjusted by environment
//! variables, then by CLI flags. Every section has defaults, so an empty
//! file (or no file) gives a working local setup.
//!
//! # Environment Variables
//!
//! | Variable | Effect |
//! |---|---|
//! | `DIVVY_LAKE_BUCKET` | Store partitions in this S3/R2 bucket |
//! | `DIVVY_LAKE_PREFIX` | Key prefix inside the bucket |
//! | `DIVVY_LAKE_LOCAL_ROOT` | Store partitions under this directory |
//! | `DIVVY_LAKE_CONCURRENCY` | Number of partitions processed at once (1-16) |

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use divvy_lake_ingest_models::{MonthRange, RunWindow, SourceKind, YearMonth};
use divvy_lake_source::http::HttpSettings;
use divvy_lake_source::locations::{Location, LocationRegistry};
use divvy_lake_source::retry::RetryPolicy;
use divvy_lake_source::{station_feed, trip_archive, weather};
use serde::Deserialize;

use crate::coordinator::{CoordinatorOptions, MAX_CONCURRENCY, RunConfig};

/// Errors raised while loading or applying configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("Failed to read config {path}: {source}")]
    Read {
        /// Config file path.
        path: String,
        /// Underlying error.
        source: std::io::Error,
    },

    /// The config file is not valid TOML for [`IngestConfig`].
    #[error("Failed to parse config {path}: {source}")]
    Parse {
        /// Config file path.
        path: String,
        /// Underlying error.
        source: toml::de::Error,
    },

    /// An environment override has an unusable value.
    #[error("Invalid value {value:?} for {name}: {reason}")]
    InvalidEnv {
        /// Variable name.
        name: &'static str,
        /// Rejected value.
        value: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The configuration is inconsistent.
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IngestConfig {
    pub store: StoreConfig,
    pub http: HttpConfig,
    pub retry: RetryConfig,
    pub run: RunSection,
    pub sources: SourcesConfig,
    /// Extra weather locations, merged over the built-in registry.
    pub locations: Vec<Location>,
}

/// Where partitions are stored.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", deny_unknown_fields)]
pub enum StoreConfig {
    /// An S3 bucket (or R2 when `CLOUDFLARE_ACCOUNT_ID` is set).
    S3 {
        bucket: String,
        #[serde(default)]
        prefix: Option<String>,
    },
    /// A local directory.
    Local { root: PathBuf },
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::Local {
            root: PathBuf::from("data/lake"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HttpConfig {
    pub user_agent: Option<String>,
    pub connect_timeout_secs: u64,
    pub request_timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        let defaults = HttpSettings::default();
        Self {
            user_agent: None,
            connect_timeout_secs: defaults.connect_timeout.as_secs(),
            request_timeout_secs: defaults.request_timeout.as_secs(),
        }
    }
}

impl HttpConfig {
    #[must_use]
    pub fn settings(&self) -> HttpSettings {
        let defaults = HttpSettings::default();
        HttpSettings {
            user_agent: self.user_agent.clone().unwrap_or(defaults.user_agent),
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_secs: f64,
    pub multiplier: f64,
    pub max_delay_secs: f64,
    pub jitter: bool,
    pub timeout_secs: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        let defaults = RetryPolicy::default();
        Self {
            max_attempts: defaults.max_attempts,
            base_delay_secs: defaults.base_delay.as_secs_f64(),
            multiplier: defaults.multiplier,
            max_delay_secs: defaults.max_delay.as_secs_f64(),
            jitter: defaults.jitter,
            timeout_secs: defaults.timeout.as_secs_f64(),
        }
    }
}

impl RetryConfig {
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for negative or non-finite values.
    pub fn policy(&self) -> Result<RetryPolicy, ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(ConfigError::Invalid(
                "retry.multiplier must be at least 1.0".to_string(),
            ));
        }
        Ok(RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: seconds("retry.base_delay_secs", self.base_delay_secs)?,
            multiplier: self.multiplier,
            max_delay: seconds("retry.max_delay_secs", self.max_delay_secs)?,
            jitter: self.jitter,
            timeout: seconds("retry.timeout_secs", self.timeout_secs)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunSection {
    pub concurrency: usize,
    /// Consecutive store failures that stop a run from starting new work.
    pub store_failure_threshold: u32,
    /// Pause after every network fetch.
    pub request_delay_secs: f64,
    /// Download stored objects to verify their structure when checking
    /// existence.
    pub validate_content: bool,
}

impl Default for RunSection {
    fn default() -> Self {
        Self {
            concurrency: 2,
            store_failure_threshold: 3,
            request_delay_secs: 0.0,
            validate_content: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SourcesConfig {
    pub trip_archive: SourceSection,
    pub weather: SourceSection,
    pub station_feed: SourceSection,
}

impl SourcesConfig {
    #[must_use]
    pub const fn section(&self, kind: SourceKind) -> &SourceSection {
        match kind {
            SourceKind::TripArchive => &self.trip_archive,
            SourceKind::Weather => &self.weather,
            SourceKind::StationFeed => &self.station_feed,
        }
    }
}

/// Per-source settings.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SourceSection {
    pub base_url: Option<String>,
    /// Scopes processed when none are given on the command line.
    pub scopes: Vec<String>,
    /// Default first month of monthly runs.
    pub start: Option<YearMonth>,
    /// Default last month of monthly runs.
    pub end: Option<YearMonth>,
    /// Timezone for the weather archive.
    pub timezone: Option<String>,
    /// Overrides `run.request_delay_secs` for this source.
    pub request_delay_secs: Option<f64>,
}

fn seconds(name: &str, value: f64) -> Result<Duration, ConfigError> {
    Duration::try_from_secs_f64(value)
        .map_err(|e| ConfigError::Invalid(format!("{name} = {value}: {e}")))
}

impl IngestConfig {
    /// Reads the config file at `path` (defaults when `None`), then applies
    /// environment overrides and validates the result.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read or parsed, an
    /// override is invalid, or the result is inconsistent.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_overrides(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse(&text, &path.display().to_string())
    }

    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] if `text` is not a valid config.
    pub fn parse(text: &str, origin: &str) -> Result<Self, ConfigError> {
        toml::de::from_str(text).map_err(|source| ConfigError::Parse {
            path: origin.to_string(),
            source,
        })
    }

    /// Applies `DIVVY_LAKE_*` overrides looked up through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidEnv`] for unusable values.
    pub fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(root) = lookup("DIVVY_LAKE_LOCAL_ROOT") {
            self.store = StoreConfig::Local {
                root: PathBuf::from(root),
            };
        }
        if let Some(bucket) = lookup("DIVVY_LAKE_BUCKET") {
            let prefix = match &self.store {
                StoreConfig::S3 { prefix, .. } => prefix.clone(),
                StoreConfig::Local { .. } => None,
            };
            self.store = StoreConfig::S3 { bucket, prefix };
        }
        if let Some(value) = lookup("DIVVY_LAKE_PREFIX") {
            match &mut self.store {
                StoreConfig::S3 { prefix, .. } => *prefix = Some(value),
                StoreConfig::Local { .. } => {
                    return Err(ConfigError::InvalidEnv {
                        name: "DIVVY_LAKE_PREFIX",
                        value,
                        reason: "only applies to an S3 store".to_string(),
                    });
                }
            }
        }
        if let Some(value) = lookup("DIVVY_LAKE_CONCURRENCY") {
            self.run.concurrency = value.trim().parse().map_err(|e: std::num::ParseIntError| {
                ConfigError::InvalidEnv {
                    name: "DIVVY_LAKE_CONCURRENCY",
                    value: value.clone(),
                    reason: e.to_string(),
                }
            })?;
        }
        Ok(())
    }

    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] describing the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=MAX_CONCURRENCY).contains(&self.run.concurrency) {
            return Err(ConfigError::Invalid(format!(
                "run.concurrency must be between 1 and {MAX_CONCURRENCY}, got {}",
                self.run.concurrency
            )));
        }
        if let StoreConfig::S3 { bucket, .. } = &self.store
            && bucket.trim().is_empty()
        {
            return Err(ConfigError::Invalid("store.bucket is empty".to_string()));
        }
        self.retry.policy()?;
        for kind in [SourceKind::TripArchive, SourceKind::Weather, SourceKind::StationFeed] {
            self.coordinator_options(kind)?;
        }
        self.locations()?;
        Ok(())
    }

    /// Built-in locations merged with the configured ones.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if a configured key is not a valid
    /// scope.
    pub fn locations(&self) -> Result<LocationRegistry, ConfigError> {
        let mut registry = LocationRegistry::builtin();
        registry
            .extend(self.locations.iter().cloned())
            .map_err(|e| ConfigError::Invalid(format!("locations: {e}")))?;
        Ok(registry)
    }

    /// Base URL used for `kind`.
    #[must_use]
    pub fn base_url(&self, kind: SourceKind) -> String {
        self.sources.section(kind).base_url.clone().unwrap_or_else(|| {
            match kind {
                SourceKind::TripArchive => trip_archive::DEFAULT_BASE_URL,
                SourceKind::Weather => weather::DEFAULT_BASE_URL,
                SourceKind::StationFeed => station_feed::DEFAULT_BASE_URL,
            }
            .to_string()
        })
    }

    /// Timezone passed to the weather archive.
    #[must_use]
    pub fn weather_timezone(&self) -> String {
        self.sources
            .weather
            .timezone
            .clone()
            .unwrap_or_else(|| weather::DEFAULT_TIMEZONE.to_string())
    }

    /// Scopes processed for `kind` when none are requested explicitly.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if the location registry is invalid.
    pub fn default_scopes(&self, kind: SourceKind) -> Result<Vec<String>, ConfigError> {
        let configured = &self.sources.section(kind).scopes;
        if !configured.is_empty() {
            return Ok(configured.clone());
        }
        Ok(match kind {
            SourceKind::TripArchive => vec!["divvy".to_string()],
            SourceKind::Weather => self.locations()?.keys(),
            SourceKind::StationFeed => station_feed::ENDPOINTS
                .iter()
                .map(ToString::to_string)
                .collect(),
        })
    }

    /// Builds the run request for `kind`.
    ///
    /// Explicit `scopes`, `start`, `end` override the source section.
    /// Snapshot sources use `at` (default: now).
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if a monthly source has no complete
    /// range or the range is inverted.
    pub fn run_config(
        &self,
        kind: SourceKind,
        scopes: Option<Vec<String>>,
        start: Option<YearMonth>,
        end: Option<YearMonth>,
        at: Option<DateTime<Utc>>,
    ) -> Result<RunConfig, ConfigError> {
        let scopes = match scopes {
            Some(scopes) => scopes,
            None => self.default_scopes(kind)?,
        };

        let window = if kind.is_snapshot() {
            RunWindow::Snapshot(at.unwrap_or_else(Utc::now))
        } else {
            let section = self.sources.section(kind);
            let (Some(start), Some(end)) = (start.or(section.start), end.or(section.end)) else {
                return Err(ConfigError::Invalid(format!(
                    "{kind} needs a month range (--start/--end or [sources.{kind}] start/end)"
                )));
            };
            RunWindow::Monthly(
                MonthRange::new(start, end).map_err(|e| ConfigError::Invalid(e.to_string()))?,
            )
        };

        Ok(RunConfig {
            source: kind,
            scopes,
            window,
        })
    }

    /// Coordinator settings for runs of `kind`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if the retry or delay settings are
    /// unusable.
    pub fn coordinator_options(&self, kind: SourceKind) -> Result<CoordinatorOptions, ConfigError> {
        let request_delay = match self.sources.section(kind).request_delay_secs {
            Some(secs) => seconds(&format!("sources.{kind}.request_delay_secs"), secs)?,
            None => seconds("run.request_delay_secs", self.run.request_delay_secs)?,
        };
        Ok(CoordinatorOptions {
            concurrency: self.run.concurrency,
            store_failure_threshold: self.run.store_failure_threshold,
            request_delay,
            retry: self.retry.policy()?,
            validate_content: self.run.validate_content,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    fn ym(s: &str) -> YearMonth {
        s.parse().unwrap()
    }

    fn env(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: BTreeMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn empty_config_uses_defaults() {
        let config = IngestConfig::parse("", "inline").unwrap();
        assert_eq!(config, IngestConfig::default());
        assert!(config.validate().is_ok());
        assert_eq!(
            config.store,
            StoreConfig::Local {
                root: PathBuf::from("data/lake")
            }
        );
        assert_eq!(config.run.concurrency, 2);
        assert_eq!(config.retry.policy().unwrap(), RetryPolicy::default());
    }

    #[test]
    fn parses_full_config() {
        let config = IngestConfig::parse(
            r#"
[store]
type = "s3"
bucket = "divvy-lake"
prefix = "bronze"

[http]
user_agent = "test-agent"

[retry]
max_attempts = 5
base_delay_secs = 0.5

[run]
concurrency = 4
store_failure_threshold = 2

[sources.weather]
scopes = ["chicago"]
start = "2023-01"
end = "2024-12"
request_delay_secs = 0.5

[[locations]]
key = "oak_park"
name = "Oak Park"
latitude = 41.885
longitude = -87.7845
"#,
            "inline",
        )
        .unwrap();

        assert_eq!(
            config.store,
            StoreConfig::S3 {
                bucket: "divvy-lake".to_string(),
                prefix: Some("bronze".to_string())
            }
        );
        assert_eq!(config.http.settings().user_agent, "test-agent");
        let policy = config.retry.policy().unwrap();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.base_delay, Duration::from_millis(500));
        assert_eq!(config.sources.weather.start, Some(ym("2023-01")));
        assert_eq!(config.locations().unwrap().len(), 3);

        let options = config.coordinator_options(SourceKind::Weather).unwrap();
        assert_eq!(options.request_delay, Duration::from_millis(500));
        assert_eq!(options.concurrency, 4);
        let options = config.coordinator_options(SourceKind::TripArchive).unwrap();
        assert_eq!(options.request_delay, Duration::ZERO);
    }

    #[test]
    fn shipped_config_is_valid() {
        let config = IngestConfig::parse(
            include_str!("../../../config/divvy_lake.toml"),
            "config/divvy_lake.toml",
        )
        .unwrap();
        config.validate().unwrap();
        assert!(matches!(config.store, StoreConfig::S3 { .. }));
        assert_eq!(
            config
                .coordinator_options(SourceKind::Weather)
                .unwrap()
                .request_delay,
            Duration::from_secs(2)
        );
        let trips = config
            .run_config(SourceKind::TripArchive, None, None, None, None)
            .unwrap();
        assert_eq!(trips.scopes, vec!["divvy"]);
    }

    #[test]
    fn rejects_negative_source_delay() {
        let err = IngestConfig::parse(
            "[sources.weather]\nrequest_delay_secs = -1.5\n",
            "inline",
        )
        .and_then(|config| config.validate())
        .unwrap_err();
        let ConfigError::Invalid(message) = err else {
            panic!("expected an invalid config, got {err:?}");
        };
        assert!(message.contains("sources.weather.request_delay_secs"), "{message}");
    }

    #[test]
    fn rejects_unknown_keys() {
        let err = IngestConfig::parse("[run]\nconcurency = 4\n", "inline").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn env_overrides_store_and_concurrency() {
        let mut config = IngestConfig::default();
        config
            .apply_overrides(env(&[
                ("DIVVY_LAKE_BUCKET", "prod-lake"),
                ("DIVVY_LAKE_PREFIX", "bronze"),
                ("DIVVY_LAKE_CONCURRENCY", "8"),
            ]))
            .unwrap();
        assert_eq!(
            config.store,
            StoreConfig::S3 {
                bucket: "prod-lake".to_string(),
                prefix: Some("bronze".to_string())
            }
        );
        assert_eq!(config.run.concurrency, 8);

        let mut config = IngestConfig::default();
        config
            .apply_overrides(env(&[("DIVVY_LAKE_LOCAL_ROOT", "/srv/lake")]))
            .unwrap();
        assert_eq!(
            config.store,
            StoreConfig::Local {
                root: PathBuf::from("/srv/lake")
            }
        );
    }

    #[test]
    fn invalid_env_values_are_reported() {
        let mut config = IngestConfig::default();
        let err = config
            .apply_overrides(env(&[("DIVVY_LAKE_CONCURRENCY", "lots")]))
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidEnv {
                name: "DIVVY_LAKE_CONCURRENCY",
                ..
            }
        ));

        let mut config = IngestConfig::default();
        assert!(
            config
                .apply_overrides(env(&[("DIVVY_LAKE_PREFIX", "bronze")]))
                .is_err()
        );
    }

    #[test]
    fn concurrency_is_bounded() {
        for concurrency in [0, MAX_CONCURRENCY + 1] {
            let mut config = IngestConfig::default();
            config.run.concurrency = concurrency;
            assert!(config.validate().is_err(), "{concurrency}");
        }
    }

    #[test]
    fn builds_monthly_run_configs() {
        let config = IngestConfig::default();
        let run = config
            .run_config(
                SourceKind::Weather,
                None,
                Some(ym("2023-01")),
                Some(ym("2024-12")),
                None,
            )
            .unwrap();
        assert_eq!(run.scopes, vec!["chicago", "evanston"]);
        assert!(matches!(run.window, RunWindow::Monthly(range) if range.months().len() == 24));

        assert!(
            config
                .run_config(SourceKind::TripArchive, None, Some(ym("2024-01")), None, None)
                .is_err(),
            "missing end month"
        );
        assert!(
            config
                .run_config(
                    SourceKind::TripArchive,
                    None,
                    Some(ym("2024-02")),
                    Some(ym("2024-01")),
                    None
                )
                .is_err(),
            "inverted range"
        );
    }

    #[test]
    fn station_feed_runs_are_snapshots() {
        let run = IngestConfig::default()
            .run_config(SourceKind::StationFeed, None, None, None, None)
            .unwrap();
        assert_eq!(run.scopes.len(), 3);
        assert!(matches!(run.window, RunWindow::Snapshot(_)));
    }
}
