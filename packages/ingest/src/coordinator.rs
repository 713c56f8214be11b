//! Drives one ingestion run from enumeration to the final summary.
//!
//! Keys are dispatched in order through a bounded worker pool. Workers never
//! touch the [`RunReport`]; they hand their outcome back to the single
//! consumer loop in [`IngestionCoordinator::run`], which records it.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use divvy_lake_ingest_models::progress::{ProgressCallback, null_progress};
use divvy_lake_ingest_models::report::{FailureReason, PartitionOutcome, RunReport, RunSummary};
use divvy_lake_ingest_models::{PartitionKey, RunWindow, SourceKind, enumerate_partitions};
use divvy_lake_source::retry::RetryPolicy;
use divvy_lake_source::{FetchError, SourceFetcher};
use divvy_lake_store::ObjectStore;
use divvy_lake_store::checker::{ExistenceChecker, PartitionState, is_well_formed};
use divvy_lake_store::writer::{PartitionWriter, WriteError};
use futures::{StreamExt as _, TryStreamExt as _, stream};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::IngestError;

/// Upper bound on concurrently processed partitions.
pub const MAX_CONCURRENCY: usize = 16;

/// Tuning knobs for a coordinator.
#[derive(Debug, Clone, PartialEq)]
pub struct CoordinatorOptions {
    /// Partitions processed at once (`1..=MAX_CONCURRENCY`).
    pub concurrency: usize,
    /// Consecutive store failures, with no successful write in between,
    /// after which no new partition is started.
    pub store_failure_threshold: u32,
    /// Pause after every network fetch.
    pub request_delay: Duration,
    pub retry: RetryPolicy,
    /// Whether existence checks download and inspect stored objects.
    pub validate_content: bool,
}

impl Default for CoordinatorOptions {
    fn default() -> Self {
        Self {
            concurrency: 2,
            store_failure_threshold: 3,
            request_delay: Duration::ZERO,
            retry: RetryPolicy::default(),
            validate_content: true,
        }
    }
}

/// What to ingest in one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    pub source: SourceKind,
    pub scopes: Vec<String>,
    pub window: RunWindow,
}

/// Stored state of one partition, as reported by [`IngestionCoordinator::status`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PartitionCheck {
    pub key: PartitionKey,
    pub path: String,
    pub state: PartitionState,
}

/// Checkpoint view of a run's partition space, computed without fetching.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckpointStatus {
    pub source: SourceKind,
    pub required: u64,
    pub present: u64,
    pub missing: u64,
    pub completion_percentage: f64,
    pub partitions: Vec<PartitionCheck>,
}

impl fmt::Display for CheckpointStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} partitions present ({:.1}%), {} missing",
            self.present, self.required, self.completion_percentage, self.missing
        )
    }
}

/// Trips once enough store operations fail in a row.
///
/// Only a successful write resets the count. Once tripped it stays open for
/// the rest of the run.
struct StoreBreaker {
    threshold: u32,
    consecutive: AtomicU32,
    open: AtomicBool,
}

impl StoreBreaker {
    const fn new(threshold: u32) -> Self {
        Self {
            threshold,
            consecutive: AtomicU32::new(0),
            open: AtomicBool::new(false),
        }
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn record_success(&self) {
        self.consecutive.store(0, Ordering::SeqCst);
    }

    fn record_failure(&self) {
        let failures = self.consecutive.fetch_add(1, Ordering::SeqCst) + 1;
        if self.threshold > 0
            && failures >= self.threshold
            && !self.open.swap(true, Ordering::SeqCst)
        {
            log::error!(
                "{failures} consecutive store failures, not starting any more partitions"
            );
        }
    }
}

/// Runs checkpointed ingestion for any registered source.
pub struct IngestionCoordinator {
    store: Arc<dyn ObjectStore>,
    checker: ExistenceChecker,
    writer: PartitionWriter,
    fetchers: BTreeMap<SourceKind, Arc<dyn SourceFetcher>>,
    options: CoordinatorOptions,
    progress: Arc<dyn ProgressCallback>,
}

impl IngestionCoordinator {
    /// Creates a coordinator. A later fetcher for the same source kind
    /// replaces an earlier one.
    #[must_use]
    pub fn new(
        store: Arc<dyn ObjectStore>,
        fetchers: Vec<Arc<dyn SourceFetcher>>,
        options: CoordinatorOptions,
    ) -> Self {
        Self {
            checker: ExistenceChecker::new(store.clone())
                .with_content_validation(options.validate_content),
            writer: PartitionWriter::new(store.clone()),
            store,
            fetchers: fetchers.into_iter().map(|f| (f.kind(), f)).collect(),
            options,
            progress: null_progress(),
        }
    }

    /// Reports per-partition progress to `progress`.
    #[must_use]
    pub fn with_progress(mut self, progress: Arc<dyn ProgressCallback>) -> Self {
        self.progress = progress;
        self
    }

    #[must_use]
    pub const fn options(&self) -> &CoordinatorOptions {
        &self.options
    }

    /// Enumerates the partition space of `config`.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::Configuration`] if no fetcher handles the
    /// source, the scopes are empty or invalid, or the window does not fit
    /// the source.
    pub fn plan(&self, config: &RunConfig) -> Result<BTreeSet<PartitionKey>, IngestError> {
        self.fetcher(config.source)?;
        enumerate_partitions(config.source, &config.scopes, &config.window)
            .map_err(|e| IngestError::Configuration(e.to_string()))
    }

    fn fetcher(&self, kind: SourceKind) -> Result<&Arc<dyn SourceFetcher>, IngestError> {
        self.fetchers
            .get(&kind)
            .ok_or_else(|| IngestError::Configuration(format!("no fetcher registered for {kind}")))
    }

    fn validate_options(&self) -> Result<(), IngestError> {
        if !(1..=MAX_CONCURRENCY).contains(&self.options.concurrency) {
            return Err(IngestError::Configuration(format!(
                "concurrency must be between 1 and {MAX_CONCURRENCY}, got {}",
                self.options.concurrency
            )));
        }
        Ok(())
    }

    /// Checks which partitions of `config` are already stored. Never
    /// fetches or writes.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError`] if the run is misconfigured or the store
    /// cannot be queried.
    pub async fn status(&self, config: &RunConfig) -> Result<CheckpointStatus, IngestError> {
        self.validate_options()?;
        let keys = self.plan(config)?;

        let partitions: Vec<PartitionCheck> = stream::iter(keys)
            .map(|key| async move {
                let state = self.checker.inspect(&key).await?;
                Ok::<_, IngestError>(PartitionCheck {
                    path: key.canonical_path(),
                    key,
                    state,
                })
            })
            .buffered(self.options.concurrency)
            .try_collect()
            .await?;

        let required = partitions.len() as u64;
        let present = partitions.iter().filter(|p| p.state.is_present()).count() as u64;

        Ok(CheckpointStatus {
            source: config.source,
            required,
            present,
            missing: required - present,
            completion_percentage: percentage(present, required),
            partitions,
        })
    }

    /// Executes one run.
    ///
    /// Individual partition failures are recorded in the returned summary;
    /// only problems that prevent the run from starting are errors.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::Configuration`] for an unusable run request
    /// and [`IngestError::StoreUnavailable`] if the store fails its
    /// preflight check.
    pub async fn run(
        &self,
        config: &RunConfig,
        cancel: CancellationToken,
    ) -> Result<RunSummary, IngestError> {
        self.validate_options()?;
        let keys = self.plan(config)?;
        let fetcher = self.fetcher(config.source)?.as_ref();

        self.store
            .check_connectivity()
            .await
            .map_err(|source| IngestError::StoreUnavailable {
                target: self.store.describe(),
                source,
            })?;

        log::info!(
            "[{}] {} partition(s) for {} scope(s), window {}, store {}",
            config.source,
            keys.len(),
            config.scopes.len(),
            config.window,
            self.store.describe()
        );

        let mut report = RunReport::new(config.source, keys.iter().cloned());
        report.start()?;
        self.progress.set_total(keys.len() as u64);

        let breaker = StoreBreaker::new(self.options.store_failure_threshold);
        let breaker = &breaker;
        let cancel = &cancel;

        let mut outcomes = stream::iter(keys)
            .map(move |key| self.process(key, fetcher, breaker, cancel))
            .buffer_unordered(self.options.concurrency);

        while let Some((key, outcome)) = outcomes.next().await {
            self.progress.set_message(key.to_string());
            self.progress.inc(1);
            report.record(&key, outcome)?;
        }

        let summary = report.finalize();
        self.progress.finish(format!(
            "{}: {} written, {} skipped, {} failed",
            summary.source, summary.written, summary.skipped, summary.failed
        ));
        if summary.is_complete() {
            log::info!("[{}] {summary}", summary.source);
        } else {
            log::warn!("[{}] {summary}", summary.source);
        }

        Ok(summary)
    }

    async fn process(
        &self,
        key: PartitionKey,
        fetcher: &dyn SourceFetcher,
        breaker: &StoreBreaker,
        cancel: &CancellationToken,
    ) -> (PartitionKey, PartitionOutcome) {
        let outcome = self.resolve(&key, fetcher, breaker, cancel).await;
        if let PartitionOutcome::Failed(reason) = &outcome {
            match reason {
                FailureReason::Cancelled | FailureReason::StoreUnavailable => {
                    log::debug!("[{key}] {reason}");
                }
                _ => log::error!("[{key}] {reason}"),
            }
        }
        (key, outcome)
    }

    async fn resolve(
        &self,
        key: &PartitionKey,
        fetcher: &dyn SourceFetcher,
        breaker: &StoreBreaker,
        cancel: &CancellationToken,
    ) -> PartitionOutcome {
        if cancel.is_cancelled() {
            return PartitionOutcome::Failed(FailureReason::Cancelled);
        }
        if breaker.is_open() {
            return PartitionOutcome::Failed(FailureReason::StoreUnavailable);
        }

        match self.checker.exists(key).await {
            Ok(true) => {
                log::debug!("[{key}] already stored, skipping");
                return PartitionOutcome::Skipped;
            }
            Ok(false) => {}
            Err(e) => {
                breaker.record_failure();
                return PartitionOutcome::Failed(FailureReason::Store {
                    message: e.to_string(),
                });
            }
        }

        let label = key.to_string();
        let fetched = self
            .options
            .retry
            .execute_until_cancelled(&label, cancel, || fetcher.fetch(key))
            .await;
        let attempts = fetched.attempt_count();
        let last_attempt = fetched.attempts.last().cloned();

        if !self.options.request_delay.is_zero() {
            tokio::time::sleep(self.options.request_delay).await;
        }

        let payload = match fetched.result {
            Ok(payload) => payload,
            Err(FetchError::Validation { message }) => {
                return PartitionOutcome::Failed(FailureReason::Validation { message });
            }
            Err(e) if e.is_transient()
                && cancel.is_cancelled()
                && attempts < self.options.retry.max_attempts =>
            {
                log::warn!("[{key}] {e}; retries abandoned after cancellation");
                return PartitionOutcome::Failed(FailureReason::Cancelled);
            }
            Err(e) => {
                return PartitionOutcome::Failed(FailureReason::Fetch {
                    transient: e.is_transient(),
                    message: e.message().to_string(),
                    attempts,
                    last_attempt,
                });
            }
        };

        log::info!(
            "[{key}] fetched {} record(s) in {attempts} attempt(s)",
            payload.record_count
        );

        if !is_well_formed(payload.format, &payload.bytes) {
            return PartitionOutcome::Failed(FailureReason::Validation {
                message: format!("{} payload is not well formed", payload.format.content_type()),
            });
        }

        match self.writer.write(key, &payload).await {
            Ok(object) => {
                breaker.record_success();
                PartitionOutcome::Written(object)
            }
            Err(WriteError::Store(e)) => {
                breaker.record_failure();
                PartitionOutcome::Failed(FailureReason::Write {
                    message: e.to_string(),
                })
            }
            Err(e @ (WriteError::EmptyPayload { .. } | WriteError::FormatMismatch { .. })) => {
                PartitionOutcome::Failed(FailureReason::Validation {
                    message: e.to_string(),
                })
            }
        }
    }
}

#[allow(clippy::cast_precision_loss)]
fn percentage(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        100.0
    } else {
        part as f64 / whole as f64 * 100.0
    }
}
