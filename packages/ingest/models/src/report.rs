//! Outcome ledger for one ingestion run.
//!
//! A [`RunReport`] is created from the enumerated partition set and moves
//! through `Enumerated -> InProgress -> Finalized`. Every partition resolves
//! exactly once as skipped, written, or failed, so
//! `required = skipped + written + failed` always holds for the
//! [`RunSummary`] returned by [`RunReport::finalize`].

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{AttemptOutcome, FetchAttempt, PartitionKey, SourceKind, StorageObjectDescriptor};

/// Errors raised when the ledger is used out of order.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReportError {
    /// The key was not part of the enumerated partition space.
    #[error("Partition {key} is not part of this run")]
    UnknownPartition {
        /// Offending key.
        key: String,
    },

    /// The key already has an outcome.
    #[error("Partition {key} was already resolved")]
    AlreadyResolved {
        /// Offending key.
        key: String,
    },

    /// The requested state transition is not allowed.
    #[error("Invalid run state transition: {from:?} -> {to:?}")]
    InvalidTransition {
        /// Current state.
        from: RunState,
        /// Requested state.
        to: RunState,
    },
}

/// Run-level lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Enumerated,
    InProgress,
    Finalized,
}

/// Why a partition did not get written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureReason {
    /// The source kept failing (transient, retries exhausted) or refused the
    /// request (permanent).
    Fetch {
        /// Whether the final error was transient.
        transient: bool,
        /// Last error message.
        message: String,
        /// Number of attempts made.
        attempts: u32,
        /// The final attempt, with how it ended and how long it took.
        #[serde(skip_serializing_if = "Option::is_none")]
        last_attempt: Option<FetchAttempt>,
    },
    /// The payload failed structural checks.
    Validation {
        /// What was wrong with the payload.
        message: String,
    },
    /// The object store rejected the write.
    Write {
        /// Store error message.
        message: String,
    },
    /// The existence check against the store failed.
    Store {
        /// Store error message.
        message: String,
    },
    /// Not attempted: repeated store failures tripped the run breaker.
    StoreUnavailable,
    /// Not attempted: the run was cancelled.
    Cancelled,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fetch {
                transient,
                message,
                attempts,
                last_attempt,
            } => {
                let kind = if *transient { "transient" } else { "permanent" };
                write!(f, "fetch failed ({kind}, {attempts} attempt(s)")?;
                if let Some(last) = last_attempt {
                    let ended = match last.outcome {
                        AttemptOutcome::Success => "succeeded",
                        AttemptOutcome::TransientFailure => "failed",
                        AttemptOutcome::PermanentFailure => "was refused",
                        AttemptOutcome::Timeout => "timed out",
                    };
                    write!(
                        f,
                        ", last {ended} after {:.1}s",
                        last.elapsed.as_secs_f64()
                    )?;
                }
                write!(f, "): {message}")
            }
            Self::Validation { message } => write!(f, "invalid payload: {message}"),
            Self::Write { message } => write!(f, "write failed: {message}"),
            Self::Store { message } => write!(f, "existence check failed: {message}"),
            Self::StoreUnavailable => f.write_str("skipped: object store unavailable"),
            Self::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// Resolution of a single partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartitionOutcome {
    /// Already present and valid in the store.
    Skipped,
    /// Fetched and committed during this run.
    Written(StorageObjectDescriptor),
    /// Not written.
    Failed(FailureReason),
}

/// A partition written during the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WrittenPartition {
    pub key: PartitionKey,
    pub object: StorageObjectDescriptor,
}

/// A partition that failed during the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedPartition {
    pub key: PartitionKey,
    pub path: String,
    pub reason: FailureReason,
}

/// Overall verdict of a finalized run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Every partition is present in the store.
    Complete,
    /// Some partitions are present, some failed.
    Partial,
    /// Nothing is present.
    Failed,
}

/// Immutable summary of a finalized run, handed to the scheduler.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub source: SourceKind,
    pub required: u64,
    pub skipped: u64,
    pub written: u64,
    pub failed: u64,
    /// Share of required partitions present after the run (skipped or
    /// written), in percent.
    pub completion_percentage: f64,
    pub status: RunStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: DateTime<Utc>,
    /// Partitions newly available to downstream jobs.
    pub written_partitions: Vec<WrittenPartition>,
    pub failures: Vec<FailedPartition>,
}

impl RunSummary {
    /// Whether the run left no failed partitions.
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        self.failed == 0
    }

    #[must_use]
    pub const fn status(&self) -> RunStatus {
        self.status
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} partitions complete ({} skipped, {} written), {} failed",
            self.skipped + self.written,
            self.required,
            self.skipped,
            self.written,
            self.failed,
        )?;
        for failure in &self.failures {
            write!(f, "\n  - {}: {}", failure.key, failure.reason)?;
        }
        Ok(())
    }
}

/// Mutable outcome ledger owned by the coordinator for one run.
#[derive(Debug)]
pub struct RunReport {
    source: SourceKind,
    state: RunState,
    outcomes: BTreeMap<PartitionKey, Option<PartitionOutcome>>,
    started_at: Option<DateTime<Utc>>,
    summary: Option<RunSummary>,
}

impl RunReport {
    /// Creates an empty ledger over the enumerated partition space.
    pub fn new(source: SourceKind, keys: impl IntoIterator<Item = PartitionKey>) -> Self {
        Self {
            source,
            state: RunState::Enumerated,
            outcomes: keys.into_iter().map(|k| (k, None)).collect(),
            started_at: None,
            summary: None,
        }
    }

    #[must_use]
    pub const fn state(&self) -> RunState {
        self.state
    }

    /// Number of partitions in the run.
    #[must_use]
    pub fn required(&self) -> usize {
        self.outcomes.len()
    }

    /// Number of partitions that already have an outcome.
    #[must_use]
    pub fn resolved(&self) -> usize {
        self.outcomes.values().filter(|o| o.is_some()).count()
    }

    /// Moves the run into `InProgress`.
    ///
    /// # Errors
    ///
    /// Returns [`ReportError::InvalidTransition`] unless the run is
    /// `Enumerated`.
    pub fn start(&mut self) -> Result<(), ReportError> {
        if self.state != RunState::Enumerated {
            return Err(ReportError::InvalidTransition {
                from: self.state,
                to: RunState::InProgress,
            });
        }
        self.state = RunState::InProgress;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    /// Records that `key` was already present.
    ///
    /// # Errors
    ///
    /// See [`record`](Self::record).
    pub fn record_skipped(&mut self, key: &PartitionKey) -> Result<(), ReportError> {
        self.record(key, PartitionOutcome::Skipped)
    }

    /// Records that `key` was written as `descriptor`.
    ///
    /// # Errors
    ///
    /// See [`record`](Self::record).
    pub fn record_written(
        &mut self,
        key: &PartitionKey,
        descriptor: StorageObjectDescriptor,
    ) -> Result<(), ReportError> {
        self.record(key, PartitionOutcome::Written(descriptor))
    }

    /// Records that `key` failed.
    ///
    /// # Errors
    ///
    /// See [`record`](Self::record).
    pub fn record_failed(
        &mut self,
        key: &PartitionKey,
        reason: FailureReason,
    ) -> Result<(), ReportError> {
        self.record(key, PartitionOutcome::Failed(reason))
    }

    /// Records the outcome of one partition.
    ///
    /// # Errors
    ///
    /// Returns [`ReportError`] if the run is not `InProgress`, the key is not
    /// part of the run, or the key already has an outcome.
    pub fn record(
        &mut self,
        key: &PartitionKey,
        outcome: PartitionOutcome,
    ) -> Result<(), ReportError> {
        if self.state != RunState::InProgress {
            return Err(ReportError::InvalidTransition {
                from: self.state,
                to: RunState::InProgress,
            });
        }
        let slot = self
            .outcomes
            .get_mut(key)
            .ok_or_else(|| ReportError::UnknownPartition {
                key: key.to_string(),
            })?;
        if slot.is_some() {
            return Err(ReportError::AlreadyResolved {
                key: key.to_string(),
            });
        }
        *slot = Some(outcome);
        Ok(())
    }

    /// Closes the ledger and returns the summary.
    ///
    /// Partitions that never resolved are recorded as
    /// [`FailureReason::Cancelled`]. Calling this again returns the same
    /// summary.
    pub fn finalize(&mut self) -> RunSummary {
        if let Some(summary) = &self.summary {
            return summary.clone();
        }

        for outcome in self.outcomes.values_mut() {
            if outcome.is_none() {
                *outcome = Some(PartitionOutcome::Failed(FailureReason::Cancelled));
            }
        }

        let mut skipped = 0u64;
        let mut written_partitions = Vec::new();
        let mut failures = Vec::new();

        let resolved = self
            .outcomes
            .iter()
            .filter_map(|(key, outcome)| outcome.as_ref().map(|o| (key, o)));
        for (key, outcome) in resolved {
            match outcome {
                PartitionOutcome::Skipped => skipped += 1,
                PartitionOutcome::Written(object) => {
                    written_partitions.push(WrittenPartition {
                        key: key.clone(),
                        object: object.clone(),
                    });
                }
                PartitionOutcome::Failed(reason) => failures.push(FailedPartition {
                    key: key.clone(),
                    path: key.canonical_path(),
                    reason: reason.clone(),
                }),
            }
        }

        let required = self.outcomes.len() as u64;
        let written = written_partitions.len() as u64;
        let failed = failures.len() as u64;
        let present = skipped + written;

        #[allow(clippy::cast_precision_loss)] // partition counts are small
        let completion_percentage = if required == 0 {
            100.0
        } else {
            present as f64 / required as f64 * 100.0
        };

        let status = if failed == 0 {
            RunStatus::Complete
        } else if present > 0 {
            RunStatus::Partial
        } else {
            RunStatus::Failed
        };

        let summary = RunSummary {
            source: self.source,
            required,
            skipped,
            written,
            failed,
            completion_percentage,
            status,
            started_at: self.started_at,
            finished_at: Utc::now(),
            written_partitions,
            failures,
        };

        self.state = RunState::Finalized;
        self.summary = Some(summary.clone());
        summary
    }
}
