//! Progress reporting for ingestion runs.
//!
//! The coordinator reports one unit of progress per resolved partition.
//! Rendering (progress bars, log lines, nothing) is chosen by the caller.

use std::sync::Arc;

/// Receives run progress updates.
///
/// Implementations must be `Send + Sync`; updates arrive from the
/// coordinator's consumer loop while workers run concurrently.
pub trait ProgressCallback: Send + Sync {
    /// Set the number of partitions in the run.
    fn set_total(&self, total: u64);

    /// Advance by `delta` resolved partitions.
    fn inc(&self, delta: u64);

    /// Update the message shown next to the indicator.
    fn set_message(&self, msg: String);

    /// Mark the run as done with a final message.
    fn finish(&self, msg: String);
}

/// Ignores all progress updates.
pub struct NullProgress;

impl ProgressCallback for NullProgress {
    fn set_total(&self, _total: u64) {}
    fn inc(&self, _delta: u64) {}
    fn set_message(&self, _msg: String) {}
    fn finish(&self, _msg: String) {}
}

/// Returns a shared [`NullProgress`].
#[must_use]
pub fn null_progress() -> Arc<dyn ProgressCallback> {
    Arc::new(NullProgress)
}
