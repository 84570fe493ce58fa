//! Progress reporting for long scoring loops.
//!
//! [`ProgressCallback`] decouples progress reporting from any rendering
//! backend. Scorers never report per feature; they go through a [`Ticker`]
//! that forwards one update every `every` features.

use std::sync::Arc;

/// Receives progress from long-running operations.
///
/// Implementations must be `Send + Sync` so one instance can be shared
/// across worker threads.
pub trait ProgressCallback: Send + Sync {
    /// Set the total expected units of work.
    fn set_total(&self, total: u64);

    /// Advance progress by `delta` units.
    fn inc(&self, delta: u64);

    /// Update the message shown alongside the indicator.
    fn set_message(&self, msg: String);

    /// Mark progress as complete with a final message.
    fn finish(&self, msg: String);
}

/// Ignores every update.
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

/// Batches per-item ticks into periodic [`ProgressCallback::inc`] calls.
pub struct Ticker<'a> {
    progress: &'a dyn ProgressCallback,
    every: u64,
    pending: u64,
}

impl<'a> Ticker<'a> {
    /// Reports every `every` ticks (at least one).
    #[must_use]
    pub fn new(progress: &'a dyn ProgressCallback, every: u64) -> Self {
        Self {
            progress,
            every: every.max(1),
            pending: 0,
        }
    }

    /// Counts one item.
    pub fn tick(&mut self) {
        self.pending += 1;
        if self.pending >= self.every {
            self.progress.inc(self.pending);
            self.pending = 0;
        }
    }

    /// Flushes the remainder.
    pub fn flush(&mut self) {
        if self.pending > 0 {
            self.progress.inc(self.pending);
            self.pending = 0;
        }
    }
}

impl Drop for Ticker<'_> {
    fn drop(&mut self) {
        self.flush();
    }
}
