//! A shared, monotonically-increasing failure tally.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Counts validation and persistence failures across all in-flight
/// requests.
///
/// The counter is owned by whoever builds the telemetry stack and handed
/// to the service by value; cloning is cheap and all clones share the same
/// underlying count. It never resets for the lifetime of the process and
/// is purely observational.
#[derive(Debug, Clone, Default)]
pub struct ErrorCounter(Arc<AtomicU64>);

impl ErrorCounter {
    /// Returns a fresh counter at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one failure.
    ///
    /// Returns the post-increment total so the caller can attach the value
    /// identifying this specific failure to the span reporting it. No
    /// increments are lost under concurrent callers.
    pub fn increment(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// The current total.
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}
