use std::sync::atomic::{AtomicU64, Ordering};

/// Counts consumed records and tests the configured maximum. The count
/// only ever grows; once the maximum is reached the loop stops after
/// the in-flight record finishes.
#[derive(Debug, Default)]
pub struct MessageCounter {
    count: AtomicU64,
    max: Option<u64>,
}

impl MessageCounter {
    pub fn new(max: Option<u64>) -> Self {
        Self {
            count: AtomicU64::new(0),
            max,
        }
    }

    pub fn record(&self) -> u64 {
        self.count.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn limit_reached(&self) -> bool {
        matches!(self.max, Some(max) if self.count() >= max)
    }
}
