use std::mem;
use std::sync::Arc;
use std::time::{Duration, Instant};

use common_kafka::record::ConsumedRecord;

use crate::metric_consts::BATCH_RELEASE_SIZE;

/// Time source injected so the release timer is deterministic under
/// test.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Buffers records until either the size limit is reached or the
/// release interval elapses with at least one record waiting. The timer
/// measures time since the last release check, not since the first
/// buffered record.
pub struct BatchAggregator {
    buffer: Vec<ConsumedRecord>,
    size_limit: usize,
    interval: Duration,
    deadline: Instant,
    clock: Arc<dyn Clock>,
}

impl BatchAggregator {
    pub fn new(size_limit: usize, interval: Duration, clock: Arc<dyn Clock>) -> Self {
        let deadline = clock.now() + interval;
        Self {
            buffer: Vec::with_capacity(size_limit),
            size_limit: size_limit.max(1),
            interval,
            deadline,
            clock,
        }
    }

    pub fn push(&mut self, record: ConsumedRecord) {
        self.buffer.push(record);
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn timer_expired(&self) -> bool {
        self.clock.now() >= self.deadline
    }

    pub fn should_release(&self) -> bool {
        self.buffer.len() >= self.size_limit || (self.timer_expired() && !self.buffer.is_empty())
    }

    /// Takes the buffered records. The timer restarts only if it has
    /// expired; a size-triggered release leaves it running so the
    /// interval stays relative to the last check, not the last release.
    pub fn release(&mut self) -> Vec<ConsumedRecord> {
        let batch = mem::take(&mut self.buffer);
        self.restart_timer_if_expired();
        metrics::histogram!(BATCH_RELEASE_SIZE).record(batch.len() as f64);
        batch
    }

    /// An expired timer over an empty buffer releases nothing but still
    /// restarts, so the interval always counts from the last check.
    pub fn restart_timer_if_expired(&mut self) {
        if self.timer_expired() {
            self.deadline = self.clock.now() + self.interval;
        }
    }
}
