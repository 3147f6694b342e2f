//! Deterministic doubles for the engine's injected collaborators.

use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use common_kafka::consumer::BrokerError;
use common_kafka::record::ConsumedRecord;

use common_kafka::config::{ConsumerConfig, KafkaConfig};

use crate::batch::Clock;
use crate::commit::CommitStrategy;
use crate::config::Config;
use crate::retry::Sleeper;

/// A config suitable for driving the loop against mocks: short poll
/// timeout, small commit batches, no restart store, no limits.
pub fn test_config() -> Config {
    Config {
        host: "127.0.0.1".to_string(),
        port: 9090,
        kafka: KafkaConfig {
            kafka_hosts: "localhost:9092".to_string(),
            kafka_tls: false,
            kafka_producer_linger_ms: 20,
            kafka_message_timeout_ms: 20000,
            kafka_compression_codec: "none".to_string(),
        },
        consumer: ConsumerConfig {
            kafka_consumer_group: "conveyor-test".to_string(),
            kafka_consumer_topic: "events".to_string(),
            kafka_consumer_offset_reset: "earliest".to_string(),
            kafka_consumer_auto_commit: false,
        },
        poll_timeout_ms: 10,
        commit_batch_size: 1,
        max_commit_retries: 6,
        max_messages: 0,
        max_time_seconds: 0,
        stop_after_last_message: false,
        restart_check_interval_ms: 10000,
        batching_enabled: false,
        batch_size_limit: 100,
        batch_release_interval_ms: 2000,
        dead_letter_topic: None,
        dead_letter_flush_timeout_ms: 5000,
        redis_url: None,
        restart_signal_key: "conveyor/restart-signal".to_string(),
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Records requested delays instead of sleeping.
#[derive(Default)]
pub struct MockSleeper {
    sleeps: Mutex<Vec<Duration>>,
}

impl MockSleeper {
    pub fn sleeps(&self) -> Vec<Duration> {
        lock(&self.sleeps).clone()
    }
}

#[async_trait]
impl Sleeper for MockSleeper {
    async fn sleep(&self, delay: Duration) {
        lock(&self.sleeps).push(delay);
    }
}

/// Manually advanced clock for timer tests.
pub struct MockClock {
    now: Mutex<Instant>,
}

impl MockClock {
    pub fn new() -> Self {
        Self {
            now: Mutex::new(Instant::now()),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = lock(&self.now);
        *now += by;
    }
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MockClock {
    fn now(&self) -> Instant {
        *lock(&self.now)
    }
}

/// Commit strategy that records every call and always succeeds.
#[derive(Default)]
pub struct RecordingCommitter {
    message_commits: Mutex<Vec<(i64, bool)>>,
    dlq_commits: Mutex<Vec<i64>>,
}

impl RecordingCommitter {
    pub fn message_commits(&self) -> Vec<(i64, bool)> {
        lock(&self.message_commits).clone()
    }

    pub fn dlq_commits(&self) -> Vec<i64> {
        lock(&self.dlq_commits).clone()
    }
}

#[async_trait]
impl CommitStrategy for RecordingCommitter {
    async fn commit_message(
        &self,
        record: &ConsumedRecord,
        success: bool,
    ) -> Result<(), BrokerError> {
        lock(&self.message_commits).push((record.offset, success));
        Ok(())
    }

    async fn commit_dlq(&self, record: &ConsumedRecord) -> Result<(), BrokerError> {
        lock(&self.dlq_commits).push(record.offset);
        Ok(())
    }
}
