use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use common_kafka::consumer::{BrokerConsumer, BrokerError};
use common_kafka::record::ConsumedRecord;
use common_kafka::RDKafkaErrorCode;
use tracing::{debug, warn};

use crate::counter::MessageCounter;
use crate::metric_consts::COMMITS_FLUSHED;
use crate::retry::{RetryPolicy, Sleeper};

/// Commit error codes treated as transient by the retryable committer.
/// Everything else propagates on the first failure.
pub const TRANSIENT_COMMIT_CODES: &[RDKafkaErrorCode] = &[
    RDKafkaErrorCode::IllegalGeneration,
    RDKafkaErrorCode::RebalanceInProgress,
    RDKafkaErrorCode::RequestTimedOut,
    RDKafkaErrorCode::CoordinatorLoadInProgress,
    RDKafkaErrorCode::NotCoordinator,
];

/// Decides, per record, whether and how to acknowledge the broker.
/// `commit_dlq` finalizes a record that was re-published to the dead
/// letter topic instead of being processed.
#[async_trait]
pub trait CommitStrategy: Send + Sync {
    async fn commit_message(
        &self,
        record: &ConsumedRecord,
        success: bool,
    ) -> Result<(), BrokerError>;

    async fn commit_dlq(&self, record: &ConsumedRecord) -> Result<(), BrokerError>;
}

/// No-op committer used when the broker's automatic offset commit is
/// trusted.
pub struct VoidCommitter;

#[async_trait]
impl CommitStrategy for VoidCommitter {
    async fn commit_message(
        &self,
        _record: &ConsumedRecord,
        _success: bool,
    ) -> Result<(), BrokerError> {
        Ok(())
    }

    async fn commit_dlq(&self, _record: &ConsumedRecord) -> Result<(), BrokerError> {
        Ok(())
    }
}

/// Delegates straight to the broker commit for every record. A "no
/// offset to commit" response is always swallowed.
pub struct ImmediateCommitter {
    broker: Arc<dyn BrokerConsumer>,
}

impl ImmediateCommitter {
    pub fn new(broker: Arc<dyn BrokerConsumer>) -> Self {
        Self { broker }
    }
}

#[async_trait]
impl CommitStrategy for ImmediateCommitter {
    async fn commit_message(
        &self,
        record: &ConsumedRecord,
        _success: bool,
    ) -> Result<(), BrokerError> {
        match self.broker.commit(record) {
            Err(e) if e.code() == Some(RDKafkaErrorCode::NoOffset) => {
                debug!("no offset to commit for {}:{}", record.topic, record.partition);
                Ok(())
            }
            other => other,
        }
    }

    async fn commit_dlq(&self, record: &ConsumedRecord) -> Result<(), BrokerError> {
        self.commit_message(record, true).await
    }
}

/// Accumulates finalized records and flushes the inner strategy once
/// the batch size is reached, or once the message counter has hit its
/// maximum so the final window is never stranded behind the threshold.
/// Failed records count toward the window too: with no dead letter
/// topic they are committed as processed, never redelivered.
pub struct BatchedCommitter {
    inner: Arc<dyn CommitStrategy>,
    batch_size: u32,
    counter: Arc<MessageCounter>,
    pending: AtomicU32,
}

impl BatchedCommitter {
    pub fn new(
        inner: Arc<dyn CommitStrategy>,
        batch_size: u32,
        counter: Arc<MessageCounter>,
    ) -> Self {
        Self {
            inner,
            batch_size: batch_size.max(1),
            counter,
            pending: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl CommitStrategy for BatchedCommitter {
    async fn commit_message(
        &self,
        record: &ConsumedRecord,
        success: bool,
    ) -> Result<(), BrokerError> {
        let pending = self.pending.fetch_add(1, Ordering::Relaxed) + 1;
        if pending >= self.batch_size || self.counter.limit_reached() {
            self.inner.commit_message(record, success).await?;
            self.pending.store(0, Ordering::Relaxed);
            metrics::counter!(COMMITS_FLUSHED).increment(1);
        }
        Ok(())
    }

    async fn commit_dlq(&self, record: &ConsumedRecord) -> Result<(), BrokerError> {
        // Dead letters never wait behind an unflushed commit window.
        self.inner.commit_dlq(record).await?;
        self.pending.store(0, Ordering::Relaxed);
        Ok(())
    }
}

/// Decorator retrying both operations for the transient code set.
pub struct RetryableCommitter {
    inner: Arc<dyn CommitStrategy>,
    policy: RetryPolicy,
}

impl RetryableCommitter {
    pub fn new(inner: Arc<dyn CommitStrategy>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    /// The production shape: retry only the transient commit codes.
    pub fn transient(
        inner: Arc<dyn CommitStrategy>,
        max_retries: u32,
        sleeper: Arc<dyn Sleeper>,
    ) -> Self {
        let policy = RetryPolicy::new(max_retries, sleeper)
            .with_allowed_codes(TRANSIENT_COMMIT_CODES.to_vec());
        Self::new(inner, policy)
    }
}

#[async_trait]
impl CommitStrategy for RetryableCommitter {
    async fn commit_message(
        &self,
        record: &ConsumedRecord,
        success: bool,
    ) -> Result<(), BrokerError> {
        self.policy
            .retry(|| self.inner.commit_message(record, success))
            .await
    }

    async fn commit_dlq(&self, record: &ConsumedRecord) -> Result<(), BrokerError> {
        self.policy.retry(|| self.inner.commit_dlq(record)).await
    }
}

/// On handler failure nothing is committed; instead the consumer
/// re-subscribes to its current assignment so the broker redelivers
/// from the last committed offset. Trades throughput for at-least-once
/// delivery on handler failure.
pub struct CompensatingCommitter {
    inner: Arc<dyn CommitStrategy>,
    broker: Arc<dyn BrokerConsumer>,
}

impl CompensatingCommitter {
    pub fn new(inner: Arc<dyn CommitStrategy>, broker: Arc<dyn BrokerConsumer>) -> Self {
        Self { inner, broker }
    }
}

#[async_trait]
impl CommitStrategy for CompensatingCommitter {
    async fn commit_message(
        &self,
        record: &ConsumedRecord,
        success: bool,
    ) -> Result<(), BrokerError> {
        if success {
            return self.inner.commit_message(record, true).await;
        }
        let topics = self.broker.assignment()?;
        warn!(
            "handler failure at {}:{}@{}, resubscribing to {:?} to force redelivery",
            record.topic, record.partition, record.offset, topics
        );
        self.broker.unsubscribe();
        self.broker.subscribe(&topics)
    }

    async fn commit_dlq(&self, record: &ConsumedRecord) -> Result<(), BrokerError> {
        self.inner.commit_dlq(record).await
    }
}

/// Strategy selection mirrors the configuration: trusted auto-commit
/// gets the no-op committer, everything else batches with transient
/// retry around it.
pub fn committer_for(
    auto_commit: bool,
    commit_batch_size: u32,
    max_commit_retries: u32,
    broker: Arc<dyn BrokerConsumer>,
    counter: Arc<MessageCounter>,
    sleeper: Arc<dyn Sleeper>,
) -> Arc<dyn CommitStrategy> {
    if auto_commit {
        return Arc::new(VoidCommitter);
    }
    let base = Arc::new(ImmediateCommitter::new(broker));
    let batched = Arc::new(BatchedCommitter::new(base, commit_batch_size, counter));
    Arc::new(RetryableCommitter::transient(
        batched,
        max_commit_retries,
        sleeper,
    ))
}
