use std::sync::Arc;
use std::time::Duration;

use common_kafka::producer::{DlqProducer, PublishError};
use common_kafka::record::ConsumedRecord;
use tracing::warn;

use crate::metric_consts::RECORDS_DEAD_LETTERED;

/// Forwards failed records to the dead letter topic. The flush is
/// synchronous and bounded so the dead letter write is durable before
/// the original offset is committed.
pub struct DeadLetterRouter {
    producer: Arc<dyn DlqProducer>,
    topic: String,
    flush_timeout: Duration,
}

impl DeadLetterRouter {
    pub fn new(producer: Arc<dyn DlqProducer>, topic: String, flush_timeout: Duration) -> Self {
        Self {
            producer,
            topic,
            flush_timeout,
        }
    }

    /// Publishes the record's raw payload, key and headers unchanged.
    pub async fn send(&self, record: &ConsumedRecord) -> Result<(), PublishError> {
        warn!(
            "dead lettering {}:{}@{} to {}",
            record.topic, record.partition, record.offset, self.topic
        );
        self.producer
            .publish(
                &self.topic,
                &record.payload,
                record.key.as_deref(),
                &record.headers,
            )
            .await?;
        self.producer.flush(self.flush_timeout).await?;
        metrics::counter!(RECORDS_DEAD_LETTERED).increment(1);
        Ok(())
    }
}
