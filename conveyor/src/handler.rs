use async_trait::async_trait;
use common_kafka::codec::DecodedRecord;

/// Outcome of running a record (or batch) through the pipeline.
/// Failures are ordinary values; errors that escape the loop are
/// reserved for fatal broker conditions.
#[derive(Debug)]
pub enum ProcessingOutcome {
    Success,
    Failure(anyhow::Error),
}

impl ProcessingOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ProcessingOutcome::Success)
    }
}

/// Terminal handler for the single-record path.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, record: &DecodedRecord) -> anyhow::Result<()>;
}

/// Terminal handler for the batching path; receives every record that
/// survived the interceptor chain in one call.
#[async_trait]
pub trait BatchHandler: Send + Sync {
    async fn handle_batch(&self, records: &[DecodedRecord]) -> anyhow::Result<()>;
}

/// Application-supplied hook consulted when a record fails. Returning
/// `true` marks the record as handled and commits it normally. An error
/// return is logged apart from the original failure and the record is
/// treated as unrecoverable.
#[async_trait]
pub trait FailureHandler: Send + Sync {
    async fn on_failure(
        &self,
        payload: &[u8],
        topic: &str,
        error: &anyhow::Error,
    ) -> anyhow::Result<bool>;
}
