use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common_kafka::consumer::BrokerError;
use common_kafka::RDKafkaErrorCode;
use tracing::debug;

use crate::metric_consts::RETRY_SLEEPS;

/// Sleeping is injected so backoff is deterministic under test.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, delay: Duration);
}

pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, delay: Duration) {
        tokio::time::sleep(delay).await;
    }
}

/// Errors put through a retry policy expose the broker error code the
/// allow-list is matched against; `None` means the error carries no
/// code and only retries when no allow-list is configured.
pub trait RetryClass {
    fn retry_code(&self) -> Option<RDKafkaErrorCode>;
}

impl RetryClass for BrokerError {
    fn retry_code(&self) -> Option<RDKafkaErrorCode> {
        self.code()
    }
}

impl RetryClass for anyhow::Error {
    fn retry_code(&self) -> Option<RDKafkaErrorCode> {
        None
    }
}

/// Bounded retry with optional exponential backoff and an optional
/// allow-list of transient error codes.
#[derive(Clone)]
pub struct RetryPolicy {
    max_retries: u32,
    initial_delay: Duration,
    exponential: bool,
    allowed_codes: Option<Vec<RDKafkaErrorCode>>,
    sleeper: Arc<dyn Sleeper>,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, sleeper: Arc<dyn Sleeper>) -> Self {
        Self {
            max_retries,
            initial_delay: Duration::from_secs(1),
            exponential: true,
            allowed_codes: None,
            sleeper,
        }
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_fixed_delay(mut self) -> Self {
        self.exponential = false;
        self
    }

    pub fn with_allowed_codes(mut self, codes: Vec<RDKafkaErrorCode>) -> Self {
        self.allowed_codes = Some(codes);
        self
    }

    /// Runs `op` until it succeeds, retries are exhausted, or the error
    /// falls outside the allow-list. The final error is returned
    /// unchanged.
    pub async fn retry<T, E, Op, Fut>(&self, mut op: Op) -> Result<T, E>
    where
        Op: FnMut() -> Fut + Send,
        Fut: Future<Output = Result<T, E>> + Send,
        E: RetryClass,
    {
        let mut attempt: u32 = 0;
        let mut delay = self.initial_delay;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(error) => {
                    if attempt >= self.max_retries || !self.retryable(&error) {
                        return Err(error);
                    }
                    debug!(
                        "retrying after failure, attempt {} of {}",
                        attempt + 1,
                        self.max_retries
                    );
                    metrics::counter!(RETRY_SLEEPS).increment(1);
                    self.sleeper.sleep(delay).await;
                    if self.exponential {
                        delay *= 2;
                    }
                    attempt += 1;
                }
            }
        }
    }

    fn retryable<E: RetryClass>(&self, error: &E) -> bool {
        match &self.allowed_codes {
            None => true,
            Some(codes) => error
                .retry_code()
                .is_some_and(|code| codes.contains(&code)),
        }
    }
}
