use std::sync::Arc;
use std::time::Duration;

use common_kafka::codec::{JsonCodec, RecordCodec};
use common_kafka::consumer::BrokerConsumer;
use common_kafka::producer::DlqProducer;

use crate::batch::{BatchAggregator, Clock, SystemClock};
use crate::commit::{committer_for, CommitStrategy};
use crate::config::Config;
use crate::consumer_loop::{ConsumptionLoop, Dispatch, LoopState, StopHandle};
use crate::counter::MessageCounter;
use crate::dlq::DeadLetterRouter;
use crate::error::BuildError;
use crate::handler::{BatchHandler, FailureHandler, Handler};
use crate::middleware::{
    BatchMiddlewarePipeline, Middleware, MiddlewarePipeline, MiddlewareRegistry,
};
use crate::restart::RestartStore;
use crate::retry::{Sleeper, TokioSleeper};

/// Assembles a `ConsumptionLoop` from configuration plus the
/// application's collaborators. Misconfiguration (missing handler,
/// unknown middleware name) surfaces here, before the loop runs.
pub struct ConsumptionLoopBuilder {
    config: Config,
    broker: Option<Arc<dyn BrokerConsumer>>,
    codec: Arc<dyn RecordCodec>,
    handler: Option<Arc<dyn Handler>>,
    batch_handler: Option<Arc<dyn BatchHandler>>,
    failure_handler: Option<Arc<dyn FailureHandler>>,
    dlq_producer: Option<Arc<dyn DlqProducer>>,
    restart_store: Option<Arc<dyn RestartStore>>,
    registry: MiddlewareRegistry,
    middleware_names: Vec<String>,
    committer: Option<Arc<dyn CommitStrategy>>,
    sleeper: Arc<dyn Sleeper>,
    clock: Arc<dyn Clock>,
    stop: StopHandle,
    on_stop: Option<Box<dyn FnOnce() + Send>>,
}

impl ConsumptionLoopBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            broker: None,
            codec: Arc::new(JsonCodec),
            handler: None,
            batch_handler: None,
            failure_handler: None,
            dlq_producer: None,
            restart_store: None,
            registry: MiddlewareRegistry::new(),
            middleware_names: Vec::new(),
            committer: None,
            sleeper: Arc::new(TokioSleeper),
            clock: Arc::new(SystemClock),
            stop: StopHandle::default(),
            on_stop: None,
        }
    }

    pub fn with_broker(mut self, broker: Arc<dyn BrokerConsumer>) -> Self {
        self.broker = Some(broker);
        self
    }

    pub fn with_codec(mut self, codec: Arc<dyn RecordCodec>) -> Self {
        self.codec = codec;
        self
    }

    pub fn with_handler(mut self, handler: Arc<dyn Handler>) -> Self {
        self.handler = Some(handler);
        self
    }

    pub fn with_batch_handler(mut self, handler: Arc<dyn BatchHandler>) -> Self {
        self.batch_handler = Some(handler);
        self
    }

    pub fn with_failure_handler(mut self, handler: Arc<dyn FailureHandler>) -> Self {
        self.failure_handler = Some(handler);
        self
    }

    pub fn with_dlq_producer(mut self, producer: Arc<dyn DlqProducer>) -> Self {
        self.dlq_producer = Some(producer);
        self
    }

    pub fn with_restart_store(mut self, store: Arc<dyn RestartStore>) -> Self {
        self.restart_store = Some(store);
        self
    }

    pub fn register_middleware(mut self, name: &str, middleware: Arc<dyn Middleware>) -> Self {
        self.registry.register(name, middleware);
        self
    }

    /// Names resolved against the registry at build time, in dispatch
    /// order.
    pub fn with_middleware_names(mut self, names: Vec<String>) -> Self {
        self.middleware_names = names;
        self
    }

    /// Overrides the strategy the factory would pick from config.
    pub fn with_committer(mut self, committer: Arc<dyn CommitStrategy>) -> Self {
        self.committer = Some(committer);
        self
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Shares a stop flag created up front, so handlers and signal
    /// tasks can hold it before the loop exists.
    pub fn with_stop_handle(mut self, stop: StopHandle) -> Self {
        self.stop = stop;
        self
    }

    pub fn on_stop(mut self, callback: Box<dyn FnOnce() + Send>) -> Self {
        self.on_stop = Some(callback);
        self
    }

    pub fn build(self) -> Result<ConsumptionLoop, BuildError> {
        let config = self.config;
        let broker = self.broker.ok_or(BuildError::Missing("broker consumer"))?;
        let counter = Arc::new(MessageCounter::new(config.max_messages()));

        let committer = match self.committer {
            Some(committer) => committer,
            None => committer_for(
                config.consumer.kafka_consumer_auto_commit,
                config.commit_batch_size,
                config.max_commit_retries,
                broker.clone(),
                counter.clone(),
                self.sleeper,
            ),
        };

        let interceptors = self.registry.resolve(&self.middleware_names)?;
        let dispatch = if config.batching_enabled {
            let handler = self
                .batch_handler
                .ok_or(BuildError::Missing("batch handler"))?;
            Dispatch::Batched {
                pipeline: BatchMiddlewarePipeline::new(interceptors, handler),
                aggregator: BatchAggregator::new(
                    config.batch_size_limit,
                    Duration::from_millis(config.batch_release_interval_ms),
                    self.clock.clone(),
                ),
            }
        } else {
            let handler = self.handler.ok_or(BuildError::Missing("record handler"))?;
            Dispatch::Single(MiddlewarePipeline::new(interceptors, handler))
        };

        let dlq = match &config.dead_letter_topic {
            Some(topic) => {
                let producer = self
                    .dlq_producer
                    .ok_or(BuildError::Missing("dead letter producer"))?;
                Some(DeadLetterRouter::new(
                    producer,
                    topic.clone(),
                    Duration::from_millis(config.dead_letter_flush_timeout_ms),
                ))
            }
            None => None,
        };

        Ok(ConsumptionLoop {
            broker,
            codec: self.codec,
            committer,
            dispatch,
            failure_handler: self.failure_handler,
            dlq,
            counter,
            topics: config.consumer.topics(),
            poll_timeout: Duration::from_millis(config.poll_timeout_ms),
            max_time: config.max_time(),
            stop_after_last_message: config.stop_after_last_message,
            restart_store: self.restart_store,
            restart_interval: Duration::from_millis(config.restart_check_interval_ms),
            clock: self.clock,
            stop: self.stop,
            on_stop: self.on_stop,
            state: LoopState::Idle,
        })
    }
}

#[cfg(test)]
mod tests {
    use common_kafka::test::MockBroker;

    use super::*;
    use crate::test_utils::test_config;

    #[test]
    fn test_build_fails_without_a_broker() {
        let result = ConsumptionLoopBuilder::new(test_config()).build();
        assert!(matches!(result, Err(BuildError::Missing("broker consumer"))));
    }

    #[test]
    fn test_build_fails_without_a_handler() {
        let result = ConsumptionLoopBuilder::new(test_config())
            .with_broker(Arc::new(MockBroker::new()))
            .build();
        assert!(matches!(result, Err(BuildError::Missing("record handler"))));
    }

    #[test]
    fn test_unknown_middleware_name_is_a_build_error() {
        struct Noop;

        #[async_trait::async_trait]
        impl crate::handler::Handler for Noop {
            async fn handle(
                &self,
                _record: &common_kafka::codec::DecodedRecord,
            ) -> anyhow::Result<()> {
                Ok(())
            }
        }

        let result = ConsumptionLoopBuilder::new(test_config())
            .with_broker(Arc::new(MockBroker::new()))
            .with_handler(Arc::new(Noop))
            .with_middleware_names(vec!["does_not_exist".to_string()])
            .build();
        assert!(matches!(result, Err(BuildError::Middleware(_))));
    }

    #[test]
    fn test_batching_requires_a_batch_handler() {
        let mut config = test_config();
        config.batching_enabled = true;

        let result = ConsumptionLoopBuilder::new(config)
            .with_broker(Arc::new(MockBroker::new()))
            .build();
        assert!(matches!(result, Err(BuildError::Missing("batch handler"))));
    }
}
