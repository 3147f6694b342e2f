use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use common_kafka::codec::RecordCodec;
use common_kafka::consumer::{BrokerConsumer, PollEvent};
use common_kafka::record::ConsumedRecord;
use tracing::{debug, error, info, warn};

use crate::batch::{BatchAggregator, Clock};
use crate::commit::CommitStrategy;
use crate::counter::MessageCounter;
use crate::dlq::DeadLetterRouter;
use crate::error::LoopError;
use crate::handler::{FailureHandler, ProcessingOutcome};
use crate::metric_consts::{
    LOOP_STOPS, RECORDS_FAILED, RECORDS_PROCESSED, RECORDS_RECEIVED,
};
use crate::middleware::{BatchMiddlewarePipeline, MiddlewarePipeline};
use crate::restart::{RestartStore, RestartWatcher};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Running,
    Draining,
    Stopped,
}

/// Cloneable stop flag, safe to trip from handlers, signal tasks or
/// other threads. Observed between poll/dispatch cycles, never
/// pre-empting an in-flight record.
#[derive(Clone, Default)]
pub struct StopHandle {
    flag: Arc<AtomicBool>,
}

impl StopHandle {
    pub fn request_stop(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_stop_requested(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

pub(crate) enum Dispatch {
    Single(MiddlewarePipeline),
    Batched {
        pipeline: BatchMiddlewarePipeline,
        aggregator: BatchAggregator,
    },
}

/// The consume-process-acknowledge driver. One instance owns one
/// partition assignment and processes it sequentially; the only
/// blocking operation is the bounded broker poll, so stop and restart
/// conditions are re-checked even with no traffic.
pub struct ConsumptionLoop {
    pub(crate) broker: Arc<dyn BrokerConsumer>,
    pub(crate) codec: Arc<dyn RecordCodec>,
    pub(crate) committer: Arc<dyn CommitStrategy>,
    pub(crate) dispatch: Dispatch,
    pub(crate) failure_handler: Option<Arc<dyn FailureHandler>>,
    pub(crate) dlq: Option<DeadLetterRouter>,
    pub(crate) counter: Arc<MessageCounter>,
    pub(crate) topics: Vec<String>,
    pub(crate) poll_timeout: Duration,
    pub(crate) max_time: Option<Duration>,
    pub(crate) stop_after_last_message: bool,
    pub(crate) restart_store: Option<Arc<dyn RestartStore>>,
    pub(crate) restart_interval: Duration,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) stop: StopHandle,
    pub(crate) on_stop: Option<Box<dyn FnOnce() + Send>>,
    pub(crate) state: LoopState,
}

impl ConsumptionLoop {
    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn consumed_count(&self) -> u64 {
        self.counter.count()
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn request_stop(&self) {
        self.stop.request_stop();
    }

    /// Blocks until a stop condition is met: max messages consumed, max
    /// wall-clock time exceeded, stop requested, the restart signal
    /// changed, or end-of-partition with the stop-after-last option.
    /// The on-stop callback runs exactly once after the loop quiesces,
    /// on the error path too.
    pub async fn run(&mut self) -> Result<(), LoopError> {
        self.state = LoopState::Running;
        self.broker.subscribe(&self.topics)?;
        info!("consumption loop started on {:?}", self.topics);

        let mut watcher = match &self.restart_store {
            Some(store) => Some(
                RestartWatcher::start(store.clone(), self.restart_interval, self.clock.clone())
                    .await,
            ),
            None => None,
        };

        let result = self.drive(&mut watcher).await;

        self.state = LoopState::Draining;
        let drained = self.drain().await;
        self.broker.unsubscribe();
        self.state = LoopState::Stopped;
        metrics::counter!(LOOP_STOPS).increment(1);
        info!(
            "consumption loop stopped after {} records",
            self.counter.count()
        );
        if let Some(on_stop) = self.on_stop.take() {
            on_stop();
        }
        result.and(drained)
    }

    async fn drive(&mut self, watcher: &mut Option<RestartWatcher>) -> Result<(), LoopError> {
        let started = self.clock.now();
        loop {
            if self.stop.is_stop_requested() {
                info!("stop requested, draining");
                return Ok(());
            }
            if self.counter.limit_reached() {
                info!("max message count reached, draining");
                return Ok(());
            }
            if let Some(max_time) = self.max_time {
                if self.clock.now().duration_since(started) >= max_time {
                    info!("max run time reached, draining");
                    return Ok(());
                }
            }

            match self.broker.poll(self.poll_timeout).await {
                Ok(PollEvent::Record(record)) => {
                    self.counter.record();
                    metrics::counter!(RECORDS_RECEIVED).increment(1);
                    self.on_record(record).await?;
                }
                Ok(PollEvent::Timeout) => {
                    self.on_idle().await?;
                }
                Ok(PollEvent::EndOfPartition { partition }) => {
                    debug!("reached end of partition {}", partition);
                    if self.stop_after_last_message {
                        self.stop.request_stop();
                    }
                    self.on_idle().await?;
                }
                Err(e) if e.is_ignorable() => {
                    debug!("ignoring broker condition: {}", e);
                    self.on_idle().await?;
                }
                Err(e) => {
                    error!("fatal broker error: {}", e);
                    return Err(e.into());
                }
            }

            if let Some(watcher) = watcher.as_mut() {
                if watcher.restart_requested().await {
                    self.stop.request_stop();
                }
            }
        }
    }

    async fn on_record(&mut self, record: ConsumedRecord) -> Result<(), LoopError> {
        if let Dispatch::Batched { aggregator, .. } = &mut self.dispatch {
            aggregator.push(record);
            return self.evaluate_release().await;
        }

        match self.codec.decode(record.clone()) {
            Ok(decoded) => {
                let Dispatch::Single(pipeline) = &self.dispatch else {
                    return Ok(());
                };
                match pipeline.dispatch(&decoded).await {
                    ProcessingOutcome::Success => self.finalize_success(&record).await,
                    ProcessingOutcome::Failure(error) => {
                        self.finalize_failure(&record, &error).await
                    }
                }
            }
            Err(e) => self.finalize_failure(&record, &anyhow::Error::new(e)).await,
        }
    }

    /// Timeouts, end-of-partition and swallowed broker conditions still
    /// advance the batch timer; time may have elapsed with no records.
    async fn on_idle(&mut self) -> Result<(), LoopError> {
        self.evaluate_release().await
    }

    async fn evaluate_release(&mut self) -> Result<(), LoopError> {
        let released = match &mut self.dispatch {
            Dispatch::Batched { aggregator, .. } => {
                if aggregator.should_release() {
                    Some(aggregator.release())
                } else {
                    aggregator.restart_timer_if_expired();
                    None
                }
            }
            Dispatch::Single(_) => None,
        };
        match released {
            Some(records) => self.process_batch(records).await,
            None => Ok(()),
        }
    }

    async fn process_batch(&self, records: Vec<ConsumedRecord>) -> Result<(), LoopError> {
        let Dispatch::Batched { pipeline, .. } = &self.dispatch else {
            return Ok(());
        };

        let mut decoded = Vec::with_capacity(records.len());
        for record in &records {
            match self.codec.decode(record.clone()) {
                Ok(d) => decoded.push(d),
                Err(e) => {
                    self.finalize_failure(record, &anyhow::Error::new(e))
                        .await?;
                }
            }
        }
        if decoded.is_empty() {
            return Ok(());
        }

        match pipeline.dispatch_batch(&decoded).await {
            ProcessingOutcome::Success => {
                for d in &decoded {
                    self.finalize_success(&d.record).await?;
                }
            }
            ProcessingOutcome::Failure(error) => {
                for d in &decoded {
                    self.finalize_failure(&d.record, &error).await?;
                }
            }
        }
        Ok(())
    }

    /// Flushes any leftover batch once the loop has decided to stop, so
    /// buffered records are not silently dropped.
    async fn drain(&mut self) -> Result<(), LoopError> {
        let leftover = match &mut self.dispatch {
            Dispatch::Batched { aggregator, .. } if !aggregator.is_empty() => {
                Some(aggregator.release())
            }
            _ => None,
        };
        match leftover {
            Some(records) => self.process_batch(records).await,
            None => Ok(()),
        }
    }

    async fn finalize_success(&self, record: &ConsumedRecord) -> Result<(), LoopError> {
        metrics::counter!(RECORDS_PROCESSED).increment(1);
        self.committer.commit_message(record, true).await?;
        Ok(())
    }

    async fn finalize_failure(
        &self,
        record: &ConsumedRecord,
        error: &anyhow::Error,
    ) -> Result<(), LoopError> {
        metrics::counter!(RECORDS_FAILED).increment(1);
        warn!(
            "processing failed for {}:{}@{}: {:#}",
            record.topic, record.partition, record.offset, error
        );

        let handled = match &self.failure_handler {
            Some(handler) => {
                match handler
                    .on_failure(&record.payload, &record.topic, error)
                    .await
                {
                    Ok(handled) => handled,
                    Err(handler_error) => {
                        error!(
                            "failure handler errored for {}:{}@{}: {:#}",
                            record.topic, record.partition, record.offset, handler_error
                        );
                        false
                    }
                }
            }
            None => false,
        };
        if handled {
            self.committer.commit_message(record, true).await?;
            return Ok(());
        }

        match &self.dlq {
            Some(router) => {
                router.send(record).await?;
                self.committer.commit_dlq(record).await?;
            }
            None => {
                warn!(
                    "no dead letter topic configured, committing {}:{}@{} as processed",
                    record.topic, record.partition, record.offset
                );
                self.committer.commit_message(record, false).await?;
            }
        }
        Ok(())
    }
}
