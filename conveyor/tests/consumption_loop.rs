use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use common_kafka::codec::DecodedRecord;
use common_kafka::consumer::PollEvent;
use common_kafka::test::{test_record, MockBroker, MockDlqProducer};
use common_kafka::RDKafkaErrorCode;

use conveyor::builder::ConsumptionLoopBuilder;
use conveyor::config::Config;
use conveyor::consumer_loop::{LoopState, StopHandle};
use conveyor::handler::{BatchHandler, FailureHandler, Handler};
use conveyor::restart::RestartStore;
use conveyor::test_utils::{test_config, MockSleeper, RecordingCommitter};

fn config_with_max(max_messages: u64) -> Config {
    let mut config = test_config();
    config.max_messages = max_messages;
    config
}

#[derive(Default)]
struct CountingHandler {
    offsets: Mutex<Vec<i64>>,
}

impl CountingHandler {
    fn offsets(&self) -> Vec<i64> {
        self.offsets.lock().unwrap().clone()
    }
}

#[async_trait]
impl Handler for CountingHandler {
    async fn handle(&self, record: &DecodedRecord) -> anyhow::Result<()> {
        self.offsets.lock().unwrap().push(record.record.offset);
        Ok(())
    }
}

struct FailingHandler;

#[async_trait]
impl Handler for FailingHandler {
    async fn handle(&self, _record: &DecodedRecord) -> anyhow::Result<()> {
        Err(anyhow::anyhow!("handler rejected the record"))
    }
}

struct StoppingHandler {
    stop: StopHandle,
}

#[async_trait]
impl Handler for StoppingHandler {
    async fn handle(&self, _record: &DecodedRecord) -> anyhow::Result<()> {
        self.stop.request_stop();
        Ok(())
    }
}

struct ScriptedFailureHandler {
    handled: bool,
    calls: AtomicU32,
}

impl ScriptedFailureHandler {
    fn new(handled: bool) -> Self {
        Self {
            handled,
            calls: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl FailureHandler for ScriptedFailureHandler {
    async fn on_failure(
        &self,
        _payload: &[u8],
        _topic: &str,
        _error: &anyhow::Error,
    ) -> anyhow::Result<bool> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        Ok(self.handled)
    }
}

#[derive(Default)]
struct CollectingBatchHandler {
    batches: Mutex<Vec<Vec<i64>>>,
}

impl CollectingBatchHandler {
    fn batches(&self) -> Vec<Vec<i64>> {
        self.batches.lock().unwrap().clone()
    }
}

#[async_trait]
impl BatchHandler for CollectingBatchHandler {
    async fn handle_batch(&self, records: &[DecodedRecord]) -> anyhow::Result<()> {
        self.batches
            .lock()
            .unwrap()
            .push(records.iter().map(|r| r.record.offset).collect());
        Ok(())
    }
}

#[tokio::test]
async fn test_consumed_count_matches_record_count() {
    let broker = Arc::new(MockBroker::new());
    for offset in 0..5 {
        broker.enqueue_record(test_record("events", 0, offset, b"{\"n\":1}"));
    }

    let handler = Arc::new(CountingHandler::default());
    let mut consumption_loop = ConsumptionLoopBuilder::new(config_with_max(5))
        .with_broker(broker.clone())
        .with_handler(handler.clone())
        .build()
        .unwrap();

    consumption_loop.run().await.unwrap();

    assert_eq!(consumption_loop.consumed_count(), 5);
    assert_eq!(consumption_loop.state(), LoopState::Stopped);
    assert_eq!(handler.offsets(), vec![0, 1, 2, 3, 4]);
    assert_eq!(broker.committed_offsets(), vec![0, 1, 2, 3, 4]);
}

#[tokio::test]
async fn test_stop_requested_mid_handler_finishes_current_record_only() {
    let broker = Arc::new(MockBroker::new());
    broker.enqueue_record(test_record("events", 0, 0, b"{}"));
    broker.enqueue_record(test_record("events", 0, 1, b"{}"));

    let stop = StopHandle::default();
    let mut consumption_loop = ConsumptionLoopBuilder::new(test_config())
        .with_broker(broker)
        .with_stop_handle(stop.clone())
        .with_handler(Arc::new(StoppingHandler { stop }))
        .build()
        .unwrap();

    consumption_loop.run().await.unwrap();

    assert_eq!(consumption_loop.consumed_count(), 1);
}

#[tokio::test]
async fn test_unrecoverable_failure_goes_to_dlq_exactly_once() {
    let broker = Arc::new(MockBroker::new());
    broker.enqueue_record(test_record("events", 0, 0, b"{\"bad\":true}"));

    let mut config = config_with_max(1);
    config.dead_letter_topic = Some("events_dlq".to_string());

    let producer = Arc::new(MockDlqProducer::new());
    let committer = Arc::new(RecordingCommitter::default());
    let failure_handler = Arc::new(ScriptedFailureHandler::new(false));
    let mut consumption_loop = ConsumptionLoopBuilder::new(config)
        .with_broker(broker)
        .with_handler(Arc::new(FailingHandler))
        .with_failure_handler(failure_handler.clone())
        .with_dlq_producer(producer.clone())
        .with_committer(committer.clone())
        .build()
        .unwrap();

    consumption_loop.run().await.unwrap();

    let published = producer.published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].topic, "events_dlq");
    assert_eq!(published[0].payload, b"{\"bad\":true}");
    assert_eq!(producer.flush_count(), 1);
    assert_eq!(failure_handler.calls.load(Ordering::Relaxed), 1);
    // DLQ path commit only, never a normal-path commit
    assert_eq!(committer.dlq_commits(), vec![0]);
    assert!(committer.message_commits().is_empty());
}

#[tokio::test]
async fn test_failure_handled_by_failure_handler_commits_normally() {
    let broker = Arc::new(MockBroker::new());
    broker.enqueue_record(test_record("events", 0, 0, b"{}"));

    let mut config = config_with_max(1);
    config.dead_letter_topic = Some("events_dlq".to_string());

    let producer = Arc::new(MockDlqProducer::new());
    let committer = Arc::new(RecordingCommitter::default());
    let mut consumption_loop = ConsumptionLoopBuilder::new(config)
        .with_broker(broker)
        .with_handler(Arc::new(FailingHandler))
        .with_failure_handler(Arc::new(ScriptedFailureHandler::new(true)))
        .with_dlq_producer(producer.clone())
        .with_committer(committer.clone())
        .build()
        .unwrap();

    consumption_loop.run().await.unwrap();

    assert!(producer.published().is_empty());
    assert_eq!(committer.message_commits(), vec![(0, true)]);
    assert!(committer.dlq_commits().is_empty());
}

#[tokio::test]
async fn test_failed_record_without_dlq_is_committed_as_processed() {
    let broker = Arc::new(MockBroker::new());
    broker.enqueue_record(test_record("events", 0, 0, b"{}"));

    // default Retryable(Batched(Immediate)) chain, no dead letter topic
    let mut consumption_loop = ConsumptionLoopBuilder::new(config_with_max(1))
        .with_broker(broker.clone())
        .with_handler(Arc::new(FailingHandler))
        .build()
        .unwrap();

    consumption_loop.run().await.unwrap();

    // at-most-once on error: the failure is acknowledged, not redelivered
    assert_eq!(broker.committed_offsets(), vec![0]);
}

#[tokio::test]
async fn test_decode_failure_routes_to_the_failure_path() {
    let broker = Arc::new(MockBroker::new());
    broker.enqueue_record(test_record("events", 0, 0, b"not json"));

    let mut config = config_with_max(1);
    config.dead_letter_topic = Some("events_dlq".to_string());

    let producer = Arc::new(MockDlqProducer::new());
    let handler = Arc::new(CountingHandler::default());
    let committer = Arc::new(RecordingCommitter::default());
    let mut consumption_loop = ConsumptionLoopBuilder::new(config)
        .with_broker(broker)
        .with_handler(handler.clone())
        .with_dlq_producer(producer.clone())
        .with_committer(committer.clone())
        .build()
        .unwrap();

    consumption_loop.run().await.unwrap();

    assert!(handler.offsets().is_empty());
    assert_eq!(producer.published().len(), 1);
    assert_eq!(committer.dlq_commits(), vec![0]);
}

#[tokio::test]
async fn test_restart_signal_change_stops_the_loop() {
    struct FlippingStore {
        reads: AtomicU32,
    }

    #[async_trait]
    impl RestartStore for FlippingStore {
        async fn read(&self) -> Option<String> {
            match self.reads.fetch_add(1, Ordering::Relaxed) {
                0 => Some("1700000000".to_string()),
                _ => Some("1700000099".to_string()),
            }
        }
    }

    let mut config = test_config();
    config.restart_check_interval_ms = 0;

    let mut consumption_loop = ConsumptionLoopBuilder::new(config)
        .with_broker(Arc::new(MockBroker::new()))
        .with_handler(Arc::new(CountingHandler::default()))
        .with_restart_store(Arc::new(FlippingStore {
            reads: AtomicU32::new(0),
        }))
        .build()
        .unwrap();

    consumption_loop.run().await.unwrap();

    assert_eq!(consumption_loop.consumed_count(), 0);
    assert_eq!(consumption_loop.state(), LoopState::Stopped);
}

#[tokio::test]
async fn test_end_of_partition_stops_when_configured() {
    let broker = Arc::new(MockBroker::new());
    broker.enqueue_record(test_record("events", 0, 0, b"{}"));
    broker.enqueue_record(test_record("events", 0, 1, b"{}"));
    broker.enqueue_event(PollEvent::EndOfPartition { partition: 0 });

    let mut config = test_config();
    config.stop_after_last_message = true;

    let handler = Arc::new(CountingHandler::default());
    let mut consumption_loop = ConsumptionLoopBuilder::new(config)
        .with_broker(broker)
        .with_handler(handler.clone())
        .build()
        .unwrap();

    consumption_loop.run().await.unwrap();

    assert_eq!(consumption_loop.consumed_count(), 2);
    assert_eq!(handler.offsets(), vec![0, 1]);
}

#[tokio::test]
async fn test_ignorable_broker_errors_do_not_interrupt() {
    let broker = Arc::new(MockBroker::new());
    broker.enqueue_record(test_record("events", 0, 0, b"{}"));
    broker.enqueue_error(RDKafkaErrorCode::BrokerTransportFailure);
    broker.enqueue_record(test_record("events", 0, 1, b"{}"));

    let handler = Arc::new(CountingHandler::default());
    let mut consumption_loop = ConsumptionLoopBuilder::new(config_with_max(2))
        .with_broker(broker)
        .with_handler(handler.clone())
        .build()
        .unwrap();

    consumption_loop.run().await.unwrap();

    assert_eq!(handler.offsets(), vec![0, 1]);
}

#[tokio::test]
async fn test_fatal_broker_error_terminates_run() {
    let broker = Arc::new(MockBroker::new());
    broker.enqueue_record(test_record("events", 0, 0, b"{}"));
    broker.enqueue_error(RDKafkaErrorCode::InvalidGroupId);

    let stopped = Arc::new(AtomicBool::new(false));
    let stopped_flag = stopped.clone();
    let mut consumption_loop = ConsumptionLoopBuilder::new(test_config())
        .with_broker(broker)
        .with_handler(Arc::new(CountingHandler::default()))
        .on_stop(Box::new(move || {
            stopped_flag.store(true, Ordering::SeqCst);
        }))
        .build()
        .unwrap();

    let result = consumption_loop.run().await;

    assert!(result.is_err());
    assert_eq!(consumption_loop.state(), LoopState::Stopped);
    // the on-stop callback still fires on the error path
    assert!(stopped.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_batching_releases_at_size_limit() {
    let broker = Arc::new(MockBroker::new());
    for offset in 0..4 {
        broker.enqueue_record(test_record("events", 0, offset, b"{}"));
    }

    let mut config = config_with_max(4);
    config.batching_enabled = true;
    config.batch_size_limit = 2;
    config.batch_release_interval_ms = 60_000;

    let handler = Arc::new(CollectingBatchHandler::default());
    let mut consumption_loop = ConsumptionLoopBuilder::new(config)
        .with_broker(broker.clone())
        .with_batch_handler(handler.clone())
        .build()
        .unwrap();

    consumption_loop.run().await.unwrap();

    assert_eq!(handler.batches(), vec![vec![0, 1], vec![2, 3]]);
    assert_eq!(broker.committed_offsets(), vec![0, 1, 2, 3]);
}

#[tokio::test]
async fn test_stop_drains_a_partial_batch() {
    let broker = Arc::new(MockBroker::new());
    for offset in 0..3 {
        broker.enqueue_record(test_record("events", 0, offset, b"{}"));
    }

    let mut config = config_with_max(3);
    config.batching_enabled = true;
    config.batch_size_limit = 10;
    config.batch_release_interval_ms = 60_000;

    let handler = Arc::new(CollectingBatchHandler::default());
    let mut consumption_loop = ConsumptionLoopBuilder::new(config)
        .with_broker(broker)
        .with_batch_handler(handler.clone())
        .build()
        .unwrap();

    consumption_loop.run().await.unwrap();

    // nothing hit the size limit; the drain flushed the leftovers
    assert_eq!(handler.batches(), vec![vec![0, 1, 2]]);
}

#[tokio::test]
async fn test_transient_commit_failure_is_retried() {
    let broker = Arc::new(MockBroker::new());
    broker.enqueue_record(test_record("events", 0, 0, b"{}"));
    broker.fail_next_commit(RDKafkaErrorCode::RebalanceInProgress);

    let sleeper = Arc::new(MockSleeper::default());
    let mut consumption_loop = ConsumptionLoopBuilder::new(config_with_max(1))
        .with_broker(broker.clone())
        .with_handler(Arc::new(CountingHandler::default()))
        .with_sleeper(sleeper.clone())
        .build()
        .unwrap();

    consumption_loop.run().await.unwrap();

    assert_eq!(broker.committed_offsets(), vec![0]);
    assert_eq!(sleeper.sleeps(), vec![Duration::from_secs(1)]);
}

#[tokio::test]
async fn test_on_stop_callback_runs_exactly_once() {
    let broker = Arc::new(MockBroker::new());
    broker.enqueue_record(test_record("events", 0, 0, b"{}"));

    let calls = Arc::new(AtomicU32::new(0));
    let calls_in_callback = calls.clone();
    let mut consumption_loop = ConsumptionLoopBuilder::new(config_with_max(1))
        .with_broker(broker)
        .with_handler(Arc::new(CountingHandler::default()))
        .on_stop(Box::new(move || {
            calls_in_callback.fetch_add(1, Ordering::SeqCst);
        }))
        .build()
        .unwrap();

    consumption_loop.run().await.unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_max_time_stops_an_idle_loop() {
    let mut config = test_config();
    config.max_time_seconds = 1;
    config.poll_timeout_ms = 50;

    let mut consumption_loop = ConsumptionLoopBuilder::new(config)
        .with_broker(Arc::new(MockBroker::new()))
        .with_handler(Arc::new(CountingHandler::default()))
        .build()
        .unwrap();

    consumption_loop.run().await.unwrap();

    assert_eq!(consumption_loop.consumed_count(), 0);
    assert_eq!(consumption_loop.state(), LoopState::Stopped);
}
