use std::time::Duration;

use async_trait::async_trait;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::types::RDKafkaErrorCode;
use rdkafka::{ClientConfig, Offset, TopicPartitionList};
use tracing::{debug, info};

use crate::config::{ConsumerConfig, KafkaConfig};
use crate::record::ConsumedRecord;

#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("Kafka error: {0}")]
    Kafka(#[from] KafkaError),
    #[error("Broker error: {0}")]
    Code(RDKafkaErrorCode),
}

impl BrokerError {
    pub fn code(&self) -> Option<RDKafkaErrorCode> {
        match self {
            BrokerError::Kafka(e) => e.rdkafka_error_code(),
            BrokerError::Code(code) => Some(*code),
        }
    }

    /// Poll conditions the consumption loop swallows without interrupting:
    /// local timeouts and transient transport blips.
    pub fn is_ignorable(&self) -> bool {
        matches!(
            self.code(),
            Some(RDKafkaErrorCode::OperationTimedOut)
                | Some(RDKafkaErrorCode::BrokerTransportFailure)
                | Some(RDKafkaErrorCode::AllBrokersDown)
        )
    }
}

/// What a bounded poll produced. End-of-partition and timeouts are
/// ordinary events here, not errors, so the loop can react to them
/// without unwinding.
#[derive(Debug)]
pub enum PollEvent {
    Record(ConsumedRecord),
    Timeout,
    EndOfPartition { partition: i32 },
}

/// The narrow consumer surface the engine drives. The rdkafka client
/// behind it owns partition assignment, rebalancing and the wire
/// protocol.
#[async_trait]
pub trait BrokerConsumer: Send + Sync {
    fn subscribe(&self, topics: &[String]) -> Result<(), BrokerError>;
    async fn poll(&self, timeout: Duration) -> Result<PollEvent, BrokerError>;
    fn commit(&self, record: &ConsumedRecord) -> Result<(), BrokerError>;
    fn assignment(&self) -> Result<Vec<String>, BrokerError>;
    fn unsubscribe(&self);
}

pub struct KafkaBrokerConsumer {
    consumer: StreamConsumer,
}

impl KafkaBrokerConsumer {
    pub fn new(common: &KafkaConfig, config: &ConsumerConfig) -> Result<Self, KafkaError> {
        let mut client_config = ClientConfig::new();
        client_config
            .set("bootstrap.servers", &common.kafka_hosts)
            .set("group.id", &config.kafka_consumer_group)
            .set(
                "enable.auto.commit",
                config.kafka_consumer_auto_commit.to_string(),
            )
            .set("auto.offset.reset", &config.kafka_consumer_offset_reset)
            // Surface partition EOF as a poll event so "stop after the last
            // message" can be honored.
            .set("enable.partition.eof", "true");

        if common.kafka_tls {
            client_config
                .set("security.protocol", "ssl")
                .set("enable.ssl.certificate.verification", "false");
        };

        let consumer: StreamConsumer = client_config.create()?;
        Ok(Self { consumer })
    }
}

#[async_trait]
impl BrokerConsumer for KafkaBrokerConsumer {
    fn subscribe(&self, topics: &[String]) -> Result<(), BrokerError> {
        let refs: Vec<&str> = topics.iter().map(String::as_str).collect();
        self.consumer.subscribe(&refs)?;
        info!("Subscribed to topics: {:?}", topics);
        Ok(())
    }

    async fn poll(&self, timeout: Duration) -> Result<PollEvent, BrokerError> {
        match tokio::time::timeout(timeout, self.consumer.recv()).await {
            Ok(Ok(message)) => Ok(PollEvent::Record(ConsumedRecord::from_borrowed(&message))),
            Ok(Err(KafkaError::PartitionEOF(partition))) => {
                debug!("Reached end of partition {}", partition);
                Ok(PollEvent::EndOfPartition { partition })
            }
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Ok(PollEvent::Timeout),
        }
    }

    fn commit(&self, record: &ConsumedRecord) -> Result<(), BrokerError> {
        let mut tpl = TopicPartitionList::new();
        tpl.add_partition_offset(
            &record.topic,
            record.partition,
            Offset::Offset(record.offset + 1),
        )?;
        self.consumer.commit(&tpl, CommitMode::Sync)?;
        debug!(
            "Committed offset {} for {}:{}",
            record.offset + 1,
            record.topic,
            record.partition
        );
        Ok(())
    }

    fn assignment(&self) -> Result<Vec<String>, BrokerError> {
        let assignment = self.consumer.assignment()?;
        let mut topics: Vec<String> = assignment
            .elements()
            .iter()
            .map(|elem| elem.topic().to_string())
            .collect();
        topics.sort();
        topics.dedup();
        Ok(topics)
    }

    fn unsubscribe(&self) {
        self.consumer.unsubscribe();
    }
}
