use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use rdkafka::error::KafkaError;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::types::RDKafkaErrorCode;
use rdkafka::ClientConfig;
use tracing::{error, info};

use crate::config::KafkaConfig;
use crate::record::owned_headers;

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("failed to publish dead letter: {code}")]
    Publish { code: RDKafkaErrorCode },
    #[error("dead letter delivery was cancelled")]
    Cancelled,
    #[error("failed to flush dead letters: {code}")]
    Flush { code: RDKafkaErrorCode },
}

/// Producer surface for the dead letter path only. `flush` makes the
/// write durable before the caller commits the original offset.
#[async_trait]
pub trait DlqProducer: Send + Sync {
    async fn publish(
        &self,
        topic: &str,
        payload: &[u8],
        key: Option<&[u8]>,
        headers: &HashMap<String, Vec<u8>>,
    ) -> Result<(), PublishError>;

    async fn flush(&self, timeout: Duration) -> Result<(), PublishError>;
}

pub struct KafkaDlqProducer {
    producer: FutureProducer,
}

impl KafkaDlqProducer {
    pub async fn new(config: &KafkaConfig) -> Result<Self, KafkaError> {
        let mut client_config = ClientConfig::new();
        client_config
            .set("bootstrap.servers", &config.kafka_hosts)
            .set("linger.ms", config.kafka_producer_linger_ms.to_string())
            .set(
                "message.timeout.ms",
                config.kafka_message_timeout_ms.to_string(),
            )
            .set(
                "compression.codec",
                config.kafka_compression_codec.to_owned(),
            );

        if config.kafka_tls {
            client_config
                .set("security.protocol", "ssl")
                .set("enable.ssl.certificate.verification", "false");
        };

        let producer: FutureProducer = client_config.create()?;

        // "Ping" the Kafka brokers by requesting metadata
        match producer
            .client()
            .fetch_metadata(None, Duration::from_secs(15))
        {
            Ok(metadata) => {
                info!(
                    "Successfully connected to Kafka brokers. Found {} topics.",
                    metadata.topics().len()
                );
            }
            Err(err) => {
                error!("Failed to fetch metadata from Kafka brokers: {:?}", err);
                return Err(err);
            }
        }

        Ok(Self { producer })
    }
}

fn error_code(error: &KafkaError) -> RDKafkaErrorCode {
    error
        .rdkafka_error_code()
        .unwrap_or(RDKafkaErrorCode::Unknown)
}

#[async_trait]
impl DlqProducer for KafkaDlqProducer {
    async fn publish(
        &self,
        topic: &str,
        payload: &[u8],
        key: Option<&[u8]>,
        headers: &HashMap<String, Vec<u8>>,
    ) -> Result<(), PublishError> {
        let record = FutureRecord {
            topic,
            partition: None,
            payload: Some(payload),
            key,
            timestamp: None,
            headers: Some(owned_headers(headers)),
        };

        let handle = self
            .producer
            .send_result(record)
            .map_err(|(e, _)| PublishError::Publish {
                code: error_code(&e),
            })?;

        match handle.await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err((e, _))) => Err(PublishError::Publish {
                code: error_code(&e),
            }),
            Err(_) => Err(PublishError::Cancelled),
        }
    }

    async fn flush(&self, timeout: Duration) -> Result<(), PublishError> {
        self.producer
            .flush(timeout)
            .map_err(|e| PublishError::Flush {
                code: error_code(&e),
            })
    }
}
