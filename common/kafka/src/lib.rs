pub mod codec;
pub mod config;
pub mod consumer;
pub mod producer;
pub mod record;

pub use rdkafka::types::RDKafkaErrorCode;
