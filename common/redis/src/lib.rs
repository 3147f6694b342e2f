use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

pub mod client;
pub mod mock;

pub use client::RedisClient;
pub use mock::MockRedisClient;

#[derive(Error, Debug, Clone)]
pub enum CustomRedisError {
    #[error("Not found in redis")]
    NotFound,
    #[error("Timeout error")]
    Timeout,
    #[error(transparent)]
    Redis(#[from] Arc<redis::RedisError>),
}

impl From<redis::RedisError> for CustomRedisError {
    fn from(err: redis::RedisError) -> Self {
        CustomRedisError::Redis(Arc::new(err))
    }
}

/// The narrow async surface consumers need from redis. Kept small on
/// purpose: a shared signal key is the only cross-process state the
/// engine reads.
#[async_trait]
pub trait Client: Send + Sync {
    async fn get(&self, key: &str) -> Result<String, CustomRedisError>;
    async fn set(&self, key: &str, value: &str) -> Result<(), CustomRedisError>;
    async fn del(&self, key: &str) -> Result<(), CustomRedisError>;
}
