use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use common_redis::{Client, CustomRedisError};
use tracing::{info, warn};

use crate::batch::Clock;

/// Read side of the externally stored restart signal. `None` means no
/// signal has ever been written.
#[async_trait]
pub trait RestartStore: Send + Sync {
    async fn read(&self) -> Option<String>;
}

/// Redis-backed store. Read errors other than a missing key are logged
/// and treated as "no signal" so a flaky redis never kills the loop.
pub struct RedisRestartStore {
    client: Arc<dyn Client>,
    key: String,
}

impl RedisRestartStore {
    pub fn new(client: Arc<dyn Client>, key: String) -> Self {
        Self { client, key }
    }

    /// Operator side: writing a fresh timestamp makes every running
    /// loop observe a baseline mismatch and drain.
    pub async fn write(&self, value: &str) -> Result<(), CustomRedisError> {
        self.client.set(&self.key, value).await
    }
}

#[async_trait]
impl RestartStore for RedisRestartStore {
    async fn read(&self) -> Option<String> {
        match self.client.get(&self.key).await {
            Ok(value) => Some(value),
            Err(CustomRedisError::NotFound) => None,
            Err(e) => {
                warn!("failed to read restart signal {}: {}", self.key, e);
                None
            }
        }
    }
}

/// Compares the stored signal against the value captured at loop start,
/// on its own interval. Any difference, in either direction, requests a
/// restart.
pub struct RestartWatcher {
    store: Arc<dyn RestartStore>,
    interval: Duration,
    next_check: Instant,
    baseline: Option<String>,
    clock: Arc<dyn Clock>,
}

impl RestartWatcher {
    pub async fn start(
        store: Arc<dyn RestartStore>,
        interval: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let baseline = store.read().await;
        let next_check = clock.now() + interval;
        Self {
            store,
            interval,
            next_check,
            baseline,
            clock,
        }
    }

    /// Cheap between checks; only touches the store once per interval.
    pub async fn restart_requested(&mut self) -> bool {
        let now = self.clock.now();
        if now < self.next_check {
            return false;
        }
        self.next_check = now + self.interval;
        let current = self.store.read().await;
        if current != self.baseline {
            info!(
                "restart signal changed (baseline {:?}, current {:?})",
                self.baseline, current
            );
            return true;
        }
        false
    }
}
