use common_kafka::config::{ConsumerConfig, KafkaConfig};
use envconfig::Envconfig;

#[derive(Envconfig, Clone)]
pub struct Config {
    #[envconfig(default = "127.0.0.1")]
    pub host: String,

    #[envconfig(default = "9090")]
    pub port: u16,

    #[envconfig(nested = true)]
    pub kafka: KafkaConfig,

    #[envconfig(nested = true)]
    pub consumer: ConsumerConfig,

    #[envconfig(default = "300")]
    pub poll_timeout_ms: u64,

    // How many successful records accumulate before the batched committer
    // flushes an offset commit to the broker.
    #[envconfig(default = "50")]
    pub commit_batch_size: u32,

    #[envconfig(default = "6")]
    pub max_commit_retries: u32,

    // 0 means no limit
    #[envconfig(default = "0")]
    pub max_messages: u64,

    // 0 means no limit
    #[envconfig(default = "0")]
    pub max_time_seconds: u64,

    // Stop once the consumer has caught up to the head of the log.
    #[envconfig(default = "false")]
    pub stop_after_last_message: bool,

    #[envconfig(default = "10000")]
    pub restart_check_interval_ms: u64,

    #[envconfig(default = "false")]
    pub batching_enabled: bool,

    #[envconfig(default = "100")]
    pub batch_size_limit: usize,

    #[envconfig(default = "2000")]
    pub batch_release_interval_ms: u64,

    pub dead_letter_topic: Option<String>,

    #[envconfig(default = "5000")]
    pub dead_letter_flush_timeout_ms: u64,

    pub redis_url: Option<String>,

    #[envconfig(default = "conveyor/restart-signal")]
    pub restart_signal_key: String,
}

impl Config {
    pub fn max_messages(&self) -> Option<u64> {
        match self.max_messages {
            0 => None,
            max => Some(max),
        }
    }

    pub fn max_time(&self) -> Option<std::time::Duration> {
        match self.max_time_seconds {
            0 => None,
            secs => Some(std::time::Duration::from_secs(secs)),
        }
    }
}
