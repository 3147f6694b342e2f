use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use common_kafka::codec::DecodedRecord;
use common_kafka::config::ConsumerConfig;
use common_kafka::consumer::KafkaBrokerConsumer;
use common_kafka::producer::KafkaDlqProducer;
use envconfig::Envconfig;
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use conveyor::builder::ConsumptionLoopBuilder;
use conveyor::config::Config;
use conveyor::handler::Handler;
use conveyor::restart::RedisRestartStore;

/// Reference worker: logs each decoded record. Real deployments swap
/// this for an application handler.
struct EchoHandler;

#[async_trait]
impl Handler for EchoHandler {
    async fn handle(&self, record: &DecodedRecord) -> Result<()> {
        info!(
            "consumed {}:{}@{}",
            record.record.topic, record.record.partition, record.record.offset
        );
        Ok(())
    }
}

fn setup_tracing() {
    let log_layer = tracing_subscriber::fmt::layer().with_filter(EnvFilter::from_default_env());
    tracing_subscriber::registry().with(log_layer).init();
}

fn setup_metrics(config: &Config) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .context("invalid metrics listen address")?;
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("failed to install prometheus exporter")?;
    info!("serving metrics on {}", addr);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_tracing();
    info!("starting conveyor worker");

    ConsumerConfig::set_defaults("conveyor", "events", false);
    let config = Config::init_from_env().context("failed to load configuration")?;
    setup_metrics(&config)?;

    let broker = Arc::new(
        KafkaBrokerConsumer::new(&config.kafka, &config.consumer)
            .context("failed to create kafka consumer")?,
    );

    let mut builder = ConsumptionLoopBuilder::new(config.clone())
        .with_broker(broker)
        .with_handler(Arc::new(EchoHandler));

    if config.dead_letter_topic.is_some() {
        let producer = KafkaDlqProducer::new(&config.kafka)
            .await
            .context("failed to create dead letter producer")?;
        builder = builder.with_dlq_producer(Arc::new(producer));
    }

    if let Some(redis_url) = &config.redis_url {
        let client = common_redis::RedisClient::new(redis_url.clone())
            .await
            .context("failed to connect to redis")?;
        builder = builder.with_restart_store(Arc::new(RedisRestartStore::new(
            Arc::new(client),
            config.restart_signal_key.clone(),
        )));
    }

    let mut consumption_loop = builder.build().context("failed to build consumption loop")?;

    let stop = consumption_loop.stop_handle();
    let signal_task = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received, draining");
            stop.request_stop();
        }
    });

    consumption_loop.run().await?;
    signal_task.abort();
    info!(
        "worker exiting after {} records",
        consumption_loop.consumed_count()
    );
    Ok(())
}
