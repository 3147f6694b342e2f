use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use common_kafka::codec::DecodedRecord;
use futures::future::{BoxFuture, FutureExt};
use thiserror::Error;
use tokio::sync::Mutex;

use crate::handler::{BatchHandler, Handler, ProcessingOutcome};

#[derive(Debug, Error)]
pub enum MiddlewareError {
    #[error("unknown middleware: {0}")]
    Unknown(String),
}

/// An interceptor in the dispatch chain. Call `next.run(record)` to
/// continue; returning without doing so ends the chain with the record
/// considered handled, not failed.
#[async_trait]
pub trait Middleware: Send + Sync {
    async fn intercept(&self, record: &DecodedRecord, next: Next<'_>) -> anyhow::Result<()>;
}

impl std::fmt::Debug for dyn Middleware {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Middleware")
    }
}

#[async_trait]
trait Terminal: Send + Sync {
    async fn call(&self, record: &DecodedRecord) -> anyhow::Result<()>;
}

/// Continuation handed to each interceptor; consuming it invokes the
/// rest of the chain.
pub struct Next<'a> {
    interceptors: &'a [Arc<dyn Middleware>],
    terminal: &'a dyn Terminal,
}

impl<'a> Next<'a> {
    pub fn run<'r>(self, record: &'r DecodedRecord) -> BoxFuture<'r, anyhow::Result<()>>
    where
        'a: 'r,
    {
        async move {
            match self.interceptors.split_first() {
                Some((head, rest)) => {
                    let next = Next {
                        interceptors: rest,
                        terminal: self.terminal,
                    };
                    head.intercept(record, next).await
                }
                None => self.terminal.call(record).await,
            }
        }
        .boxed()
    }
}

async fn run_chain(
    interceptors: &[Arc<dyn Middleware>],
    terminal: &dyn Terminal,
    record: &DecodedRecord,
) -> anyhow::Result<()> {
    Next {
        interceptors,
        terminal,
    }
    .run(record)
    .await
}

struct HandlerTerminal {
    handler: Arc<dyn Handler>,
}

#[async_trait]
impl Terminal for HandlerTerminal {
    async fn call(&self, record: &DecodedRecord) -> anyhow::Result<()> {
        self.handler.handle(record).await
    }
}

/// Ordered interceptors around a terminal record handler.
pub struct MiddlewarePipeline {
    interceptors: Vec<Arc<dyn Middleware>>,
    terminal: HandlerTerminal,
}

impl MiddlewarePipeline {
    pub fn new(interceptors: Vec<Arc<dyn Middleware>>, handler: Arc<dyn Handler>) -> Self {
        Self {
            interceptors,
            terminal: HandlerTerminal { handler },
        }
    }

    pub async fn dispatch(&self, record: &DecodedRecord) -> ProcessingOutcome {
        match run_chain(&self.interceptors, &self.terminal, record).await {
            Ok(()) => ProcessingOutcome::Success,
            Err(error) => ProcessingOutcome::Failure(error),
        }
    }
}

/// Collects the records that make it through the chain so the batch
/// handler sees only survivors.
#[derive(Default)]
struct CollectingTerminal {
    survivors: Mutex<Vec<DecodedRecord>>,
}

#[async_trait]
impl Terminal for CollectingTerminal {
    async fn call(&self, record: &DecodedRecord) -> anyhow::Result<()> {
        self.survivors.lock().await.push(record.clone());
        Ok(())
    }
}

/// Batching counterpart: every record runs the interceptor chain
/// individually, then the batch handler receives the survivors in one
/// call. An interceptor failure fails the whole batch.
pub struct BatchMiddlewarePipeline {
    interceptors: Vec<Arc<dyn Middleware>>,
    handler: Arc<dyn BatchHandler>,
}

impl BatchMiddlewarePipeline {
    pub fn new(interceptors: Vec<Arc<dyn Middleware>>, handler: Arc<dyn BatchHandler>) -> Self {
        Self {
            interceptors,
            handler,
        }
    }

    pub async fn dispatch_batch(&self, records: &[DecodedRecord]) -> ProcessingOutcome {
        let terminal = CollectingTerminal::default();
        for record in records {
            if let Err(error) = run_chain(&self.interceptors, &terminal, record).await {
                return ProcessingOutcome::Failure(error);
            }
        }
        let survivors = terminal.survivors.into_inner();
        if survivors.is_empty() {
            return ProcessingOutcome::Success;
        }
        match self.handler.handle_batch(&survivors).await {
            Ok(()) => ProcessingOutcome::Success,
            Err(error) => ProcessingOutcome::Failure(error),
        }
    }
}

/// Named middleware lookup used at loop build time. Unknown names are
/// a configuration error, surfaced before the loop ever runs.
#[derive(Default)]
pub struct MiddlewareRegistry {
    entries: HashMap<String, Arc<dyn Middleware>>,
}

impl MiddlewareRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: &str, middleware: Arc<dyn Middleware>) {
        self.entries.insert(name.to_string(), middleware);
    }

    pub fn resolve(&self, names: &[String]) -> Result<Vec<Arc<dyn Middleware>>, MiddlewareError> {
        names
            .iter()
            .map(|name| {
                self.entries
                    .get(name)
                    .cloned()
                    .ok_or_else(|| MiddlewareError::Unknown(name.clone()))
            })
            .collect()
    }
}
