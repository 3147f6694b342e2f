use common_kafka::consumer::BrokerError;
use common_kafka::producer::PublishError;

use crate::middleware::MiddlewareError;

/// Errors that terminate `run()`. Transient conditions are absorbed
/// close to their source; anything surfacing here would corrupt the
/// offset/commit invariants if swallowed.
#[derive(Debug, thiserror::Error)]
pub enum LoopError {
    #[error(transparent)]
    Broker(#[from] BrokerError),
    #[error(transparent)]
    DeadLetter(#[from] PublishError),
}

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("missing required component: {0}")]
    Missing(&'static str),
    #[error(transparent)]
    Middleware(#[from] MiddlewareError),
}
