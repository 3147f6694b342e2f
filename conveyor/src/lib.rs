pub mod batch;
pub mod builder;
pub mod commit;
pub mod config;
pub mod consumer_loop;
pub mod counter;
pub mod dlq;
pub mod error;
pub mod handler;
pub mod metric_consts;
pub mod middleware;
pub mod restart;
pub mod retry;
pub mod test_utils;
