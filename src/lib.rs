//! A Dask-protocol-compatible distributed worker node: parses scheduler
//! addresses, speaks the length-prefixed MessagePack wire protocol, tracks
//! task and dependency state machines, and runs the `ensure_communicating`/
//! `ensure_computing` loops that keep them moving.

pub mod address;
pub mod compute_stream;
pub mod config;
pub mod dep_state;
pub mod error;
pub mod executor;
pub mod gather;
pub mod key;
pub mod logging;
pub mod message;
pub mod metrics;
pub mod pack;
pub mod pool;
pub mod rpc;
pub mod rw;
pub mod scheduler;
pub mod sender;
pub mod store;
pub mod task_state;
pub mod worker;

pub use address::Address;
pub use config::WorkerConfig;
pub use error::{Result, WorkerError};
pub use executor::{BasicExecutor, ExecutionOutcome, Executor};
pub use metrics::{MetricsSnapshot, WorkerMetrics};
pub use worker::Worker;
