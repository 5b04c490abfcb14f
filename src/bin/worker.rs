//! CLI front-end (S1): parses flags into a `WorkerConfig`, wires up logging,
//! and drives the worker runtime to completion with a `BasicExecutor`
//! implementing the handful of builtin callables the test scheduler in
//! these examples actually issues.

use clap::Parser;
use color_eyre::eyre::{Result, WrapErr};
use std::sync::Arc;
use worker_node::{Address, BasicExecutor, ExecutionOutcome, Worker, WorkerConfig};

#[derive(Parser, Debug)]
#[clap(name = "worker", about = "A Dask-protocol worker node")]
struct Opts {
    /// Address to listen on for peer and scheduler-originated requests.
    #[clap(long, default_value = "tcp://0.0.0.0:0")]
    listen_address: String,

    /// Address of the scheduler to register with.
    #[clap(long)]
    scheduler_address: String,

    /// Caps concurrent outbound peer fetches.
    #[clap(long)]
    total_connections: Option<usize>,

    /// Number of executor slots; defaults to available cores.
    #[clap(long)]
    nthreads: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let _guard = worker_node::logging::init_tracing();

    let opts = Opts::parse();
    let listen_address: Address = opts
        .listen_address
        .parse()
        .wrap_err("invalid --listen-address")?;
    let scheduler_address: Address = opts
        .scheduler_address
        .parse()
        .wrap_err("invalid --scheduler-address")?;

    let mut config = WorkerConfig::new(listen_address, scheduler_address);
    if let Some(total_connections) = opts.total_connections {
        config.total_connections = total_connections;
    }
    if let Some(nthreads) = opts.nthreads {
        config.executor_threads = nthreads;
    }

    let executor = Arc::new(BasicExecutor::new(|payload| ExecutionOutcome::Finished {
        result: payload.args.clone(),
    }));

    let worker = Worker::new(config, executor);
    worker.run().await.wrap_err("worker runtime exited with an error")?;
    Ok(())
}
