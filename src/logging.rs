//! Logging initialization (S2). The library itself never calls `println!`;
//! it only emits `tracing` events. This is the one place a binary wires up a
//! subscriber, following the teacher's split between a library core and a
//! `tracing-subscriber`/`tracing-appender` setup at the edge.

use tracing_subscriber::EnvFilter;

/// Installs a global subscriber that writes to stdout, honoring `RUST_LOG`.
/// Returns the guard that must be kept alive for non-blocking writes to
/// actually flush.
pub fn init_tracing() -> tracing_appender::non_blocking::WorkerGuard {
    let (writer, guard) = tracing_appender::non_blocking(std::io::stdout());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .init();
    guard
}
