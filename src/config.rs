//! Worker configuration (S1). Constructed programmatically by library users;
//! the binary front-end fills it in from CLI flags.

use crate::address::Address;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub listen_address: Address,
    pub scheduler_address: Address,
    /// Caps concurrent peer fetches (§3, invariant 4). Default 50.
    pub total_connections: usize,
    pub tcp_nodelay: bool,
    /// Batched-sender flush interval (§4.2). Default 2ms.
    pub batch_interval: Duration,
    /// Suspicion rounds above which a dependency is poisoned (§4.7).
    pub suspicion_threshold: u32,
    /// Number of `spawn_blocking` executor slots; defaults to available cores.
    pub executor_threads: usize,
    /// Per-pool / per-address connection pool limits (C5).
    pub pool_limit_per_address: usize,
    pub pool_limit_total: usize,
}

impl WorkerConfig {
    pub fn new(listen_address: Address, scheduler_address: Address) -> Self {
        Self {
            listen_address,
            scheduler_address,
            total_connections: 50,
            tcp_nodelay: true,
            batch_interval: Duration::from_millis(2),
            suspicion_threshold: 3,
            executor_threads: num_cpus::get(),
            pool_limit_per_address: 4,
            pool_limit_total: 50,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let cfg = WorkerConfig::new(
            Address::tcp("0.0.0.0", 0),
            Address::tcp("scheduler", 8786),
        );
        assert_eq!(cfg.total_connections, 50);
        assert_eq!(cfg.suspicion_threshold, 3);
        assert_eq!(cfg.batch_interval, Duration::from_millis(2));
    }
}
