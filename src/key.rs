//! The single string-keyed namespace the worker uses for both tasks and
//! pieces of data.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI64, Ordering};

/// Opaque string identifying a task or a piece of data.
pub type Key = String;

/// Scheduler-assigned priority tuple, plus our own tie-breaker inserted at
/// index 1. Smaller tuples win; ties are broken lexicographically by the
/// remaining elements.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Priority {
    pub scheduler_priority: Vec<i64>,
    /// Monotonically *decreasing* counter: later-arriving tasks sort earlier
    /// at equal scheduler priority.
    pub counter: i64,
}

/// Hands out the monotonically decreasing tie-breaker described in §3.
#[derive(Debug, Default)]
pub struct PriorityCounter {
    next: AtomicI64,
}

impl PriorityCounter {
    pub fn new() -> Self {
        Self {
            next: AtomicI64::new(0),
        }
    }

    pub fn next(&self) -> i64 {
        self.next.fetch_sub(1, Ordering::Relaxed)
    }
}
