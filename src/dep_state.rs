//! Per-dependency lifecycle (C9, §4.6): `waiting → flight → memory`, with
//! the one non-monotonic transition `flight → waiting` on peer failure.
//! `memory → flight` is forbidden: once in memory we never refetch.

use crate::address::Address;
use crate::key::Key;
use std::collections::HashSet;
use tracing::{trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DepState {
    Waiting,
    Flight,
    Memory,
}

#[derive(Debug, Clone)]
pub struct Dependency {
    pub key: Key,
    pub state: DepState,
    pub in_flight_peer: Option<Address>,
    /// Task keys that need this dependency's value.
    pub dependents: HashSet<Key>,
}

impl Dependency {
    pub fn new(key: Key) -> Self {
        Self {
            key,
            state: DepState::Waiting,
            in_flight_peer: None,
            dependents: HashSet::new(),
        }
    }

    pub fn transition(&mut self, to: DepState) -> bool {
        use DepState::*;
        let valid = matches!(
            (self.state, to),
            (Waiting, Flight) | (Flight, Memory) | (Flight, Waiting) | (Waiting, Memory)
        );
        if valid {
            trace!("[dep] {} {:?} -> {:?}", self.key, self.state, to);
            self.state = to;
            if to != Flight {
                self.in_flight_peer = None;
            }
        } else {
            warn!(
                "[dep] ignoring illegal transition for {}: {:?} -> {:?}",
                self.key, self.state, to
            );
        }
        valid
    }

    pub fn start_flight(&mut self, peer: Address) -> bool {
        let ok = self.transition(DepState::Flight);
        if ok {
            self.in_flight_peer = Some(peer);
        }
        ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_dependency_starts_waiting() {
        let dep = Dependency::new("d".to_string());
        assert_eq!(dep.state, DepState::Waiting);
        assert!(dep.in_flight_peer.is_none());
    }

    #[test]
    fn flight_can_revert_to_waiting() {
        let mut dep = Dependency::new("d".to_string());
        assert!(dep.start_flight(Address::tcp("10.0.0.1", 9000)));
        assert_eq!(dep.state, DepState::Flight);
        assert!(dep.transition(DepState::Waiting));
        assert_eq!(dep.state, DepState::Waiting);
        assert!(dep.in_flight_peer.is_none());
    }

    #[test]
    fn memory_to_flight_is_forbidden() {
        let mut dep = Dependency::new("d".to_string());
        assert!(dep.transition(DepState::Memory));
        assert!(!dep.start_flight(Address::tcp("10.0.0.1", 9000)));
        assert_eq!(dep.state, DepState::Memory);
    }

    #[test]
    fn waiting_can_arrive_directly_in_memory() {
        let mut dep = Dependency::new("d".to_string());
        assert!(dep.transition(DepState::Memory));
        assert_eq!(dep.state, DepState::Memory);
    }
}
