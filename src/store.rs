//! The worker's core mutable state: the data store, the symmetric peer
//! index, the in-flight index, and the suspicion counters (§3). All of
//! these are owned exclusively by the single event-loop task (§5); nothing
//! here needs internal locking.

use crate::address::Address;
use crate::key::Key;
use bytes::Bytes;
use std::collections::{HashMap, HashSet};

/// `Key → Value`. The only place computed/fetched values live.
#[derive(Debug, Default)]
pub struct DataStore {
    data: HashMap<Key, Bytes>,
}

impl DataStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: Key, value: Bytes) {
        self.data.insert(key, value);
    }

    pub fn get(&self, key: &str) -> Option<&Bytes> {
        self.data.get(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<Bytes> {
        self.data.remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &Key> {
        self.data.keys()
    }
}

/// The symmetric `who_has` / `has_what` peer index (invariant 2, §3/§8).
#[derive(Debug, Default)]
pub struct PeerIndex {
    who_has: HashMap<Key, HashSet<Address>>,
    has_what: HashMap<Address, HashSet<Key>>,
}

impl PeerIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, key: Key, addr: Address) {
        self.who_has
            .entry(key.clone())
            .or_insert_with(HashSet::new)
            .insert(addr.clone());
        self.has_what.entry(addr).or_insert_with(HashSet::new).insert(key);
    }

    pub fn remove(&mut self, key: &str, addr: &Address) {
        if let Some(peers) = self.who_has.get_mut(key) {
            peers.remove(addr);
            if peers.is_empty() {
                self.who_has.remove(key);
            }
        }
        if let Some(keys) = self.has_what.get_mut(addr) {
            keys.remove(key);
            if keys.is_empty() {
                self.has_what.remove(addr);
            }
        }
    }

    /// Drops every peer association for `key` (used on release/poisoning).
    pub fn remove_key(&mut self, key: &str) {
        if let Some(peers) = self.who_has.remove(key) {
            for addr in peers {
                if let Some(keys) = self.has_what.get_mut(&addr) {
                    keys.remove(key);
                    if keys.is_empty() {
                        self.has_what.remove(&addr);
                    }
                }
            }
        }
    }

    pub fn peers_for(&self, key: &str) -> Option<&HashSet<Address>> {
        self.who_has.get(key)
    }

    pub fn has_peers(&self, key: &str) -> bool {
        self.who_has.get(key).map_or(false, |s| !s.is_empty())
    }

    /// Asserts the symmetry invariant; used in tests and debug assertions.
    #[cfg(test)]
    fn is_symmetric(&self) -> bool {
        for (key, addrs) in &self.who_has {
            for addr in addrs {
                if !self.has_what.get(addr).map_or(false, |keys| keys.contains(key)) {
                    return false;
                }
            }
        }
        for (addr, keys) in &self.has_what {
            for key in keys {
                if !self.who_has.get(key).map_or(false, |addrs| addrs.contains(addr)) {
                    return false;
                }
            }
        }
        true
    }
}

/// `in_flight_tasks` / `in_flight_workers` (invariant 3/4, §3/§8).
#[derive(Debug, Default)]
pub struct InFlightIndex {
    in_flight_tasks: HashMap<Key, Address>,
    in_flight_workers: HashMap<Address, HashSet<Key>>,
}

impl InFlightIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&mut self, key: Key, addr: Address) {
        self.in_flight_tasks.insert(key.clone(), addr.clone());
        self.in_flight_workers.entry(addr).or_insert_with(HashSet::new).insert(key);
    }

    pub fn finish(&mut self, key: &str) {
        if let Some(addr) = self.in_flight_tasks.remove(key) {
            if let Some(keys) = self.in_flight_workers.get_mut(&addr) {
                keys.remove(key);
                if keys.is_empty() {
                    self.in_flight_workers.remove(&addr);
                }
            }
        }
    }

    pub fn addr_for(&self, key: &str) -> Option<&Address> {
        self.in_flight_tasks.get(key)
    }

    pub fn worker_count(&self) -> usize {
        self.in_flight_workers.len()
    }

    pub fn is_in_flight(&self, key: &str) -> bool {
        self.in_flight_tasks.contains_key(key)
    }

    pub fn is_addr_busy(&self, addr: &Address) -> bool {
        self.in_flight_workers.contains_key(addr)
    }
}

/// Per-dep count of unsuccessful location rounds (§3/§4.7).
#[derive(Debug, Default)]
pub struct SuspicionCounters {
    counts: HashMap<Key, u32>,
}

impl SuspicionCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment(&mut self, key: &str) -> u32 {
        let entry = self.counts.entry(key.to_string()).or_insert(0);
        *entry += 1;
        *entry
    }

    pub fn reset(&mut self, key: &str) {
        self.counts.remove(key);
    }

    pub fn get(&self, key: &str) -> u32 {
        *self.counts.get(key).unwrap_or(&0)
    }
}

/// Ordered per-peer want-list, used to opportunistically batch fetches
/// destined for the same peer (§3, "pending-per-peer"; §4.8).
#[derive(Debug, Default)]
pub struct PendingPerPeer {
    pending: HashMap<Address, Vec<Key>>,
}

impl PendingPerPeer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, addr: Address, key: Key) {
        self.pending.entry(addr).or_insert_with(Vec::new).push(key);
    }

    /// Drains every key queued for `addr`.
    pub fn drain(&mut self, addr: &Address) -> Vec<Key> {
        self.pending.remove(addr).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_index_stays_symmetric_through_add_remove() {
        let mut idx = PeerIndex::new();
        let a1 = Address::tcp("10.0.0.1", 9000);
        let a2 = Address::tcp("10.0.0.2", 9000);
        idx.add("k1".to_string(), a1.clone());
        idx.add("k1".to_string(), a2.clone());
        assert!(idx.is_symmetric());

        idx.remove("k1", &a1);
        assert!(idx.is_symmetric());
        assert!(idx.peers_for("k1").unwrap().contains(&a2));
        assert!(!idx.peers_for("k1").unwrap().contains(&a1));
    }

    #[test]
    fn remove_key_clears_all_peers() {
        let mut idx = PeerIndex::new();
        let a1 = Address::tcp("10.0.0.1", 9000);
        idx.add("k1".to_string(), a1.clone());
        idx.remove_key("k1");
        assert!(idx.peers_for("k1").is_none());
        assert!(idx.is_symmetric());
    }

    #[test]
    fn in_flight_index_tracks_worker_concurrency() {
        let mut flight = InFlightIndex::new();
        let a1 = Address::tcp("10.0.0.1", 9000);
        flight.start("k1".to_string(), a1.clone());
        assert_eq!(flight.worker_count(), 1);
        assert!(flight.is_in_flight("k1"));
        flight.finish("k1");
        assert_eq!(flight.worker_count(), 0);
        assert!(!flight.is_in_flight("k1"));
    }

    #[test]
    fn suspicion_counter_increments_and_resets() {
        let mut counters = SuspicionCounters::new();
        assert_eq!(counters.increment("d"), 1);
        assert_eq!(counters.increment("d"), 2);
        counters.reset("d");
        assert_eq!(counters.get("d"), 0);
    }
}
