//! Multi-peer gather (C7, §4.4): concurrently fetch a set of keys from a
//! `who_has` mapping, tolerating peer failure by round-robin-by-round
//! elimination of broken addresses.

use crate::address::Address;
use crate::error::WorkerError;
use crate::key::Key;
use crate::message::{GatherStatus, Message};
use crate::metrics::WorkerMetrics;
use crate::pool::ConnectionPool;
use crate::rpc;
use bytes::Bytes;
use rand::seq::SliceRandom;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Default)]
pub struct GatherOutcome {
    pub results: HashMap<Key, Bytes>,
    pub bad_keys: HashSet<Key>,
    pub missing_workers: HashSet<Address>,
}

/// Runs rounds until every key is resolved or declared bad. Each round picks
/// one still-eligible address per still-missing key, groups by address, and
/// fires one `get_data` RPC per address concurrently.
pub async fn gather(
    pool: &ConnectionPool,
    who: &Address,
    who_has: HashMap<Key, HashSet<Address>>,
    metrics: &WorkerMetrics,
) -> GatherOutcome {
    let mut remaining = who_has;
    let mut bad_addresses: HashSet<Address> = HashSet::new();
    let mut outcome = GatherOutcome::default();
    let mut rng = rand::thread_rng();

    while !remaining.is_empty() {
        metrics.incr_gather_rounds();

        // prune addresses known bad, and fail keys that ran out of peers
        let mut exhausted = Vec::new();
        for (key, addrs) in remaining.iter_mut() {
            addrs.retain(|a| !bad_addresses.contains(a));
            if addrs.is_empty() {
                exhausted.push(key.clone());
            }
        }
        for key in exhausted {
            remaining.remove(&key);
            outcome.bad_keys.insert(key);
        }
        if remaining.is_empty() {
            break;
        }

        // build this round's plan: one random eligible address per key
        let mut plan: HashMap<Address, Vec<Key>> = HashMap::new();
        for (key, addrs) in remaining.iter() {
            let choices: Vec<&Address> = addrs.iter().collect();
            if let Some(&addr) = choices.choose(&mut rng) {
                plan.entry(addr.clone()).or_insert_with(Vec::new).push(key.clone());
            }
        }

        let calls = plan.into_iter().map(|(addr, keys)| {
            let pool = &pool;
            let who = who.clone();
            async move {
                let request = Message::GetData {
                    keys: keys.clone(),
                    who: Some(who),
                };
                let result = rpc::call(pool, &addr, request, &[]).await;
                (addr, keys, result)
            }
        });

        let round_results = futures::future::join_all(calls).await;

        for (addr, requested_keys, result) in round_results {
            match result {
                Ok(envelope) => {
                    let found = match envelope.message {
                        Message::GetDataReply { found, .. } => found,
                        _ => {
                            bad_addresses.insert(addr.clone());
                            continue;
                        }
                    };
                    let mut payload_iter = envelope.payload.into_iter();
                    let mut found_set: HashSet<&str> = HashSet::new();
                    for key in &found {
                        if let Some(bytes) = payload_iter.next() {
                            metrics.incr_deps_fetched(bytes.len() as u64);
                            outcome.results.insert(key.clone(), bytes);
                            remaining.remove(key);
                            found_set.insert(key.as_str());
                        }
                    }
                    // keys this peer didn't actually have: drop this one
                    // address from their eligible set for the next round
                    for key in &requested_keys {
                        if !found_set.contains(key.as_str()) {
                            if let Some(addrs) = remaining.get_mut(key) {
                                addrs.remove(&addr);
                            }
                        }
                    }
                }
                Err(WorkerError::TransportLost { .. }) | Err(WorkerError::PeerMissing { .. }) => {
                    bad_addresses.insert(addr.clone());
                }
                Err(_) => {
                    bad_addresses.insert(addr.clone());
                }
            }
        }
    }

    outcome.missing_workers = bad_addresses;
    outcome
}
