//! Wire messages (§6). Every message is a string-keyed map with a mandatory
//! `op` discriminator; this is modeled as a tagged enum instead of a runtime
//! dispatch table, per the design note about reimplementing dict dispatch as
//! an exhaustive switch on enumerated states.

use crate::address::Address;
use crate::key::{Key, Priority};
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op")]
pub enum Message {
    // ---- request/reply handler table (§6) ----
    #[serde(rename = "get_data")]
    GetData { keys: Vec<Key>, who: Option<Address> },
    #[serde(rename = "get_data_reply")]
    GetDataReply {
        /// keys present, in the same order as the trailing payload frames
        found: Vec<Key>,
        missing: Vec<Key>,
    },

    #[serde(rename = "gather")]
    Gather {
        who_has: HashMap<Key, Vec<Address>>,
    },
    #[serde(rename = "gather_reply")]
    GatherReply {
        status: GatherStatus,
        keys: Vec<Key>,
    },

    #[serde(rename = "update_data")]
    UpdateData { keys: Vec<Key>, report: bool },
    #[serde(rename = "update_data_reply")]
    UpdateDataReply { nbytes: u64 },

    #[serde(rename = "delete_data")]
    DeleteData { keys: Vec<Key>, report: bool },

    #[serde(rename = "terminate")]
    Terminate { report: bool },

    #[serde(rename = "keys")]
    Keys {},
    #[serde(rename = "keys_reply")]
    KeysReply { keys: Vec<Key> },

    #[serde(rename = "close")]
    Close { reply: bool },

    #[serde(rename = "ok")]
    Ok { status: String },

    #[serde(rename = "compute-stream")]
    ComputeStream {},

    // ---- compute-stream ops (post-switch), §6 ----
    #[serde(rename = "compute-task")]
    ComputeTask {
        key: Key,
        priority: Priority,
        deps: Vec<Key>,
        who_has: HashMap<Key, Vec<Address>>,
        /// true when this message's payload frames carry [func, args, kwargs]
        has_payload: bool,
    },
    #[serde(rename = "release-task")]
    ReleaseTask { key: Key, reason: Option<String> },
    #[serde(rename = "delete-data")]
    StreamDeleteData { keys: Vec<Key> },

    // ---- outbound scheduler messages, §6 ----
    #[serde(rename = "register")]
    Register {
        address: Address,
        ncores: usize,
        keys: Vec<Key>,
        memory_limit: u64,
        now: f64,
        executing: usize,
        in_memory: usize,
        ready: usize,
        in_flight: usize,
        services: HashMap<String, u16>,
    },
    #[serde(rename = "unregister")]
    Unregister { address: Address },
    #[serde(rename = "task-finished")]
    TaskFinished { key: Key, status: String, nbytes: u64 },
    #[serde(rename = "task-erred")]
    TaskErred {
        key: Key,
        exception: String,
        traceback: String,
    },
    #[serde(rename = "release")]
    Release { key: Key, cause: String },
    #[serde(rename = "add-keys")]
    AddKeys { keys: Vec<Key> },
    #[serde(rename = "who_has")]
    WhoHas { keys: Vec<Key> },
    #[serde(rename = "who_has_reply")]
    WhoHasReply {
        who_has: HashMap<Key, Vec<Address>>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GatherStatus {
    Ok,
    MissingData,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compute_task_round_trips_through_msgpack() {
        let msg = Message::ComputeTask {
            key: "A".to_string(),
            priority: Priority {
                scheduler_priority: vec![0],
                counter: -1,
            },
            deps: vec!["dep-1".to_string()],
            who_has: HashMap::new(),
            has_payload: true,
        };
        let bytes = rmp_serde::to_vec_named(&msg).unwrap();
        let decoded: Message = rmp_serde::from_read_ref(&bytes).unwrap();
        assert_eq!(msg, decoded);
    }

    #[test]
    fn op_discriminator_uses_literal_hyphenated_name() {
        let msg = Message::ReleaseTask {
            key: "E".to_string(),
            reason: Some("stolen".to_string()),
        };
        let value = rmp_serde::to_vec_named(&msg).unwrap();
        let decoded: rmpv::Value = rmp_serde::from_read_ref(&value).unwrap();
        let map = decoded.as_map().expect("message encodes as a map");
        let op = map
            .iter()
            .find(|(k, _)| k.as_str() == Some("op"))
            .map(|(_, v)| v.as_str().unwrap());
        assert_eq!(op, Some("release-task"));
    }
}
