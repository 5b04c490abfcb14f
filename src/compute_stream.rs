//! Compute-stream dispatcher (C11, §6): after a connection switches into
//! compute-stream mode, every message it carries is one of `compute-task`,
//! `release-task`, or `delete-data`. Routing is an exhaustive match rather
//! than a runtime dict dispatch, per the design note in §9; anything else
//! is a `ProtocolViolation` that gets logged and dropped, not a connection
//! failure.

use crate::address::Address;
use crate::key::{Key, Priority};
use crate::message::Message;
use std::collections::HashMap;
use tracing::warn;

#[derive(Debug, Clone)]
pub enum ComputeStreamOp {
    ComputeTask {
        key: Key,
        priority: Priority,
        deps: Vec<Key>,
        who_has: HashMap<Key, Vec<Address>>,
        has_payload: bool,
    },
    ReleaseTask {
        key: Key,
        reason: Option<String>,
    },
    DeleteData {
        keys: Vec<Key>,
    },
}

/// Classifies one message arriving on a compute-stream connection. Returns
/// `None` (after logging) for anything that isn't one of the three
/// compute-stream ops.
pub fn route(message: Message) -> Option<ComputeStreamOp> {
    match message {
        Message::ComputeTask {
            key,
            priority,
            deps,
            who_has,
            has_payload,
        } => Some(ComputeStreamOp::ComputeTask {
            key,
            priority,
            deps,
            who_has,
            has_payload,
        }),
        Message::ReleaseTask { key, reason } => Some(ComputeStreamOp::ReleaseTask { key, reason }),
        Message::StreamDeleteData { keys } => Some(ComputeStreamOp::DeleteData { keys }),
        other => {
            warn!("[compute-stream] dropping message with unexpected op: {:?}", other);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routes_known_ops() {
        let msg = Message::ReleaseTask {
            key: "E".to_string(),
            reason: Some("stolen".to_string()),
        };
        assert!(matches!(route(msg), Some(ComputeStreamOp::ReleaseTask { .. })));
    }

    #[test]
    fn drops_unknown_op() {
        let msg = Message::Keys {};
        assert!(route(msg).is_none());
    }
}
