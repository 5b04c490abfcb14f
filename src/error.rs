//! Error taxonomy for the worker. Kinds, not exception types: every fallible
//! path in the crate resolves to one of these variants, and call sites that
//! need extra context wrap them in a `color_eyre::Report` the way the teacher
//! crate wraps its I/O errors.

use crate::key::Key;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, WorkerError>;

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("transport lost while talking to {addr}")]
    TransportLost { addr: String },

    #[error("stream truncated mid-message (read {read} of {expected} bytes)")]
    TransportTruncated { read: usize, expected: usize },

    #[error("peer {addr} refused or did not reply for key {key}")]
    PeerMissing { addr: String, key: Key },

    #[error("failed to deserialize task payload for key {key}: {reason}")]
    DeserializationFailed { key: Key, reason: String },

    #[error("execution of {key} failed: {exception}")]
    ExecutionFailed { key: Key, exception: String },

    #[error("dependency {key} poisoned after {rounds} failed location rounds")]
    DependencyPoisoned { key: Key, rounds: u32 },

    #[error("protocol violation: {reason}")]
    ProtocolViolation { reason: String },

    #[error("sender closed")]
    SenderClosed,

    #[error("address parse error: {0}")]
    AddressParse(String),
}
