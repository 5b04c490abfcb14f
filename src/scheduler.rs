//! Scheduler session (C10, §4.11): register, heartbeat via the batched
//! stream, unregister. The batched stream is `None` until the first
//! `compute-stream` switch — sending before that is a programmer error, per
//! the design note on the `Nullable` batched stream.

use crate::address::Address;
use crate::error::{Result, WorkerError};
use crate::key::Key;
use crate::message::Message;
use crate::pool::ConnectionPool;
use crate::rpc;
use crate::rw::{Connection, Envelope};
use crate::sender::BatchedSender;
use std::collections::HashMap;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::Duration;
use tracing::info;

#[derive(Debug, Clone)]
pub struct RegisterInfo {
    pub ncores: usize,
    pub keys: Vec<Key>,
    pub memory_limit: u64,
    pub now: f64,
    pub executing: usize,
    pub in_memory: usize,
    pub ready: usize,
    pub in_flight: usize,
    pub services: HashMap<String, u16>,
}

pub struct SchedulerSession {
    scheduler_addr: Address,
    my_address: Address,
    stream: Option<BatchedSender>,
}

impl SchedulerSession {
    pub fn new(scheduler_addr: Address, my_address: Address) -> Self {
        Self {
            scheduler_addr,
            my_address,
            stream: None,
        }
    }

    /// Opens a `register` RPC. `starting -> running` happens in the caller
    /// once this returns `Ok`; any other reply is a hard failure.
    pub async fn register(&self, pool: &ConnectionPool, info: RegisterInfo) -> Result<()> {
        let request = Message::Register {
            address: self.my_address.clone(),
            ncores: info.ncores,
            keys: info.keys,
            memory_limit: info.memory_limit,
            now: info.now,
            executing: info.executing,
            in_memory: info.in_memory,
            ready: info.ready,
            in_flight: info.in_flight,
            services: info.services,
        };
        let reply = rpc::call(pool, &self.scheduler_addr, request, &[]).await?;
        match reply.message {
            Message::Ok { status } if status == "OK" => Ok(()),
            other => Err(WorkerError::ProtocolViolation {
                reason: format!("scheduler rejected registration: {:?}", other),
            }),
        }
    }

    /// Switches the already-connected scheduler socket into batched-stream
    /// mode. Called lazily on first use, never more than once.
    pub fn open_stream<S>(&mut self, connection: Connection<S>, interval: Duration, channel_buffer_size: usize)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        assert!(
            self.stream.is_none(),
            "batched stream opened twice: programmer error"
        );
        self.stream = Some(BatchedSender::spawn(connection, interval, channel_buffer_size));
    }

    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    pub async fn send(&self, envelope: Envelope) -> Result<()> {
        match &self.stream {
            Some(stream) => stream.send(envelope).await,
            None => panic!("attempted to send on the scheduler stream before it was opened"),
        }
    }

    pub async fn task_finished(&self, key: Key, nbytes: u64) -> Result<()> {
        self.send(Envelope::new(Message::TaskFinished {
            key,
            status: "OK".to_string(),
            nbytes,
        }))
        .await
    }

    pub async fn task_erred(&self, key: Key, exception: String, traceback: String) -> Result<()> {
        self.send(Envelope::new(Message::TaskErred {
            key,
            exception,
            traceback,
        }))
        .await
    }

    pub async fn who_has(&self, pool: &ConnectionPool, keys: Vec<Key>) -> Result<HashMap<Key, Vec<Address>>> {
        let reply = rpc::call(pool, &self.scheduler_addr, Message::WhoHas { keys }, &[]).await?;
        match reply.message {
            Message::WhoHasReply { who_has } => Ok(who_has),
            other => Err(WorkerError::ProtocolViolation {
                reason: format!("unexpected who_has reply: {:?}", other),
            }),
        }
    }

    /// Unless suppressed, sends `unregister` then flushes and closes the
    /// stream.
    pub async fn close(self, report: bool) {
        info!("Stopping worker at {}", self.my_address);
        if let Some(stream) = self.stream {
            if report {
                let _ = stream
                    .send(Envelope::new(Message::Unregister {
                        address: self.my_address.clone(),
                    }))
                    .await;
            }
            stream.close().await;
        }
    }
}
