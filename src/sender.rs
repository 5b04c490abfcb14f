//! Batched sender (C3). Wraps one outbound connection, coalescing writes on
//! a timer interval the same way the teacher's `writer_task` buffers writes
//! and flushes only on `interval.tick()`.

use crate::error::{Result, WorkerError};
use crate::rw::{Connection, Envelope};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, Duration};
use tracing::warn;

#[derive(Debug)]
pub struct BatchedSender {
    tx: mpsc::Sender<Envelope>,
    closed: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl BatchedSender {
    pub fn spawn<S>(connection: Connection<S>, interval: Duration, channel_buffer_size: usize) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(channel_buffer_size);
        let closed = Arc::new(AtomicBool::new(false));
        let handle = tokio::spawn(sender_task(connection, interval, rx));
        Self {
            tx,
            closed,
            handle: Some(handle),
        }
    }

    /// Enqueues a message for the next batch. FIFO within the batch is
    /// guaranteed by the underlying mpsc channel's ordering.
    pub async fn send(&self, envelope: Envelope) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(WorkerError::SenderClosed);
        }
        self.tx
            .send(envelope)
            .await
            .map_err(|_| WorkerError::SenderClosed)
    }

    /// Drops the sending half (causing the background task to flush and
    /// exit) and waits for it to finish.
    pub async fn close(self) {
        self.closed.store(true, Ordering::Release);
        let Self { tx, handle, .. } = self;
        // dropping the only sender half wakes the background task's
        // `rx.recv()` with `None`, triggering its final flush.
        drop(tx);
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!("[sender] background task panicked: {:?}", e);
            }
        }
    }
}

async fn sender_task<S>(
    mut connection: Connection<S>,
    interval: Duration,
    mut rx: mpsc::Receiver<Envelope>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut ticker = time::interval(interval);
    loop {
        tokio::select! {
            envelope = rx.recv() => {
                match envelope {
                    Some(envelope) => {
                        if let Err(e) = connection.send_envelope(&envelope).await {
                            warn!("[sender] error writing batched message: {:?}", e);
                        }
                    }
                    None => {
                        if let Err(e) = connection.flush().await {
                            warn!("[sender] error flushing on close: {:?}", e);
                        }
                        break;
                    }
                }
            }
            _ = ticker.tick() => {
                if let Err(e) = connection.flush().await {
                    warn!("[sender] error flushing on interval: {:?}", e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;

    #[tokio::test]
    async fn send_after_close_fails() {
        let (client, _server) = tokio::io::duplex(4096);
        let connection = Connection::from_stream(client);
        let sender = BatchedSender::spawn(connection, Duration::from_millis(1), 8);
        sender.closed.store(true, Ordering::Release);
        let result = sender.send(Envelope::new(Message::Keys {})).await;
        assert!(matches!(result, Err(WorkerError::SenderClosed)));
    }

    #[tokio::test]
    async fn batches_flush_on_interval() {
        let (client, mut server) = tokio::io::duplex(65536);
        let connection = Connection::from_stream(client);
        let sender = BatchedSender::spawn(connection, Duration::from_millis(5), 8);

        sender.send(Envelope::new(Message::Keys {})).await.unwrap();
        sender
            .send(Envelope::new(Message::ComputeStream {}))
            .await
            .unwrap();
        sender.close().await;

        let mut server = Connection::from_stream(&mut server);
        let (first, _) = server.recv::<Message>().await.unwrap().unwrap();
        let (second, _) = server.recv::<Message>().await.unwrap().unwrap();
        assert_eq!(first, Message::Keys {});
        assert_eq!(second, Message::ComputeStream {});
    }
}
