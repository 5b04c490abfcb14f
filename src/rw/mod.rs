//! Length-prefixed message I/O over a stream socket (C2).
//!
//! Wire layout: a 4-byte big-endian frame count, followed by that many
//! frames; each frame is an 8-byte big-endian length followed by raw bytes.
//! Frame 0 carries the message header, MessagePack-encoded from a typed
//! [`crate::message::Message`]; any additional frames are carried verbatim
//! as opaque payload bytes (large blobs such as serialized function/argument
//! payloads or fetched values) and never themselves MessagePack-decoded.
//! Nested structure *within* the header frame (maps inside maps) is handled
//! for free by serde's ordinary recursive deserialization of `Message`.

use crate::error::{Result, WorkerError};
use crate::message::Message;
use bytes::{Bytes, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{self, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufStream};
use tokio::net::TcpStream;

/// A framed, buffered duplex connection. Generic over the underlying stream
/// so tests can drive it over `tokio::io::duplex` instead of a real socket.
#[derive(Debug)]
pub struct Connection<S> {
    stream: BufStream<S>,
}

/// One fully-decoded message: the typed header plus any trailing opaque
/// payload frames attached to it.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub message: Message,
    pub payload: Vec<Bytes>,
}

impl Envelope {
    pub fn new(message: Message) -> Self {
        Self {
            message,
            payload: Vec::new(),
        }
    }

    pub fn with_payload(message: Message, payload: Vec<Bytes>) -> Self {
        Self { message, payload }
    }
}

impl From<Message> for Envelope {
    fn from(message: Message) -> Self {
        Envelope::new(message)
    }
}

/// Wraps a half of a split `TcpStream` so it satisfies `Connection`'s
/// `AsyncRead + AsyncWrite` bound even though only one direction is ever
/// used. Needed to run the scheduler connection full-duplex: one
/// [`Connection`] drives the read half for the incoming compute-stream,
/// another drives the write half inside the batched sender.
pub struct ReadOnly<R>(pub R);

impl<R: AsyncRead + Unpin> AsyncRead for ReadOnly<R> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut [u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.0).poll_read(cx, buf)
    }
}

impl<R: Unpin> AsyncWrite for ReadOnly<R> {
    fn poll_write(self: Pin<&mut Self>, _cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        Poll::Ready(Ok(buf.len()))
    }
    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

pub struct WriteOnly<W>(pub W);

impl<W: Unpin> AsyncRead for WriteOnly<W> {
    fn poll_read(self: Pin<&mut Self>, _cx: &mut Context<'_>, _buf: &mut [u8]) -> Poll<io::Result<usize>> {
        Poll::Ready(Ok(0))
    }
}

impl<W: AsyncWrite + Unpin> AsyncWrite for WriteOnly<W> {
    fn poll_write(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.0).poll_write(cx, buf)
    }
    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.0).poll_flush(cx)
    }
    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.0).poll_shutdown(cx)
    }
}

impl Connection<TcpStream> {
    pub async fn connect(addr: &str, tcp_nodelay: bool) -> Result<Self> {
        let stream = TcpStream::connect(addr).await.map_err(|_| {
            WorkerError::TransportLost {
                addr: addr.to_string(),
            }
        })?;
        stream.set_nodelay(tcp_nodelay).ok();
        Ok(Self::from_stream(stream))
    }
}

impl<S> Connection<S>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    pub fn from_stream(stream: S) -> Self {
        Self {
            stream: BufStream::new(stream),
        }
    }

    /// Reads one full message: frame count, then each frame in turn. A clean
    /// end-of-stream before any bytes are read returns `Ok(None)`; anything
    /// that reads a partial frame fails with `TransportTruncated`.
    pub async fn read_frames(&mut self) -> Result<Option<Vec<Bytes>>> {
        let mut count_buf = [0u8; 4];
        match read_exact_or_eof(&mut self.stream, &mut count_buf).await? {
            0 => return Ok(None),
            n if n < 4 => {
                return Err(WorkerError::TransportTruncated {
                    read: n,
                    expected: 4,
                })
            }
            _ => {}
        }
        let frame_count = u32::from_be_bytes(count_buf) as usize;

        let mut frames = Vec::with_capacity(frame_count);
        for _ in 0..frame_count {
            let mut len_buf = [0u8; 8];
            self.stream
                .read_exact(&mut len_buf)
                .await
                .map_err(|_| WorkerError::TransportTruncated {
                    read: 0,
                    expected: 8,
                })?;
            let len = u64::from_be_bytes(len_buf) as usize;

            let mut buf = BytesMut::with_capacity(len);
            buf.resize(len, 0);
            self.stream
                .read_exact(&mut buf)
                .await
                .map_err(|_| WorkerError::TransportTruncated {
                    read: 0,
                    expected: len,
                })?;
            frames.push(buf.freeze());
        }
        Ok(Some(frames))
    }

    pub async fn write_frames(&mut self, frames: &[Bytes]) -> Result<()> {
        let count = (frames.len() as u32).to_be_bytes();
        self.stream
            .write_all(&count)
            .await
            .map_err(|_| WorkerError::TransportLost {
                addr: "<unknown>".to_string(),
            })?;
        for frame in frames {
            let len = (frame.len() as u64).to_be_bytes();
            self.stream
                .write_all(&len)
                .await
                .map_err(|_| WorkerError::TransportLost {
                    addr: "<unknown>".to_string(),
                })?;
            self.stream
                .write_all(frame)
                .await
                .map_err(|_| WorkerError::TransportLost {
                    addr: "<unknown>".to_string(),
                })?;
        }
        Ok(())
    }

    pub async fn flush(&mut self) -> Result<()> {
        self.stream
            .flush()
            .await
            .map_err(|_| WorkerError::TransportLost {
                addr: "<unknown>".to_string(),
            })
    }

    /// Reads one message and decodes frame 0 as `V`; remaining frames are
    /// returned as opaque payload.
    pub async fn recv<V>(&mut self) -> Result<Option<(V, Vec<Bytes>)>>
    where
        V: DeserializeOwned,
    {
        match self.read_frames().await? {
            None => Ok(None),
            Some(mut frames) => {
                if frames.is_empty() {
                    return Err(WorkerError::ProtocolViolation {
                        reason: "message with zero frames".to_string(),
                    });
                }
                let header = frames.remove(0);
                let value: V = rmp_serde::from_read_ref(&header).map_err(|e| {
                    WorkerError::ProtocolViolation {
                        reason: format!("bad msgpack header: {}", e),
                    }
                })?;
                Ok(Some((value, frames)))
            }
        }
    }

    pub async fn send<V>(&mut self, value: &V, payload: &[Bytes]) -> Result<()>
    where
        V: Serialize,
    {
        let header = serialize(value)?;
        let mut frames = Vec::with_capacity(1 + payload.len());
        frames.push(header);
        frames.extend_from_slice(payload);
        self.write_frames(&frames).await?;
        self.flush().await
    }

    pub async fn recv_envelope(&mut self) -> Result<Option<Envelope>> {
        match self.recv::<Message>().await? {
            None => Ok(None),
            Some((message, payload)) => Ok(Some(Envelope { message, payload })),
        }
    }

    pub async fn send_envelope(&mut self, envelope: &Envelope) -> Result<()> {
        self.send(&envelope.message, &envelope.payload).await
    }
}

async fn read_exact_or_eof<S>(stream: &mut S, buf: &mut [u8]) -> Result<usize>
where
    S: tokio::io::AsyncRead + Unpin,
{
    let mut read = 0;
    while read < buf.len() {
        let n = stream
            .read(&mut buf[read..])
            .await
            .map_err(|_| WorkerError::TransportLost {
                addr: "<unknown>".to_string(),
            })?;
        if n == 0 {
            break;
        }
        read += n;
    }
    Ok(read)
}

fn serialize<V>(value: &V) -> Result<Bytes>
where
    V: Serialize,
{
    let bytes = rmp_serde::to_vec_named(value).map_err(|e| WorkerError::ProtocolViolation {
        reason: format!("failed to encode message: {}", e),
    })?;
    Ok(Bytes::from(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;

    #[tokio::test]
    async fn round_trip_over_duplex() {
        let (client, server) = tokio::io::duplex(4096);
        let mut client = Connection::from_stream(client);
        let mut server = Connection::from_stream(server);

        let msg = Message::Keys {};
        client.send(&msg, &[]).await.unwrap();

        let (decoded, payload) = server.recv::<Message>().await.unwrap().unwrap();
        assert_eq!(decoded, msg);
        assert!(payload.is_empty());
    }

    #[tokio::test]
    async fn round_trip_with_payload_frames() {
        let (client, server) = tokio::io::duplex(4096);
        let mut client = Connection::from_stream(client);
        let mut server = Connection::from_stream(server);

        let msg = Message::UpdateData {
            keys: vec!["a".to_string()],
            report: true,
        };
        let payload = vec![Bytes::from_static(b"opaque-bytes")];
        client.send(&msg, &payload).await.unwrap();

        let envelope = server.recv_envelope().await.unwrap().unwrap();
        assert_eq!(envelope.message, msg);
        assert_eq!(envelope.payload, payload);
    }

    #[tokio::test]
    async fn clean_close_with_no_bytes_read_returns_none() {
        let (client, server) = tokio::io::duplex(16);
        drop(client);
        let mut server = Connection::from_stream(server);
        let result = server.read_frames().await.unwrap();
        assert!(result.is_none());
    }
}
