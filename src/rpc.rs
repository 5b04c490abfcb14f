//! One-shot request/reply over a new or pooled connection (C4).

use crate::address::Address;
use crate::error::Result;
use crate::message::Message;
use crate::pool::ConnectionPool;
use crate::rw::Envelope;
use bytes::Bytes;

/// Sends `request` to `addr` (via the shared pool) and waits for one reply
/// envelope. The connection is returned to the pool on success and simply
/// dropped (never pooled) on any I/O failure, matching "broken connections
/// are never returned" for C5.
pub async fn call(
    pool: &ConnectionPool,
    addr: &Address,
    request: Message,
    payload: &[Bytes],
) -> Result<Envelope> {
    let mut connection = pool.acquire(addr).await?;
    let outcome = async {
        connection.send(&request, payload).await?;
        connection.recv_envelope().await
    }
    .await;

    match outcome {
        Ok(Some(envelope)) => {
            pool.release(addr.clone(), connection, true).await;
            Ok(envelope)
        }
        Ok(None) => Err(crate::error::WorkerError::TransportLost {
            addr: addr.to_string(),
        }),
        Err(e) => {
            pool.release(addr.clone(), connection, false).await;
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;
    use crate::rw::Connection;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn call_returns_reply_envelope() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let local_addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut conn = Connection::from_stream(stream);
            let (_msg, _payload) = conn.recv::<Message>().await.unwrap().unwrap();
            conn.send(&Message::Ok { status: "OK".to_string() }, &[])
                .await
                .unwrap();
        });

        let pool = ConnectionPool::new(4, 50, true);
        let addr = Address::tcp(local_addr.ip().to_string(), local_addr.port());
        let reply = call(&pool, &addr, Message::Keys {}, &[]).await.unwrap();
        assert_eq!(
            reply.message,
            Message::Ok {
                status: "OK".to_string()
            }
        );
        server.await.unwrap();
    }
}
