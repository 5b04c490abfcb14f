//! Address-keyed pool of reusable peer connections (C5). The state maps
//! themselves are only ever touched by the worker's single event-loop task
//! (§5), but pooled connections are dialed and used concurrently by fetch
//! tasks spawned out of `ensure_communicating`, so the pool itself needs its
//! own lock; we use `tokio::sync::Mutex` rather than the teacher's
//! lock-free `dashmap`, since pool operations always `.await` a dial or a
//! round-trip anyway and a plain async mutex is the idiomatic fit.

use crate::address::Address;
use crate::error::Result;
use crate::rw::Connection;
use std::collections::HashMap;
use tokio::net::TcpStream;
use tokio::sync::Mutex;

#[derive(Debug)]
struct Inner {
    idle: HashMap<Address, Vec<Connection<TcpStream>>>,
    total_idle: usize,
}

#[derive(Debug)]
pub struct ConnectionPool {
    inner: Mutex<Inner>,
    limit_per_address: usize,
    limit_total: usize,
    tcp_nodelay: bool,
}

impl ConnectionPool {
    pub fn new(limit_per_address: usize, limit_total: usize, tcp_nodelay: bool) -> Self {
        Self {
            inner: Mutex::new(Inner {
                idle: HashMap::new(),
                total_idle: 0,
            }),
            limit_per_address,
            limit_total,
            tcp_nodelay,
        }
    }

    /// Returns an idle connection to `addr` if one exists, otherwise dials a
    /// fresh one. Broken connections are never handed back by `release`, so
    /// anything found idle here is assumed live.
    pub async fn acquire(&self, addr: &Address) -> Result<Connection<TcpStream>> {
        {
            let mut inner = self.inner.lock().await;
            if let Some(conns) = inner.idle.get_mut(addr) {
                if let Some(conn) = conns.pop() {
                    inner.total_idle -= 1;
                    return Ok(conn);
                }
            }
        }
        Connection::connect(&addr.socket_addr_string(), self.tcp_nodelay).await
    }

    /// Returns a connection to the idle set, or drops (closes) it if the
    /// pool is already at capacity for that address or in aggregate.
    pub async fn release(&self, addr: Address, connection: Connection<TcpStream>, healthy: bool) {
        if !healthy {
            return;
        }
        let mut inner = self.inner.lock().await;
        if inner.total_idle >= self.limit_total {
            return;
        }
        let conns = inner.idle.entry(addr).or_insert_with(Vec::new);
        if conns.len() >= self.limit_per_address {
            return;
        }
        conns.push(connection);
        inner.total_idle += 1;
    }

    /// Closes every idle connection. Connections currently checked out are
    /// dropped by their holders as those tasks unwind.
    pub async fn close(&self) {
        let mut inner = self.inner.lock().await;
        inner.idle.clear();
        inner.total_idle = 0;
    }

    pub async fn idle_count(&self) -> usize {
        self.inner.lock().await.total_idle
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_starts_empty() {
        let pool = ConnectionPool::new(4, 50, true);
        assert_eq!(pool.limit_per_address, 4);
        assert_eq!(pool.limit_total, 50);
    }

    #[tokio::test]
    async fn close_clears_idle_set() {
        let pool = ConnectionPool::new(4, 50, true);
        pool.close().await;
        assert_eq!(pool.idle_count().await, 0);
    }
}
