//! Active connection tracking
//!
//! Bounded table of live transport connections. New connections past the
//! configured limit are refused; entries are removed when their RAII guard
//! drops.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use crate::lock_utils;

/// Transport a connection arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Http2,
    Http3,
}

impl Transport {
    pub fn as_str(&self) -> &'static str {
        match self {
            Transport::Http2 => "http2",
            Transport::Http3 => "http3",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub id: u64,
    pub transport: Transport,
    pub peer_addr: SocketAddr,
    pub created_at: Instant,
    pub last_activity: Instant,
}

/// Shared table of live connections with a hard cap.
pub struct ConnectionTable {
    connections: Mutex<HashMap<u64, ConnectionInfo>>,
    next_id: AtomicU64,
    max_connections: usize,
}

impl ConnectionTable {
    pub fn new(max_connections: usize) -> Self {
        Self {
            connections: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            max_connections,
        }
    }

    /// Register a new connection; `None` when the table is at capacity.
    pub fn try_register(
        self: &Arc<Self>,
        transport: Transport,
        peer_addr: SocketAddr,
    ) -> Option<ConnectionGuard> {
        let mut connections = lock_utils::mutex_lock(&self.connections);
        if connections.len() >= self.max_connections {
            return None;
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let now = Instant::now();
        connections.insert(
            id,
            ConnectionInfo {
                id,
                transport,
                peer_addr,
                created_at: now,
                last_activity: now,
            },
        );
        let count = connections
            .values()
            .filter(|c| c.transport == transport)
            .count() as i64;
        drop(connections);
        crate::metrics::set_open_connections(transport.as_str(), count);
        Some(ConnectionGuard {
            table: Arc::clone(self),
            id,
            transport,
        })
    }

    /// Bump a connection's activity timestamp.
    pub fn touch(&self, id: u64) {
        let mut connections = lock_utils::mutex_lock(&self.connections);
        if let Some(info) = connections.get_mut(&id) {
            info.last_activity = Instant::now();
        }
    }

    pub fn count(&self) -> usize {
        lock_utils::mutex_lock(&self.connections).len()
    }

    pub fn count_for(&self, transport: Transport) -> usize {
        lock_utils::mutex_lock(&self.connections)
            .values()
            .filter(|c| c.transport == transport)
            .count()
    }

    fn remove(&self, id: u64) {
        lock_utils::mutex_lock(&self.connections).remove(&id);
    }
}

/// Removes the connection from the table on drop.
pub struct ConnectionGuard {
    table: Arc<ConnectionTable>,
    id: u64,
    transport: Transport,
}

impl ConnectionGuard {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn touch(&self) {
        self.table.touch(self.id);
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.table.remove(self.id);
        crate::metrics::set_open_connections(
            self.transport.as_str(),
            self.table.count_for(self.transport) as i64,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        format!("127.0.0.1:{port}").parse().unwrap()
    }

    #[test]
    fn registers_up_to_capacity() {
        let table = Arc::new(ConnectionTable::new(2));
        let a = table.try_register(Transport::Http2, addr(1000));
        let b = table.try_register(Transport::Http3, addr(1001));
        assert!(a.is_some());
        assert!(b.is_some());
        assert!(table.try_register(Transport::Http2, addr(1002)).is_none());
        assert_eq!(table.count(), 2);
    }

    #[test]
    fn guard_drop_frees_slot() {
        let table = Arc::new(ConnectionTable::new(1));
        let guard = table.try_register(Transport::Http2, addr(1000)).unwrap();
        assert_eq!(table.count(), 1);
        drop(guard);
        assert_eq!(table.count(), 0);
        assert!(table.try_register(Transport::Http2, addr(1001)).is_some());
    }

    #[test]
    fn per_transport_counts() {
        let table = Arc::new(ConnectionTable::new(8));
        let _a = table.try_register(Transport::Http2, addr(1));
        let _b = table.try_register(Transport::Http2, addr(2));
        let _c = table.try_register(Transport::Http3, addr(3));
        assert_eq!(table.count_for(Transport::Http2), 2);
        assert_eq!(table.count_for(Transport::Http3), 1);
    }
}
