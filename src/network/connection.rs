//! Per-connection ingest state and the connection pool
//!
//! The driver owns a connection's buffered bytes and its protocol mode.
//! The first byte decides the mode for the connection's lifetime:
//! `0xAA` selects the binary protocol, anything else the text protocol.
//! Each `drive` call runs the chosen parser to exhaustion and feeds every
//! accepted sample into the sink.

use crate::error::Result;
use crate::metrics::SampleSink;
use crate::network::stream::StreamBuffer;
use crate::network::{binary, text};
use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

/// Which wire protocol a connection speaks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamMode {
    Text,
    Binary,
}

/// Parser state for one connection
#[derive(Debug, Default)]
pub struct ConnectionDriver {
    mode: Option<StreamMode>,
    stream: StreamBuffer,
    samples_accepted: u64,
}

impl ConnectionDriver {
    pub fn new() -> Self {
        Self {
            mode: None,
            stream: StreamBuffer::new(),
            samples_accepted: 0,
        }
    }

    /// Append freshly read bytes
    pub fn feed(&mut self, data: &[u8]) {
        self.stream.extend(data);
    }

    /// Buffer handle for `read_buf`-style fills straight off the socket
    pub fn stream_mut(&mut self) -> &mut StreamBuffer {
        &mut self.stream
    }

    /// The protocol this connection locked onto, once known
    pub fn mode(&self) -> Option<StreamMode> {
        self.mode
    }

    /// Samples accepted over the connection's lifetime
    pub fn samples_accepted(&self) -> u64 {
        self.samples_accepted
    }

    /// Consume every complete record currently buffered. Returns the
    /// number of samples accepted by this call; an error means the
    /// connection must be closed.
    pub fn drive<S: SampleSink>(&mut self, sink: &S, input_counter: Option<&str>) -> Result<u64> {
        let Some(first) = self.stream.peek_byte() else {
            return Ok(0);
        };
        let mode = *self.mode.get_or_insert(if first == binary::BINARY_MAGIC {
            StreamMode::Binary
        } else {
            StreamMode::Text
        });

        let accepted = match mode {
            StreamMode::Text => text::drive(&mut self.stream, sink, input_counter)?,
            StreamMode::Binary => binary::drive(&mut self.stream, sink, input_counter)?,
        };
        self.samples_accepted += accepted;
        Ok(accepted)
    }
}

/// Metadata for one live client connection
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub client_id: Uuid,
    pub remote_addr: SocketAddr,
    pub connected_at: Instant,
}

/// Tracks live connections and enforces the configured limit
#[derive(Debug)]
pub struct ConnectionPool {
    connections: DashMap<Uuid, ConnectionInfo>,
    max_connections: usize,
    total_accepted: AtomicU64,
    total_rejected: AtomicU64,
}

impl ConnectionPool {
    pub fn new(max_connections: usize) -> Self {
        Self {
            connections: DashMap::new(),
            max_connections,
            total_accepted: AtomicU64::new(0),
            total_rejected: AtomicU64::new(0),
        }
    }

    /// Register a new connection, or reject it when the pool is full
    pub fn try_register(&self, client_id: Uuid, remote_addr: SocketAddr) -> bool {
        if self.connections.len() >= self.max_connections {
            self.total_rejected.fetch_add(1, Ordering::Relaxed);
            warn!(
                %remote_addr,
                active = self.connections.len(),
                "connection limit reached, rejecting"
            );
            return false;
        }
        self.connections.insert(
            client_id,
            ConnectionInfo {
                client_id,
                remote_addr,
                connected_at: Instant::now(),
            },
        );
        self.total_accepted.fetch_add(1, Ordering::Relaxed);
        debug!(%client_id, %remote_addr, active = self.connections.len(), "connection registered");
        true
    }

    pub fn deregister(&self, client_id: Uuid) {
        if self.connections.remove(&client_id).is_some() {
            debug!(%client_id, active = self.connections.len(), "connection deregistered");
        }
    }

    pub fn active_connections(&self) -> usize {
        self.connections.len()
    }

    pub fn max_connections(&self) -> usize {
        self.max_connections
    }

    pub fn total_accepted(&self) -> u64 {
        self.total_accepted.load(Ordering::Relaxed)
    }

    pub fn total_rejected(&self) -> u64 {
        self.total_rejected.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MetricsConfig;
    use crate::metrics::{Accumulator, MetricType, MetricsRegistry};

    fn registry() -> MetricsRegistry {
        MetricsRegistry::new(&MetricsConfig::default(), 0)
    }

    #[test]
    fn test_mode_is_picked_from_first_byte() {
        let reg = registry();

        let mut driver = ConnectionDriver::new();
        driver.feed(b"a:1|c\n");
        driver.drive(&reg, None).unwrap();
        assert_eq!(driver.mode(), Some(StreamMode::Text));

        let mut driver = ConnectionDriver::new();
        driver.feed(&[binary::BINARY_MAGIC]);
        driver.drive(&reg, None).unwrap();
        assert_eq!(driver.mode(), Some(StreamMode::Binary));
    }

    #[test]
    fn test_mode_is_sticky() {
        let reg = registry();
        let mut driver = ConnectionDriver::new();
        driver.feed(b"a:1|c\n");
        driver.drive(&reg, None).unwrap();

        // A later 0xAA byte is just a malformed text line, not a mode switch.
        driver.feed(&[binary::BINARY_MAGIC]);
        driver.feed(b":1|c\n");
        assert_eq!(driver.mode(), Some(StreamMode::Text));
        assert!(driver.drive(&reg, None).is_err());
    }

    #[test]
    fn test_empty_drive_is_noop() {
        let reg = registry();
        let mut driver = ConnectionDriver::new();
        assert_eq!(driver.drive(&reg, None).unwrap(), 0);
        assert_eq!(driver.mode(), None);
    }

    #[test]
    fn test_byte_at_a_time_matches_whole_stream() {
        let whole = {
            let reg = registry();
            let mut driver = ConnectionDriver::new();
            driver.feed(b"a:1|c\na:2.5|c\nb:-3|g\n");
            driver.drive(&reg, None).unwrap();
            snapshot(&reg)
        };

        let split = {
            let reg = registry();
            let mut driver = ConnectionDriver::new();
            for &byte in b"a:1|c\na:2.5|c\nb:-3|g\n" {
                driver.feed(&[byte]);
                driver.drive(&reg, None).unwrap();
            }
            snapshot(&reg)
        };

        assert_eq!(whole, split);
    }

    fn snapshot(reg: &MetricsRegistry) -> Vec<(String, MetricType, u64, f64)> {
        let mut rows = Vec::new();
        reg.for_each_mut(|name, acc| {
            let row = match acc {
                Accumulator::Counter(m) => (name.to_string(), MetricType::Counter, m.count(), m.sum()),
                Accumulator::Gauge(g) => (name.to_string(), MetricType::Gauge, 0, g.value),
                _ => panic!("unexpected accumulator"),
            };
            rows.push(row);
        });
        rows.sort_by(|a, b| a.0.cmp(&b.0));
        rows
    }

    #[test]
    fn test_samples_accepted_counter() {
        let reg = registry();
        let mut driver = ConnectionDriver::new();
        driver.feed(b"a:1|c\nb:2|c\n");
        driver.drive(&reg, None).unwrap();
        driver.feed(b"c:3|c\n");
        driver.drive(&reg, None).unwrap();
        assert_eq!(driver.samples_accepted(), 3);
    }

    #[test]
    fn test_pool_limit() {
        let pool = ConnectionPool::new(2);
        let addr: SocketAddr = "127.0.0.1:9000".parse().unwrap();

        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        assert!(pool.try_register(a, addr));
        assert!(pool.try_register(b, addr));
        assert!(!pool.try_register(Uuid::new_v4(), addr));
        assert_eq!(pool.active_connections(), 2);
        assert_eq!(pool.total_rejected(), 1);

        pool.deregister(a);
        assert!(pool.try_register(Uuid::new_v4(), addr));
        assert_eq!(pool.total_accepted(), 3);
    }
}
