//! Relay Session

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use tracing::{debug, info};

/// Traffic ledger for one client-to-destination relay.
///
/// Both pump loops share it by reference, so the counters are atomics.
#[derive(Debug)]
pub struct RelaySession {
    id: String,
    client_addr: SocketAddr,
    target: String,
    opened_at: Instant,
    up: AtomicU64,
    down: AtomicU64,
}

impl RelaySession {
    /// `target` is the `host:port` the client asked for
    pub fn new(id: String, client_addr: SocketAddr, target: String) -> Self {
        debug!("Relay {} opened: {} -> {}", id, client_addr, target);
        Self {
            id,
            client_addr,
            target,
            opened_at: Instant::now(),
            up: AtomicU64::new(0),
            down: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    /// Client to peer
    pub fn bytes_up(&self) -> u64 {
        self.up.load(Ordering::Relaxed)
    }

    /// Peer to client
    pub fn bytes_down(&self) -> u64 {
        self.down.load(Ordering::Relaxed)
    }

    pub fn total_bytes(&self) -> u64 {
        self.bytes_up() + self.bytes_down()
    }

    pub fn duration(&self) -> Duration {
        self.opened_at.elapsed()
    }

    pub fn add_bytes_up(&self, bytes: u64) {
        self.up.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn add_bytes_down(&self, bytes: u64) {
        self.down.fetch_add(bytes, Ordering::Relaxed);
    }

    /// One structured line per finished relay
    pub fn log_stats(&self) {
        let elapsed = Duration::from_millis(self.duration().as_millis() as u64);
        info!(
            session_id = %self.id,
            client = %self.client_addr,
            target = %self.target,
            elapsed = %humantime::format_duration(elapsed),
            up = self.bytes_up(),
            down = self.bytes_down(),
            "Relay closed"
        );
    }
}
