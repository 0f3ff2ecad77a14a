//! Relay Engine
//!
//! Two loops pump bytes in opposite directions until one side reaches
//! end-of-stream. Each loop half-closes its destination when it exits.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Notify;
use tracing::debug;

use super::RelaySession;
use crate::config::Config;

/// Called with `(is_outbound, byte_count)` for every forwarded chunk
pub type StatsCallback = Arc<dyn Fn(bool, usize) + Send + Sync>;

/// Totals of a finished relay
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelaySummary {
    /// Client to peer
    pub bytes_out: u64,
    /// Peer to client
    pub bytes_in: u64,
}

/// Handles data relay between client and peer connections
#[derive(Debug, Clone)]
pub struct RelayEngine {
    buffer_size: usize,
}

impl Default for RelayEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl RelayEngine {
    /// Create a relay engine with 1 KiB reads
    pub fn new() -> Self {
        Self::with_buffer_size(1024)
    }

    pub fn with_buffer_size(buffer_size: usize) -> Self {
        Self {
            buffer_size: buffer_size.max(1),
        }
    }

    /// Create a new relay engine from configuration
    pub fn from_config(config: &Config) -> Self {
        Self::with_buffer_size(config.server.relay_buffer_size)
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Relay until both directions have finished.
    ///
    /// I/O errors end the affected direction only and are never returned.
    pub async fn relay<C, P>(
        &self,
        session: &RelaySession,
        client: C,
        peer: P,
        stats: &StatsCallback,
    ) -> RelaySummary
    where
        C: AsyncRead + AsyncWrite + Unpin,
        P: AsyncRead + AsyncWrite + Unpin,
    {
        let (client_reader, client_writer) = tokio::io::split(client);
        let (peer_reader, peer_writer) = tokio::io::split(peer);

        let client_eof = Notify::new();
        let peer_eof = Notify::new();

        let outbound = self.pump(
            Direction::Out,
            client_reader,
            peer_writer,
            &client_eof,
            &peer_eof,
            session,
            stats,
        );
        let inbound = self.pump(
            Direction::In,
            peer_reader,
            client_writer,
            &peer_eof,
            &client_eof,
            session,
            stats,
        );

        let (bytes_out, bytes_in) = tokio::join!(outbound, inbound);

        debug!(
            "Relay {} finished: {} bytes out, {} bytes in",
            session.id(), bytes_out, bytes_in
        );

        RelaySummary {
            bytes_out,
            bytes_in,
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn pump<R, W>(
        &self,
        direction: Direction,
        mut reader: R,
        mut writer: W,
        own_eof: &Notify,
        other_eof: &Notify,
        session: &RelaySession,
        stats: &StatsCallback,
    ) -> u64
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut buf = vec![0u8; self.buffer_size];
        let mut total = 0u64;

        loop {
            let n = tokio::select! {
                _ = other_eof.notified() => break,
                read = reader.read(&mut buf) => match read {
                    Ok(0) => {
                        own_eof.notify_one();
                        break;
                    }
                    Ok(n) => n,
                    Err(e) => {
                        debug!("{} {} read error: {}", session.id(), direction, e);
                        break;
                    }
                },
            };

            if let Err(e) = writer.write_all(&buf[..n]).await {
                debug!("{} {} write error: {}", session.id(), direction, e);
                break;
            }

            total += n as u64;
            match direction {
                Direction::Out => session.add_bytes_up(n as u64),
                Direction::In => session.add_bytes_down(n as u64),
            }
            stats(direction == Direction::Out, n);
        }

        if let Err(e) = writer.shutdown().await {
            debug!("{} {} shutdown error: {}", session.id(), direction, e);
        }

        total
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Out,
    In,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Out => write!(f, "out"),
            Direction::In => write!(f, "in"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    fn session() -> RelaySession {
        RelaySession::new(
            "test".to_string(),
            "127.0.0.1:40000".parse().unwrap(),
            "example.com:80".to_string(),
        )
    }

    #[tokio::test]
    async fn test_relay_counts_each_direction() {
        let (client, mut client_remote) = tokio::io::duplex(4096);
        let (peer, mut peer_remote) = tokio::io::duplex(4096);

        let out_total = Arc::new(AtomicU64::new(0));
        let in_total = Arc::new(AtomicU64::new(0));
        let stats: StatsCallback = {
            let out_total = out_total.clone();
            let in_total = in_total.clone();
            Arc::new(move |outbound, n| {
                if outbound {
                    out_total.fetch_add(n as u64, Ordering::Relaxed);
                } else {
                    in_total.fetch_add(n as u64, Ordering::Relaxed);
                }
            })
        };

        let engine = RelayEngine::with_buffer_size(16);
        let session = session();
        let relay = engine.relay(&session, client, peer, &stats);

        let remote = async {
            peer_remote.write_all(&[7u8; 300]).await.unwrap();
            let mut received = vec![0u8; 300];
            client_remote.read_exact(&mut received).await.unwrap();

            client_remote.write_all(&[1u8; 100]).await.unwrap();
            let mut forwarded = vec![0u8; 100];
            peer_remote.read_exact(&mut forwarded).await.unwrap();

            client_remote.shutdown().await.unwrap();
            (client_remote, peer_remote)
        };

        let (summary, _remotes) = tokio::join!(relay, remote);

        assert_eq!(summary.bytes_out, 100);
        assert_eq!(summary.bytes_in, 300);
        assert_eq!(out_total.load(Ordering::Relaxed), 100);
        assert_eq!(in_total.load(Ordering::Relaxed), 300);
        assert_eq!(session.bytes_up(), 100);
        assert_eq!(session.bytes_down(), 300);
    }
}
