//! Session Hooks
//!
//! Seams between a session and the application that owns it: how peers are
//! dialed and which requests are answered locally.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::protocol::ProxyRequest;
use crate::relay::StatsCallback;
use crate::Result;

/// Duplex byte stream to a peer
pub trait PeerStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T> PeerStream for T where T: AsyncRead + AsyncWrite + Unpin + Send {}

/// An opened peer plus the statistics sink for its traffic
pub struct PeerConnection {
    pub stream: Box<dyn PeerStream>,
    pub stats: StatsCallback,
}

impl PeerConnection {
    pub fn new<S>(stream: S, stats: StatsCallback) -> Self
    where
        S: PeerStream + 'static,
    {
        Self {
            stream: Box::new(stream),
            stats,
        }
    }

    /// Peer whose traffic is not counted anywhere
    pub fn uncounted<S>(stream: S) -> Self
    where
        S: PeerStream + 'static,
    {
        Self::new(stream, Arc::new(|_, _| {}))
    }
}

impl std::fmt::Debug for PeerConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerConnection").finish_non_exhaustive()
    }
}

/// Opens the connection a session relays to
#[async_trait]
pub trait ConnectionOpener: Send + Sync {
    async fn open(&self, host: &str, port: u16) -> Result<PeerConnection>;
}

/// Inspects a parsed request before any peer is dialed.
///
/// Returning `Ok(true)` means the filter answered the client itself and the
/// session ends.
#[async_trait]
pub trait RequestFilter: Send + Sync {
    async fn filter(
        &self,
        request: &ProxyRequest,
        client: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> Result<bool>;
}

/// Filter that never handles anything
#[derive(Debug, Default, Clone, Copy)]
pub struct PassThroughFilter;

#[async_trait]
impl RequestFilter for PassThroughFilter {
    async fn filter(
        &self,
        _request: &ProxyRequest,
        _client: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> Result<bool> {
        Ok(false)
    }
}
