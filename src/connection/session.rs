//! Proxy Session
//!
//! One client connection from the first header byte to the end of the relay.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::time::timeout;
use tracing::{debug, trace};

use super::hooks::{ConnectionOpener, PeerConnection, RequestFilter};
use crate::config::Config;
use crate::protocol::{self, ProxyRequest, HTTP_TUNNEL_ESTABLISHED};
use crate::relay::{RelayEngine, RelaySession, RelaySummary};
use crate::Result;

/// Lifecycle of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    HeaderWait,
    Filtered,
    Connecting,
    Relaying,
    Closed,
}

/// How a session ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    /// Client went away before sending a header
    ClientClosed,
    /// Header could not be parsed
    Rejected,
    /// A request filter answered the client
    Filtered,
    /// Peer could not be opened in time
    ConnectFailed,
    Relayed(RelaySummary),
}

/// Per-session limits shared by every connection
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub connect_timeout: Duration,
    pub max_header_size: usize,
    pub relay: RelayEngine,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            max_header_size: 64 * 1024,
            relay: RelayEngine::new(),
        }
    }
}

impl SessionSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            connect_timeout: config.server.connect_timeout,
            max_header_size: config.server.max_header_size,
            relay: RelayEngine::from_config(config),
        }
    }
}

/// State machine driving a single client connection
pub struct ProxySession<S> {
    id: String,
    client_addr: SocketAddr,
    client: BufReader<S>,
    state: SessionState,
    opener: Arc<dyn ConnectionOpener>,
    filter: Arc<dyn RequestFilter>,
    settings: SessionSettings,
}

impl<S> ProxySession<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(
        id: String,
        client_addr: SocketAddr,
        stream: S,
        opener: Arc<dyn ConnectionOpener>,
        filter: Arc<dyn RequestFilter>,
        settings: SessionSettings,
    ) -> Self {
        Self {
            id,
            client_addr,
            client: BufReader::new(stream),
            state: SessionState::HeaderWait,
            opener,
            filter,
            settings,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    fn transition(&mut self, next: SessionState) {
        trace!("Session {}: {:?} -> {:?}", self.id, self.state, next);
        self.state = next;
    }

    /// Drive the session to completion.
    ///
    /// Malformed requests and failed dials end the session without writing
    /// anything to the client. Only I/O errors after the peer is open are
    /// returned.
    pub async fn run(mut self) -> Result<SessionOutcome> {
        let request = match self.read_request().await {
            Ok(Some(request)) => request,
            Ok(None) => {
                self.transition(SessionState::Closed);
                return Ok(SessionOutcome::ClientClosed);
            }
            Err(e) => {
                debug!("Session {}: dropping request: {:#}", self.id, e);
                self.transition(SessionState::Closed);
                return Ok(SessionOutcome::Rejected);
            }
        };

        self.transition(SessionState::Filtered);
        let handled = self
            .filter
            .filter(&request, &mut self.client)
            .await
            .context("Request filter failed")?;
        if handled {
            self.client.flush().await.ok();
            self.transition(SessionState::Closed);
            return Ok(SessionOutcome::Filtered);
        }

        self.transition(SessionState::Connecting);
        let peer = match timeout(
            self.settings.connect_timeout,
            self.opener.open(&request.host, request.port),
        )
        .await
        {
            Ok(Ok(peer)) => peer,
            Ok(Err(e)) => {
                debug!("Session {}: cannot open {}: {:#}", self.id, request.target(), e);
                self.transition(SessionState::Closed);
                return Ok(SessionOutcome::ConnectFailed);
            }
            Err(_) => {
                debug!(
                    "Session {}: opening {} timed out after {:?}",
                    self.id,
                    request.target(),
                    self.settings.connect_timeout
                );
                self.transition(SessionState::Closed);
                return Ok(SessionOutcome::ConnectFailed);
            }
        };

        self.transition(SessionState::Relaying);
        self.relay(request, peer).await
    }

    async fn read_request(&mut self) -> Result<Option<ProxyRequest>> {
        let Some(header) =
            protocol::read_header(&mut self.client, self.settings.max_header_size).await?
        else {
            return Ok(None);
        };
        protocol::parse_request(&header).map(Some)
    }

    async fn relay(mut self, request: ProxyRequest, mut peer: PeerConnection) -> Result<SessionOutcome> {
        let preamble = if request.tunnel {
            self.client.write_all(HTTP_TUNNEL_ESTABLISHED).await
        } else {
            let written = peer.stream.write_all(request.header.as_bytes()).await;
            if written.is_ok() {
                (peer.stats)(true, request.header.len());
            }
            written
        };

        if let Err(e) = preamble {
            peer.stream.shutdown().await.ok();
            self.transition(SessionState::Closed);
            return Err(e).context("Failed to start relay");
        }

        let relay_session = RelaySession::new(self.id.clone(), self.client_addr, request.target());
        let summary = self
            .settings
            .relay
            .relay(&relay_session, self.client, peer.stream, &peer.stats)
            .await;
        relay_session.log_stats();

        Ok(SessionOutcome::Relayed(summary))
    }
}
