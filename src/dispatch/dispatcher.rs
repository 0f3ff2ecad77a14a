//! Dispatcher
//!
//! Opens peer connections for sessions: picks a route for the host, then
//! dials it directly or through the SOCKS5 backend.

use std::sync::Arc;

use anyhow::{anyhow, bail, Context};
use async_trait::async_trait;
use tokio::net::TcpStream;
use tracing::{debug, info};

use super::BackendEndpoint;
use crate::connection::{ConnectionOpener, PeerConnection};
use crate::metrics::{TrafficRoute, TrafficStatistics};
use crate::protocol::connect_via_socks5;
use crate::routing::{RouteDecision, RoutingEngine, RoutingMode};
use crate::Result;

/// Route selection and dialing shared by every session
pub struct Dispatcher {
    mode: RoutingMode,
    backend: Arc<dyn BackendEndpoint>,
    routing: Option<Arc<RoutingEngine>>,
    stats: Arc<TrafficStatistics>,
}

impl Dispatcher {
    /// `routing` is only consulted in smart mode
    pub fn new(
        mode: RoutingMode,
        backend: Arc<dyn BackendEndpoint>,
        routing: Option<Arc<RoutingEngine>>,
        stats: Arc<TrafficStatistics>,
    ) -> Self {
        Self {
            mode,
            backend,
            routing,
            stats,
        }
    }

    pub fn mode(&self) -> RoutingMode {
        self.mode
    }

    pub fn stats(&self) -> &Arc<TrafficStatistics> {
        &self.stats
    }

    /// Pick a route for `host`
    pub async fn decide(&self, host: &str, backend_running: bool) -> RouteDecision {
        if !backend_running {
            return RouteDecision::AllDirect;
        }

        match (self.mode, &self.routing) {
            (RoutingMode::Direct, _) | (RoutingMode::Smart, None) => RouteDecision::AllDirect,
            (RoutingMode::Proxy, _) => RouteDecision::AllProxy,
            (RoutingMode::Smart, Some(routing)) => {
                RouteDecision::from_verdict(routing.need_proxy(host).await)
            }
        }
    }

    async fn dial_direct(host: &str, port: u16) -> Result<TcpStream> {
        let bare = host.trim_start_matches('[').trim_end_matches(']');
        let stream = TcpStream::connect((bare, port))
            .await
            .with_context(|| format!("Failed to connect to {}:{}", host, port))?;
        stream.set_nodelay(true).ok();
        Ok(stream)
    }
}

#[async_trait]
impl ConnectionOpener for Dispatcher {
    async fn open(&self, host: &str, port: u16) -> Result<PeerConnection> {
        if host.is_empty() {
            bail!("Request has no destination host");
        }

        let host = host.to_ascii_lowercase();
        let backend = self.backend.endpoint();
        let decision = self.decide(&host, backend.is_some()).await;

        self.stats.record_route(&host, port, decision);
        info!("{} {}", decision.label(), host);

        if !decision.is_reachable() {
            bail!("Destination {} is unreachable", host);
        }

        let stream = if decision.via_backend() {
            let (backend_host, backend_port) =
                backend.ok_or_else(|| anyhow!("Backend stopped before dialing {}", host))?;
            debug!(
                "Dialing {}:{} via backend {}:{}",
                host, port, backend_host, backend_port
            );
            connect_via_socks5((backend_host.as_str(), backend_port), &host, port).await?
        } else {
            debug!("Dialing {}:{} directly", host, port);
            Self::dial_direct(&host, port).await?
        };

        Ok(PeerConnection::new(
            stream,
            self.stats.callback(TrafficRoute::from(decision)),
        ))
    }
}
