//! Metrics Types

use std::time::SystemTime;

use crate::routing::RouteDecision;

/// One routing decision, kept for the status page
#[derive(Debug, Clone)]
pub struct RouteEvent {
    pub time: SystemTime,
    pub host: String,
    pub port: u16,
    pub decision: RouteDecision,
}

impl RouteEvent {
    pub fn new(host: &str, port: u16, decision: RouteDecision) -> Self {
        Self {
            time: SystemTime::now(),
            host: host.to_string(),
            port,
            decision,
        }
    }
}

/// Bytes moved per route since start
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrafficSnapshot {
    pub direct_sent: u64,
    pub direct_received: u64,
    pub proxy_sent: u64,
    pub proxy_received: u64,
}

impl TrafficSnapshot {
    pub fn total(&self) -> u64 {
        self.direct_sent + self.direct_received + self.proxy_sent + self.proxy_received
    }
}

/// Which way the bytes of a peer connection are routed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrafficRoute {
    Direct,
    Proxy,
}

impl TrafficRoute {
    pub fn label(&self) -> &'static str {
        match self {
            TrafficRoute::Direct => "direct",
            TrafficRoute::Proxy => "proxy",
        }
    }
}

impl From<RouteDecision> for TrafficRoute {
    fn from(decision: RouteDecision) -> Self {
        if decision.via_backend() {
            TrafficRoute::Proxy
        } else {
            TrafficRoute::Direct
        }
    }
}
