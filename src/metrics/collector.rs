//! Traffic Statistics Collector

use std::collections::VecDeque;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Context;
use prometheus::{IntCounterVec, Opts, Registry, TextEncoder};

use super::{RouteEvent, TrafficRoute, TrafficSnapshot};
use crate::relay::StatsCallback;
use crate::routing::RouteDecision;
use crate::Result;

/// Collects per-route byte counts and recent routing decisions
pub struct TrafficStatistics {
    prometheus_registry: Registry,

    // Prometheus metrics
    bytes_total: IntCounterVec,
    routes_total: IntCounterVec,

    // Internal counters
    direct_sent: AtomicU64,
    direct_received: AtomicU64,
    proxy_sent: AtomicU64,
    proxy_received: AtomicU64,

    recent_routes: Mutex<VecDeque<RouteEvent>>,
    event_capacity: usize,
}

impl TrafficStatistics {
    /// Create a collector keeping the last `event_capacity` routing decisions
    pub fn new(event_capacity: usize) -> Result<Self> {
        let prometheus_registry = Registry::new();

        let bytes_total = IntCounterVec::new(
            Opts::new(
                "splitproxy_bytes_total",
                "Bytes relayed, by route and direction",
            ),
            &["route", "direction"],
        )
        .context("Failed to create bytes_total counter")?;

        let routes_total = IntCounterVec::new(
            Opts::new("splitproxy_routes_total", "Routing decisions, by outcome"),
            &["route"],
        )
        .context("Failed to create routes_total counter")?;

        prometheus_registry
            .register(Box::new(bytes_total.clone()))
            .context("Failed to register bytes_total")?;
        prometheus_registry
            .register(Box::new(routes_total.clone()))
            .context("Failed to register routes_total")?;

        Ok(Self {
            prometheus_registry,
            bytes_total,
            routes_total,
            direct_sent: AtomicU64::new(0),
            direct_received: AtomicU64::new(0),
            proxy_sent: AtomicU64::new(0),
            proxy_received: AtomicU64::new(0),
            recent_routes: Mutex::new(VecDeque::with_capacity(event_capacity)),
            event_capacity: event_capacity.max(1),
        })
    }

    /// Count bytes relayed on `route`
    pub fn record_bytes(&self, route: TrafficRoute, outbound: bool, bytes: usize) {
        let bytes = bytes as u64;
        let counter = match (route, outbound) {
            (TrafficRoute::Direct, true) => &self.direct_sent,
            (TrafficRoute::Direct, false) => &self.direct_received,
            (TrafficRoute::Proxy, true) => &self.proxy_sent,
            (TrafficRoute::Proxy, false) => &self.proxy_received,
        };
        counter.fetch_add(bytes, Ordering::Relaxed);

        let direction = if outbound { "sent" } else { "received" };
        self.bytes_total
            .with_label_values(&[route.label(), direction])
            .inc_by(bytes);
    }

    /// Statistics callback that feeds `route` counters
    pub fn callback(self: &Arc<Self>, route: TrafficRoute) -> StatsCallback {
        let stats = Arc::clone(self);
        Arc::new(move |outbound, bytes| stats.record_bytes(route, outbound, bytes))
    }

    /// Remember a routing decision, evicting the oldest beyond capacity
    pub fn record_route(&self, host: &str, port: u16, decision: RouteDecision) {
        let label = decision.label().to_ascii_lowercase();
        self.routes_total.with_label_values(&[label.as_str()]).inc();

        let mut recent = self
            .recent_routes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if recent.len() >= self.event_capacity {
            recent.pop_front();
        }
        recent.push_back(RouteEvent::new(host, port, decision));
    }

    pub fn snapshot(&self) -> TrafficSnapshot {
        TrafficSnapshot {
            direct_sent: self.direct_sent.load(Ordering::Relaxed),
            direct_received: self.direct_received.load(Ordering::Relaxed),
            proxy_sent: self.proxy_sent.load(Ordering::Relaxed),
            proxy_received: self.proxy_received.load(Ordering::Relaxed),
        }
    }

    /// Recent routing decisions, oldest first
    pub fn recent_routes(&self) -> Vec<RouteEvent> {
        self.recent_routes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .cloned()
            .collect()
    }

    /// Prometheus text exposition of all counters
    pub fn render(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let families = self.prometheus_registry.gather();
        encoder
            .encode_to_string(&families)
            .context("Failed to encode metrics")
    }

    /// Plain-text status page body
    pub fn status_text(&self) -> Result<String> {
        let snapshot = self.snapshot();
        let mut text = String::new();

        writeln!(text, "splitproxy {}", env!("CARGO_PKG_VERSION"))?;
        writeln!(text)?;
        writeln!(
            text,
            "direct: {} bytes sent, {} bytes received",
            snapshot.direct_sent, snapshot.direct_received
        )?;
        writeln!(
            text,
            "proxy:  {} bytes sent, {} bytes received",
            snapshot.proxy_sent, snapshot.proxy_received
        )?;
        writeln!(text)?;

        writeln!(text, "recent routes:")?;
        for event in self.recent_routes().iter().rev() {
            writeln!(
                text,
                "{} {:<11} {}:{}",
                humantime::format_rfc3339_seconds(event.time),
                event.decision.label(),
                event.host,
                event.port
            )?;
        }
        writeln!(text)?;

        text.push_str(&self.render()?);
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bytes_per_route() {
        let stats = Arc::new(TrafficStatistics::new(10).unwrap());
        let direct = stats.callback(TrafficRoute::Direct);
        let proxy = stats.callback(TrafficRoute::Proxy);

        direct(true, 100);
        direct(false, 250);
        proxy(true, 7);
        proxy(false, 3);
        proxy(false, 3);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.direct_sent, 100);
        assert_eq!(snapshot.direct_received, 250);
        assert_eq!(snapshot.proxy_sent, 7);
        assert_eq!(snapshot.proxy_received, 6);
        assert_eq!(snapshot.total(), 363);

        let rendered = stats.render().unwrap();
        assert!(rendered.contains("splitproxy_bytes_total{direction=\"received\",route=\"direct\"} 250"));
    }

    #[test]
    fn test_route_events_are_bounded() {
        let stats = TrafficStatistics::new(3).unwrap();
        for port in 1..=5 {
            stats.record_route("example.com", port, RouteDecision::SelectDirect);
        }
        stats.record_route("blocked.example", 443, RouteDecision::DnsError);

        let recent = stats.recent_routes();
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].port, 4);
        assert_eq!(recent[2].decision, RouteDecision::DnsError);

        let rendered = stats.render().unwrap();
        assert!(rendered.contains("splitproxy_routes_total{route=\"direct\"} 5"));
        assert!(rendered.contains("splitproxy_routes_total{route=\"unreachable\"} 1"));
    }

    #[test]
    fn test_status_text_lists_newest_first() {
        let stats = TrafficStatistics::new(10).unwrap();
        stats.record_route("first.example", 80, RouteDecision::AllDirect);
        stats.record_route("second.example", 443, RouteDecision::AllProxy);

        let text = stats.status_text().unwrap();
        let first = text.find("first.example").unwrap();
        let second = text.find("second.example").unwrap();
        assert!(second < first);
        assert!(text.contains("PROXY"));
    }
}
