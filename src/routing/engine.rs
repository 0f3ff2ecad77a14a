//! Routing Engine
//!
//! Classifies destinations as must-direct, must-proxy or unresolvable.
//! Domain classifications are learned once per process and reused; only one
//! DNS resolution per domain is ever in flight.

use std::collections::HashSet;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use std::time::Duration;

use anyhow::Context;
use regex::Regex;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, info};

use super::dns::Resolve;
use super::{CidrTable, DomainSuffixSet, HostsFileCache};
use crate::config::RoutingConfig;
use crate::Result;

/// Curated rule lists consulted before any DNS traffic
#[derive(Debug, Clone)]
pub struct RoutingRules {
    /// Networks that are reachable directly
    pub direct_ip: CidrTable,
    /// Networks known to be behind the restriction boundary
    pub censored_ip: CidrTable,
    /// Domains always dialed directly
    pub direct_domains: DomainSuffixSet,
    /// Domains always sent through the backend
    pub proxy_domains: DomainSuffixSet,
}

impl RoutingRules {
    /// Load every rule file named in the routing configuration
    pub fn from_config(config: &RoutingConfig) -> Result<Self> {
        let direct_ip = CidrTable::from_file(&config.direct_cidr_file)
            .context("Failed to load direct CIDR rules")?;
        let censored_ip = CidrTable::from_file(&config.censored_cidr_file)
            .context("Failed to load censored CIDR rules")?;
        let direct_domains = DomainSuffixSet::from_file(&config.direct_domain_file)
            .context("Failed to load direct domain rules")?;
        let proxy_domains = DomainSuffixSet::from_file(&config.proxy_domain_file)
            .context("Failed to load proxy domain rules")?;

        info!(
            "Routing rules loaded: {} direct CIDRs, {} censored CIDRs, {} direct domains, {} proxy domains",
            direct_ip.len(),
            censored_ip.len(),
            direct_domains.len(),
            proxy_domains.len()
        );

        Ok(Self {
            direct_ip,
            censored_ip,
            direct_domains,
            proxy_domains,
        })
    }
}

/// Learned classifications and the in-flight dedup guard
#[derive(Debug, Default)]
struct ResolutionState {
    learned_proxy: HashSet<String>,
    learned_direct: HashSet<String>,
    in_flight: HashSet<String>,
}

impl ResolutionState {
    fn learned(&self, domain: &str) -> Option<bool> {
        if self.learned_proxy.contains(domain) {
            Some(true)
        } else if self.learned_direct.contains(domain) {
            Some(false)
        } else {
            None
        }
    }
}

/// Check that `name` looks like a DNS name rather than search-bar text
pub fn is_domain_name(name: &str) -> bool {
    static LABEL: OnceLock<Regex> = OnceLock::new();
    static TOP_LEVEL: OnceLock<Regex> = OnceLock::new();
    let label = LABEL.get_or_init(|| Regex::new(r"^[a-z0-9-]+$").expect("valid label regex"));
    let top_level = TOP_LEVEL.get_or_init(|| Regex::new(r"^[a-z]{2,}$").expect("valid tld regex"));

    let labels: Vec<&str> = name.split('.').collect();
    let Some((last, rest)) = labels.split_last() else {
        return false;
    };
    if rest.is_empty() {
        return false;
    }
    if !rest.iter().all(|l| label.is_match(l)) {
        return false;
    }
    if last.starts_with("xn--") {
        label.is_match(last)
    } else {
        top_level.is_match(last)
    }
}

fn is_ipv6_literal(host: &str) -> bool {
    host.starts_with('[') || host.parse::<Ipv6Addr>().is_ok()
}

/// Destination classifier shared by every session
pub struct RoutingEngine {
    rules: RoutingRules,
    hosts: Option<HostsFileCache>,
    resolver: Arc<dyn Resolve>,
    state: Mutex<ResolutionState>,
    resolved: Notify,
    wait_timeout: Duration,
    poll_interval: Duration,
}

impl RoutingEngine {
    /// Create an engine with the default 30 s wait bound and 100 ms re-check cadence
    pub fn new(rules: RoutingRules, hosts: Option<HostsFileCache>, resolver: Arc<dyn Resolve>) -> Self {
        Self::with_timeouts(
            rules,
            hosts,
            resolver,
            Duration::from_secs(30),
            Duration::from_millis(100),
        )
    }

    pub fn with_timeouts(
        rules: RoutingRules,
        hosts: Option<HostsFileCache>,
        resolver: Arc<dyn Resolve>,
        wait_timeout: Duration,
        poll_interval: Duration,
    ) -> Self {
        Self {
            rules,
            hosts,
            resolver,
            state: Mutex::new(ResolutionState::default()),
            resolved: Notify::new(),
            wait_timeout,
            poll_interval,
        }
    }

    /// Build an engine from configuration, loading all rule files
    pub fn from_config(config: &RoutingConfig, resolver: Arc<dyn Resolve>) -> Result<Self> {
        let rules = RoutingRules::from_config(config)?;
        let hosts = match &config.hosts_file {
            Some(path) => Some(HostsFileCache::new(path.clone())),
            None => Some(HostsFileCache::system()),
        };
        Ok(Self::with_timeouts(
            rules,
            hosts,
            resolver,
            config.resolve_wait_timeout,
            config.resolve_poll_interval,
        ))
    }

    fn state(&self) -> MutexGuard<'_, ResolutionState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// `Some(true)` = proxy, `Some(false)` = direct, `None` = unresolvable
    pub async fn need_proxy(&self, host: &str) -> Option<bool> {
        if is_ipv6_literal(host) {
            return Some(false);
        }

        if let Ok(ip) = host.parse::<Ipv4Addr>() {
            return Some(self.need_proxy_ip(ip));
        }

        if let Some(ip) = self.hosts.as_ref().and_then(|h| h.find(host)) {
            debug!("Hosts override: {} => {}", host, ip);
            return Some(self.need_proxy_ip(ip));
        }

        // e.g. "hello" typed into a browser search bar
        if !is_domain_name(host) {
            return None;
        }

        self.need_proxy_domain(host).await
    }

    /// Only addresses outside both curated networks go through the backend
    pub fn need_proxy_ip(&self, ip: Ipv4Addr) -> bool {
        !self.rules.direct_ip.contains(ip) && !self.rules.censored_ip.contains(ip)
    }

    async fn need_proxy_domain(&self, domain: &str) -> Option<bool> {
        if self.rules.direct_domains.contains(domain) {
            return Some(false);
        }

        if self.rules.proxy_domains.contains(domain) {
            return Some(true);
        }

        let deadline = Instant::now() + self.wait_timeout;
        loop {
            let notified = self.resolved.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.state();
                if let Some(verdict) = state.learned(domain) {
                    return Some(verdict);
                }
                if state.in_flight.insert(domain.to_string()) {
                    break;
                }
            }

            let now = Instant::now();
            if now >= deadline {
                debug!("Gave up waiting for in-flight resolution of {}", domain);
                return None;
            }
            let wait = self.poll_interval.min(deadline - now);
            let _ = tokio::time::timeout(wait, notified.as_mut()).await;
        }

        let guard = InFlightGuard {
            engine: self,
            domain,
        };

        let ip = self.resolver.resolve(domain).await?;
        let verdict = self.need_proxy_ip(ip);
        {
            let mut state = self.state();
            if verdict {
                state.learned_proxy.insert(domain.to_string());
            } else {
                state.learned_direct.insert(domain.to_string());
            }
        }
        drop(guard);

        debug!("Learned {} ({}) => {}", domain, ip, if verdict { "proxy" } else { "direct" });
        Some(verdict)
    }

    /// Number of learned domain classifications
    pub fn learned_count(&self) -> usize {
        let state = self.state();
        state.learned_proxy.len() + state.learned_direct.len()
    }

    pub fn rules(&self) -> &RoutingRules {
        &self.rules
    }
}

/// Clears the in-flight marker on every exit path, including cancellation
struct InFlightGuard<'a> {
    engine: &'a RoutingEngine,
    domain: &'a str,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.engine.state().in_flight.remove(self.domain);
        self.engine.resolved.notify_waiters();
    }
}
