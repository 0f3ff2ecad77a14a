//! Configuration Types

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::routing::RoutingMode;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub routing: RoutingConfig,
    pub dns: DnsConfig,
    pub backend: BackendConfig,
    pub monitoring: MonitoringConfig,
}

/// Listener and session configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    /// Ports tried (incrementing) when the bind address is in use
    pub max_bind_attempts: u32,
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
    pub relay_buffer_size: usize,
    pub max_header_size: usize,
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
}

/// Routing configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RoutingConfig {
    pub mode: RoutingMode,
    pub direct_cidr_file: PathBuf,
    pub censored_cidr_file: PathBuf,
    pub direct_domain_file: PathBuf,
    pub proxy_domain_file: PathBuf,
    /// Local overrides; the platform hosts file when unset
    pub hosts_file: Option<PathBuf>,
    #[serde(with = "humantime_serde")]
    pub resolve_wait_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub resolve_poll_interval: Duration,
}

/// DNS-over-HTTPS configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DnsConfig {
    pub doh_servers: Vec<String>,
    #[serde(with = "humantime_serde")]
    pub query_timeout: Duration,
}

/// Backend SOCKS5 endpoint, if one is running
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct BackendConfig {
    /// `host:port` of the local SOCKS5 backend
    pub socks5_addr: Option<String>,
}

/// Monitoring configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MonitoringConfig {
    pub log_level: String,
    pub route_event_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 1080)),
            max_bind_attempts: 20,
            connect_timeout: Duration::from_secs(10),
            relay_buffer_size: 1024,
            max_header_size: 64 * 1024,
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl Default for RoutingConfig {
    fn default() -> Self {
        let rules = PathBuf::from("rules");
        Self {
            mode: RoutingMode::Smart,
            direct_cidr_file: rules.join("direct_ip.txt"),
            censored_cidr_file: rules.join("censored_ip.txt"),
            direct_domain_file: rules.join("direct_domain.txt"),
            proxy_domain_file: rules.join("proxy_domain.txt"),
            hosts_file: None,
            resolve_wait_timeout: Duration::from_secs(30),
            resolve_poll_interval: Duration::from_millis(100),
        }
    }
}

impl Default for DnsConfig {
    fn default() -> Self {
        Self {
            doh_servers: vec![
                "https://cloudflare-dns.com/dns-query".to_string(),
                "https://dns.google/resolve".to_string(),
            ],
            query_timeout: Duration::from_secs(5),
        }
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            route_event_capacity: 100,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            routing: RoutingConfig::default(),
            dns: DnsConfig::default(),
            backend: BackendConfig::default(),
            monitoring: MonitoringConfig::default(),
        }
    }
}
