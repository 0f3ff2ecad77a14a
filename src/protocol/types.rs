//! Protocol Types

use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};

use crate::protocol::constants::*;

/// Target address types supported by SOCKS5
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetAddr {
    Ipv4(Ipv4Addr),
    Ipv6(Ipv6Addr),
    Domain(String),
}

impl TargetAddr {
    /// Get the address type code for this address
    pub fn address_type(&self) -> u8 {
        match self {
            TargetAddr::Ipv4(_) => SOCKS5_ADDR_IPV4,
            TargetAddr::Ipv6(_) => SOCKS5_ADDR_IPV6,
            TargetAddr::Domain(_) => SOCKS5_ADDR_DOMAIN,
        }
    }

    /// Classify a host string as an address literal or a domain name.
    /// Bracketed IPv6 literals (`[::1]`) are accepted.
    pub fn from_host(host: &str) -> Self {
        let bare = host.trim_start_matches('[').trim_end_matches(']');
        if let Ok(ip) = bare.parse::<Ipv4Addr>() {
            TargetAddr::Ipv4(ip)
        } else if let Ok(ip) = bare.parse::<Ipv6Addr>() {
            TargetAddr::Ipv6(ip)
        } else {
            TargetAddr::Domain(host.to_string())
        }
    }
}

impl fmt::Display for TargetAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetAddr::Ipv4(ip) => write!(f, "{}", ip),
            TargetAddr::Ipv6(ip) => write!(f, "[{}]", ip),
            TargetAddr::Domain(domain) => write!(f, "{}", domain),
        }
    }
}

/// SOCKS5 CONNECT reply received from the backend
#[derive(Debug, Clone)]
pub struct Socks5Reply {
    pub reply_code: u8,
    pub bind_addr: TargetAddr,
    pub bind_port: u16,
}

impl Socks5Reply {
    pub fn is_success(&self) -> bool {
        self.reply_code == SOCKS5_REPLY_SUCCESS
    }
}

/// A parsed client request, as handed to request filters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyRequest {
    /// `true` for `CONNECT` tunnels
    pub tunnel: bool,
    pub method: String,
    /// Destination host; empty for origin-form requests addressed to the proxy itself
    pub host: String,
    pub port: u16,
    /// Origin-form path with query; empty for tunnels
    pub path: String,
    /// Header block to forward, rewritten for non-tunnel requests
    pub header: String,
}

impl ProxyRequest {
    /// `host:port` for logging
    pub fn target(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_addr_from_host() {
        assert_eq!(
            TargetAddr::from_host("10.0.0.1"),
            TargetAddr::Ipv4(Ipv4Addr::new(10, 0, 0, 1))
        );
        assert_eq!(
            TargetAddr::from_host("[::1]"),
            TargetAddr::Ipv6(Ipv6Addr::LOCALHOST)
        );
        assert_eq!(
            TargetAddr::from_host("example.com"),
            TargetAddr::Domain("example.com".to_string())
        );
        assert_eq!(TargetAddr::from_host("[::1]").to_string(), "[::1]");
    }
}
