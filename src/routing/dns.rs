//! DNS-over-HTTPS Resolver
//!
//! Queries an ordered list of DoH endpoints using the JSON API
//! (`application/dns-json`) and returns the first IPv4 A record found.

use std::net::Ipv4Addr;
use std::time::Duration;

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::Result;

/// DNS record type for IPv4 addresses
const RECORD_TYPE_A: u16 = 1;

const DOH_ACCEPT: &str = "application/dns-json";

/// Domain → IPv4 lookup used by the routing engine
#[async_trait]
pub trait Resolve: Send + Sync {
    /// Resolve `domain` to one IPv4 address, or `None` when nothing answered
    async fn resolve(&self, domain: &str) -> Option<Ipv4Addr>;
}

/// JSON answer returned by DoH providers
#[derive(Debug, Deserialize)]
pub struct DohResponse {
    #[serde(rename = "Status", default)]
    pub status: u32,
    #[serde(rename = "Answer", default)]
    pub answer: Vec<DohAnswer>,
}

#[derive(Debug, Deserialize)]
pub struct DohAnswer {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type")]
    pub record_type: u16,
    pub data: String,
}

impl DohResponse {
    /// First A record in the answer section
    pub fn first_ipv4(&self) -> Option<Ipv4Addr> {
        self.answer
            .iter()
            .filter(|a| a.record_type == RECORD_TYPE_A)
            .find_map(|a| a.data.parse().ok())
    }
}

/// Resolver that walks a static list of DoH endpoints in order
pub struct DohResolver {
    servers: Vec<String>,
    client: reqwest::Client,
}

impl DohResolver {
    /// Create a resolver with a per-query timeout
    pub fn new(servers: Vec<String>, query_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(query_timeout)
            .build()
            .context("Failed to build DoH HTTP client")?;
        Ok(Self { servers, client })
    }

    pub fn servers(&self) -> &[String] {
        &self.servers
    }

    /// Issue a single query against one endpoint
    pub async fn query(&self, server: &str, domain: &str) -> Result<Option<Ipv4Addr>> {
        let response = self
            .client
            .get(server)
            .query(&[("name", domain), ("type", "A")])
            .header("Accept", DOH_ACCEPT)
            .send()
            .await
            .with_context(|| format!("DoH request to {} failed", server))?;

        if !response.status().is_success() {
            return Err(anyhow!("DoH request to {} failed: HTTP {}", server, response.status()));
        }

        let body: DohResponse = response
            .json()
            .await
            .with_context(|| format!("Invalid DoH response from {}", server))?;

        Ok(body.first_ipv4())
    }
}

#[async_trait]
impl Resolve for DohResolver {
    async fn resolve(&self, domain: &str) -> Option<Ipv4Addr> {
        for server in &self.servers {
            match self.query(server, domain).await {
                Ok(Some(ip)) => {
                    debug!("DNS resolved: {} => {} @{}", domain, ip, server);
                    return Some(ip);
                }
                Ok(None) => debug!("DNS no A record: {} @{}", domain, server),
                Err(e) => debug!("DNS resolving failed: {} @{}: {:#}", domain, server, e),
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_ipv4_skips_cname() {
        let body = r#"{
            "Status": 0,
            "Answer": [
                {"name": "www.example.com", "type": 5, "TTL": 300, "data": "example.com."},
                {"name": "example.com", "type": 1, "TTL": 300, "data": "93.184.216.34"},
                {"name": "example.com", "type": 1, "TTL": 300, "data": "93.184.216.35"}
            ]
        }"#;
        let response: DohResponse = serde_json::from_str(body).unwrap();
        assert_eq!(response.first_ipv4(), Some(Ipv4Addr::new(93, 184, 216, 34)));
    }

    #[test]
    fn test_no_answer_section() {
        let response: DohResponse = serde_json::from_str(r#"{"Status": 3}"#).unwrap();
        assert_eq!(response.status, 3);
        assert_eq!(response.first_ipv4(), None);
    }
}
