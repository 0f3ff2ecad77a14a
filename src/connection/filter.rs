//! Status Page Filter

use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::debug;

use super::hooks::RequestFilter;
use crate::metrics::TrafficStatistics;
use crate::protocol::ProxyRequest;
use crate::Result;

/// Answers origin-form requests addressed to the proxy itself with the
/// traffic statistics page. Everything else passes through.
pub struct StatusPageFilter {
    stats: Arc<TrafficStatistics>,
}

impl StatusPageFilter {
    pub fn new(stats: Arc<TrafficStatistics>) -> Self {
        Self { stats }
    }
}

#[async_trait]
impl RequestFilter for StatusPageFilter {
    async fn filter(
        &self,
        request: &ProxyRequest,
        client: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> Result<bool> {
        if request.tunnel || !request.host.is_empty() {
            return Ok(false);
        }

        debug!("Serving status page for {} {}", request.method, request.path);
        let body = self.stats.status_text()?;
        let response = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: text/plain; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            body.len(),
            body
        );
        client.write_all(response.as_bytes()).await?;
        client.flush().await?;
        Ok(true)
    }
}
