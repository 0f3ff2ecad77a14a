//! Backend Endpoint

use crate::config::{parse_host_port, BackendConfig};
use crate::Result;

/// Where the local SOCKS5 backend currently listens, if it is running.
///
/// Read on every dial so a backend that starts or stops is picked up.
pub trait BackendEndpoint: Send + Sync {
    fn endpoint(&self) -> Option<(String, u16)>;
}

/// Backend fixed at startup
#[derive(Debug, Clone, Default)]
pub struct StaticBackend {
    endpoint: Option<(String, u16)>,
}

impl StaticBackend {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            endpoint: Some((host.into(), port)),
        }
    }

    /// No backend running
    pub fn none() -> Self {
        Self::default()
    }

    pub fn from_config(config: &BackendConfig) -> Result<Self> {
        match &config.socks5_addr {
            Some(addr) => {
                let (host, port) = parse_host_port(addr)?;
                Ok(Self::new(host, port))
            }
            None => Ok(Self::none()),
        }
    }
}

impl BackendEndpoint for StaticBackend {
    fn endpoint(&self) -> Option<(String, u16)> {
        self.endpoint.clone()
    }
}
