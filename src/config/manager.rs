//! Configuration Manager

use super::Config;
use crate::routing::RoutingMode;
use crate::Result;
use anyhow::{bail, Context};
use std::net::SocketAddr;
use std::path::Path;

/// Manages configuration loading and validation
pub struct ConfigManager;

impl ConfigManager {
    /// Load configuration from file
    pub fn load_from_file(path: &Path) -> Result<Config> {
        if path.exists() {
            tracing::info!("Loading configuration from: {}", path.display());
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;

            let mut config: Config = toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
            Self::apply_env(&mut config)?;

            config
                .validate()
                .with_context(|| "Configuration validation failed")?;

            tracing::info!("Configuration loaded and validated successfully");
            Ok(config)
        } else {
            tracing::warn!(
                "Configuration file not found at {}, using defaults",
                path.display()
            );
            Self::load_from_env()
        }
    }

    /// Load configuration from defaults plus environment variables
    pub fn load_from_env() -> Result<Config> {
        let mut config = Config::default();
        Self::apply_env(&mut config)?;
        config.validate()?;
        Ok(config)
    }

    /// Override fields from `SPLITPROXY_*` environment variables
    fn apply_env(config: &mut Config) -> Result<()> {
        if let Ok(bind_addr) = std::env::var("SPLITPROXY_BIND_ADDR") {
            config.server.bind_addr = bind_addr
                .parse::<SocketAddr>()
                .with_context(|| format!("Invalid SPLITPROXY_BIND_ADDR: {}", bind_addr))?;
        }

        if let Ok(port) = std::env::var("SPLITPROXY_MAIN_PORT") {
            let port = port
                .parse::<u16>()
                .with_context(|| format!("Invalid SPLITPROXY_MAIN_PORT: {}", port))?;
            config.server.bind_addr.set_port(port);
        }

        if let Ok(mode) = std::env::var("SPLITPROXY_MODE") {
            config.routing.mode = mode
                .parse::<RoutingMode>()
                .with_context(|| format!("Invalid SPLITPROXY_MODE: {}", mode))?;
        }

        if let Ok(backend) = std::env::var("SPLITPROXY_BACKEND") {
            config.backend.socks5_addr = if backend.is_empty() { None } else { Some(backend) };
        }

        if let Ok(log_level) = std::env::var("SPLITPROXY_LOG_LEVEL") {
            config.monitoring.log_level = log_level;
        }

        Ok(())
    }
}

/// Split a `host:port` backend address
pub fn parse_host_port(addr: &str) -> Result<(String, u16)> {
    let (host, port) = addr
        .rsplit_once(':')
        .with_context(|| format!("Address '{}' is missing a port", addr))?;
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.is_empty() {
        bail!("Address '{}' has an empty host", addr);
    }
    let port = port
        .parse::<u16>()
        .with_context(|| format!("Address '{}' has an invalid port", addr))?;
    if port == 0 {
        bail!("Address '{}' has port 0", addr);
    }
    Ok((host.to_string(), port))
}

impl Config {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.validate_server_config()
            .with_context(|| "Server configuration validation failed")?;

        self.validate_routing_config()
            .with_context(|| "Routing configuration validation failed")?;

        self.validate_backend_config()
            .with_context(|| "Backend configuration validation failed")?;

        self.validate_monitoring_config()
            .with_context(|| "Monitoring configuration validation failed")?;

        Ok(())
    }

    fn validate_server_config(&self) -> Result<()> {
        if self.server.max_bind_attempts == 0 {
            bail!("max_bind_attempts must be greater than 0");
        }

        if self.server.connect_timeout.is_zero() {
            bail!("connect_timeout must be greater than 0");
        }

        if self.server.connect_timeout.as_secs() > 300 {
            bail!("connect_timeout cannot exceed 5 minutes");
        }

        if self.server.relay_buffer_size < 512 {
            bail!("relay_buffer_size must be at least 512 bytes");
        }

        if self.server.relay_buffer_size > 1048576 {
            bail!("relay_buffer_size cannot exceed 1MB");
        }

        if self.server.max_header_size < 1024 {
            bail!("max_header_size must be at least 1024 bytes");
        }

        Ok(())
    }

    fn validate_routing_config(&self) -> Result<()> {
        if self.routing.resolve_wait_timeout.is_zero() {
            bail!("resolve_wait_timeout must be greater than 0");
        }

        if self.routing.resolve_poll_interval.is_zero() {
            bail!("resolve_poll_interval must be greater than 0");
        }

        if self.routing.mode == RoutingMode::Smart {
            if self.dns.doh_servers.is_empty() {
                bail!("smart routing requires at least one DoH server");
            }

            for (i, server) in self.dns.doh_servers.iter().enumerate() {
                if !server.starts_with("https://") && !server.starts_with("http://") {
                    bail!("DoH server {} must be an http(s) URL: {}", i, server);
                }
            }

            if self.dns.query_timeout.is_zero() {
                bail!("dns.query_timeout must be greater than 0");
            }
        }

        Ok(())
    }

    fn validate_backend_config(&self) -> Result<()> {
        if let Some(addr) = &self.backend.socks5_addr {
            parse_host_port(addr)?;
        }
        Ok(())
    }

    fn validate_monitoring_config(&self) -> Result<()> {
        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.monitoring.log_level.as_str()) {
            bail!(
                "monitoring.log_level must be one of: {}",
                valid_log_levels.join(", ")
            );
        }

        if self.monitoring.route_event_capacity == 0 {
            bail!("monitoring.route_event_capacity must be greater than 0");
        }

        Ok(())
    }

    /// Merge with CLI arguments
    pub fn merge_with_cli_args(
        &mut self,
        bind: Option<&str>,
        port: Option<u16>,
        backend: Option<&str>,
        mode: Option<RoutingMode>,
    ) {
        if let Some(bind_str) = bind {
            if let Ok(addr) = bind_str.parse::<SocketAddr>() {
                self.server.bind_addr = addr;
                tracing::info!("CLI override: bind address set to {}", addr);
            } else {
                tracing::warn!("Invalid bind address provided: {}", bind_str);
            }
        }

        if let Some(port) = port {
            self.server.bind_addr.set_port(port);
            tracing::info!("CLI override: port set to {}", port);
        }

        if let Some(backend) = backend {
            self.backend.socks5_addr = Some(backend.to_string());
            tracing::info!("CLI override: backend set to {}", backend);
        }

        if let Some(mode) = mode {
            self.routing.mode = mode;
            tracing::info!("CLI override: routing mode set to {:?}", mode);
        }
    }
}
