//! splitproxy - HTTP/CONNECT forward proxy with split routing
//!
//! Destinations inside the curated direct or censored networks are dialed
//! directly; everything else goes through a local SOCKS5 backend.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use splitproxy::config::{Config, ConfigManager};
use splitproxy::connection::StatusPageFilter;
use splitproxy::dispatch::StaticBackend;
use splitproxy::metrics::TrafficStatistics;
use splitproxy::routing::{DohResolver, RoutingMode};
use splitproxy::{Dispatcher, ProxyListener, RoutingEngine, ShutdownCoordinator};

/// CLI arguments for splitproxy
#[derive(Parser, Debug)]
#[command(name = "splitproxy")]
#[command(about = "HTTP/CONNECT forward proxy with direct-or-SOCKS5 split routing")]
#[command(version)]
#[command(long_about = "
splitproxy - HTTP/CONNECT forward proxy with split routing

Configuration priority (highest to lowest):
1. Command-line arguments
2. Environment variables
3. Configuration file
4. Built-in defaults

Environment variables:
  SPLITPROXY_BIND_ADDR   - Bind address (e.g., 127.0.0.1:1080)
  SPLITPROXY_MAIN_PORT   - Port to bind to
  SPLITPROXY_MODE        - Routing mode (smart, direct, proxy)
  SPLITPROXY_BACKEND     - SOCKS5 backend address (e.g., 127.0.0.1:1081)
  SPLITPROXY_LOG_LEVEL   - Log level (trace, debug, info, warn, error)
")]
pub struct CliArgs {
    /// Configuration file path
    #[arg(
        short,
        long,
        default_value = "config.toml",
        help = "Path to configuration file"
    )]
    pub config: PathBuf,

    /// Bind address (overrides config file)
    #[arg(short, long, help = "Bind address (e.g., 127.0.0.1:1080)")]
    pub bind: Option<String>,

    /// Port to bind to (overrides config file)
    #[arg(short, long, help = "Port to bind to")]
    pub port: Option<u16>,

    /// SOCKS5 backend address (overrides config file)
    #[arg(long, help = "SOCKS5 backend address (e.g., 127.0.0.1:1081)")]
    pub backend: Option<String>,

    /// Routing mode (overrides config file)
    #[arg(short, long, help = "Routing mode: smart, direct or proxy")]
    pub mode: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, help = "Log level")]
    pub log_level: Option<String>,

    /// Enable verbose logging (sets log level to debug)
    #[arg(short, long, help = "Enable verbose logging")]
    pub verbose: bool,

    /// Validate configuration and exit
    #[arg(long, help = "Validate configuration and exit")]
    pub validate_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();

    let mut config = ConfigManager::load_from_file(&args.config)?;

    let mode = args
        .mode
        .as_deref()
        .map(str::parse::<RoutingMode>)
        .transpose()?;
    config.merge_with_cli_args(
        args.bind.as_deref(),
        args.port,
        args.backend.as_deref(),
        mode,
    );
    if let Some(log_level) = &args.log_level {
        config.monitoring.log_level = log_level.clone();
    }

    config
        .validate()
        .context("Final configuration validation failed")?;

    init_tracing(&args, &config)?;

    info!("Starting splitproxy v{}", env!("CARGO_PKG_VERSION"));

    if args.validate_config {
        info!("Configuration is valid");
        info!("  Bind address: {}", config.server.bind_addr);
        info!("  Routing mode: {:?}", config.routing.mode);
        info!(
            "  Backend: {}",
            config.backend.socks5_addr.as_deref().unwrap_or("none")
        );
        info!("  DoH servers: {}", config.dns.doh_servers.join(", "));
        return Ok(());
    }

    run(config).await
}

async fn run(config: Config) -> Result<()> {
    let config = Arc::new(config);

    let stats = Arc::new(TrafficStatistics::new(
        config.monitoring.route_event_capacity,
    )?);
    let backend = Arc::new(StaticBackend::from_config(&config.backend)?);

    let routing = if config.routing.mode == RoutingMode::Smart {
        let resolver = Arc::new(DohResolver::new(
            config.dns.doh_servers.clone(),
            config.dns.query_timeout,
        )?);
        let engine = RoutingEngine::from_config(&config.routing, resolver)
            .context("Failed to load routing rules")?;
        Some(Arc::new(engine))
    } else {
        None
    };

    let dispatcher = Arc::new(Dispatcher::new(
        config.routing.mode,
        backend,
        routing,
        Arc::clone(&stats),
    ));
    let filter = Arc::new(StatusPageFilter::new(stats));

    let coordinator = ShutdownCoordinator::new();
    let mut listener = ProxyListener::new(Arc::clone(&config), dispatcher, filter)
        .with_on_started(Arc::new(|addr: SocketAddr| {
            info!("splitproxy ready, set your HTTP proxy to {}", addr);
        }))
        .with_shutdown(&coordinator);
    listener.bind().await?;

    tokio::select! {
        result = listener.run() => {
            if let Err(e) = result {
                error!("Server error: {:#}", e);
                return Err(e);
            }
        }
        signal = coordinator.listen_for_signals() => {
            if let Err(e) = signal {
                error!("Error setting up signal handlers: {}", e);
            }
        }
    }

    coordinator.shutdown_listener(&listener).await;

    info!("Server shutdown complete");
    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(args: &CliArgs, config: &Config) -> Result<()> {
    let log_level = if args.verbose {
        "debug"
    } else {
        config.monitoring.log_level.as_str()
    };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(true)
                .with_level(true),
        )
        .with(env_filter)
        .try_init()
        .context("Failed to initialize logging")?;

    Ok(())
}
