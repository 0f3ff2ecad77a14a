//! splitproxy Library
//!
//! HTTP/CONNECT forward proxy that sends each destination either directly
//! or through a local SOCKS5 backend, based on curated IP and domain lists
//! and DNS-over-HTTPS lookups.

pub mod config;
pub mod connection;
pub mod dispatch;
pub mod metrics;
pub mod protocol;
pub mod relay;
pub mod routing;
pub mod shutdown;

pub use config::Config;
pub use connection::ProxyListener;
pub use dispatch::Dispatcher;
pub use routing::RoutingEngine;
pub use shutdown::ShutdownCoordinator;

/// Common error type for the proxy server
pub type Result<T> = anyhow::Result<T>;
