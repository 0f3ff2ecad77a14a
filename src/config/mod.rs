//! Configuration Module
//!
//! Handles configuration loading, validation, and management.

pub mod manager;
pub mod types;

pub use manager::{parse_host_port, ConfigManager};
pub use types::*;
