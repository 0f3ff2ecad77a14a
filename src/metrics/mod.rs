//! Metrics Module
//!
//! Per-route traffic counters and recent routing decisions.

pub mod collector;
pub mod types;

pub use collector::TrafficStatistics;
pub use types::{RouteEvent, TrafficRoute, TrafficSnapshot};
