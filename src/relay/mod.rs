//! Data Relay Module
//!
//! Handles bidirectional data relay between client and peer.

pub mod engine;
pub mod session;

pub use engine::{RelayEngine, RelaySummary, StatsCallback};
pub use session::RelaySession;
