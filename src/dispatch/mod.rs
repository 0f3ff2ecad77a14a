//! Dispatch Module
//!
//! Maps each destination to a route and dials it.

pub mod backend;
pub mod dispatcher;

pub use backend::{BackendEndpoint, StaticBackend};
pub use dispatcher::Dispatcher;
