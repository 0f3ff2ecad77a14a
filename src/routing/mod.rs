//! Routing Module
//!
//! Decides whether a destination is dialed directly or through the backend.

pub mod cidr;
pub mod dns;
pub mod domain;
pub mod engine;
pub mod hosts;
pub mod types;

pub use cidr::CidrTable;
pub use dns::{DohResolver, Resolve};
pub use domain::DomainSuffixSet;
pub use engine::{is_domain_name, RoutingEngine, RoutingRules};
pub use hosts::HostsFileCache;
pub use types::*;
