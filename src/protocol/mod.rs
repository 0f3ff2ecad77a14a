//! Wire Protocols
//!
//! HTTP/CONNECT parsing on the client side and the SOCKS5 client used to
//! reach the backend.

pub mod constants;
pub mod http;
pub mod socks5;
pub mod types;

pub use constants::*;
pub use http::{parse_request, read_header};
pub use socks5::{connect_via_socks5, Socks5Connector};
pub use types::*;
