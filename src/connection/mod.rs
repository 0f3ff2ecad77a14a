//! Connection Handling Module
//!
//! Listener, per-connection session state machine and the hooks that
//! connect sessions to routing.

pub mod filter;
pub mod hooks;
pub mod listener;
pub mod session;

pub use filter::StatusPageFilter;
pub use hooks::{ConnectionOpener, PassThroughFilter, PeerConnection, PeerStream, RequestFilter};
pub use listener::{ErrorCallback, ErrorHandler, ProxyListener, SessionInfo, StartedCallback};
pub use session::{ProxySession, SessionOutcome, SessionSettings, SessionState};
