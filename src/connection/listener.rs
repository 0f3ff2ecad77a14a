//! Proxy Listener
//!
//! Accepts client connections and runs one [`ProxySession`] task per
//! connection. Session failures and panics are reported through a single
//! [`ErrorHandler`].

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{anyhow, bail, Context};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, RwLock};
use tokio::time::Duration;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::hooks::{ConnectionOpener, RequestFilter};
use super::session::{ProxySession, SessionOutcome, SessionSettings};
use crate::config::Config;
use crate::shutdown::ShutdownCoordinator;
use crate::Result;

/// Receives every non-benign session error
pub type ErrorCallback = Arc<dyn Fn(&anyhow::Error) + Send + Sync>;

/// Receives the address actually bound
pub type StartedCallback = Arc<dyn Fn(SocketAddr) + Send + Sync>;

/// Session inventory entry
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub id: String,
    pub addr: SocketAddr,
    pub start_time: Instant,
}

/// Process-wide sink for session errors
#[derive(Clone, Default)]
pub struct ErrorHandler {
    on_error: Option<ErrorCallback>,
}

impl ErrorHandler {
    pub fn new(on_error: Option<ErrorCallback>) -> Self {
        Self { on_error }
    }

    /// Client went away mid-stream; nothing to report
    pub fn is_benign(err: &anyhow::Error) -> bool {
        err.chain().any(|cause| {
            cause.downcast_ref::<io::Error>().is_some_and(|e| {
                matches!(
                    e.kind(),
                    io::ErrorKind::UnexpectedEof
                        | io::ErrorKind::BrokenPipe
                        | io::ErrorKind::ConnectionReset
                        | io::ErrorKind::ConnectionAborted
                )
            })
        })
    }

    pub fn handle(&self, session_id: &str, err: &anyhow::Error) {
        if Self::is_benign(err) {
            debug!("Session {} ended by peer: {:#}", session_id, err);
            return;
        }

        warn!("Session {} failed: {:#}", session_id, err);
        if let Some(on_error) = &self.on_error {
            on_error(err);
        }
    }
}

/// Accepts connections and owns the live session inventory
pub struct ProxyListener {
    listener: Option<TcpListener>,
    config: Arc<Config>,
    opener: Arc<dyn ConnectionOpener>,
    filter: Arc<dyn RequestFilter>,
    settings: SessionSettings,
    on_started: Option<StartedCallback>,
    error_handler: ErrorHandler,
    active_sessions: Arc<AtomicUsize>,
    session_tracker: Arc<RwLock<HashMap<String, SessionInfo>>>,
    total_sessions: Arc<AtomicU64>,
    shutdown_flag: Arc<AtomicBool>,
    shutdown_tx: broadcast::Sender<()>,
}

impl ProxyListener {
    pub fn new(
        config: Arc<Config>,
        opener: Arc<dyn ConnectionOpener>,
        filter: Arc<dyn RequestFilter>,
    ) -> Self {
        let settings = SessionSettings::from_config(&config);
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            listener: None,
            config,
            opener,
            filter,
            settings,
            on_started: None,
            error_handler: ErrorHandler::default(),
            active_sessions: Arc::new(AtomicUsize::new(0)),
            session_tracker: Arc::new(RwLock::new(HashMap::new())),
            total_sessions: Arc::new(AtomicU64::new(0)),
            shutdown_flag: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
        }
    }

    pub fn with_on_started(mut self, on_started: StartedCallback) -> Self {
        self.on_started = Some(on_started);
        self
    }

    /// Stop accepting when `coordinator` fires
    pub fn with_shutdown(mut self, coordinator: &ShutdownCoordinator) -> Self {
        self.shutdown_tx = coordinator.sender();
        self
    }

    pub fn with_on_error(mut self, on_error: ErrorCallback) -> Self {
        self.error_handler = ErrorHandler::new(Some(on_error));
        self
    }

    /// Bind the configured address, moving to the next port while the
    /// current one is in use
    pub async fn bind(&mut self) -> Result<SocketAddr> {
        let first = self.config.server.bind_addr;
        let attempts = self.config.server.max_bind_attempts;
        let mut addr = first;

        for attempt in 1..=attempts {
            match TcpListener::bind(addr).await {
                Ok(listener) => {
                    let local = listener
                        .local_addr()
                        .context("Failed to read bound address")?;
                    info!("Listening on {}", local);
                    self.listener = Some(listener);
                    if let Some(on_started) = &self.on_started {
                        on_started(local);
                    }
                    return Ok(local);
                }
                Err(e) if e.kind() == io::ErrorKind::AddrInUse => {
                    warn!(
                        "Address {} in use (attempt {}/{})",
                        addr, attempt, attempts
                    );
                    match addr.port().checked_add(1) {
                        Some(next) => addr.set_port(next),
                        None => break,
                    }
                }
                Err(e) => {
                    return Err(e).with_context(|| format!("Failed to bind {}", addr));
                }
            }
        }

        error!(
            "No free port found after {} attempts starting at {}",
            attempts, first
        );
        bail!("Failed to bind listener starting at {}", first)
    }

    /// Bind, then accept until shutdown
    pub async fn start(&mut self) -> Result<()> {
        self.bind().await?;
        self.run().await
    }

    /// Main connection acceptance loop
    pub async fn run(&self) -> Result<()> {
        let listener = self
            .listener
            .as_ref()
            .ok_or_else(|| anyhow!("Listener not bound"))?;

        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            if self.shutdown_flag.load(Ordering::Relaxed) {
                break;
            }

            tokio::select! {
                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, addr)) => self.spawn_session(stream, addr),
                        Err(e) => {
                            error!("Error accepting connection: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Received shutdown signal, stopping connection acceptance");
                    self.shutdown_flag.store(true, Ordering::Relaxed);
                    break;
                }
            }
        }

        info!("Connection acceptance loop stopped");
        Ok(())
    }

    fn spawn_session(&self, stream: TcpStream, addr: SocketAddr) {
        let session_id = Uuid::new_v4().simple().to_string();
        debug!("Accepted connection {} from {}", session_id, addr);

        let info = SessionInfo {
            id: session_id.clone(),
            addr,
            start_time: Instant::now(),
        };

        let opener = Arc::clone(&self.opener);
        let filter = Arc::clone(&self.filter);
        let settings = self.settings.clone();
        let error_handler = self.error_handler.clone();
        let active_sessions = Arc::clone(&self.active_sessions);
        let session_tracker = Arc::clone(&self.session_tracker);
        self.total_sessions.fetch_add(1, Ordering::Relaxed);

        active_sessions.fetch_add(1, Ordering::Relaxed);
        tokio::spawn(async move {
            session_tracker
                .write()
                .await
                .insert(session_id.clone(), info);

            // Inner task so a panicking session is caught here
            let session = tokio::spawn(Self::handle_connection(
                stream,
                addr,
                session_id.clone(),
                opener,
                filter,
                settings,
            ));

            match session.await {
                Ok(Ok(outcome)) => {
                    debug!("Session {} finished: {:?}", session_id, outcome);
                }
                Ok(Err(e)) => error_handler.handle(&session_id, &e),
                Err(e) => {
                    let err = anyhow!("Session task aborted: {}", e);
                    error_handler.handle(&session_id, &err);
                }
            }

            if let Some(removed) = session_tracker.write().await.remove(&session_id) {
                debug!(
                    "Session {} from {} closed after {:?}",
                    session_id,
                    addr,
                    removed.start_time.elapsed()
                );
            }
            active_sessions.fetch_sub(1, Ordering::Relaxed);
        });
    }

    #[instrument(skip(stream, opener, filter, settings), fields(session_id = %session_id, client = %addr))]
    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        session_id: String,
        opener: Arc<dyn ConnectionOpener>,
        filter: Arc<dyn RequestFilter>,
        settings: SessionSettings,
    ) -> Result<SessionOutcome> {
        stream.set_nodelay(true).ok();
        ProxySession::new(session_id, addr, stream, opener, filter, settings)
            .run()
            .await
    }

    /// Address the listener is bound to
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener
            .as_ref()
            .and_then(|listener| listener.local_addr().ok())
    }

    pub fn active_sessions(&self) -> usize {
        self.active_sessions.load(Ordering::Relaxed)
    }

    /// Sessions accepted since start
    pub fn total_sessions(&self) -> u64 {
        self.total_sessions.load(Ordering::Relaxed)
    }

    pub async fn session_info(&self) -> Vec<SessionInfo> {
        self.session_tracker.read().await.values().cloned().collect()
    }

    /// Stop accepting new connections
    pub fn initiate_shutdown(&self) {
        info!("Initiating graceful shutdown of proxy listener");
        self.shutdown_flag.store(true, Ordering::Relaxed);

        if self.shutdown_tx.send(()).is_err() {
            debug!("Accept loop was not running");
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown_flag.load(Ordering::Relaxed)
    }

    /// Wait for live sessions to finish, up to the shutdown timeout
    pub async fn wait_for_sessions_to_close(&self) {
        let shutdown_timeout = self.config.server.shutdown_timeout;
        let start_time = Instant::now();

        info!(
            "Waiting for {} active sessions to close (timeout: {:?})",
            self.active_sessions(),
            shutdown_timeout
        );

        while self.active_sessions() > 0 && start_time.elapsed() < shutdown_timeout {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        let remaining = self.active_sessions();
        if remaining == 0 {
            info!("All sessions closed in {:?}", start_time.elapsed());
        } else {
            warn!(
                "Shutdown timeout reached with {} sessions still active",
                remaining
            );
        }
    }

    /// Stop accepting and drain live sessions
    pub async fn shutdown(&self) {
        self.initiate_shutdown();
        self.wait_for_sessions_to_close().await;
    }
}
