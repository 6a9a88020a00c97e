//! Server lifecycle controller.
//!
//! [`RelayServer`] owns startup and shutdown of everything the relay runs:
//! the bound listener, the accept loop, the sink writer task, and the hub
//! shared by all sessions. It is the explicit server-context object: the
//! counters and the session-id allocator live here rather than in
//! module-level state.
//!
//! # State machine
//!
//! ```text
//! STOPPED ──start()──► STARTING ──► RUNNING ──stop()──► STOPPING ──► STOPPED
//!    ▲                    │
//!    └───bind failure─────┘
//! ```
//!
//! `start()` when not `Stopped`, or `stop()` when not `Running`, is a usage
//! error and returns [`ServerError::InvalidState`] without touching the
//! running server.

use std::net::SocketAddr;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use relay_core::{
    CountersSnapshot, RelayRecord, ServerCounters, SessionId, SessionIdAllocator, TrafficSink,
};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::application::hub::BroadcastHub;
use crate::infrastructure::network::listener::{run_accept_loop, ListenerContext};
use crate::infrastructure::storage::config::{ConfigError, RelayConfig};

/// Capacity of the channel between the hub and the sink writer task.
const RECORD_QUEUE_CAPACITY: usize = 1024;

/// Error type for lifecycle operations.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The listener could not be bound (port taken, missing privilege).
    #[error("bind failed on {addr}: {source}")]
    BindFailed {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// The configured bind address is not parseable.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// `start()`/`stop()` called in the wrong state.
    #[error("cannot {operation} while the server is {state:?}")]
    InvalidState {
        operation: &'static str,
        state: ServerState,
    },
}

/// Lifecycle states of the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

/// The relay server: listener, hub, sink writer, and counters under one
/// lifecycle.
pub struct RelayServer {
    config: RelayConfig,
    sink: Arc<dyn TrafficSink>,
    counters: Arc<ServerCounters>,
    ids: Arc<SessionIdAllocator>,
    state: ServerState,
    hub: Option<Arc<BroadcastHub>>,
    running: Option<Arc<AtomicBool>>,
    shutdown_tx: Option<watch::Sender<bool>>,
    local_addr: Option<SocketAddr>,
    accept_task: Option<JoinHandle<()>>,
    sink_task: Option<JoinHandle<()>>,
}

impl RelayServer {
    /// Creates a stopped server with the given configuration and traffic
    /// sink. The sink is chosen once here; routing never branches on
    /// whether logging is enabled.
    pub fn new(config: RelayConfig, sink: Arc<dyn TrafficSink>) -> Self {
        Self {
            config,
            sink,
            counters: Arc::new(ServerCounters::new()),
            ids: Arc::new(SessionIdAllocator::new()),
            state: ServerState::Stopped,
            hub: None,
            running: None,
            shutdown_tx: None,
            local_addr: None,
            accept_task: None,
            sink_task: None,
        }
    }

    pub fn state(&self) -> ServerState {
        self.state
    }

    /// The address the listener is bound to while running. With port 0 in
    /// the configuration this is where the OS-assigned port shows up.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// A point-in-time copy of the operational counters.
    pub fn counters(&self) -> CountersSnapshot {
        self.counters.snapshot()
    }

    /// Ids of the currently registered sessions; empty when not running.
    pub fn live_sessions(&self) -> Vec<SessionId> {
        self.hub
            .as_ref()
            .map(|hub| hub.live_sessions())
            .unwrap_or_default()
    }

    /// Binds the listener and begins accepting connections.
    ///
    /// Returns the bound address on success.
    ///
    /// # Errors
    ///
    /// - [`ServerError::InvalidState`] when the server is not `Stopped`.
    /// - [`ServerError::Config`] when the bind address is unparseable.
    /// - [`ServerError::BindFailed`] when the port cannot be bound; the
    ///   server is back in `Stopped` afterwards.
    pub async fn start(&mut self) -> Result<SocketAddr, ServerError> {
        if self.state != ServerState::Stopped {
            return Err(ServerError::InvalidState {
                operation: "start",
                state: self.state,
            });
        }
        self.state = ServerState::Starting;

        let addr = match self.config.socket_addr() {
            Ok(addr) => addr,
            Err(e) => {
                self.state = ServerState::Stopped;
                return Err(e.into());
            }
        };

        let listener = match TcpListener::bind(addr).await {
            Ok(listener) => listener,
            Err(source) => {
                self.state = ServerState::Stopped;
                return Err(ServerError::BindFailed { addr, source });
            }
        };
        let local_addr = match listener.local_addr() {
            Ok(local_addr) => local_addr,
            Err(source) => {
                self.state = ServerState::Stopped;
                return Err(ServerError::BindFailed { addr, source });
            }
        };

        // Sink writer: the only task that touches the sink. Appends are
        // best-effort; a failing sink is logged and never reaches routing.
        let (record_tx, mut record_rx) = mpsc::channel::<RelayRecord>(RECORD_QUEUE_CAPACITY);
        let sink = Arc::clone(&self.sink);
        let sink_task = tokio::spawn(async move {
            while let Some(record) = record_rx.recv().await {
                if let Err(e) = sink.append(&record).await {
                    warn!("traffic sink append failed: {e}");
                }
            }
            debug!("sink writer drained");
        });

        let hub = Arc::new(BroadcastHub::new(Arc::clone(&self.counters), record_tx));
        let running = Arc::new(AtomicBool::new(true));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let ctx = ListenerContext {
            hub: Arc::clone(&hub),
            ids: Arc::clone(&self.ids),
            shutdown: shutdown_rx,
            read_buffer_bytes: self.config.relay.read_buffer_bytes,
            delivery_queue_capacity: self.config.relay.delivery_queue_capacity,
        };
        let accept_task = tokio::spawn(run_accept_loop(listener, ctx, Arc::clone(&running)));

        self.hub = Some(hub);
        self.running = Some(running);
        self.shutdown_tx = Some(shutdown_tx);
        self.local_addr = Some(local_addr);
        self.accept_task = Some(accept_task);
        self.sink_task = Some(sink_task);
        self.state = ServerState::Running;

        info!("relay server listening on {local_addr}");
        Ok(local_addr)
    }

    /// Stops accepting, drains and closes every live session, and releases
    /// the traffic sink channel.
    ///
    /// Every blocked read on a session socket unblocks because the session
    /// tasks observe the shutdown signal and drop their handles. Sessions
    /// still present after the grace window are force-closed. All queued
    /// traffic records are flushed before this returns.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::InvalidState`] when the server is not
    /// `Running`. Close races during cleanup are ignored; cleanup is
    /// idempotent.
    pub async fn stop(&mut self) -> Result<(), ServerError> {
        if self.state != ServerState::Running {
            return Err(ServerError::InvalidState {
                operation: "stop",
                state: self.state,
            });
        }
        self.state = ServerState::Stopping;
        info!("stopping relay server");

        if let Some(running) = &self.running {
            running.store(false, Ordering::Relaxed);
        }
        if let Some(shutdown_tx) = &self.shutdown_tx {
            // Send fails only if every session is already gone.
            let _ = shutdown_tx.send(true);
        }
        if let Some(accept_task) = self.accept_task.take() {
            let _ = accept_task.await;
        }

        if let Some(hub) = &self.hub {
            // Give in-flight routes and session cleanup a moment to drain.
            let deadline = Instant::now() + self.config.shutdown_grace();
            while !hub.is_empty() && Instant::now() < deadline {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            let stragglers = hub.unregister_all();
            if !stragglers.is_empty() {
                debug!("force-closed {} session(s) at shutdown", stragglers.len());
            }
            hub.close_record_channel();
        }

        if let Some(sink_task) = self.sink_task.take() {
            let _ = sink_task.await;
        }

        self.hub = None;
        self.running = None;
        self.shutdown_tx = None;
        self.local_addr = None;
        self.state = ServerState::Stopped;
        info!("relay server stopped");
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
