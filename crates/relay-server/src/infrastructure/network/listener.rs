//! TCP accept loop.
//!
//! Accepts incoming connections and hands each one to a dedicated session
//! task, so a running session never delays the next accept. The loop polls
//! a shared running flag through a short `timeout` around `accept()`, the
//! same way it would otherwise block forever with no way to shut down.
//!
//! Transient accept errors (for example, file-descriptor exhaustion) are
//! logged and the loop keeps going; binding errors are fatal and handled
//! by the lifecycle controller before this loop ever starts.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use relay_core::SessionIdAllocator;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::application::hub::BroadcastHub;
use crate::infrastructure::network::session::run_session;

/// Everything a spawned accept loop needs to build sessions.
pub struct ListenerContext {
    pub hub: Arc<BroadcastHub>,
    pub ids: Arc<SessionIdAllocator>,
    pub shutdown: watch::Receiver<bool>,
    pub read_buffer_bytes: usize,
    pub delivery_queue_capacity: usize,
}

/// Runs the accept loop until `running` is cleared.
///
/// The listener must already be bound; the caller reports bind failures.
pub async fn run_accept_loop(
    listener: TcpListener,
    ctx: ListenerContext,
    running: Arc<AtomicBool>,
) {
    loop {
        if !running.load(Ordering::Relaxed) {
            info!("shutdown flag set; stopping accept loop");
            break;
        }

        // Short timeout so the running flag is polled even when no clients
        // are connecting.
        match timeout(Duration::from_millis(200), listener.accept()).await {
            Ok(Ok((stream, peer_addr))) => {
                let id = ctx.ids.next();
                debug!("accepted connection from {peer_addr} as session {id}");
                let hub = Arc::clone(&ctx.hub);
                let shutdown = ctx.shutdown.clone();
                let read_buffer_bytes = ctx.read_buffer_bytes;
                let delivery_queue_capacity = ctx.delivery_queue_capacity;
                tokio::spawn(async move {
                    run_session(
                        stream,
                        peer_addr,
                        id,
                        hub,
                        shutdown,
                        read_buffer_bytes,
                        delivery_queue_capacity,
                    )
                    .await;
                });
            }
            Ok(Err(e)) => {
                warn!("accept error (transient): {e}");
            }
            Err(_) => {
                // Timeout; loop back to check the running flag.
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
