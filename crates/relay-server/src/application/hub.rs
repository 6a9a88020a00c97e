//! BroadcastHub: the coordination core of the relay.
//!
//! The hub owns the live set of sessions and routes every inbound chunk to
//! all sessions except its sender. Each registered session contributes a
//! bounded delivery queue; the hub only ever performs a non-blocking
//! `try_send` into those queues, so a slow or dead receiver can never stall
//! a broadcast to the others.
//!
//! # Locking discipline
//!
//! The live set sits behind a `std::sync::Mutex` and the lock is held only
//! for a single map mutation or for copying a snapshot of the receivers.
//! No channel send, socket write, or other blocking call ever happens under
//! the lock, which is what makes it safe to use a plain (non-async) mutex
//! from async tasks here.
//!
//! # Failure policy
//!
//! A delivery queue that is full means the receiver's writer has fallen
//! behind even after the OS socket buffers filled up. The receiver is
//! disconnected rather than silently losing a chunk of its unframed byte
//! stream: a missing chunk corrupts everything the receiver reads after it,
//! while a disconnect is observable by the client application, which owns
//! retries. A closed queue means the session is already gone; it is removed
//! the same way. Either way, routing to the remaining sessions continues.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use relay_core::{RelayRecord, ServerCounters, SessionId};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

/// Everything the hub needs to deliver chunks to one registered session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    /// Process-unique session identifier.
    pub id: SessionId,
    /// Remote address of the connected client.
    pub remote_addr: SocketAddr,
    /// Sending side of the session's bounded delivery queue.
    chunk_tx: mpsc::Sender<Vec<u8>>,
}

impl SessionHandle {
    pub fn new(id: SessionId, remote_addr: SocketAddr, chunk_tx: mpsc::Sender<Vec<u8>>) -> Self {
        Self {
            id,
            remote_addr,
            chunk_tx,
        }
    }
}

/// Fans in chunks from any session and fans them out to all other live
/// sessions, forwarding a [`RelayRecord`] per routed chunk to the sink
/// writer channel.
pub struct BroadcastHub {
    sessions: Mutex<HashMap<SessionId, SessionHandle>>,
    /// Sender half of the sink writer channel. `None` once the lifecycle
    /// controller has closed it during shutdown.
    record_tx: Mutex<Option<mpsc::Sender<RelayRecord>>>,
    counters: Arc<ServerCounters>,
}

impl BroadcastHub {
    pub fn new(counters: Arc<ServerCounters>, record_tx: mpsc::Sender<RelayRecord>) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            record_tx: Mutex::new(Some(record_tx)),
            counters,
        }
    }

    /// Adds a session to the live set.
    ///
    /// Safe to call concurrently with [`route`](Self::route) and
    /// [`unregister`](Self::unregister). Callers must not register two
    /// sessions with the same id.
    pub fn register(&self, handle: SessionHandle) {
        let id = handle.id;
        let addr = handle.remote_addr;
        self.lock_sessions().insert(id, handle);
        self.counters.session_connected();
        debug!("session {id} registered ({addr})");
    }

    /// Removes a session from the live set, making it non-routable for any
    /// in-flight or future `route` call. Idempotent; never blocks on the
    /// session's own I/O.
    ///
    /// Returns whether an entry was actually removed, so callers can log
    /// the disconnect exactly once.
    pub fn unregister(&self, id: SessionId) -> bool {
        let removed = self.lock_sessions().remove(&id).is_some();
        if removed {
            self.counters.session_disconnected();
            debug!("session {id} unregistered");
        }
        removed
    }

    /// Routes one chunk from `sender` to every other live session and
    /// forwards a record of it to the sink writer.
    ///
    /// Receivers whose delivery queue is full or closed are unregistered;
    /// the remaining receivers are unaffected. The call itself never blocks
    /// and never fails.
    pub fn route(&self, sender: SessionId, sender_addr: &str, chunk: &[u8]) {
        // Snapshot the receivers under the lock, deliver outside it. A
        // session fully registered before this point is in the snapshot; a
        // session removed before this point is not.
        let targets: Vec<SessionHandle> = {
            let sessions = self.lock_sessions();
            sessions
                .values()
                .filter(|handle| handle.id != sender)
                .cloned()
                .collect()
        };

        let mut dropped: Vec<SessionId> = Vec::new();
        for handle in &targets {
            match handle.chunk_tx.try_send(chunk.to_vec()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    warn!(
                        "session {}: delivery queue full, disconnecting slow receiver",
                        handle.id
                    );
                    dropped.push(handle.id);
                }
                Err(TrySendError::Closed(_)) => {
                    debug!("session {}: delivery queue closed", handle.id);
                    dropped.push(handle.id);
                }
            }
        }
        for id in dropped {
            // Removing the handle drops the queue sender; the session's
            // writer task drains what is queued and then shuts the socket.
            self.unregister(id);
        }

        self.counters.chunk_relayed(chunk.len());
        debug!(
            "session {sender}: relayed {} bytes to {} receiver(s)",
            chunk.len(),
            targets.len()
        );

        // Best-effort record of the routed chunk. A full or closed sink
        // channel loses the record, never the broadcast.
        let guard = self
            .record_tx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(tx) = guard.as_ref() {
            if let Err(e) = tx.try_send(RelayRecord::new(sender, sender_addr, chunk.to_vec())) {
                warn!("traffic record dropped: {e}");
            }
        }
    }

    /// Removes every session from the live set, returning the removed ids.
    /// Used by the lifecycle controller to force-close stragglers after the
    /// graceful drain window.
    pub fn unregister_all(&self) -> Vec<SessionId> {
        let drained: Vec<SessionId> = self.lock_sessions().drain().map(|(id, _)| id).collect();
        for _ in &drained {
            self.counters.session_disconnected();
        }
        drained
    }

    /// Closes the sink writer channel so the sink task can drain its queue
    /// and finish. Routing after this point still works; records are
    /// silently skipped.
    pub fn close_record_channel(&self) {
        self.record_tx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
    }

    /// Ids of every currently registered session, in ascending order.
    pub fn live_sessions(&self) -> Vec<SessionId> {
        let mut ids: Vec<SessionId> = self.lock_sessions().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn contains(&self, id: SessionId) -> bool {
        self.lock_sessions().contains_key(&id)
    }

    pub fn is_empty(&self) -> bool {
        self.lock_sessions().is_empty()
    }

    fn lock_sessions(&self) -> std::sync::MutexGuard<'_, HashMap<SessionId, SessionHandle>> {
        // A poisoned lock only means another task panicked mid-mutation of
        // the map; the map itself is still structurally valid.
        self.sessions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
