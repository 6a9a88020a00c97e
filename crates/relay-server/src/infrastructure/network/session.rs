//! Per-connection client session: one reader loop plus one writer task.
//!
//! The accepted stream is split into owned halves. The writer task is the
//! only code that touches the write half: it drains the session's bounded
//! delivery queue and `write_all`s each chunk, so concurrent deliveries
//! from the hub are serialized and never interleave mid-chunk. The reader
//! loop forwards every chunk the socket yields to the hub until EOF, a
//! read error, the shutdown signal, or the writer side terminating
//! (delivery failure, or the hub kicked this session).
//!
//! Whatever ends the session, cleanup is the same: unregister from the hub
//! (idempotent) and drop both socket halves, which closes the handle.

use std::net::SocketAddr;
use std::sync::Arc;

use relay_core::SessionId;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

use crate::application::hub::{BroadcastHub, SessionHandle};

/// Runs one client session to completion.
///
/// Registers with the hub, then relays until the connection ends. Chunks
/// are forwarded in exactly the sizes the read calls return; no framing is
/// applied. A read or write error terminates this session only.
pub async fn run_session(
    stream: TcpStream,
    peer_addr: SocketAddr,
    id: SessionId,
    hub: Arc<BroadcastHub>,
    mut shutdown: watch::Receiver<bool>,
    read_buffer_bytes: usize,
    delivery_queue_capacity: usize,
) {
    let (mut read_half, mut write_half) = stream.into_split();
    let (chunk_tx, mut chunk_rx) = mpsc::channel::<Vec<u8>>(delivery_queue_capacity);

    hub.register(SessionHandle::new(id, peer_addr, chunk_tx));
    info!("session {id} connected from {peer_addr}");

    // Writer task: ends when the delivery queue closes (session removed
    // from the hub) or a write fails. Queued chunks are drained before the
    // write half is dropped, so a kicked session still receives what was
    // already accepted for it.
    let mut writer_task = tokio::spawn(async move {
        while let Some(chunk) = chunk_rx.recv().await {
            if let Err(e) = write_half.write_all(&chunk).await {
                debug!("session {id}: write failed: {e}");
                break;
            }
        }
    });

    let peer = peer_addr.to_string();
    let mut buf = vec![0u8; read_buffer_bytes];
    loop {
        tokio::select! {
            result = read_half.read(&mut buf) => match result {
                Ok(0) => {
                    debug!("session {id}: EOF");
                    break;
                }
                Ok(n) => {
                    debug!("session {id}: received {n} bytes");
                    hub.route(id, &peer, &buf[..n]);
                }
                Err(e) => {
                    debug!("session {id}: read error: {e}");
                    break;
                }
            },
            _ = &mut writer_task => {
                // Delivery side is gone; stop reading as well.
                break;
            }
            _ = shutdown.changed() => {
                debug!("session {id}: shutdown requested");
                break;
            }
        }
    }

    hub.unregister(id);
    writer_task.abort();
    info!("session {id} disconnected ({peer_addr})");
}

// ── Tests ─────────────────────────────────────────────────────────────────────
