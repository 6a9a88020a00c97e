//! Built-in dummy-client self-check (`--test`).
//!
//! Connects a small fixed number of in-process dummy clients to a running
//! relay, has each one send a sample message, and verifies that every other
//! client observes every message exactly once while no client ever sees its
//! own bytes echoed back. This is a self-check, not a production path: it
//! exists so `relayserver --test` can gate a deployment with a meaningful
//! exit code.

use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info};

/// Number of dummy clients the self-check connects.
pub const DUMMY_CLIENT_COUNT: usize = 3;

/// Per-read deadline while waiting for an expected message.
const READ_DEADLINE: Duration = Duration::from_secs(2);

/// Window in which a client must stay silent to prove nothing unexpected
/// (an echo, a duplicate) was delivered to it.
const SILENCE_WINDOW: Duration = Duration::from_millis(200);

/// Error type for a failed self-check.
#[derive(Debug, Error)]
pub enum SelfCheckError {
    /// A dummy client could not connect or its socket failed.
    #[error("dummy client #{client}: {source}")]
    Io {
        client: usize,
        #[source]
        source: std::io::Error,
    },

    /// A client did not receive a complete expected message in time.
    #[error(
        "dummy client #{client} received {received} of {expected} expected bytes before the deadline"
    )]
    MissingData {
        client: usize,
        expected: usize,
        received: usize,
    },

    /// A client received different bytes than another client sent.
    #[error("dummy client #{client} received {got:?}, expected {expected:?}")]
    WrongData {
        client: usize,
        expected: String,
        got: String,
    },

    /// A client observed bytes it should never have seen: its own message
    /// back, or a duplicate delivery.
    #[error("dummy client #{client} received unexpected bytes {got:?}")]
    UnexpectedData { client: usize, got: String },
}

/// Runs the dummy-client exchange against the relay at `addr`.
///
/// # Errors
///
/// Returns the first [`SelfCheckError`] encountered; the relay itself is
/// left running either way.
pub async fn run_self_check(addr: SocketAddr) -> Result<(), SelfCheckError> {
    info!("self-check: connecting {DUMMY_CLIENT_COUNT} dummy clients to {addr}");

    let mut clients: Vec<TcpStream> = Vec::with_capacity(DUMMY_CLIENT_COUNT);
    for client in 0..DUMMY_CLIENT_COUNT {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|source| SelfCheckError::Io { client, source })?;
        clients.push(stream);
    }

    // A broadcast only reaches sessions registered before it starts; give
    // the server a moment to register all three.
    sleep(Duration::from_millis(150)).await;

    for sender in 0..DUMMY_CLIENT_COUNT {
        let message = format!("test message from dummy client #{sender}.");
        debug!("self-check: client #{sender} sending {:?}", message);
        clients[sender]
            .write_all(message.as_bytes())
            .await
            .map_err(|source| SelfCheckError::Io {
                client: sender,
                source,
            })?;

        // Every other client must observe exactly these bytes.
        for receiver in 0..DUMMY_CLIENT_COUNT {
            if receiver == sender {
                continue;
            }
            let got = read_until(&mut clients[receiver], message.len())
                .await
                .map_err(|source| SelfCheckError::Io {
                    client: receiver,
                    source,
                })?;
            if got.len() < message.len() {
                return Err(SelfCheckError::MissingData {
                    client: receiver,
                    expected: message.len(),
                    received: got.len(),
                });
            }
            if got != message.as_bytes() {
                return Err(SelfCheckError::WrongData {
                    client: receiver,
                    expected: message,
                    got: String::from_utf8_lossy(&got).into_owned(),
                });
            }
            debug!("self-check: client #{receiver} observed client #{sender}'s message");
        }

        // The sender must not see its own bytes back.
        let echoed =
            read_silence(&mut clients[sender])
                .await
                .map_err(|source| SelfCheckError::Io {
                    client: sender,
                    source,
                })?;
        if !echoed.is_empty() {
            return Err(SelfCheckError::UnexpectedData {
                client: sender,
                got: String::from_utf8_lossy(&echoed).into_owned(),
            });
        }
    }

    // Exactly once: after all rounds, nobody may receive anything further.
    for client in 0..DUMMY_CLIENT_COUNT {
        let extra = read_silence(&mut clients[client])
            .await
            .map_err(|source| SelfCheckError::Io { client, source })?;
        if !extra.is_empty() {
            return Err(SelfCheckError::UnexpectedData {
                client,
                got: String::from_utf8_lossy(&extra).into_owned(),
            });
        }
    }

    info!(
        "self-check passed: every dummy client observed every other client's message exactly once"
    );
    Ok(())
}

/// Reads until `want` bytes arrived, EOF, or the deadline passes. Receiver
/// chunk boundaries need not match the sender's, so short reads are
/// accumulated.
async fn read_until(stream: &mut TcpStream, want: usize) -> std::io::Result<Vec<u8>> {
    let mut collected = Vec::with_capacity(want);
    let deadline = Instant::now() + READ_DEADLINE;
    let mut buf = [0u8; 1024];

    while collected.len() < want {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        match timeout(remaining, stream.read(&mut buf)).await {
            Ok(Ok(0)) => break, // connection closed
            Ok(Ok(n)) => collected.extend_from_slice(&buf[..n]),
            Ok(Err(e)) => return Err(e),
            Err(_) => break, // deadline
        }
    }
    Ok(collected)
}

/// Returns whatever arrives within the silence window, expected to be
/// nothing.
async fn read_silence(stream: &mut TcpStream) -> std::io::Result<Vec<u8>> {
    let mut buf = [0u8; 1024];
    match timeout(SILENCE_WINDOW, stream.read(&mut buf)).await {
        Ok(Ok(0)) => Ok(Vec::new()),
        Ok(Ok(n)) => Ok(buf[..n].to_vec()),
        Ok(Err(e)) => Err(e),
        Err(_) => Ok(Vec::new()),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
