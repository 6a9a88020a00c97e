//! Records of relayed traffic.
//!
//! The hub creates one [`RelayRecord`] per successfully routed chunk and
//! hands it to the configured traffic sink. Records are immutable: once
//! created they are appended somewhere (or dropped) and never updated.

use super::session_id::SessionId;

/// Returns the current wall-clock time as microseconds since the Unix epoch.
///
/// Falls back to 0 if the system clock is set before 1970, rather than
/// panicking inside the routing path.
pub fn current_timestamp_us() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}

/// One relayed chunk, as persisted by a traffic sink.
///
/// The payload is exactly the bytes one read call returned on the sender's
/// socket; no framing or semantic boundary is implied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayRecord {
    /// Microseconds since the Unix epoch at routing time.
    pub timestamp_us: u64,
    /// Session that sent the chunk.
    pub sender: SessionId,
    /// Remote address of the sending client, as a display string.
    pub peer_addr: String,
    /// The relayed bytes.
    pub payload: Vec<u8>,
}

impl RelayRecord {
    /// Creates a record for `payload` stamped with the current time.
    pub fn new(sender: SessionId, peer_addr: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            timestamp_us: current_timestamp_us(),
            sender,
            peer_addr: peer_addr.into(),
            payload,
        }
    }

    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Whether the payload is empty. A zero-length chunk never reaches the
    /// hub (a zero-byte read means EOF), but sinks should not have to care.
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}
