//! The traffic-sink contract and its in-process implementations.
//!
//! A [`TrafficSink`] is the relay's only view of traffic persistence: an
//! append-only store of [`RelayRecord`]s. The concrete sink is selected
//! once at startup (a SQLite-backed sink when `--db` is given, otherwise
//! [`NoopSink`]), so the routing path never branches on "is logging
//! enabled".
//!
//! Sink failures are best-effort by contract: the caller logs and ignores
//! them, and they never fail or block chunk routing.

use std::sync::Mutex;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::record::RelayRecord;

/// Error type for sink operations.
#[derive(Debug, Error)]
pub enum SinkError {
    /// The backing store rejected the append.
    #[error("storage error: {0}")]
    Storage(String),
    /// The sink was closed before the append.
    #[error("sink is closed")]
    Closed,
}

/// Append-only store of relayed traffic records.
///
/// Implementations must serialize their own internal state; `append` may be
/// called from the sink writer task while tests inspect the sink from
/// another task.
#[async_trait]
pub trait TrafficSink: Send + Sync {
    /// Appends one record.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError`] when the record could not be stored. The relay
    /// treats this as best-effort: the error is logged, the record is lost,
    /// and routing continues.
    async fn append(&self, record: &RelayRecord) -> Result<(), SinkError>;

    /// Number of records currently stored, where the backing store can
    /// answer cheaply. Used by the self-check and tests.
    async fn record_count(&self) -> Result<u64, SinkError>;
}

/// Sink that discards every record. Used when logging is disabled.
#[derive(Debug, Default)]
pub struct NoopSink;

#[async_trait]
impl TrafficSink for NoopSink {
    async fn append(&self, _record: &RelayRecord) -> Result<(), SinkError> {
        Ok(())
    }

    async fn record_count(&self) -> Result<u64, SinkError> {
        Ok(0)
    }
}

/// In-memory sink retaining every record, for tests and the self-check.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<RelayRecord>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of every stored record in append order.
    pub fn records(&self) -> Vec<RelayRecord> {
        self.lock().clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<RelayRecord>> {
        // A poisoned lock still holds a structurally valid Vec.
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl TrafficSink for MemorySink {
    async fn append(&self, record: &RelayRecord) -> Result<(), SinkError> {
        self.lock().push(record.clone());
        Ok(())
    }

    async fn record_count(&self) -> Result<u64, SinkError> {
        Ok(self.lock().len() as u64)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
