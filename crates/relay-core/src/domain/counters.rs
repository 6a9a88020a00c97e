//! Process-wide operational counters.
//!
//! The lifecycle controller owns one [`ServerCounters`] instance and shares
//! it with the hub via `Arc`. All updates are atomic, so the hub can bump
//! counters from any session task without a lock, and reporting code reads
//! a coherent-enough [`CountersSnapshot`] at any time.
//!
//! Counters are reset at process start and never persisted.

use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters for one server instance.
#[derive(Debug, Default)]
pub struct ServerCounters {
    active_sessions: AtomicU64,
    total_chunks: AtomicU64,
    total_bytes: AtomicU64,
}

/// A point-in-time copy of the counters, safe to hand to reporting code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CountersSnapshot {
    /// Sessions currently registered with the hub.
    pub active_sessions: u64,
    /// Chunks routed since process start.
    pub total_chunks: u64,
    /// Payload bytes routed since process start.
    pub total_bytes: u64,
}

impl ServerCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a session joining the live set.
    pub fn session_connected(&self) {
        self.active_sessions.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a session leaving the live set.
    ///
    /// Saturates at zero; the hub only calls this once per removed entry,
    /// but a stray extra call must not wrap the gauge to `u64::MAX`.
    pub fn session_disconnected(&self) {
        let _ = self
            .active_sessions
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| {
                v.checked_sub(1)
            });
    }

    /// Records one routed chunk of `bytes` payload bytes.
    pub fn chunk_relayed(&self, bytes: usize) {
        self.total_chunks.fetch_add(1, Ordering::Relaxed);
        self.total_bytes.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Returns a copy of the current counter values.
    pub fn snapshot(&self) -> CountersSnapshot {
        CountersSnapshot {
            active_sessions: self.active_sessions.load(Ordering::Relaxed),
            total_chunks: self.total_chunks.load(Ordering::Relaxed),
            total_bytes: self.total_bytes.load(Ordering::Relaxed),
        }
    }
}
