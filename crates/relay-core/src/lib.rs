//! # relay-core
//!
//! Shared library for the relay server containing session identity, relayed
//! traffic records, process-wide counters, and the traffic-sink contract.
//!
//! This crate is used by the server binary and by its integration tests.
//! It has zero dependencies on OS APIs or network sockets: everything here
//! is plain data and lock-free state that can be unit-tested without a
//! runtime or an open port.

pub mod domain;
pub mod sink;

// Re-export the most-used types at the crate root so callers can write
// `relay_core::SessionId` instead of `relay_core::domain::session_id::SessionId`.
pub use domain::counters::{CountersSnapshot, ServerCounters};
pub use domain::record::{current_timestamp_us, RelayRecord};
pub use domain::session_id::{SessionId, SessionIdAllocator};
pub use sink::{MemorySink, NoopSink, SinkError, TrafficSink};
