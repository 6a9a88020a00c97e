//! Domain entities for the relay: session identity, traffic records, and
//! server counters.

pub mod counters;
pub mod record;
pub mod session_id;
