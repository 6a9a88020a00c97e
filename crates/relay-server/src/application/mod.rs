//! Application layer: the broadcast hub, the server lifecycle controller,
//! and the dummy-client self-check.

pub mod hub;
pub mod lifecycle;
pub mod self_check;
