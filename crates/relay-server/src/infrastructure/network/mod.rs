//! Network infrastructure: the TCP accept loop and per-connection sessions.

pub mod listener;
pub mod session;
