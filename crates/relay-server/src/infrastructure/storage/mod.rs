//! Storage infrastructure: TOML configuration and the SQLite traffic sink.

pub mod config;
pub mod sqlite_sink;
