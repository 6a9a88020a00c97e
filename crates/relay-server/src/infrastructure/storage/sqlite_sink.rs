//! SQLite-backed traffic sink.
//!
//! One row per routed chunk. Every append is a single `INSERT`, so each
//! record is either fully written or absent: SQLite's journal gives the
//! per-record crash consistency the sink contract asks for. Each row
//! carries the routing timestamp, the sender's session id and peer
//! address, and the payload blob.

use std::path::Path;

use async_trait::async_trait;
use relay_core::{RelayRecord, SinkError, TrafficSink};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use tracing::debug;

/// Default database filename when `--db` is given without a value.
pub const DB_DEFAULT_FILENAME: &str = "relaylog.db";

const INIT_SQL: &str = "CREATE TABLE IF NOT EXISTS relaylog \
    (id INTEGER PRIMARY KEY AUTOINCREMENT, \
     dt INTEGER NOT NULL, \
     session INTEGER NOT NULL, \
     ip TEXT NOT NULL, \
     data BLOB NOT NULL)";

const INSERT_SQL: &str = "INSERT INTO relaylog (dt, session, ip, data) VALUES (?, ?, ?, ?)";

/// Append-only SQLite store of relayed traffic.
pub struct SqliteSink {
    pool: SqlitePool,
}

impl SqliteSink {
    /// Opens (creating if missing) the database at `path` and ensures the
    /// `relaylog` table exists.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError::Storage`] when the file cannot be opened or
    /// the schema cannot be created.
    pub async fn open(path: &Path) -> Result<Self, SinkError> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        // A single connection keeps appends strictly ordered; the sink
        // writer task is the only producer anyway.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(storage)?;
        sqlx::query(INIT_SQL).execute(&pool).await.map_err(storage)?;
        debug!("traffic log database opened at {}", path.display());
        Ok(Self { pool })
    }

    /// Closes the connection pool. Appends after this fail.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl TrafficSink for SqliteSink {
    async fn append(&self, record: &RelayRecord) -> Result<(), SinkError> {
        sqlx::query(INSERT_SQL)
            .bind(record.timestamp_us as i64)
            .bind(record.sender as i64)
            .bind(record.peer_addr.as_str())
            .bind(record.payload.as_slice())
            .execute(&self.pool)
            .await
            .map_err(storage)?;
        Ok(())
    }

    async fn record_count(&self) -> Result<u64, SinkError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM relaylog")
            .fetch_one(&self.pool)
            .await
            .map_err(storage)?;
        Ok(count as u64)
    }
}

fn storage(e: sqlx::Error) -> SinkError {
    SinkError::Storage(e.to_string())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
