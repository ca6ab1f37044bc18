//! SQLite Cache Backend
//!
//! Relational key-value variant of the cache contract: a single table with
//! a TTL column, expired rows dropped lazily on read. The rusqlite driver
//! is synchronous, so every operation runs on the blocking pool.
//!
//! Failures are logged and degrade to a miss / no-op; the engine never
//! depends on persistence succeeding.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rusqlite::{params, Connection};
use tracing::{debug, warn};

use super::Cache;
use crate::models::errors::{AppError, AppResult, ErrorCode};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS kv_cache (
    key        TEXT PRIMARY KEY,
    value      BLOB NOT NULL,
    expires_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_kv_cache_expires ON kv_cache (expires_at);
";

/// Persistent cache backed by a SQLite file
pub struct SqliteCache {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteCache {
    /// Open (or create) the cache database at `path`
    pub fn open(path: &str) -> AppResult<Self> {
        let conn = Connection::open(path)
            .map_err(|e| AppError::with_source(ErrorCode::CacheError, "sqlite open failed", e))?;
        conn.execute_batch(SCHEMA)
            .map_err(|e| AppError::with_source(ErrorCode::CacheError, "sqlite schema failed", e))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// In-memory database, for tests
    pub fn open_in_memory() -> AppResult<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| AppError::with_source(ErrorCode::CacheError, "sqlite open failed", e))?;
        conn.execute_batch(SCHEMA)
            .map_err(|e| AppError::with_source(ErrorCode::CacheError, "sqlite schema failed", e))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn now_epoch() -> i64 {
        chrono::Utc::now().timestamp()
    }
}

#[async_trait]
impl Cache for SqliteCache {
    async fn get(&self, key: &str) -> Option<Vec<u8>> {
        let conn = self.conn.clone();
        let key = key.to_string();

        let result = tokio::task::spawn_blocking(move || {
            let conn = conn.lock().ok()?;
            let now = Self::now_epoch();
            let row: Option<(Vec<u8>, i64)> = conn
                .query_row(
                    "SELECT value, expires_at FROM kv_cache WHERE key = ?1",
                    params![key],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .ok();

            match row {
                Some((value, expires_at)) if expires_at > now => Some(value),
                Some(_) => {
                    // expired row: drop it and report a miss
                    let _ = conn.execute("DELETE FROM kv_cache WHERE key = ?1", params![key]);
                    None
                }
                None => None,
            }
        })
        .await;

        match result {
            Ok(value) => value,
            Err(e) => {
                warn!("⚠️ sqlite cache get failed: {}", e);
                None
            }
        }
    }

    async fn put(&self, key: &str, value: &[u8], ttl: Duration) {
        let conn = self.conn.clone();
        let key = key.to_string();
        let value = value.to_vec();
        let ttl_secs = ttl.as_secs() as i64;

        let result = tokio::task::spawn_blocking(move || {
            let conn = conn
                .lock()
                .map_err(|_| rusqlite::Error::InvalidQuery)?;
            let expires_at = Self::now_epoch() + ttl_secs;
            conn.execute(
                "INSERT OR REPLACE INTO kv_cache (key, value, expires_at) VALUES (?1, ?2, ?3)",
                params![key, value, expires_at],
            )
        })
        .await;

        match result {
            Ok(Ok(_)) => debug!("💾 CACHE SET (sqlite, ttl {}s)", ttl_secs),
            Ok(Err(e)) => warn!("⚠️ sqlite cache put failed (continuing): {}", e),
            Err(e) => warn!("⚠️ sqlite cache put panicked (continuing): {}", e),
        }
    }

    async fn ping(&self) -> bool {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            conn.lock()
                .ok()
                .and_then(|c| c.query_row("SELECT 1", [], |row| row.get::<_, i64>(0)).ok())
                .is_some()
        })
        .await
        .unwrap_or(false)
    }
}
