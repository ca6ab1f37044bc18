//! Cache Module
//!
//! Pluggable key -> byte-blob store with TTL. Two tiers cooperate at
//! runtime: a persistent backend shared across analyses (selected here by
//! the factory) and a per-analysis memoization map that lives inside the
//! tracer. Values are opaque bytes; encoding is the caller's business.
//!
//! Contract notes:
//! - `put` never errors: a backend failure is logged and swallowed,
//!   correctness must not depend on persistence.
//! - Last-writer-wins; no cross-key atomicity.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::chains;
use crate::config::CacheSettings;
use crate::models::errors::{AppError, AppResult};
use crate::models::types::TxRecord;

pub mod memory;
pub mod sqlite;

pub use memory::MemoryCache;
pub use sqlite::SqliteCache;

/// Cache capability set
#[async_trait]
pub trait Cache: Send + Sync {
    /// Returns the stored bytes, or None on miss/expiry
    async fn get(&self, key: &str) -> Option<Vec<u8>>;

    /// Stores bytes under the key. May be a no-op under pressure or
    /// backend failure; never errors.
    async fn put(&self, key: &str, value: &[u8], ttl: Duration);

    /// Backend liveness probe
    async fn ping(&self) -> bool;
}

// ============================================
// KEY BUILDERS
// ============================================

/// Cache key for a normalized transaction record. Transaction ids are hex
/// on every supported chain, so they always fold to lowercase.
pub fn tx_key(chain: &str, tx_id: &str) -> String {
    format!("tx:{}:{}", chain, tx_id.to_lowercase())
}

/// Cache key for address metadata. Address casing follows the chain
/// family: account (hex) addresses fold to lowercase, UTXO (base58/
/// bech32) addresses are case-sensitive and keep their exact casing —
/// two Bitcoin addresses differing only in case are different addresses
/// and must never share a key. Unknown chains keep the address verbatim.
pub fn addr_key(chain: &str, address: &str) -> String {
    let canonical = match chains::get_chain(chain) {
        Ok(spec) => TxRecord::normalize_address(spec.family, address),
        Err(_) => address.to_string(),
    };
    format!("addr:{}:{}", chain, canonical)
}

/// Cache key for a finished risk report. Depth is part of the key:
/// the same transaction traced to different depths is a different report.
pub fn report_key(chain: &str, tx_id: &str, depth: u32) -> String {
    format!("report:{}:{}:{}", chain, tx_id.to_lowercase(), depth)
}

// ============================================
// BACKEND FACTORY
// ============================================

/// Build the persistent backend selected by configuration
pub fn from_settings(settings: &CacheSettings) -> AppResult<Arc<dyn Cache>> {
    match settings.backend.as_str() {
        "memory" => Ok(Arc::new(MemoryCache::new(settings.max_entries))),
        "sqlite" => Ok(Arc::new(SqliteCache::open(&settings.sqlite_path)?)),
        other => Err(AppError::invalid_input(format!(
            "Unknown cache backend '{}' (expected: memory, sqlite)",
            other
        ))),
    }
}
