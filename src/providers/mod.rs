//! Blockchain Data Providers
//!
//! The engine consumes upstream data through the closed
//! `BlockchainProvider` capability set. Concrete clients (Blockchair for
//! every supported chain, Blockchain.com for Bitcoin) normalize their
//! responses at this boundary; nothing downstream knows a provider schema.
//!
//! Reliability policies live beside the clients:
//! - `pacing`: request spacing + backoff math
//! - `breaker`: three-state circuit breaker
//! - `transport`: the retry loop shared by the HTTP clients
//! - `multi`: per-chain provider selection, fallback, single-flight

use async_trait::async_trait;
use serde::Serialize;

use crate::models::errors::AppResult;
use crate::models::types::{AddressMeta, TxRecord};

pub mod blockchain_com;
pub mod blockchair;
pub mod breaker;
pub mod multi;
pub mod pacing;
pub mod transport;

pub use blockchain_com::BlockchainComClient;
pub use blockchair::BlockchairClient;
pub use breaker::{BreakerState, CircuitBreaker};
pub use multi::MultiProvider;
pub use pacing::RateLimiter;

/// Closed capability set every provider implements
#[async_trait]
pub trait BlockchainProvider: Send + Sync {
    /// Provider name for logs and health reporting
    fn name(&self) -> &'static str;

    /// Fetch and normalize one transaction
    async fn get_transaction(&self, chain: &str, tx_id: &str) -> AppResult<TxRecord>;

    /// Fetch and normalize address metadata. A provider that reports no
    /// tags yields an empty tag set, not an error.
    async fn get_address_meta(&self, chain: &str, address: &str) -> AppResult<AddressMeta>;

    /// Current reliability state. Never fails.
    async fn health(&self) -> ProviderHealth;
}

/// Snapshot of a provider's reliability state
#[derive(Debug, Clone, Serialize)]
pub struct ProviderHealth {
    pub state: BreakerState,
    pub request_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest_block: Option<u64>,
}
