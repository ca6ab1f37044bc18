//! Multi-Provider Manager
//!
//! Coordinates the upstream clients:
//! - deterministic per-chain selection (Bitcoin prefers Blockchain.com for
//!   its full address history; everything else uses Blockchair)
//! - one fallback attempt against Blockchair when the preferred provider
//!   reports ProviderDown
//! - single-flight coalescing: concurrent identical lookups trigger at
//!   most one upstream call
//!
//! No reliability state is shared across providers; each client keeps its
//! own pacer, breaker and counters.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use super::{BlockchainProvider, ProviderHealth};
use crate::cache;
use crate::chains;
use crate::models::errors::{AppResult, ErrorCode};
use crate::models::types::{AddressMeta, TxRecord};

// ============================================
// SINGLE-FLIGHT
// ============================================

/// De-duplicates concurrent async calls by key. The first caller runs the
/// future; everyone else awaits its result. Entries are removed once the
/// flight lands, so later callers fetch fresh.
pub struct SingleFlight<T: Clone> {
    inflight: DashMap<String, Arc<OnceCell<T>>>,
}

impl<T: Clone> SingleFlight<T> {
    pub fn new() -> Self {
        Self {
            inflight: DashMap::new(),
        }
    }

    pub async fn run<F, Fut>(&self, key: &str, make: F) -> AppResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = AppResult<T>>,
    {
        let cell = self
            .inflight
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        let result = cell.get_or_try_init(make).await.cloned();
        self.inflight.remove(key);
        result
    }
}

impl<T: Clone> Default for SingleFlight<T> {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================
// MULTI PROVIDER
// ============================================

pub struct MultiProvider {
    blockchair: Arc<dyn BlockchainProvider>,
    blockchain_com: Option<Arc<dyn BlockchainProvider>>,
    tx_flights: SingleFlight<TxRecord>,
    addr_flights: SingleFlight<AddressMeta>,
    request_count: AtomicU64,
}

impl MultiProvider {
    pub fn new(
        blockchair: Arc<dyn BlockchainProvider>,
        blockchain_com: Option<Arc<dyn BlockchainProvider>>,
    ) -> Self {
        debug!(
            "multi provider initialized (blockchain_com={})",
            blockchain_com.is_some()
        );
        Self {
            blockchair,
            blockchain_com,
            tx_flights: SingleFlight::new(),
            addr_flights: SingleFlight::new(),
            request_count: AtomicU64::new(0),
        }
    }

    /// Deterministic provider choice for a chain
    fn select(&self, chain: &str) -> &Arc<dyn BlockchainProvider> {
        if chain.eq_ignore_ascii_case("bitcoin") {
            if let Some(btc) = &self.blockchain_com {
                return btc;
            }
        }
        &self.blockchair
    }

    fn is_fallback_worthy(code: ErrorCode) -> bool {
        matches!(code, ErrorCode::ProviderDown | ErrorCode::ProviderTimeout)
    }
}

#[async_trait]
impl BlockchainProvider for MultiProvider {
    fn name(&self) -> &'static str {
        "multi"
    }

    async fn get_transaction(&self, chain: &str, tx_id: &str) -> AppResult<TxRecord> {
        chains::get_chain(chain)?;
        self.request_count.fetch_add(1, Ordering::Relaxed);

        let key = cache::tx_key(chain, tx_id);
        let preferred = self.select(chain).clone();
        let fallback = if preferred.name() != self.blockchair.name() {
            Some(self.blockchair.clone())
        } else {
            None
        };
        let chain = chain.to_string();
        let tx_id = tx_id.to_string();

        self.tx_flights
            .run(&key, || async move {
                match preferred.get_transaction(&chain, &tx_id).await {
                    Ok(tx) => Ok(tx),
                    Err(e) if Self::is_fallback_worthy(e.code) => match fallback {
                        Some(fb) => {
                            warn!(
                                "🔄 {} failed for {}, falling back to {}: {}",
                                preferred.name(),
                                tx_id,
                                fb.name(),
                                e
                            );
                            fb.get_transaction(&chain, &tx_id).await
                        }
                        None => Err(e),
                    },
                    Err(e) => Err(e),
                }
            })
            .await
    }

    async fn get_address_meta(&self, chain: &str, address: &str) -> AppResult<AddressMeta> {
        chains::get_chain(chain)?;
        self.request_count.fetch_add(1, Ordering::Relaxed);

        // family-aware key: case-variant UTXO addresses are distinct
        // lookups and must not coalesce
        let key = cache::addr_key(chain, address);
        let preferred = self.select(chain).clone();
        let fallback = if preferred.name() != self.blockchair.name() {
            Some(self.blockchair.clone())
        } else {
            None
        };
        let chain = chain.to_string();
        let address = address.to_string();

        self.addr_flights
            .run(&key, || async move {
                match preferred.get_address_meta(&chain, &address).await {
                    Ok(meta) => Ok(meta),
                    Err(e) if Self::is_fallback_worthy(e.code) => match fallback {
                        Some(fb) => {
                            warn!(
                                "🔄 {} failed for {}, falling back to {}: {}",
                                preferred.name(),
                                address,
                                fb.name(),
                                e
                            );
                            fb.get_address_meta(&chain, &address).await
                        }
                        None => Err(e),
                    },
                    Err(e) => Err(e),
                }
            })
            .await
    }

    async fn health(&self) -> ProviderHealth {
        let primary = self.blockchair.health().await;
        let mut request_count = primary.request_count + self.request_count.load(Ordering::Relaxed);
        let mut latest_block = primary.latest_block;

        if let Some(btc) = &self.blockchain_com {
            let h = btc.health().await;
            request_count += h.request_count;
            latest_block = match (latest_block, h.latest_block) {
                (Some(a), Some(b)) => Some(a.max(b)),
                (a, b) => a.or(b),
            };
        }

        ProviderHealth {
            state: primary.state,
            request_count,
            latest_block,
        }
    }
}
