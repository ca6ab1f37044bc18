//! Chain Registry
//!
//! Frozen table of supported chains. Every chain-specific fact the engine
//! needs (family, decimals, provider path fragment, display name) lives
//! here and nowhere else — no hardcoded chain data in other modules.

use serde::{Deserialize, Serialize};

use crate::models::errors::{AppError, AppResult};

/// Blockchain accounting model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainFamily {
    /// Bitcoin-style: multiple inputs/outputs per transaction
    Utxo,
    /// Ethereum-style: single from -> to transfer, possibly with
    /// nested internal transfers
    Account,
}

/// Static configuration for one supported chain
#[derive(Debug, Clone, Serialize)]
pub struct ChainSpec {
    pub id: &'static str,
    pub family: ChainFamily,
    pub display_name: &'static str,
    pub native_symbol: &'static str,
    /// Power-of-ten divisor for raw provider values
    pub decimals: u32,
    /// Path fragment used in provider URLs
    pub api_path: &'static str,
    /// Whether the provider reports nested internal transfers
    pub has_internal_txs: bool,
}

impl ChainSpec {
    /// Scale a raw integer amount from the provider into native units
    pub fn scale(&self, raw: f64) -> f64 {
        raw / 10f64.powi(self.decimals as i32)
    }
}

// ============================================
// SUPPORTED CHAINS
// ============================================

pub const SUPPORTED_CHAINS: [ChainSpec; 12] = [
    // UTXO-based chains
    ChainSpec {
        id: "bitcoin",
        family: ChainFamily::Utxo,
        display_name: "Bitcoin",
        native_symbol: "BTC",
        decimals: 8,
        api_path: "bitcoin",
        has_internal_txs: false,
    },
    ChainSpec {
        id: "bitcoin-cash",
        family: ChainFamily::Utxo,
        display_name: "Bitcoin Cash",
        native_symbol: "BCH",
        decimals: 8,
        api_path: "bitcoin-cash",
        has_internal_txs: false,
    },
    ChainSpec {
        id: "litecoin",
        family: ChainFamily::Utxo,
        display_name: "Litecoin",
        native_symbol: "LTC",
        decimals: 8,
        api_path: "litecoin",
        has_internal_txs: false,
    },
    ChainSpec {
        id: "dogecoin",
        family: ChainFamily::Utxo,
        display_name: "Dogecoin",
        native_symbol: "DOGE",
        decimals: 8,
        api_path: "dogecoin",
        has_internal_txs: false,
    },
    // Account-based chains (EVM)
    ChainSpec {
        id: "ethereum",
        family: ChainFamily::Account,
        display_name: "Ethereum",
        native_symbol: "ETH",
        decimals: 18,
        api_path: "ethereum",
        has_internal_txs: true,
    },
    ChainSpec {
        id: "binance-smart-chain",
        family: ChainFamily::Account,
        display_name: "BNB Smart Chain",
        native_symbol: "BNB",
        decimals: 18,
        api_path: "binance-smart-chain",
        has_internal_txs: true,
    },
    ChainSpec {
        id: "polygon",
        family: ChainFamily::Account,
        display_name: "Polygon",
        native_symbol: "MATIC",
        decimals: 18,
        api_path: "polygon",
        has_internal_txs: true,
    },
    ChainSpec {
        id: "arbitrum",
        family: ChainFamily::Account,
        display_name: "Arbitrum",
        native_symbol: "ETH",
        decimals: 18,
        api_path: "arbitrum",
        has_internal_txs: true,
    },
    ChainSpec {
        id: "optimism",
        family: ChainFamily::Account,
        display_name: "Optimism",
        native_symbol: "ETH",
        decimals: 18,
        api_path: "optimism",
        has_internal_txs: true,
    },
    ChainSpec {
        id: "base",
        family: ChainFamily::Account,
        display_name: "Base",
        native_symbol: "ETH",
        decimals: 18,
        api_path: "base",
        has_internal_txs: true,
    },
    ChainSpec {
        id: "avalanche",
        family: ChainFamily::Account,
        display_name: "Avalanche",
        native_symbol: "AVAX",
        decimals: 18,
        api_path: "avalanche",
        has_internal_txs: true,
    },
    // Non-EVM account-based
    ChainSpec {
        id: "tron",
        family: ChainFamily::Account,
        display_name: "Tron",
        native_symbol: "TRX",
        decimals: 6,
        api_path: "tron",
        has_internal_txs: false,
    },
];

/// Look up a chain by id (case-insensitive)
pub fn get_chain(id: &str) -> AppResult<&'static ChainSpec> {
    let id_lower = id.to_lowercase();
    SUPPORTED_CHAINS
        .iter()
        .find(|c| c.id == id_lower)
        .ok_or_else(|| AppError::chain_unsupported(id, &supported_ids()))
}

/// All supported chain ids
pub fn supported_ids() -> Vec<&'static str> {
    SUPPORTED_CHAINS.iter().map(|c| c.id).collect()
}

/// Whether the chain id is known
pub fn is_supported(id: &str) -> bool {
    get_chain(id).is_ok()
}
