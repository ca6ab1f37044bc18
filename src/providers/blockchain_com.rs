//! Blockchain.com Provider Client
//!
//! Bitcoin-only source with full transaction history on the address
//! endpoint, which makes it the preferred provider for Bitcoin traces.
//! Endpoints:
//! - `{base}/rawtx/{tx_id}`
//! - `{base}/rawaddr/{address}?limit=10`
//!
//! The API reports no risk tags; metadata always carries an empty tag set
//! and classification falls through to the Blockchair data when the multi
//! provider merges sources.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::debug;

use super::transport::PolicyTransport;
use super::{BlockchainProvider, ProviderHealth};
use crate::chains::{self, ChainFamily, ChainSpec};
use crate::config::ProviderSettings;
use crate::models::errors::{AppError, AppResult, ErrorCode};
use crate::models::types::{AddressMeta, TxLeg, TxRecord};

/// How many recent transactions to request per address
const ADDRESS_TX_LIMIT: u32 = 10;

pub struct BlockchainComClient {
    base_url: String,
    transport: PolicyTransport,
    latest_block: AtomicU64,
}

impl BlockchainComClient {
    pub fn new(settings: &ProviderSettings) -> AppResult<Self> {
        Ok(Self {
            base_url: settings
                .blockchain_com_base_url
                .trim_end_matches('/')
                .to_string(),
            transport: PolicyTransport::new("blockchain_com", settings)?,
            latest_block: AtomicU64::new(0),
        })
    }

    fn require_bitcoin(chain: &str) -> AppResult<&'static ChainSpec> {
        if chain.eq_ignore_ascii_case("bitcoin") {
            chains::get_chain("bitcoin")
        } else {
            Err(AppError::chain_unsupported(chain, &["bitcoin"]))
        }
    }
}

#[async_trait]
impl BlockchainProvider for BlockchainComClient {
    fn name(&self) -> &'static str {
        "blockchain_com"
    }

    async fn get_transaction(&self, chain: &str, tx_id: &str) -> AppResult<TxRecord> {
        let spec = Self::require_bitcoin(chain)?;
        debug!("🔍 blockchain_com get_transaction {}", tx_id);

        let url = format!("{}/rawtx/{}", self.base_url, tx_id);
        let body = self.transport.get_json(&url).await.map_err(|e| match e.code {
            ErrorCode::TxNotFound => AppError::tx_not_found(tx_id, chain),
            _ => e,
        })?;

        let record = parse_raw_tx(spec, tx_id, &body)?;
        if let Some(h) = record.block_height {
            self.latest_block.fetch_max(h, Ordering::Relaxed);
        }
        Ok(record)
    }

    async fn get_address_meta(&self, chain: &str, address: &str) -> AppResult<AddressMeta> {
        Self::require_bitcoin(chain)?;
        debug!("🔍 blockchain_com get_address_meta {}", address);

        let url = format!(
            "{}/rawaddr/{}?limit={}",
            self.base_url, address, ADDRESS_TX_LIMIT
        );
        let body = match self.transport.get_json(&url).await {
            Ok(body) => body,
            Err(e) if e.code == ErrorCode::TxNotFound => {
                return Ok(AddressMeta::empty(address, chain));
            }
            Err(e) => return Err(e),
        };

        Ok(parse_raw_addr(address, &body))
    }

    async fn health(&self) -> ProviderHealth {
        let block = self.latest_block.load(Ordering::Relaxed);
        ProviderHealth {
            state: self.transport.breaker_state(),
            request_count: self.transport.request_count(),
            latest_block: (block > 0).then_some(block),
        }
    }
}

// ============================================
// NORMALIZATION
// ============================================

fn sat(spec: &ChainSpec, value: &Value) -> f64 {
    spec.scale(value.as_f64().unwrap_or(0.0))
}

pub(crate) fn parse_raw_tx(spec: &ChainSpec, tx_id: &str, body: &Value) -> AppResult<TxRecord> {
    if body.get("hash").and_then(Value::as_str).is_none() {
        return Err(AppError::tx_not_found(tx_id, "bitcoin"));
    }

    let mut inputs = Vec::new();
    let mut coinbase_value = 0.0;
    for inp in body["inputs"].as_array().into_iter().flatten() {
        let prev = &inp["prev_out"];
        let value = sat(spec, &prev["value"]);
        match prev["addr"].as_str().filter(|s| !s.is_empty()) {
            Some(addr) => inputs.push(TxLeg {
                address: addr.to_string(),
                value,
            }),
            None => coinbase_value += value,
        }
    }

    let outputs = body["out"]
        .as_array()
        .into_iter()
        .flatten()
        .filter_map(|out| {
            out["addr"].as_str().filter(|s| !s.is_empty()).map(|addr| TxLeg {
                address: addr.to_string(),
                value: sat(spec, &out["value"]),
            })
        })
        .collect();

    Ok(TxRecord {
        tx_id: tx_id.to_string(),
        chain: "bitcoin".to_string(),
        family: ChainFamily::Utxo,
        block_height: body["block_height"].as_u64(),
        timestamp: body["time"]
            .as_i64()
            .and_then(|t| DateTime::<Utc>::from_timestamp(t, 0)),
        from: None,
        to: None,
        value: 0.0,
        internal: Vec::new(),
        inputs,
        outputs,
        coinbase_value,
    })
}

pub(crate) fn parse_raw_addr(address: &str, body: &Value) -> AddressMeta {
    let spec = chains::get_chain("bitcoin").expect("bitcoin is registered");

    let recent_tx_ids = body["txs"]
        .as_array()
        .into_iter()
        .flatten()
        .filter_map(|tx| tx["hash"].as_str().map(str::to_string))
        .collect();

    AddressMeta {
        address: address.to_string(),
        chain: "bitcoin".to_string(),
        tags: Vec::new(), // blockchain.com reports no classifications
        label: None,
        balance: spec.scale(body["final_balance"].as_f64().unwrap_or(0.0)),
        tx_count: body["n_tx"].as_u64().unwrap_or(0),
        first_seen: None,
        last_seen: None,
        recent_tx_ids,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_raw_tx() {
        let spec = chains::get_chain("bitcoin").unwrap();
        let body = json!({
            "hash": "deadbeef",
            "block_height": 810_000,
            "time": 1_690_000_000,
            "inputs": [
                {"prev_out": {"addr": "1Sender", "value": 30_000_000}},
                {"prev_out": {"value": 625_000_000}}
            ],
            "out": [
                {"addr": "1Dest", "value": 29_000_000}
            ]
        });

        let tx = parse_raw_tx(spec, "deadbeef", &body).unwrap();
        assert_eq!(tx.inputs.len(), 1);
        assert_eq!(tx.inputs[0].address, "1Sender");
        assert!((tx.inputs[0].value - 0.3).abs() < 1e-9);
        assert!((tx.coinbase_value - 6.25).abs() < 1e-9);
        assert_eq!(tx.block_height, Some(810_000));
        assert!(tx.timestamp.is_some());
    }

    #[test]
    fn test_parse_raw_tx_missing_hash() {
        let spec = chains::get_chain("bitcoin").unwrap();
        let err = parse_raw_tx(spec, "nope", &json!({"error": "not found"})).unwrap_err();
        assert_eq!(err.code, ErrorCode::TxNotFound);
    }

    #[test]
    fn test_parse_raw_addr() {
        let body = json!({
            "address": "1Addr",
            "n_tx": 12,
            "final_balance": 150_000_000,
            "txs": [
                {"hash": "t3"},
                {"hash": "t2"},
                {"hash": "t1"}
            ]
        });

        let meta = parse_raw_addr("1Addr", &body);
        assert!(meta.tags.is_empty());
        assert_eq!(meta.tx_count, 12);
        assert!((meta.balance - 1.5).abs() < 1e-9);
        assert_eq!(meta.recent_tx_ids, vec!["t3", "t2", "t1"]);
    }

    #[test]
    fn test_rejects_other_chains() {
        let err = BlockchainComClient::require_bitcoin("ethereum").unwrap_err();
        assert_eq!(err.code, ErrorCode::ChainUnsupported);
    }
}
