//! Blockchair Provider Client
//!
//! Primary data source: one REST dashboard API covering every chain in the
//! registry. Endpoints:
//! - `{base}/{chain_path}/dashboards/transaction/{tx_id}`
//! - `{base}/{chain_path}/dashboards/address/{address}`
//!
//! Responses are normalized here into `TxRecord` / `AddressMeta` and never
//! escape in raw form. Parsing is tolerant: unknown fields are ignored,
//! missing optional fields default (tags = none, internal = none).

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::Value;
use tracing::debug;

use super::transport::PolicyTransport;
use super::{BlockchainProvider, ProviderHealth};
use crate::chains::{self, ChainFamily, ChainSpec};
use crate::config::ProviderSettings;
use crate::models::errors::{AppError, AppResult, ErrorCode};
use crate::models::types::{AddressMeta, InternalTransfer, RiskTag, TxLeg, TxRecord};

/// Keyword -> tag mapping applied to provider labels and context strings
const TAG_KEYWORDS: [(&str, RiskTag); 16] = [
    ("mixer", RiskTag::Mixer),
    ("mixing", RiskTag::Mixer),
    ("tumbler", RiskTag::Mixer),
    ("darknet", RiskTag::Darknet),
    ("dark market", RiskTag::Darknet),
    ("sanction", RiskTag::Sanctioned),
    ("ofac", RiskTag::Sanctioned),
    ("hack", RiskTag::Hack),
    ("stolen", RiskTag::Hack),
    ("exploit", RiskTag::Hack),
    ("scam", RiskTag::Scam),
    ("phishing", RiskTag::Scam),
    ("fraud", RiskTag::Scam),
    ("gambling", RiskTag::Gambling),
    ("casino", RiskTag::Gambling),
    ("exchange", RiskTag::Exchange),
];

pub struct BlockchairClient {
    base_url: String,
    api_key: Option<String>,
    transport: PolicyTransport,
    latest_block: AtomicU64,
}

impl BlockchairClient {
    pub fn new(settings: &ProviderSettings) -> AppResult<Self> {
        Ok(Self {
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            api_key: settings.api_key.clone(),
            transport: PolicyTransport::new("blockchair", settings)?,
            latest_block: AtomicU64::new(0),
        })
    }

    fn url(&self, path: &str) -> String {
        match &self.api_key {
            Some(key) => format!("{}/{}?key={}", self.base_url, path, key),
            None => format!("{}/{}", self.base_url, path),
        }
    }

    fn record_block_height(&self, height: Option<u64>) {
        if let Some(h) = height {
            self.latest_block.fetch_max(h, Ordering::Relaxed);
        }
    }
}

#[async_trait]
impl BlockchainProvider for BlockchairClient {
    fn name(&self) -> &'static str {
        "blockchair"
    }

    async fn get_transaction(&self, chain: &str, tx_id: &str) -> AppResult<TxRecord> {
        let spec = chains::get_chain(chain)?;
        let path = format!("{}/dashboards/transaction/{}", spec.api_path, tx_id);
        debug!("🔍 blockchair get_transaction {} on {}", tx_id, chain);

        let body = self
            .transport
            .get_json(&self.url(&path))
            .await
            .map_err(|e| match e.code {
                ErrorCode::TxNotFound => AppError::tx_not_found(tx_id, chain),
                _ => e,
            })?;

        let record = parse_transaction(spec, chain, tx_id, &body)?;
        self.record_block_height(record.block_height);
        Ok(record)
    }

    async fn get_address_meta(&self, chain: &str, address: &str) -> AppResult<AddressMeta> {
        let spec = chains::get_chain(chain)?;
        let path = format!("{}/dashboards/address/{}", spec.api_path, address);
        debug!("🔍 blockchair get_address_meta {} on {}", address, chain);

        let body = match self.transport.get_json(&self.url(&path)).await {
            Ok(body) => body,
            // unknown address is not an error: empty metadata
            Err(e) if e.code == ErrorCode::TxNotFound => {
                return Ok(AddressMeta::empty(address, chain));
            }
            Err(e) => return Err(e),
        };

        Ok(parse_address(spec, chain, address, &body))
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

/// Numeric field that may arrive as a JSON number or a decimal string
fn num(value: &Value) -> f64 {
    value
        .as_f64()
        .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
        .unwrap_or(0.0)
}

fn opt_str(value: &Value) -> Option<String> {
    value.as_str().filter(|s| !s.is_empty()).map(str::to_string)
}

/// Blockchair timestamps come as "YYYY-MM-DD HH:MM:SS" (UTC)
fn parse_time(value: &Value) -> Option<DateTime<Utc>> {
    let s = value.as_str()?;
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
        .map(|naive| naive.and_utc())
        .ok()
        .or_else(|| DateTime::parse_from_rfc3339(s).map(|dt| dt.with_timezone(&Utc)).ok())
}

/// Pull the per-item object out of the `data` map, matching the requested
/// id case-insensitively (the provider echoes ids in its own casing)
fn data_entry<'a>(body: &'a Value, id: &str) -> Option<&'a Value> {
    let data = body.get("data")?.as_object()?;
    if data.is_empty() {
        return None;
    }
    let id_lower = id.to_lowercase();
    data.iter()
        .find(|(k, _)| k.to_lowercase() == id_lower)
        .map(|(_, v)| v)
        .or_else(|| data.values().next())
}

pub(crate) fn parse_transaction(
    spec: &ChainSpec,
    chain: &str,
    tx_id: &str,
    body: &Value,
) -> AppResult<TxRecord> {
    let raw = data_entry(body, tx_id)
        .filter(|v| !v.is_null())
        .ok_or_else(|| AppError::tx_not_found(tx_id, chain))?;
    let info = &raw["transaction"];
    if info.is_null() {
        return Err(AppError::tx_not_found(tx_id, chain));
    }

    let block_height = info["block_id"].as_u64();
    let timestamp = parse_time(&info["time"]);

    match spec.family {
        ChainFamily::Utxo => {
            let mut inputs = Vec::new();
            let mut coinbase_value = 0.0;
            for inp in raw["inputs"].as_array().into_iter().flatten() {
                let value = spec.scale(num(&inp["value"]));
                match opt_str(&inp["recipient"]) {
                    Some(address) => inputs.push(TxLeg { address, value }),
                    // coinbase input: no attributable address
                    None => coinbase_value += value,
                }
            }

            let outputs = raw["outputs"]
                .as_array()
                .into_iter()
                .flatten()
                .filter_map(|out| {
                    opt_str(&out["recipient"]).map(|address| TxLeg {
                        address,
                        value: spec.scale(num(&out["value"])),
                    })
                })
                .collect();

            Ok(TxRecord {
                tx_id: tx_id.to_string(),
                chain: chain.to_string(),
                family: ChainFamily::Utxo,
                block_height,
                timestamp,
                from: None,
                to: None,
                value: 0.0,
                internal: Vec::new(),
                inputs,
                outputs,
                coinbase_value,
            })
        }
        ChainFamily::Account => {
            let top_sender = opt_str(&info["sender"]);
            let top_value = num(&info["value"]);
            let internal = if spec.has_internal_txs {
                raw["calls"]
                    .as_array()
                    .into_iter()
                    .flatten()
                    .filter(|call| num(&call["value"]) > 0.0)
                    // the call list echoes the top-level transfer itself;
                    // only nested entries are internal transfers
                    .filter(|call| {
                        !(opt_str(&call["sender"]) == top_sender
                            && num(&call["value"]) == top_value)
                    })
                    .filter_map(|call| {
                        let from = opt_str(&call["sender"])?;
                        let to = opt_str(&call["recipient"])?;
                        Some(InternalTransfer {
                            from,
                            to,
                            value: spec.scale(num(&call["value"])),
                        })
                    })
                    .filter(|itx| itx.from != itx.to)
                    .collect()
            } else {
                Vec::new()
            };

            Ok(TxRecord {
                tx_id: tx_id.to_string(),
                chain: chain.to_string(),
                family: ChainFamily::Account,
                block_height,
                timestamp,
                from: opt_str(&info["sender"]),
                to: opt_str(&info["recipient"]),
                value: spec.scale(num(&info["value"])),
                internal,
                inputs: Vec::new(),
                outputs: Vec::new(),
                coinbase_value: 0.0,
            })
        }
    }
}

pub(crate) fn parse_address(
    spec: &ChainSpec,
    chain: &str,
    address: &str,
    body: &Value,
) -> AddressMeta {
    let raw = match data_entry(body, address).filter(|v| !v.is_null()) {
        Some(raw) => raw,
        None => return AddressMeta::empty(address, chain),
    };
    let info = &raw["address"];

    let tags = extract_tags(raw);
    let label = opt_str(&info["label"])
        .or_else(|| opt_str(&info["name"]))
        .or_else(|| opt_str(&info["entity"]));

    // newest-first transaction ids: UTXO dashboards list hashes directly,
    // account dashboards list call objects
    let mut recent_tx_ids: Vec<String> = raw["transactions"]
        .as_array()
        .into_iter()
        .flatten()
        .filter_map(|v| v.as_str().map(str::to_string))
        .collect();
    if recent_tx_ids.is_empty() {
        recent_tx_ids = raw["calls"]
            .as_array()
            .into_iter()
            .flatten()
            .filter_map(|call| opt_str(&call["transaction_hash"]))
            .collect();
        recent_tx_ids.dedup();
    }

    AddressMeta {
        address: address.to_string(),
        chain: chain.to_string(),
        tags,
        label,
        balance: spec.scale(num(&info["balance"])),
        tx_count: info["transaction_count"].as_u64().unwrap_or(0),
        first_seen: parse_time(&info["first_seen_receiving"]),
        last_seen: parse_time(&info["last_seen_receiving"]),
        recent_tx_ids,
    }
}

/// Scan label-carrying fields for risk keywords
fn extract_tags(raw: &Value) -> Vec<RiskTag> {
    let mut tags = Vec::new();
    let mut scan = |s: &str| {
        let lower = s.to_lowercase();
        for (keyword, tag) in TAG_KEYWORDS {
            if lower.contains(keyword) && !tags.contains(&tag) {
                tags.push(tag);
            }
        }
    };

    let info = &raw["address"];
    for field in ["type", "label", "name", "entity"] {
        if let Some(s) = info[field].as_str() {
            scan(s);
        }
    }
    for field in ["tags", "labels"] {
        for item in raw[field].as_array().into_iter().flatten() {
            if let Some(s) = item.as_str() {
                scan(s);
            }
        }
        for item in info[field].as_array().into_iter().flatten() {
            if let Some(s) = item.as_str() {
                scan(s);
            }
        }
    }

    tags
}
