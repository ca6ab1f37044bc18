//! Core domain types
//!
//! Normalized, chain-agnostic shapes shared by the provider clients, the
//! tracer and the scorer. Provider responses are parsed into these once at
//! the client boundary; everything downstream is family-aware but
//! schema-agnostic.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::chains::ChainFamily;

// ============================================
// RISK TAGS
// ============================================

/// Categorical risk label attached to an address by the data provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskTag {
    Mixer,
    Darknet,
    Sanctioned,
    Hack,
    Scam,
    Gambling,
    Exchange,
    Unknown,
}

/// All tags ordered by descending weight. Used to pick a node's primary
/// tag deterministically (ties broken by this declaration order).
pub const TAGS_BY_WEIGHT: [RiskTag; 8] = [
    RiskTag::Mixer,
    RiskTag::Darknet,
    RiskTag::Sanctioned,
    RiskTag::Hack,
    RiskTag::Scam,
    RiskTag::Gambling,
    RiskTag::Exchange,
    RiskTag::Unknown,
];

impl RiskTag {
    /// Signed scoring weight
    pub fn weight(&self) -> f64 {
        match self {
            Self::Mixer => 1.0,
            Self::Darknet => 1.0,
            Self::Sanctioned => 1.0,
            Self::Hack => 0.9,
            Self::Scam => 0.8,
            Self::Gambling => 0.4,
            Self::Exchange => -0.2,
            Self::Unknown => 0.0,
        }
    }

    /// Definitive tags end the traversal at the tagged node.
    /// Unknown is informational only and never flagged.
    pub fn is_definitive(&self) -> bool {
        !matches!(self, Self::Unknown)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mixer => "mixer",
            Self::Darknet => "darknet",
            Self::Sanctioned => "sanctioned",
            Self::Hack => "hack",
            Self::Scam => "scam",
            Self::Gambling => "gambling",
            Self::Exchange => "exchange",
            Self::Unknown => "unknown",
        }
    }
}

// ============================================
// TRANSACTION RECORDS
// ============================================

/// One input or output leg of a UTXO transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxLeg {
    pub address: String,
    pub value: f64,
}

/// Nested value transfer inside an account-family transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InternalTransfer {
    pub from: String,
    pub to: String,
    pub value: f64,
}

/// Normalized transaction record for both chain families.
///
/// ACCOUNT chains populate `from`/`to`/`value`/`internal`; UTXO chains
/// populate `inputs`/`outputs`. Values are in native units (already scaled
/// by the chain's decimals).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxRecord {
    pub tx_id: String,
    pub chain: String,
    pub family: ChainFamily,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_height: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,

    // Account-family fields
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    #[serde(default)]
    pub value: f64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub internal: Vec<InternalTransfer>,

    // UTXO-family fields
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inputs: Vec<TxLeg>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outputs: Vec<TxLeg>,
    /// Value entering through inputs with no attributable address
    #[serde(default)]
    pub coinbase_value: f64,
}

impl TxRecord {
    /// Canonical form for address identity comparisons. Account-family
    /// (hex) addresses are case-insensitive; UTXO (base58/bech32)
    /// addresses are compared exactly.
    pub fn normalize_address(family: ChainFamily, address: &str) -> String {
        match family {
            ChainFamily::Account => address.to_lowercase(),
            ChainFamily::Utxo => address.to_string(),
        }
    }

    /// Source addresses with the value each one contributed to this
    /// transaction, merged by identity in first-appearance order.
    ///
    /// ACCOUNT: `{from} ∪ {internal[i].from}`, each with its transfer value.
    /// UTXO: distinct input addresses with their summed input values.
    pub fn source_addresses(&self) -> Vec<(String, f64)> {
        let family = self.family;
        let mut order: Vec<String> = Vec::new();
        let mut merged: std::collections::HashMap<String, f64> = std::collections::HashMap::new();

        let mut push = |addr: &str, value: f64| {
            if addr.is_empty() {
                return;
            }
            let key = Self::normalize_address(family, addr);
            if !merged.contains_key(&key) {
                order.push(key.clone());
            }
            *merged.entry(key).or_insert(0.0) += value;
        };

        match self.family {
            ChainFamily::Account => {
                if let Some(from) = &self.from {
                    push(from, self.value);
                }
                for itx in &self.internal {
                    push(&itx.from, itx.value);
                }
            }
            ChainFamily::Utxo => {
                for inp in &self.inputs {
                    push(&inp.address, inp.value);
                }
            }
        }

        order
            .into_iter()
            .map(|a| {
                let v = merged[&a];
                (a, v)
            })
            .collect()
    }

    /// Whether this transaction pays the given address (used to pick the
    /// latest incoming transaction when walking upstream).
    pub fn pays(&self, address: &str) -> bool {
        let addr = Self::normalize_address(self.family, address);
        match self.family {
            ChainFamily::Account => {
                self.to.as_deref().map(|t| t.to_lowercase()) == Some(addr.clone())
                    || self
                        .internal
                        .iter()
                        .any(|itx| itx.to.to_lowercase() == addr)
            }
            ChainFamily::Utxo => self.outputs.iter().any(|out| out.address == addr),
        }
    }
}

// ============================================
// ADDRESS METADATA
// ============================================

/// Metadata for a blockchain address as reported by the data provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddressMeta {
    pub address: String,
    pub chain: String,
    #[serde(default)]
    pub tags: Vec<RiskTag>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default)]
    pub balance: f64,
    #[serde(default)]
    pub tx_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_seen: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<DateTime<Utc>>,
    /// Most recent transaction ids touching this address, newest first
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub recent_tx_ids: Vec<String>,
}

impl AddressMeta {
    /// Empty metadata for an address the provider knows nothing about
    pub fn empty(address: &str, chain: &str) -> Self {
        Self {
            address: address.to_string(),
            chain: chain.to_string(),
            tags: Vec::new(),
            label: None,
            balance: 0.0,
            tx_count: 0,
            first_seen: None,
            last_seen: None,
            recent_tx_ids: Vec::new(),
        }
    }

    pub fn has_definitive_tag(&self) -> bool {
        self.tags.iter().any(RiskTag::is_definitive)
    }

    /// Highest-weight tag, ties broken by the canonical tag order
    pub fn primary_tag(&self) -> Option<RiskTag> {
        TAGS_BY_WEIGHT
            .iter()
            .find(|&&t| self.tags.contains(&t))
            .copied()
    }
}

// ============================================
// TRACE OUTPUT
// ============================================

/// Per-analysis node produced by the BFS. Never leaves the engine.
#[derive(Debug, Clone)]
pub struct TraceNode {
    pub address: String,
    /// Minimum hop count at which the address was first reached (>= 1)
    pub distance: u32,
    /// Value attributed to this address, summed over all paths
    pub contribution: f64,
    pub tags: Vec<RiskTag>,
    pub label: Option<String>,
    /// Definitive tag or degraded node: not expanded further
    pub terminal: bool,
    /// Metadata fetch failed; node carries no tags and no score weight
    pub meta_unavailable: bool,
}

/// Entity surfaced in the final report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlaggedEntity {
    pub address: String,
    pub tag: RiskTag,
    pub distance: u32,
    pub contribution: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

// ============================================
// RISK SCORE & REPORT
// ============================================

/// Categorical risk level derived from the numeric score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskLevel {
    Safe,
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    /// Band mapping: [0,20) SAFE, [20,40) LOW, [40,60) MEDIUM,
    /// [60,80) HIGH, [80,100] CRITICAL
    pub fn from_score(score: u8) -> Self {
        match score {
            0..=19 => Self::Safe,
            20..=39 => Self::Low,
            40..=59 => Self::Medium,
            60..=79 => Self::High,
            _ => Self::Critical,
        }
    }
}

/// Quantitative score with level and human-readable reasons
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskScore {
    pub score: u8,
    pub level: RiskLevel,
    pub reasons: Vec<String>,
}

/// Complete analysis report. The serialized JSON shape is stable:
/// additive changes only, never rename a field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskReport {
    pub tx_id: String,
    pub chain: String,
    pub depth: u32,
    pub risk_score: RiskScore,
    pub flagged_entities: Vec<FlaggedEntity>,
    pub total_addresses_analyzed: u32,
    pub transactions_traced: u32,
    pub api_calls_used: u32,
    pub circular_paths: u32,
    pub generated_at: DateTime<Utc>,
}
