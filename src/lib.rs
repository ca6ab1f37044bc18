//! TraceGuard Library
//!
//! Know-Your-Transaction (KYT) compliance engine: traces the upstream
//! origins of a blockchain transaction's funds with a bounded BFS,
//! classifies every address it meets against risk tags (mixer, darknet,
//! sanctioned, hack, scam, gambling, exchange), and produces a
//! deterministic 0-100 risk score with human-readable reasons.

pub mod api;
pub mod cache;
pub mod chains;
pub mod config;
pub mod core;
pub mod models;
pub mod providers;

pub use cache::{Cache, MemoryCache, SqliteCache};
pub use chains::{ChainFamily, ChainSpec};
pub use config::Settings;
pub use crate::core::{scorer, Tracer};
pub use models::errors::{AppError, AppResult, ErrorCode};
pub use models::types::{
    AddressMeta, FlaggedEntity, RiskLevel, RiskReport, RiskScore, RiskTag, TxRecord,
};
pub use providers::{
    BlockchainProvider, BlockchairClient, BlockchainComClient, BreakerState, MultiProvider,
    ProviderHealth,
};
