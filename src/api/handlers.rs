//! API Request Handlers

use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{Json, State},
    http::StatusCode,
};
use tracing::error;

use super::types::*;
use crate::cache::Cache;
use crate::chains;
use crate::config::Settings;
use crate::core::Tracer;
use crate::models::errors::AppError;
use crate::models::types::RiskReport;
use crate::providers::{BlockchainProvider, MultiProvider};

/// Shared application state, built once at startup
pub struct AppState {
    pub tracer: Tracer,
    pub provider: Arc<MultiProvider>,
    pub cache: Arc<dyn Cache>,
    pub settings: Settings,
    pub start_time: Instant,
}

impl AppState {
    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

type HandlerError = (StatusCode, Json<ApiResponse<()>>);

fn into_handler_error(err: &AppError, started: Instant) -> HandlerError {
    let status =
        StatusCode::from_u16(err.code.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (
        status,
        Json(ApiResponse::error(
            ApiErrorBody::from(err),
            started.elapsed().as_secs_f64() * 1000.0,
        )),
    )
}

// ============================================
// Analyze
// ============================================

pub async fn analyze(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AnalyzeRequest>,
) -> Result<Json<ApiResponse<RiskReport>>, HandlerError> {
    let started = Instant::now();
    let depth = req.depth.unwrap_or_else(|| state.tracer.default_depth());

    match state.tracer.analyze(&req.chain, &req.tx_id, depth).await {
        Ok(report) => Ok(Json(ApiResponse::success(
            report,
            started.elapsed().as_secs_f64() * 1000.0,
        ))),
        Err(e) => {
            error!("analysis failed for {} on {}: {}", req.tx_id, req.chain, e);
            Err(into_handler_error(&e, started))
        }
    }
}

// ============================================
// Chains
// ============================================

pub async fn list_chains() -> Json<ApiResponse<Vec<ChainInfo>>> {
    let started = Instant::now();
    let chains: Vec<ChainInfo> = chains::SUPPORTED_CHAINS
        .iter()
        .map(|c| ChainInfo {
            id: c.id,
            family: c.family,
            display_name: c.display_name,
            native_symbol: c.native_symbol,
            decimals: c.decimals,
        })
        .collect();

    Json(ApiResponse::success(
        chains,
        started.elapsed().as_secs_f64() * 1000.0,
    ))
}

// ============================================
// Health
// ============================================

pub async fn health(State(state): State<Arc<AppState>>) -> Json<ApiResponse<HealthData>> {
    let started = Instant::now();

    let provider = state.provider.health().await;
    let cache_ok = state.cache.ping().await;

    let data = HealthData {
        status: if cache_ok { "healthy" } else { "degraded" },
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds: state.uptime_seconds(),
        provider,
        cache: CacheHealth {
            connected: cache_ok,
            backend: state.settings.cache.backend.clone(),
        },
    };

    Json(ApiResponse::success(
        data,
        started.elapsed().as_secs_f64() * 1000.0,
    ))
}
