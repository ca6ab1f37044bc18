//! TraceGuard - KYT transaction provenance and risk scoring service
//!
//! Composition root: builds the cache, the provider clients, the tracer
//! and the HTTP router exactly once, then serves until Ctrl+C.

use std::sync::Arc;
use std::time::Instant;

use eyre::{eyre, Result};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use traceguard::api::{create_router, AppState};
use traceguard::providers::{BlockchainComClient, BlockchairClient, MultiProvider};
use traceguard::{cache, Settings, Tracer};

#[tokio::main]
async fn main() -> Result<()> {
    FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .compact()
        .init();

    println!(
        r#"
    ╔══════════════════════════════════════════╗
    ║   T R A C E G U A R D                    ║
    ║   KYT Provenance & Risk Engine v{}    ║
    ╚══════════════════════════════════════════╝
    "#,
        env!("CARGO_PKG_VERSION")
    );

    let settings = Settings::from_env();
    info!(
        "cache backend: {}, provider pacing: {} req/s",
        settings.cache.backend, settings.provider.requests_per_second
    );

    // persistent cache backend
    let cache = cache::from_settings(&settings.cache).map_err(|e| eyre!(e.to_string()))?;

    // provider stack: blockchair for everything, blockchain.com for bitcoin
    let blockchair =
        Arc::new(BlockchairClient::new(&settings.provider).map_err(|e| eyre!(e.to_string()))?);
    let blockchain_com = if settings.provider.blockchain_com_enabled {
        Some(Arc::new(
            BlockchainComClient::new(&settings.provider).map_err(|e| eyre!(e.to_string()))?,
        ) as Arc<dyn traceguard::BlockchainProvider>)
    } else {
        None
    };
    let provider = Arc::new(MultiProvider::new(blockchair, blockchain_com));

    let tracer = Tracer::new(provider.clone(), cache.clone(), settings.clone());

    let state = Arc::new(AppState {
        tracer,
        provider,
        cache,
        settings: settings.clone(),
        start_time: Instant::now(),
    });

    let router = create_router(state);
    let listener = tokio::net::TcpListener::bind(&settings.bind_addr).await?;
    info!("🚀 listening on {}", settings.bind_addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("🛑 shutting down gracefully");
        })
        .await?;

    Ok(())
}
