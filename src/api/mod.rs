//! HTTP API surface
//!
//! Thin layer over the engine: analyze, chains, health.

pub mod handlers;
pub mod routes;
pub mod types;

pub use handlers::AppState;
pub use routes::create_router;
