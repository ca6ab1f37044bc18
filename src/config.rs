//! Configuration module
//!
//! All knobs are environment variables with production defaults, grouped by
//! component. Secrets (the provider API key) are never logged.

use std::time::Duration;
use tracing::info;

/// Read an env var and parse it, falling back to a default
fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Upstream data provider configuration
#[derive(Debug, Clone)]
pub struct ProviderSettings {
    /// Upstream root, e.g. https://api.blockchair.com
    pub base_url: String,
    /// Optional API key, appended as a query parameter
    pub api_key: Option<String>,
    /// Pacing: no two requests leave within less than 1/R seconds
    pub requests_per_second: f64,
    /// Retry cap for transient failures
    pub max_retries: u32,
    /// Base backoff delay; attempt k waits retry_delay * 2^k
    pub retry_delay: Duration,
    /// Cap applied to upstream Retry-After hints
    pub retry_after_cap: Duration,
    /// Consecutive failures before the circuit opens
    pub failure_threshold: u32,
    /// How long the circuit stays open
    pub cooldown: Duration,
    /// Per-request HTTP timeout
    pub timeout: Duration,
    /// Bitcoin fallback provider root
    pub blockchain_com_base_url: String,
    /// Whether the Bitcoin-specific provider is used at all
    pub blockchain_com_enabled: bool,
}

/// Cache configuration
#[derive(Debug, Clone)]
pub struct CacheSettings {
    /// "memory" or "sqlite"
    pub backend: String,
    pub ttl: Duration,
    /// Max entries for the memory backend
    pub max_entries: usize,
    /// File path for the sqlite backend
    pub sqlite_path: String,
}

/// Tracer budgets
#[derive(Debug, Clone)]
pub struct TraceSettings {
    pub default_depth: u32,
    pub max_depth: u32,
    pub max_addresses_visited: usize,
    pub max_api_calls: u32,
    pub fetch_parallelism: usize,
    /// Wall-clock budget for one analysis
    pub deadline: Duration,
}

/// Scoring constants
#[derive(Debug, Clone)]
pub struct ScoreSettings {
    /// Log-damp constant K in min(1, ln(1+contribution)/K)
    pub contribution_k: f64,
}

/// Full application settings
#[derive(Debug, Clone)]
pub struct Settings {
    pub provider: ProviderSettings,
    pub cache: CacheSettings,
    pub trace: TraceSettings,
    pub score: ScoreSettings,
    pub bind_addr: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            provider: ProviderSettings {
                base_url: "https://api.blockchair.com".to_string(),
                api_key: None,
                requests_per_second: 10.0,
                max_retries: 3,
                retry_delay: Duration::from_millis(1000),
                retry_after_cap: Duration::from_secs(30),
                failure_threshold: 5,
                cooldown: Duration::from_secs(60),
                timeout: Duration::from_secs(30),
                blockchain_com_base_url: "https://blockchain.info".to_string(),
                blockchain_com_enabled: true,
            },
            cache: CacheSettings {
                backend: "memory".to_string(),
                ttl: Duration::from_secs(86400),
                max_entries: 100_000,
                sqlite_path: "./traceguard-cache.db".to_string(),
            },
            trace: TraceSettings {
                default_depth: 3,
                max_depth: 10,
                max_addresses_visited: 500,
                max_api_calls: 200,
                fetch_parallelism: 8,
                deadline: Duration::from_secs(120),
            },
            score: ScoreSettings { contribution_k: 3.0 },
            bind_addr: "0.0.0.0:8080".to_string(),
        }
    }
}

impl Settings {
    /// Load settings from environment variables, with defaults for
    /// everything not set
    pub fn from_env() -> Self {
        let defaults = Settings::default();

        let api_key = std::env::var("PROVIDER_API_KEY")
            .ok()
            .filter(|k| !k.is_empty());
        if api_key.is_some() {
            info!("🔑 PROVIDER_API_KEY configured (key hidden)");
        }

        Self {
            provider: ProviderSettings {
                base_url: std::env::var("PROVIDER_BASE_URL")
                    .unwrap_or(defaults.provider.base_url),
                api_key,
                requests_per_second: env_or(
                    "PROVIDER_REQUESTS_PER_SECOND",
                    defaults.provider.requests_per_second,
                ),
                max_retries: env_or("PROVIDER_MAX_RETRIES", defaults.provider.max_retries),
                retry_delay: Duration::from_millis(env_or("PROVIDER_RETRY_DELAY_MS", 1000u64)),
                retry_after_cap: Duration::from_secs(env_or(
                    "PROVIDER_RETRY_AFTER_CAP_SECS",
                    30u64,
                )),
                failure_threshold: env_or(
                    "PROVIDER_FAILURE_THRESHOLD",
                    defaults.provider.failure_threshold,
                ),
                cooldown: Duration::from_secs(env_or("PROVIDER_COOLDOWN_SECS", 60u64)),
                timeout: Duration::from_secs(env_or("PROVIDER_TIMEOUT_SECS", 30u64)),
                blockchain_com_base_url: std::env::var("BLOCKCHAIN_COM_BASE_URL")
                    .unwrap_or(defaults.provider.blockchain_com_base_url),
                blockchain_com_enabled: env_or("BLOCKCHAIN_COM_ENABLED", true),
            },
            cache: CacheSettings {
                backend: std::env::var("CACHE_BACKEND").unwrap_or(defaults.cache.backend),
                ttl: Duration::from_secs(env_or("CACHE_TTL_SECONDS", 86400u64)),
                max_entries: env_or("CACHE_MAX_ENTRIES", defaults.cache.max_entries),
                sqlite_path: std::env::var("CACHE_SQLITE_PATH")
                    .unwrap_or(defaults.cache.sqlite_path),
            },
            trace: TraceSettings {
                default_depth: env_or("TRACE_DEFAULT_DEPTH", defaults.trace.default_depth),
                max_depth: env_or("TRACE_MAX_DEPTH", defaults.trace.max_depth),
                max_addresses_visited: env_or(
                    "TRACE_MAX_ADDRESSES",
                    defaults.trace.max_addresses_visited,
                ),
                max_api_calls: env_or("TRACE_MAX_API_CALLS", defaults.trace.max_api_calls),
                fetch_parallelism: env_or(
                    "TRACE_FETCH_PARALLELISM",
                    defaults.trace.fetch_parallelism,
                ),
                deadline: Duration::from_secs(env_or("TRACE_DEADLINE_SECS", 120u64)),
            },
            score: ScoreSettings {
                contribution_k: env_or("SCORE_CONTRIBUTION_K", defaults.score.contribution_k),
            },
            bind_addr: std::env::var("BIND_ADDR").unwrap_or(defaults.bind_addr),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let s = Settings::default();
        assert_eq!(s.provider.requests_per_second, 10.0);
        assert_eq!(s.provider.failure_threshold, 5);
        assert_eq!(s.provider.cooldown, Duration::from_secs(60));
        assert_eq!(s.trace.default_depth, 3);
        assert_eq!(s.trace.fetch_parallelism, 8);
        assert_eq!(s.score.contribution_k, 3.0);
        assert_eq!(s.cache.backend, "memory");
    }

    #[test]
    fn test_env_or_falls_back_on_garbage() {
        std::env::set_var("TRACEGUARD_TEST_GARBAGE", "not-a-number");
        assert_eq!(env_or("TRACEGUARD_TEST_GARBAGE", 7u32), 7);
        std::env::remove_var("TRACEGUARD_TEST_GARBAGE");
    }
}
