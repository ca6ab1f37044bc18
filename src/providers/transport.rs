//! HTTP Policy Transport
//!
//! The retry loop shared by the HTTP provider clients. One instance per
//! client: each upstream gets its own pacer, breaker and counters — there
//! is no cross-provider state.
//!
//! Policy order per logical call:
//! 1. circuit breaker gate (OPEN fails fast, no network)
//! 2. per-attempt pacing (1/R spacing, including retries)
//! 3. retry on timeout/connect/5xx with exponential backoff + jitter
//! 4. HTTP 429 honours Retry-After (capped) and shares the retry budget
//! 5. HTTP 404 is a definitive negative: returned as TxNotFound, neutral
//!    for the breaker

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, USER_AGENT};
use reqwest::StatusCode;
use tracing::{debug, warn};

use super::breaker::{BreakerState, CircuitBreaker};
use super::pacing::{backoff_delay, RateLimiter};
use crate::config::ProviderSettings;
use crate::models::errors::{AppError, AppResult, ErrorCode};

const USER_AGENT_STR: &str = concat!("TraceGuard/", env!("CARGO_PKG_VERSION"));

/// Outcome classification for one HTTP attempt
enum Attempt {
    Ok(serde_json::Value),
    NotFound,
    /// Retryable; optional server-suggested delay (from Retry-After)
    Transient(AppError, Option<Duration>),
    /// Not retryable, not a breaker failure (our request was malformed)
    Fatal(AppError),
}

/// Pure classification of a response status + Retry-After header.
/// Separated from the I/O so the policy table is directly testable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum StatusClass {
    /// 2xx: parse the body
    Success,
    /// 404: definitive negative, neutral for the breaker
    NotFound,
    /// 429: retryable with an optional server-suggested delay
    RateLimited(Option<Duration>),
    /// 5xx: retryable, counts toward the breaker when retries run out
    ServerError,
    /// remaining 4xx: our request is wrong, retrying will not help
    ClientError,
}

pub(crate) fn classify_status(status: StatusCode, retry_after: Option<&str>) -> StatusClass {
    if status == StatusCode::NOT_FOUND {
        return StatusClass::NotFound;
    }
    if status == StatusCode::TOO_MANY_REQUESTS {
        let hint = retry_after
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs);
        return StatusClass::RateLimited(hint);
    }
    if status.is_server_error() {
        return StatusClass::ServerError;
    }
    if !status.is_success() {
        return StatusClass::ClientError;
    }
    StatusClass::Success
}

/// Shared reliability wrapper around a reqwest client
pub struct PolicyTransport {
    name: &'static str,
    client: reqwest::Client,
    pacer: RateLimiter,
    breaker: CircuitBreaker,
    max_retries: u32,
    retry_delay: Duration,
    retry_after_cap: Duration,
    request_count: AtomicU64,
}

impl PolicyTransport {
    pub fn new(name: &'static str, settings: &ProviderSettings) -> AppResult<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_STR));
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(settings.timeout)
            .gzip(true)
            .build()
            .map_err(|e| AppError::with_source(ErrorCode::InternalError, "HTTP client build failed", e))?;

        Ok(Self {
            name,
            client,
            pacer: RateLimiter::new(settings.requests_per_second),
            breaker: CircuitBreaker::new(name, settings.failure_threshold, settings.cooldown),
            max_retries: settings.max_retries.max(1),
            retry_delay: settings.retry_delay,
            retry_after_cap: settings.retry_after_cap,
            request_count: AtomicU64::new(0),
        })
    }

    /// GET a JSON document under the full policy stack.
    /// A 404 surfaces as `TxNotFound`; the caller owns the final message.
    pub async fn get_json(&self, url: &str) -> AppResult<serde_json::Value> {
        self.breaker.acquire()?;

        let mut pending_delay: Option<Duration> = None;
        let mut last_error: Option<AppError> = None;

        for attempt in 0..self.max_retries {
            if attempt > 0 {
                let delay =
                    pending_delay.take().unwrap_or_else(|| backoff_delay(self.retry_delay, attempt - 1));
                debug!(
                    "⏳ {} retry {}/{} after {}ms",
                    self.name,
                    attempt + 1,
                    self.max_retries,
                    delay.as_millis()
                );
                tokio::time::sleep(delay).await;
            }

            self.pacer.acquire().await;
            self.request_count.fetch_add(1, Ordering::Relaxed);

            match self.execute(url).await {
                Attempt::Ok(value) => {
                    self.breaker.on_success();
                    return Ok(value);
                }
                Attempt::NotFound => {
                    self.breaker.on_neutral();
                    return Err(AppError::new(ErrorCode::TxNotFound, "resource not found"));
                }
                Attempt::Transient(err, retry_after) => {
                    if let Some(hint) = retry_after {
                        pending_delay = Some(hint.min(self.retry_after_cap));
                    }
                    warn!(
                        "⚠️ {} attempt {}/{} failed: {}",
                        self.name,
                        attempt + 1,
                        self.max_retries,
                        err
                    );
                    last_error = Some(err);
                }
                Attempt::Fatal(err) => return Err(err),
            }
        }

        self.breaker.on_failure();
        Err(last_error
            .unwrap_or_else(|| AppError::provider_down(format!("{} exhausted retries", self.name))))
    }

    /// One HTTP attempt, classified
    async fn execute(&self, url: &str) -> Attempt {
        let response = match self.client.get(url).send().await {
            Ok(r) => r,
            Err(e) => return Attempt::Transient(AppError::from(e), None),
        };

        let status = response.status();
        let retry_after = response
            .headers()
            .get("Retry-After")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        match classify_status(status, retry_after.as_deref()) {
            StatusClass::NotFound => Attempt::NotFound,
            StatusClass::RateLimited(hint) => {
                Attempt::Transient(AppError::rate_limited(self.name), hint)
            }
            StatusClass::ServerError => Attempt::Transient(
                AppError::provider_down(format!("{} returned HTTP {}", self.name, status)),
                None,
            ),
            StatusClass::ClientError => Attempt::Fatal(AppError::decode_error(format!(
                "{} rejected request with HTTP {}",
                self.name, status
            ))),
            StatusClass::Success => match response.json::<serde_json::Value>().await {
                Ok(value) => Attempt::Ok(value),
                Err(e) => Attempt::Fatal(AppError::with_source(
                    ErrorCode::DecodeError,
                    "Failed to parse JSON response",
                    e,
                )),
            },
        }
    }

    pub fn request_count(&self) -> u64 {
        self.request_count.load(Ordering::Relaxed)
    }

    pub fn breaker_state(&self) -> BreakerState {
        self.breaker.state()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_statuses() {
        assert_eq!(classify_status(StatusCode::OK, None), StatusClass::Success);
        assert_eq!(
            classify_status(StatusCode::CREATED, None),
            StatusClass::Success
        );
    }

    #[test]
    fn test_not_found_is_definitive() {
        assert_eq!(
            classify_status(StatusCode::NOT_FOUND, None),
            StatusClass::NotFound
        );
        // a Retry-After header on a 404 is meaningless and ignored
        assert_eq!(
            classify_status(StatusCode::NOT_FOUND, Some("5")),
            StatusClass::NotFound
        );
    }

    #[test]
    fn test_rate_limited_parses_retry_after() {
        assert_eq!(
            classify_status(StatusCode::TOO_MANY_REQUESTS, Some("7")),
            StatusClass::RateLimited(Some(Duration::from_secs(7)))
        );
        assert_eq!(
            classify_status(StatusCode::TOO_MANY_REQUESTS, Some(" 2 ")),
            StatusClass::RateLimited(Some(Duration::from_secs(2)))
        );
    }

    #[test]
    fn test_rate_limited_without_usable_hint() {
        assert_eq!(
            classify_status(StatusCode::TOO_MANY_REQUESTS, None),
            StatusClass::RateLimited(None)
        );
        // HTTP-date form and garbage both fall back to exponential backoff
        assert_eq!(
            classify_status(
                StatusCode::TOO_MANY_REQUESTS,
                Some("Wed, 21 Oct 2015 07:28:00 GMT")
            ),
            StatusClass::RateLimited(None)
        );
    }

    #[test]
    fn test_server_errors_are_transient() {
        assert_eq!(
            classify_status(StatusCode::INTERNAL_SERVER_ERROR, None),
            StatusClass::ServerError
        );
        assert_eq!(
            classify_status(StatusCode::BAD_GATEWAY, None),
            StatusClass::ServerError
        );
        assert_eq!(
            classify_status(StatusCode::SERVICE_UNAVAILABLE, None),
            StatusClass::ServerError
        );
    }

    #[test]
    fn test_client_errors_are_fatal() {
        assert_eq!(
            classify_status(StatusCode::BAD_REQUEST, None),
            StatusClass::ClientError
        );
        assert_eq!(
            classify_status(StatusCode::FORBIDDEN, None),
            StatusClass::ClientError
        );
    }
}
