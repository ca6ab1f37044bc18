//! Circuit Breaker
//!
//! Three-state controller guarding each upstream provider:
//!
//! - CLOSED: calls pass; consecutive failures counted; threshold -> OPEN
//! - OPEN: calls fail fast with ProviderDown for the cooldown window,
//!   no network touched; cooldown elapsed -> HALF_OPEN
//! - HALF_OPEN: exactly one probe allowed; success -> CLOSED (counter
//!   reset), failure -> OPEN (cooldown restarted)
//!
//! A definitive not-found is neither a success nor a failure, and a call
//! abandoned by its caller never reaches the completion hooks. Both are
//! neutral for the counter.

use std::sync::Mutex;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::models::errors::{AppError, AppResult};

/// Externally visible breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

struct Inner {
    state: BreakerState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
}

/// Per-client circuit breaker. One shared cell, updated on completion.
pub struct CircuitBreaker {
    name: &'static str,
    failure_threshold: u32,
    cooldown: Duration,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(name: &'static str, failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            name,
            failure_threshold: failure_threshold.max(1),
            cooldown,
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                probe_in_flight: false,
            }),
        }
    }

    /// Gate a logical call. Err(ProviderDown) means the circuit refused it
    /// without touching the network.
    pub fn acquire(&self) -> AppResult<()> {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        match inner.state {
            BreakerState::Closed => Ok(()),
            BreakerState::Open => {
                let elapsed = inner
                    .opened_at
                    .map(|t| t.elapsed())
                    .unwrap_or(self.cooldown);
                if elapsed >= self.cooldown {
                    info!("🔌 circuit {} half-open, allowing one probe", self.name);
                    inner.state = BreakerState::HalfOpen;
                    inner.probe_in_flight = true;
                    Ok(())
                } else {
                    Err(AppError::provider_down(format!(
                        "Circuit open for {} ({}s remaining)",
                        self.name,
                        (self.cooldown - elapsed).as_secs()
                    )))
                }
            }
            BreakerState::HalfOpen => {
                if inner.probe_in_flight {
                    Err(AppError::provider_down(format!(
                        "Circuit half-open for {}, probe in flight",
                        self.name
                    )))
                } else {
                    inner.probe_in_flight = true;
                    Ok(())
                }
            }
        }
    }

    /// Record a completed, successful logical call
    pub fn on_success(&self) {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        match inner.state {
            BreakerState::HalfOpen => {
                info!("🔌 circuit {} closed after successful probe", self.name);
                inner.state = BreakerState::Closed;
                inner.probe_in_flight = false;
                inner.opened_at = None;
                inner.consecutive_failures = 0;
            }
            _ => {
                inner.consecutive_failures = 0;
            }
        }
    }

    /// Record a completed call that is neither a success nor a failure
    /// (a definitive not-found). The failure counter is untouched, but a
    /// half-open probe that got an answer closes the circuit: the
    /// upstream is demonstrably serving requests.
    pub fn on_neutral(&self) {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        if inner.state == BreakerState::HalfOpen {
            info!("🔌 circuit {} closed after answered probe", self.name);
            inner.state = BreakerState::Closed;
            inner.probe_in_flight = false;
            inner.opened_at = None;
        }
    }

    /// Record a completed, failed logical call
    pub fn on_failure(&self) {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        match inner.state {
            BreakerState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.failure_threshold {
                    warn!(
                        "⚡ circuit {} OPEN after {} consecutive failures (cooldown {}s)",
                        self.name,
                        inner.consecutive_failures,
                        self.cooldown.as_secs()
                    );
                    inner.state = BreakerState::Open;
                    inner.opened_at = Some(Instant::now());
                }
            }
            BreakerState::HalfOpen => {
                warn!("⚡ circuit {} re-OPEN after failed probe", self.name);
                inner.state = BreakerState::Open;
                inner.probe_in_flight = false;
                inner.opened_at = Some(Instant::now());
            }
            BreakerState::Open => {
                // late failure from a call started before opening
            }
        }
    }

    pub fn state(&self) -> BreakerState {
        self.inner.lock().expect("breaker lock poisoned").state
    }
}
