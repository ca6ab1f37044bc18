//! Request Pacing
//!
//! Process-wide spacing of outbound calls plus the exponential backoff
//! math used by the retry loop. The limiter is one shared critical
//! section: callers queue on the lock and leave at least 1/R apart.

use std::time::Duration;

use rand::Rng;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Maximum backoff delay regardless of attempt count
const MAX_BACKOFF_MS: u64 = 64_000;

/// Jitter applied to backoff delays (±20%)
const JITTER_PERCENT: u64 = 20;

/// Spaces consecutive departures at least `1/R` apart.
///
/// The lock is held across the sleep: the limiter is one shared critical
/// section, and callers queue on it in arrival order.
pub struct RateLimiter {
    min_interval: Duration,
    last_departure: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(requests_per_second: f64) -> Self {
        let rps = requests_per_second.max(0.001);
        Self {
            min_interval: Duration::from_secs_f64(1.0 / rps),
            last_departure: Mutex::new(None),
        }
    }

    /// Block until this caller is allowed to issue its request
    pub async fn acquire(&self) {
        let mut last = self.last_departure.lock().await;
        let now = Instant::now();
        let slot = match *last {
            Some(prev) => {
                let next = prev + self.min_interval;
                if next > now {
                    next
                } else {
                    now
                }
            }
            None => now,
        };
        if slot > now {
            tokio::time::sleep_until(slot).await;
        }
        *last = Some(slot);
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }
}

/// Exponential backoff with jitter: `base * 2^attempt`, capped, ±20%
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let exp = (base.as_millis() as u64)
        .saturating_mul(2u64.saturating_pow(attempt))
        .min(MAX_BACKOFF_MS);
    let jitter_range = exp * JITTER_PERCENT / 100;
    let jitter: i64 = if jitter_range > 0 {
        rand::thread_rng().gen_range(-(jitter_range as i64)..=(jitter_range as i64))
    } else {
        0
    };
    Duration::from_millis((exp as i64 + jitter).max(50) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_departures_are_spaced() {
        let limiter = RateLimiter::new(10.0); // 100ms interval
        let start = Instant::now();

        limiter.acquire().await;
        limiter.acquire().await;
        limiter.acquire().await;

        // three departures need at least two full intervals
        assert!(start.elapsed() >= Duration::from_millis(200));
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_limiter_does_not_delay() {
        let limiter = RateLimiter::new(1.0);
        let start = Instant::now();
        limiter.acquire().await;
        assert!(start.elapsed() < Duration::from_millis(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_property() {
        // no more than ceil(T*R) + 1 departures in any window of T
        let limiter = RateLimiter::new(5.0); // 200ms interval
        let start = Instant::now();
        let mut departures = 0u32;
        while start.elapsed() < Duration::from_secs(2) {
            limiter.acquire().await;
            departures += 1;
        }
        assert!(departures <= 2 * 5 + 1, "too many departures: {}", departures);
    }

    #[test]
    fn test_backoff_growth() {
        let base = Duration::from_millis(1000);
        // jitter is ±20%, so check generous bounds
        let d0 = backoff_delay(base, 0);
        assert!(d0 >= Duration::from_millis(800) && d0 <= Duration::from_millis(1200));
        let d2 = backoff_delay(base, 2);
        assert!(d2 >= Duration::from_millis(3200) && d2 <= Duration::from_millis(4800));
    }

    #[test]
    fn test_backoff_is_capped() {
        let d = backoff_delay(Duration::from_millis(1000), 30);
        assert!(d <= Duration::from_millis(MAX_BACKOFF_MS + MAX_BACKOFF_MS / 5));
    }
}
