//! PolicyTransport end-to-end: the retry/backoff/breaker stack driven
//! against a scripted local HTTP listener. Each test binds an ephemeral
//! port, queues a fixed sequence of raw responses, and asserts on wall
//! clock, connection counts and breaker state — no mocking crates needed.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use traceguard::config::ProviderSettings;
use traceguard::models::errors::ErrorCode;
use traceguard::providers::transport::PolicyTransport;
use traceguard::providers::BreakerState;

const OK_JSON: &str = "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: 11\r\nConnection: close\r\n\r\n{\"ok\":true}";
const NOT_FOUND: &str =
    "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n";
const SERVER_ERROR: &str =
    "HTTP/1.1 500 Internal Server Error\r\nContent-Length: 0\r\nConnection: close\r\n\r\n";

fn rate_limited(retry_after_secs: u64) -> String {
    format!(
        "HTTP/1.1 429 Too Many Requests\r\nRetry-After: {}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        retry_after_secs
    )
}

/// Serve the scripted responses one connection at a time, counting hits.
/// The listener stops after the script runs out; a request that never
/// reaches the wire (open circuit) leaves the count untouched.
async fn spawn_scripted_server(responses: Vec<String>) -> (String, Arc<AtomicU32>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base_url = format!("http://{}", listener.local_addr().unwrap());
    let hits = Arc::new(AtomicU32::new(0));

    let hits_srv = hits.clone();
    tokio::spawn(async move {
        for response in responses {
            let Ok((mut sock, _)) = listener.accept().await else {
                break;
            };
            hits_srv.fetch_add(1, Ordering::SeqCst);

            // drain the request head before answering
            let mut buf = vec![0u8; 8192];
            loop {
                match sock.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        if buf[..n].windows(4).any(|w| w == b"\r\n\r\n") {
                            break;
                        }
                    }
                }
            }

            let _ = sock.write_all(response.as_bytes()).await;
            let _ = sock.shutdown().await;
        }
    });

    (base_url, hits)
}

fn settings(max_retries: u32, retry_delay: Duration) -> ProviderSettings {
    ProviderSettings {
        base_url: String::new(),
        api_key: None,
        requests_per_second: 1000.0, // pacing out of the way
        max_retries,
        retry_delay,
        retry_after_cap: Duration::from_secs(30),
        failure_threshold: 5,
        cooldown: Duration::from_secs(60),
        timeout: Duration::from_secs(5),
        blockchain_com_base_url: String::new(),
        blockchain_com_enabled: false,
    }
}

/// S6: a 429 burst with Retry-After is waited out and the call still
/// succeeds; the hint is honoured instead of the (much larger) backoff
#[tokio::test]
async fn rate_limit_burst_recovers_after_hinted_waits() {
    let (url, hits) =
        spawn_scripted_server(vec![rate_limited(1), rate_limited(1), OK_JSON.to_string()]).await;

    // retry_delay is deliberately huge: finishing fast proves the
    // Retry-After hint drove the waits, not exponential backoff
    let transport =
        PolicyTransport::new("scripted", &settings(5, Duration::from_secs(60))).unwrap();

    let started = Instant::now();
    let value = transport.get_json(&url).await.unwrap();
    let elapsed = started.elapsed();

    assert_eq!(value["ok"], true);
    assert!(elapsed >= Duration::from_secs(2), "two 1s hints must be waited out");
    assert!(elapsed < Duration::from_secs(20), "hint must override backoff");
    assert_eq!(hits.load(Ordering::SeqCst), 3);
    assert_eq!(transport.request_count(), 3);
    assert_eq!(transport.breaker_state(), BreakerState::Closed);
}

/// An absurd Retry-After hint is capped before the next attempt
#[tokio::test]
async fn retry_after_hint_is_capped() {
    let (url, hits) =
        spawn_scripted_server(vec![rate_limited(9999), OK_JSON.to_string()]).await;

    let mut cfg = settings(3, Duration::from_secs(60));
    cfg.retry_after_cap = Duration::from_millis(300);
    let transport = PolicyTransport::new("scripted", &cfg).unwrap();

    let started = Instant::now();
    transport.get_json(&url).await.unwrap();

    assert!(started.elapsed() < Duration::from_secs(5), "9999s hint must be capped");
    assert_eq!(hits.load(Ordering::SeqCst), 2);
}

/// 429 retries share the ordinary retry budget: once it runs out the
/// caller sees RateLimited, not an endless wait
#[tokio::test]
async fn rate_limit_exhausts_shared_retry_budget() {
    let (url, hits) = spawn_scripted_server(vec![rate_limited(1), rate_limited(1)]).await;

    let transport =
        PolicyTransport::new("scripted", &settings(2, Duration::from_millis(10))).unwrap();

    let err = transport.get_json(&url).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::RateLimited);
    assert_eq!(hits.load(Ordering::SeqCst), 2);
}

/// 404 is a definitive negative: one attempt, no retries, breaker
/// untouched
#[tokio::test]
async fn not_found_is_single_attempt_and_neutral() {
    let (url, hits) = spawn_scripted_server(vec![NOT_FOUND.to_string()]).await;

    let transport =
        PolicyTransport::new("scripted", &settings(3, Duration::from_millis(10))).unwrap();

    let err = transport.get_json(&url).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::TxNotFound);
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert_eq!(transport.breaker_state(), BreakerState::Closed);
}

/// A transient 5xx is retried and the call recovers
#[tokio::test]
async fn server_error_is_retried_then_succeeds() {
    let (url, hits) =
        spawn_scripted_server(vec![SERVER_ERROR.to_string(), OK_JSON.to_string()]).await;

    let transport =
        PolicyTransport::new("scripted", &settings(3, Duration::from_millis(10))).unwrap();

    let value = transport.get_json(&url).await.unwrap();
    assert_eq!(value["ok"], true);
    assert_eq!(hits.load(Ordering::SeqCst), 2);
    assert_eq!(transport.breaker_state(), BreakerState::Closed);
}

/// S7 at the HTTP level: exhausted calls count as breaker failures; once
/// the threshold is reached the next call fails fast with no network I/O
#[tokio::test]
async fn breaker_opens_after_exhausted_calls() {
    let (url, hits) =
        spawn_scripted_server(vec![SERVER_ERROR.to_string(), SERVER_ERROR.to_string()]).await;

    let mut cfg = settings(1, Duration::from_millis(10));
    cfg.failure_threshold = 2;
    let transport = PolicyTransport::new("scripted", &cfg).unwrap();

    assert_eq!(
        transport.get_json(&url).await.unwrap_err().code,
        ErrorCode::ProviderDown
    );
    assert_eq!(
        transport.get_json(&url).await.unwrap_err().code,
        ErrorCode::ProviderDown
    );
    assert_eq!(transport.breaker_state(), BreakerState::Open);

    // third call is refused by the open circuit: no connection made
    let started = Instant::now();
    let err = transport.get_json(&url).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::ProviderDown);
    assert!(started.elapsed() < Duration::from_millis(50));
    assert_eq!(hits.load(Ordering::SeqCst), 2, "open circuit must not touch the network");
    assert_eq!(transport.request_count(), 2);
}
