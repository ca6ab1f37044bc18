//! Centralized Error Handling Module
//!
//! Every failure in the engine carries a unique error code so that
//! production logs can be grepped and alerted on without string matching.
//!
//! Error codes follow pattern: CATEGORY_SPECIFIC_ERROR
//! - CHAIN_xxx: chain registry errors
//! - TX_xxx: transaction lookup errors
//! - PROVIDER_xxx: upstream data provider errors
//! - CACHE_xxx: cache backend errors
//! - INPUT_xxx: request validation errors

use std::fmt;

/// Application-wide error type
#[derive(Debug)]
pub struct AppError {
    /// Unique error code for logging/monitoring
    pub code: ErrorCode,
    /// Human-readable message
    pub message: String,
    /// Optional underlying error
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl AppError {
    /// Create a new AppError
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            source: None,
        }
    }

    /// Create AppError with source error
    pub fn with_source(
        code: ErrorCode,
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            code,
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Get error code as string (for logging)
    pub fn code_str(&self) -> &'static str {
        self.code.as_str()
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code.as_str(), self.message)
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

/// Unique error codes for monitoring
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    // ============================================
    // Chain Registry Errors
    // ============================================
    /// Requested chain is not in the registry
    ChainUnsupported,

    // ============================================
    // Transaction Errors
    // ============================================
    /// Transaction does not exist on the chain (definitive negative)
    TxNotFound,
    /// Malformed transaction id, address, or depth out of bounds
    InvalidInput,

    // ============================================
    // Provider Errors
    // ============================================
    /// Circuit open or upstream unreachable after retries
    ProviderDown,
    /// Rate limited by the upstream after exhausting the retry budget
    RateLimited,
    /// Upstream response could not be decoded into the normalized shape
    DecodeError,
    /// Request timed out
    ProviderTimeout,

    // ============================================
    // Cache Errors
    // ============================================
    /// Cache backend operation failed (always recovered, never surfaced)
    CacheError,

    // ============================================
    // Generic Errors
    // ============================================
    /// Anything else
    InternalError,
}

impl ErrorCode {
    /// Get string representation of error code
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ChainUnsupported => "CHAIN_UNSUPPORTED",
            Self::TxNotFound => "TX_NOT_FOUND",
            Self::InvalidInput => "INPUT_INVALID",
            Self::ProviderDown => "PROVIDER_DOWN",
            Self::RateLimited => "PROVIDER_RATE_LIMITED",
            Self::DecodeError => "PROVIDER_DECODE_ERROR",
            Self::ProviderTimeout => "PROVIDER_TIMEOUT",
            Self::CacheError => "CACHE_ERROR",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }

    /// Get HTTP status code for API responses
    pub fn http_status(&self) -> u16 {
        match self {
            Self::ChainUnsupported | Self::InvalidInput => 400,
            Self::TxNotFound => 404,
            Self::RateLimited => 429,
            Self::DecodeError => 502,
            Self::ProviderDown => 503,
            Self::ProviderTimeout => 504,
            Self::CacheError | Self::InternalError => 500,
        }
    }

    /// Check if error is retryable by the caller
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited | Self::ProviderDown | Self::ProviderTimeout
        )
    }
}

// ============================================
// Convenience constructors
// ============================================

impl AppError {
    /// Unsupported chain, with the supported list in the message
    pub fn chain_unsupported(chain: &str, supported: &[&str]) -> Self {
        Self::new(
            ErrorCode::ChainUnsupported,
            format!(
                "Unsupported chain '{}'. Supported: {}",
                chain,
                supported.join(", ")
            ),
        )
    }

    /// Transaction not found (definitive negative)
    pub fn tx_not_found(tx_id: &str, chain: &str) -> Self {
        Self::new(
            ErrorCode::TxNotFound,
            format!("Transaction {} not found on {}", tx_id, chain),
        )
    }

    /// Invalid request input
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidInput, msg)
    }

    /// Provider circuit open or unreachable
    pub fn provider_down(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::ProviderDown, msg)
    }

    /// Rate limited after retries
    pub fn rate_limited(provider: &str) -> Self {
        Self::new(
            ErrorCode::RateLimited,
            format!("Rate limit exceeded for {} after retries", provider),
        )
    }

    /// Upstream payload did not match the expected shape
    pub fn decode_error(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::DecodeError, msg)
    }

    /// Request timeout
    pub fn timeout(provider: &str, secs: u64) -> Self {
        Self::new(
            ErrorCode::ProviderTimeout,
            format!("Request to {} timed out after {}s", provider, secs),
        )
    }

    /// Internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, msg)
    }
}

// ============================================
// Result type alias
// ============================================

/// Application Result type
pub type AppResult<T> = Result<T, AppError>;

// ============================================
// Conversion from common error types
// ============================================

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::new(ErrorCode::ProviderTimeout, "Request timeout")
        } else if err.is_connect() {
            Self::new(ErrorCode::ProviderDown, "Connection failed")
        } else {
            Self::with_source(ErrorCode::ProviderDown, "Request failed", err)
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::with_source(ErrorCode::DecodeError, "JSON parse error", err)
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::with_source(ErrorCode::InternalError, "IO error", err)
    }
}
