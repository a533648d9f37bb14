use thiserror::Error;

/// Unified error type for the stock-portfolio-core library.
/// Every fallible public function returns `Result<T, CoreError>`.
///
/// "No data" from a provider or the cache is never an error: resolver
/// operations return `Option`/empty collections for that case.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Serialization ───────────────────────────────────────────────
    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    // ── API / Network (caught at the provider client boundary) ─────
    #[error("API error ({provider}): {message}")]
    Api {
        provider: String,
        message: String,
    },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Rate limit reached for {0}")]
    RateLimited(String),

    #[error("Request to {provider} timed out after {seconds}s")]
    Timeout {
        provider: String,
        seconds: u64,
    },

    // ── Configuration ───────────────────────────────────────────────
    #[error("Configuration error: {0}")]
    Config(String),

    // ── Business Logic ──────────────────────────────────────────────
    #[error("Validation failed: {0}")]
    ValidationError(String),

    #[error("Lot not found: {0}")]
    LotNotFound(String),

    #[error("Cannot sell {requested} shares of {ticker}: only {available} remaining")]
    InsufficientShares {
        ticker: String,
        requested: u64,
        available: u64,
    },
}

impl CoreError {
    /// True for caller precondition violations, as opposed to provider faults.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            CoreError::ValidationError(_)
                | CoreError::LotNotFound(_)
                | CoreError::InsufficientShares { .. }
        )
    }
}

// ── Conversion helpers (From impls) ─────────────────────────────────

impl From<serde_json::Error> for CoreError {
    fn from(e: serde_json::Error) -> Self {
        CoreError::Deserialization(e.to_string())
    }
}

impl From<reqwest::Error> for CoreError {
    fn from(e: reqwest::Error) -> Self {
        // reqwest errors carry the full URL, including the apikey query parameter.
        let msg = e.to_string();
        let sanitized = if let Some(idx) = msg.find('?') {
            format!("{}?<query redacted>", &msg[..idx])
        } else {
            msg
        };
        CoreError::Network(sanitized)
    }
}

impl From<yahoo_finance_api::YahooError> for CoreError {
    fn from(e: yahoo_finance_api::YahooError) -> Self {
        CoreError::Api {
            provider: "Yahoo Finance".into(),
            message: e.to_string(),
        }
    }
}
