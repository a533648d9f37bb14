use log::warn;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::errors::CoreError;

/// Provider id under which the Alpha Vantage key is stored in `api_keys`.
pub const ALPHA_VANTAGE_KEY: &str = "alphavantage";

/// Cache lifetimes per data kind, in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheTtl {
    pub price_secs: u64,
    pub quote_secs: u64,
    pub overview_secs: u64,
    pub search_secs: u64,
}

impl CacheTtl {
    pub fn price(&self) -> Duration {
        Duration::from_secs(self.price_secs)
    }

    pub fn quote(&self) -> Duration {
        Duration::from_secs(self.quote_secs)
    }

    pub fn overview(&self) -> Duration {
        Duration::from_secs(self.overview_secs)
    }

    pub fn search(&self) -> Duration {
        Duration::from_secs(self.search_secs)
    }
}

impl Default for CacheTtl {
    fn default() -> Self {
        Self {
            price_secs: 300,
            quote_secs: 300,
            overview_secs: 3600,
            search_secs: 3600,
        }
    }
}

/// Market-data configuration: provider credentials, limits and cache policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketDataSettings {
    /// Optional API keys for providers that require them.
    /// Keys: provider id (e.g., "alphavantage"). Values: the API key string.
    pub api_keys: HashMap<String, String>,

    /// Upper bound for a single provider request.
    pub request_timeout_secs: u64,

    /// Calls per rolling minute allowed against Yahoo Finance.
    pub yahoo_requests_per_minute: usize,

    /// Calls per rolling minute allowed against Alpha Vantage.
    pub alphavantage_requests_per_minute: usize,

    pub cache_ttl: CacheTtl,
}

impl Default for MarketDataSettings {
    fn default() -> Self {
        Self {
            api_keys: HashMap::new(),
            request_timeout_secs: 10,
            yahoo_requests_per_minute: 5,
            alphavantage_requests_per_minute: 5,
            cache_ttl: CacheTtl::default(),
        }
    }
}

impl MarketDataSettings {
    /// Build settings from the process environment (and a `.env` file if present).
    ///
    /// Unset variables keep their defaults; unparsable ones are logged and ignored.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        let mut settings = Self::default();

        if let Ok(key) = std::env::var("ALPHA_VANTAGE_API_KEY") {
            settings.api_keys.insert(ALPHA_VANTAGE_KEY.to_string(), key);
        }

        read_env("MARKET_DATA_TIMEOUT_SECS", &mut settings.request_timeout_secs);
        read_env("YAHOO_REQUESTS_PER_MINUTE", &mut settings.yahoo_requests_per_minute);
        read_env(
            "ALPHA_VANTAGE_REQUESTS_PER_MINUTE",
            &mut settings.alphavantage_requests_per_minute,
        );
        read_env("PRICE_CACHE_TTL_SECS", &mut settings.cache_ttl.price_secs);
        read_env("QUOTE_CACHE_TTL_SECS", &mut settings.cache_ttl.quote_secs);
        read_env("OVERVIEW_CACHE_TTL_SECS", &mut settings.cache_ttl.overview_secs);
        read_env("SEARCH_CACHE_TTL_SECS", &mut settings.cache_ttl.search_secs);

        settings
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// The usable Alpha Vantage key, if any. Empty keys and the public
    /// "demo" key count as not configured.
    pub fn alphavantage_key(&self) -> Option<&str> {
        self.api_keys
            .get(ALPHA_VANTAGE_KEY)
            .map(|k| k.trim())
            .filter(|k| !k.is_empty() && !k.eq_ignore_ascii_case("demo"))
    }
}

/// Overwrite `target` with the parsed value of `name`, if set. Invalid
/// values are logged and leave `target` alone.
fn read_env<T: std::str::FromStr>(name: &str, target: &mut T) {
    match parse_env(name) {
        Ok(Some(value)) => *target = value,
        Ok(None) => {}
        Err(e) => warn!("Ignoring {name}: {e}"),
    }
}

fn parse_env<T: std::str::FromStr>(name: &str) -> Result<Option<T>, CoreError> {
    let Ok(raw) = std::env::var(name) else {
        return Ok(None);
    };
    raw.trim()
        .parse()
        .map(Some)
        .map_err(|_| CoreError::Config(format!("{name}={raw:?} is not a valid value")))
}
