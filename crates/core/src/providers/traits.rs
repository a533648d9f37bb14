use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::errors::CoreError;
use crate::models::market::{CompanyOverview, Quote, SymbolMatch};

/// The kinds of data the resolver knows how to fetch and cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataKind {
    Price,
    Quote,
    Overview,
    Search,
}

impl std::fmt::Display for DataKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DataKind::Price => write!(f, "price"),
            DataKind::Quote => write!(f, "quote"),
            DataKind::Overview => write!(f, "overview"),
            DataKind::Search => write!(f, "search"),
        }
    }
}

/// One request against a provider. Tickers are expected to be normalized
/// (trimmed, uppercased) by the caller; search queries are passed as typed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataRequest {
    Price(String),
    Quote(String),
    Overview(String),
    Search(String),
}

impl DataRequest {
    pub fn kind(&self) -> DataKind {
        match self {
            DataRequest::Price(_) => DataKind::Price,
            DataRequest::Quote(_) => DataKind::Quote,
            DataRequest::Overview(_) => DataKind::Overview,
            DataRequest::Search(_) => DataKind::Search,
        }
    }

    /// The ticker or query this request is about.
    pub fn subject(&self) -> &str {
        match self {
            DataRequest::Price(s)
            | DataRequest::Quote(s)
            | DataRequest::Overview(s)
            | DataRequest::Search(s) => s,
        }
    }

    /// Namespaced cache key: `price:AAPL`, `quote:AAPL`, `overview:AAPL`,
    /// `search:<lowercased query>`.
    pub fn cache_key(&self) -> String {
        match self {
            DataRequest::Search(query) => format!("search:{}", query.trim().to_lowercase()),
            other => format!("{}:{}", other.kind(), other.subject().trim().to_uppercase()),
        }
    }
}

/// A provider's answer, in canonical shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MarketData {
    Price(Decimal),
    Quote(Quote),
    Overview(CompanyOverview),
    Search(Vec<SymbolMatch>),
}

impl MarketData {
    pub fn kind(&self) -> DataKind {
        match self {
            MarketData::Price(_) => DataKind::Price,
            MarketData::Quote(_) => DataKind::Quote,
            MarketData::Overview(_) => DataKind::Overview,
            MarketData::Search(_) => DataKind::Search,
        }
    }

    /// Empty search results count as "no data" so the next provider gets a turn.
    pub fn is_empty(&self) -> bool {
        matches!(self, MarketData::Search(matches) if matches.is_empty())
    }
}

/// Trait abstraction for all market data providers.
///
/// Each upstream source (Yahoo Finance, Alpha Vantage) implements this trait
/// with a single capability method. Implementations may return errors for
/// network or parse failures; the [`ProviderClient`](super::registry::ProviderClient)
/// wrapping them turns those into "no data" so the fallback chain keeps going.
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    /// Human-readable name of this provider (for logs and record `source` fields).
    fn name(&self) -> &str;

    /// Which data kinds this provider can serve.
    fn supported_kinds(&self) -> Vec<DataKind> {
        vec![DataKind::Price, DataKind::Quote, DataKind::Overview, DataKind::Search]
    }

    /// Fetch one item. `Ok(None)` means the provider has nothing for this
    /// request (unknown ticker, rate-limited, empty response).
    async fn fetch(&self, request: &DataRequest) -> Result<Option<MarketData>, CoreError>;
}
