use log::{debug, warn};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use crate::models::market::{CompanyOverview, Quote, SymbolMatch};
use crate::models::price::PriceCache;
use crate::models::settings::{CacheTtl, MarketDataSettings};
use crate::providers::registry::ProviderRegistry;
use crate::providers::traits::{DataKind, DataRequest, MarketData};

/// Resolves market data through the shared cache and the provider chain.
///
/// Every operation has the same shape:
/// 1. Cache hit → return it, no provider call.
/// 2. Miss → ask each provider serving that data kind, in priority order;
///    the first non-empty answer wins.
/// 3. Store the answer with the kind's TTL and return it.
/// 4. Nobody had anything → `None` (or an empty list for search). Callers
///    treat that as "unknown", never as a failure.
///
/// The cache is injected so several resolvers (or a rebuilt one after a
/// settings change) can share it.
pub struct MarketDataResolver {
    registry: ProviderRegistry,
    cache: Arc<PriceCache>,
    ttl: CacheTtl,
}

impl MarketDataResolver {
    pub fn new(registry: ProviderRegistry, cache: Arc<PriceCache>, ttl: CacheTtl) -> Self {
        Self {
            registry,
            cache,
            ttl,
        }
    }

    /// Build the default provider chain from `settings`, sharing `cache`.
    pub fn from_settings(settings: &MarketDataSettings, cache: Arc<PriceCache>) -> Self {
        Self::new(
            ProviderRegistry::new_with_defaults(settings),
            cache,
            settings.cache_ttl.clone(),
        )
    }

    pub fn cache(&self) -> &Arc<PriceCache> {
        &self.cache
    }

    pub fn ttl(&self) -> &CacheTtl {
        &self.ttl
    }

    /// Names of the configured providers, in priority order.
    pub fn provider_names(&self) -> Vec<String> {
        self.registry.provider_names()
    }

    /// Check if at least one provider can serve `kind`.
    pub fn has_provider_for(&self, kind: DataKind) -> bool {
        !self.registry.clients_for(kind).is_empty()
    }

    /// Current spot price for a ticker.
    pub async fn get_price(&self, ticker: &str) -> Option<Decimal> {
        let ticker = normalize_ticker(ticker)?;
        self.resolve(DataRequest::Price(ticker), self.ttl.price(), |data| match data {
            MarketData::Price(price) => Some(price),
            _ => None,
        })
        .await
    }

    /// Detailed quote (price, change, volume, day range) for a ticker.
    pub async fn get_quote(&self, ticker: &str) -> Option<Quote> {
        let ticker = normalize_ticker(ticker)?;
        self.resolve(DataRequest::Quote(ticker), self.ttl.quote(), |data| match data {
            MarketData::Quote(quote) => Some(quote),
            _ => None,
        })
        .await
    }

    /// Company metadata for a ticker.
    pub async fn get_overview(&self, ticker: &str) -> Option<CompanyOverview> {
        let ticker = normalize_ticker(ticker)?;
        self.resolve(DataRequest::Overview(ticker), self.ttl.overview(), |data| match data {
            MarketData::Overview(overview) => Some(overview),
            _ => None,
        })
        .await
    }

    /// Symbol search. Returns an empty list when nothing matched anywhere.
    pub async fn search(&self, query: &str) -> Vec<SymbolMatch> {
        let query = query.trim();
        if query.is_empty() {
            return Vec::new();
        }
        self.resolve(
            DataRequest::Search(query.to_string()),
            self.ttl.search(),
            |data| match data {
                MarketData::Search(matches) => Some(matches),
                _ => None,
            },
        )
        .await
        .unwrap_or_default()
    }

    /// Drop the cached price and quote of a ticker so the next read goes to
    /// the providers.
    pub fn invalidate(&self, ticker: &str) {
        let Some(ticker) = normalize_ticker(ticker) else {
            return;
        };
        self.cache.remove(&DataRequest::Price(ticker.clone()).cache_key());
        self.cache.remove(&DataRequest::Quote(ticker.clone()).cache_key());
        debug!("Invalidated cached price and quote for {ticker}");
    }

    /// Invalidate, then resolve the price again.
    pub async fn refresh_price(&self, ticker: &str) -> Option<Decimal> {
        self.invalidate(ticker);
        self.get_price(ticker).await
    }

    async fn resolve<T, F>(&self, request: DataRequest, ttl: Duration, extract: F) -> Option<T>
    where
        T: Serialize + DeserializeOwned,
        F: Fn(MarketData) -> Option<T>,
    {
        let key = request.cache_key();
        if let Some(hit) = self.cache.get::<T>(&key) {
            debug!("Cache hit for {key}");
            return Some(hit);
        }
        debug!("Cache miss for {key}");

        for client in self.registry.clients_for(request.kind()) {
            let Some(value) = client.fetch(&request).await.and_then(&extract) else {
                continue;
            };
            if let Err(e) = self.cache.set(&key, &value, ttl) {
                warn!("Could not cache {key}: {e}");
            }
            debug!("Resolved {key} from {}", client.name());
            return Some(value);
        }

        debug!("No provider returned data for {key}");
        None
    }
}

fn normalize_ticker(ticker: &str) -> Option<String> {
    let ticker = ticker.trim();
    (!ticker.is_empty()).then(|| ticker.to_uppercase())
}
