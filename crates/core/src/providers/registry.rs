use log::{debug, warn};
use std::time::Duration;

use crate::errors::CoreError;
use crate::models::settings::MarketDataSettings;

use super::alphavantage::AlphaVantageProvider;
use super::rate_limiter::RateLimiter;
use super::traits::{DataKind, DataRequest, MarketData, MarketDataProvider};
use super::yahoo_finance::YahooFinanceProvider;

/// Default upper bound for one provider request.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// A provider plus the call policy wrapped around it: an optional rate
/// limiter and a request timeout.
///
/// This is the boundary where provider faults stop. [`fetch`](Self::fetch)
/// never fails: errors, timeouts and wrong-kind answers are logged and
/// reported as `None`.
pub struct ProviderClient {
    provider: Box<dyn MarketDataProvider>,
    rate_limiter: Option<RateLimiter>,
    timeout: Duration,
}

impl ProviderClient {
    pub fn new(provider: Box<dyn MarketDataProvider>) -> Self {
        Self {
            provider,
            rate_limiter: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Gate every call behind a limit of `calls_per_minute`.
    pub fn with_rate_limit(mut self, calls_per_minute: usize) -> Self {
        self.rate_limiter = Some(RateLimiter::new(self.provider.name(), calls_per_minute));
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn name(&self) -> &str {
        self.provider.name()
    }

    pub fn supports(&self, kind: DataKind) -> bool {
        self.provider.supported_kinds().contains(&kind)
    }

    pub fn rate_limiter(&self) -> Option<&RateLimiter> {
        self.rate_limiter.as_ref()
    }

    /// Fetch one item, converting every failure into "no data".
    pub async fn fetch(&self, request: &DataRequest) -> Option<MarketData> {
        if let Some(limiter) = &self.rate_limiter {
            limiter.acquire().await;
        }

        let name = self.provider.name();
        let outcome = match tokio::time::timeout(self.timeout, self.provider.fetch(request)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(CoreError::Timeout {
                provider: name.to_string(),
                seconds: self.timeout.as_secs(),
            }),
        };

        match outcome {
            Ok(Some(data)) if data.kind() != request.kind() => {
                warn!(
                    "{name} answered a {} request for {} with {} data, ignoring",
                    request.kind(),
                    request.subject(),
                    data.kind()
                );
                None
            }
            Ok(Some(data)) if data.is_empty() => {
                debug!("{name}: empty {} result for {}", request.kind(), request.subject());
                None
            }
            Ok(Some(data)) => Some(data),
            Ok(None) => {
                debug!("{name}: no {} data for {}", request.kind(), request.subject());
                None
            }
            Err(e) => {
                warn!("{name}: {} lookup for {} failed: {e}", request.kind(), request.subject());
                None
            }
        }
    }
}

/// Ordered set of provider clients. Registration order is priority order.
pub struct ProviderRegistry {
    clients: Vec<ProviderClient>,
}

impl ProviderRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            clients: Vec::new(),
        }
    }

    /// Create a registry with the default providers configured from `settings`.
    ///
    /// Yahoo Finance needs no key and goes first. Alpha Vantage is the
    /// fallback and is only registered when a usable key is configured.
    pub fn new_with_defaults(settings: &MarketDataSettings) -> Self {
        let mut registry = Self::new();
        let timeout = settings.request_timeout();

        match YahooFinanceProvider::new() {
            Ok(yahoo) => registry.register(
                ProviderClient::new(Box::new(yahoo))
                    .with_rate_limit(settings.yahoo_requests_per_minute)
                    .with_timeout(timeout),
            ),
            Err(e) => warn!("Yahoo Finance provider unavailable: {e}"),
        }

        match settings.alphavantage_key() {
            Some(key) => registry.register(
                ProviderClient::new(Box::new(AlphaVantageProvider::new(key.to_string(), timeout)))
                    .with_rate_limit(settings.alphavantage_requests_per_minute)
                    .with_timeout(timeout),
            ),
            None => debug!("No Alpha Vantage key configured, fallback provider disabled"),
        }

        registry
    }

    /// Register a client at the lowest priority.
    pub fn register(&mut self, client: ProviderClient) {
        self.clients.push(client);
    }

    /// All clients that serve `kind`, in priority order.
    pub fn clients_for(&self, kind: DataKind) -> Vec<&ProviderClient> {
        self.clients.iter().filter(|c| c.supports(kind)).collect()
    }

    pub fn provider_names(&self) -> Vec<String> {
        self.clients.iter().map(|c| c.name().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}
