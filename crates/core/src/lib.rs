pub mod errors;
pub mod models;
pub mod providers;
pub mod services;

use chrono::{DateTime, Utc};
use models::{
    analytics::{PortfolioSummary, TickerDetail},
    lot::{Lot, Sale},
    market::{CompanyOverview, Quote, SymbolMatch},
    portfolio::Portfolio,
    price::PriceCache,
    settings::MarketDataSettings,
};
use rust_decimal::Decimal;
use services::{
    analytics_service::PortfolioAggregator,
    import_service::{ImportJob, ImportPosition, ImportReport},
    market_data_service::MarketDataResolver,
    portfolio_service::PortfolioService,
    refresh_service::{PriceRefreshJob, RefreshReport},
};
use std::sync::Arc;
use uuid::Uuid;

use errors::CoreError;

/// Main entry point for the stock portfolio core library.
/// Holds one portfolio plus the services and market-data resolver that
/// operate on it.
#[must_use]
pub struct PortfolioTracker {
    portfolio: Portfolio,
    settings: MarketDataSettings,
    portfolio_service: PortfolioService,
    aggregator: PortfolioAggregator,
    /// Outlives resolver rebuilds, so changing an API key keeps cached data.
    cache: Arc<PriceCache>,
    resolver: MarketDataResolver,
}

impl std::fmt::Debug for PortfolioTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortfolioTracker")
            .field("portfolio", &self.portfolio.name)
            .field("lots", &self.portfolio.lots.len())
            .field("providers", &self.resolver.provider_names())
            .field("cached_entries", &self.cache.len())
            .finish()
    }
}

impl PortfolioTracker {
    /// Create a tracker around an empty portfolio.
    pub fn create_new(name: impl Into<String>, settings: MarketDataSettings) -> Self {
        Self::with_portfolio(Portfolio::new(name), settings)
    }

    /// Wrap an existing portfolio (e.g. one loaded by the persistence layer).
    pub fn with_portfolio(portfolio: Portfolio, settings: MarketDataSettings) -> Self {
        Self::build(portfolio, settings, Arc::new(PriceCache::new()))
    }

    /// Wrap a portfolio, resolving through a cache shared with other trackers.
    pub fn with_shared_cache(
        portfolio: Portfolio,
        settings: MarketDataSettings,
        cache: Arc<PriceCache>,
    ) -> Self {
        Self::build(portfolio, settings, cache)
    }

    /// Use a custom resolver, e.g. one with a hand-built provider chain.
    pub fn with_resolver(
        portfolio: Portfolio,
        settings: MarketDataSettings,
        resolver: MarketDataResolver,
    ) -> Self {
        Self {
            portfolio,
            settings,
            portfolio_service: PortfolioService::new(),
            aggregator: PortfolioAggregator::new(),
            cache: Arc::clone(resolver.cache()),
            resolver,
        }
    }

    /// Empty default portfolio, configured from the environment.
    pub fn from_env() -> Self {
        Self::with_portfolio(Portfolio::default(), MarketDataSettings::from_env())
    }

    #[must_use]
    pub fn portfolio(&self) -> &Portfolio {
        &self.portfolio
    }

    /// Hand the portfolio back, e.g. for persisting it.
    #[must_use]
    pub fn into_portfolio(self) -> Portfolio {
        self.portfolio
    }

    #[must_use]
    pub fn resolver(&self) -> &MarketDataResolver {
        &self.resolver
    }

    // ── Lots & Sales ────────────────────────────────────────────────

    /// Record a purchase. Returns the new lot's id.
    pub fn add_lot(
        &mut self,
        ticker: &str,
        company_name: &str,
        quantity: u64,
        price: Decimal,
        purchased_at: DateTime<Utc>,
    ) -> Result<Uuid, CoreError> {
        self.portfolio_service.add_lot(
            &mut self.portfolio,
            ticker,
            company_name,
            quantity,
            price,
            purchased_at,
        )
    }

    /// Record a sale against one lot.
    pub fn sell_lot(
        &mut self,
        lot_id: Uuid,
        quantity: u64,
        price: Decimal,
        sold_at: DateTime<Utc>,
    ) -> Result<Sale, CoreError> {
        self.portfolio_service
            .sell_lot(&mut self.portfolio, lot_id, quantity, price, sold_at)
    }

    /// Sell shares of a ticker oldest lot first. All or nothing.
    pub fn sell_ticker(
        &mut self,
        ticker: &str,
        quantity: u64,
        price: Decimal,
        sold_at: DateTime<Utc>,
    ) -> Result<Vec<Sale>, CoreError> {
        self.portfolio_service
            .sell_ticker(&mut self.portfolio, ticker, quantity, price, sold_at)
    }

    #[must_use]
    pub fn get_lot(&self, lot_id: Uuid) -> Option<&Lot> {
        self.portfolio.lot(lot_id)
    }

    #[must_use]
    pub fn lots_for_ticker(&self, ticker: &str) -> Vec<&Lot> {
        self.portfolio_service.lots_for_ticker(&self.portfolio, ticker)
    }

    #[must_use]
    pub fn tickers(&self) -> Vec<String> {
        self.portfolio_service.tickers(&self.portfolio)
    }

    #[must_use]
    pub fn available_quantity(&self, ticker: &str) -> u64 {
        self.portfolio_service
            .available_quantity(&self.portfolio, ticker)
    }

    // ── Analytics ───────────────────────────────────────────────────

    /// Active and fully-sold tickers plus portfolio totals, at current prices.
    pub async fn summary(&self) -> PortfolioSummary {
        self.aggregator.summarize(&self.portfolio, &self.resolver).await
    }

    pub async fn ticker_detail(&self, ticker: &str) -> Option<TickerDetail> {
        self.aggregator
            .ticker_detail(&self.portfolio, ticker, &self.resolver)
            .await
    }

    // ── Jobs ────────────────────────────────────────────────────────

    /// Update the price snapshot of every lot. `force` bypasses cached prices.
    pub async fn refresh_prices(&mut self, force: bool) -> RefreshReport {
        let job = if force {
            PriceRefreshJob::forced()
        } else {
            PriceRefreshJob::new()
        };
        job.run(std::slice::from_mut(&mut self.portfolio), &self.resolver)
            .await
    }

    /// Import positions, dated now.
    pub async fn import_positions(
        &mut self,
        positions: Vec<ImportPosition>,
    ) -> Result<ImportReport, CoreError> {
        ImportJob::new(positions)
            .run(&mut self.portfolio, &self.resolver, Utc::now())
            .await
    }

    // ── Market Data ─────────────────────────────────────────────────

    pub async fn get_price(&self, ticker: &str) -> Option<Decimal> {
        self.resolver.get_price(ticker).await
    }

    pub async fn get_quote(&self, ticker: &str) -> Option<Quote> {
        self.resolver.get_quote(ticker).await
    }

    pub async fn get_overview(&self, ticker: &str) -> Option<CompanyOverview> {
        self.resolver.get_overview(ticker).await
    }

    pub async fn search(&self, query: &str) -> Vec<SymbolMatch> {
        self.resolver.search(query).await
    }

    #[must_use]
    pub fn provider_names(&self) -> Vec<String> {
        self.resolver.provider_names()
    }

    // ── Cache Management ────────────────────────────────────────────

    #[must_use]
    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    /// Remove expired entries. Returns how many were dropped.
    pub fn cache_purge_expired(&self) -> usize {
        self.cache.purge_expired()
    }

    pub fn cache_clear(&self) {
        self.cache.clear();
    }

    // ── Settings ────────────────────────────────────────────────────

    #[must_use]
    pub fn settings(&self) -> &MarketDataSettings {
        &self.settings
    }

    /// Set an API key for a provider (e.g. `"alphavantage"`).
    /// Rebuilds the provider chain so the key takes effect immediately.
    pub fn set_api_key(&mut self, provider: String, key: String) {
        self.settings.api_keys.insert(provider, key);
        self.rebuild_resolver();
    }

    /// Remove an API key for a provider.
    /// Rebuilds the provider chain so the removal takes effect immediately.
    pub fn remove_api_key(&mut self, provider: &str) -> bool {
        let removed = self.settings.api_keys.remove(provider).is_some();
        if removed {
            self.rebuild_resolver();
        }
        removed
    }

    // ── Internal ────────────────────────────────────────────────────

    fn rebuild_resolver(&mut self) {
        self.resolver = MarketDataResolver::from_settings(&self.settings, Arc::clone(&self.cache));
    }

    fn build(portfolio: Portfolio, settings: MarketDataSettings, cache: Arc<PriceCache>) -> Self {
        let resolver = MarketDataResolver::from_settings(&settings, Arc::clone(&cache));
        Self {
            portfolio,
            settings,
            portfolio_service: PortfolioService::new(),
            aggregator: PortfolioAggregator::new(),
            cache,
            resolver,
        }
    }
}
