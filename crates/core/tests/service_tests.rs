// ═══════════════════════════════════════════════════════════════════
// Service Tests: MarketDataResolver, LotAccountant, PortfolioService,
// PortfolioAggregator, PriceRefreshJob, ImportJob
// ═══════════════════════════════════════════════════════════════════

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use stock_portfolio_core::errors::CoreError;
use stock_portfolio_core::models::analytics::PriceSource;
use stock_portfolio_core::models::lot::{Lot, Sale};
use stock_portfolio_core::models::market::{CompanyOverview, Quote, SymbolMatch};
use stock_portfolio_core::models::portfolio::Portfolio;
use stock_portfolio_core::models::price::PriceCache;
use stock_portfolio_core::models::settings::CacheTtl;
use stock_portfolio_core::providers::registry::{ProviderClient, ProviderRegistry};
use stock_portfolio_core::providers::traits::{DataKind, DataRequest, MarketData, MarketDataProvider};
use stock_portfolio_core::services::accounting_service::{percent_return, LotAccountant};
use stock_portfolio_core::services::analytics_service::PortfolioAggregator;
use stock_portfolio_core::services::import_service::{ImportJob, ImportPosition};
use stock_portfolio_core::services::market_data_service::MarketDataResolver;
use stock_portfolio_core::services::portfolio_service::PortfolioService;
use stock_portfolio_core::services::refresh_service::PriceRefreshJob;

// ═══════════════════════════════════════════════════════════════════
// Test Helpers: Scripted Provider
// ═══════════════════════════════════════════════════════════════════

/// A provider answering from fixed tables, counting every call.
struct ScriptedProvider {
    name: String,
    prices: HashMap<String, Decimal>,
    names: HashMap<String, String>,
    fail: bool,
    calls: Arc<AtomicUsize>,
}

impl ScriptedProvider {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            prices: HashMap::new(),
            names: HashMap::new(),
            fail: false,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn price(mut self, ticker: &str, price: Decimal) -> Self {
        self.prices.insert(ticker.to_string(), price);
        self
    }

    fn company(mut self, ticker: &str, name: &str) -> Self {
        self.names.insert(ticker.to_string(), name.to_string());
        self
    }

    fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    fn counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }

    fn quote(&self, ticker: &str) -> Option<Quote> {
        let price = *self.prices.get(ticker)?;
        let previous_close = price - Decimal::ONE;
        Some(Quote {
            symbol: ticker.to_string(),
            price,
            change: Decimal::ONE,
            change_percent: Quote::format_change_percent(Decimal::ONE, previous_close),
            volume: 1_000,
            previous_close,
            open: previous_close,
            high: price,
            low: previous_close,
            latest_trading_day: None,
            source: self.name.clone(),
        })
    }
}

#[async_trait]
impl MarketDataProvider for ScriptedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self, request: &DataRequest) -> Result<Option<MarketData>, CoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(CoreError::Api {
                provider: self.name.clone(),
                message: "HTTP 503".into(),
            });
        }
        let data = match request {
            DataRequest::Price(t) => self.prices.get(t).copied().map(MarketData::Price),
            DataRequest::Quote(t) => self.quote(t).map(MarketData::Quote),
            DataRequest::Overview(t) => self.names.get(t).map(|name| {
                MarketData::Overview(CompanyOverview {
                    symbol: t.clone(),
                    name: name.clone(),
                    source: self.name.clone(),
                    ..Default::default()
                })
            }),
            DataRequest::Search(q) => {
                let q = q.to_lowercase();
                let matches: Vec<SymbolMatch> = self
                    .names
                    .iter()
                    .filter(|(t, n)| t.to_lowercase().contains(&q) || n.to_lowercase().contains(&q))
                    .map(|(t, n)| SymbolMatch {
                        symbol: t.clone(),
                        name: n.clone(),
                        ..Default::default()
                    })
                    .collect();
                Some(MarketData::Search(matches))
            }
        };
        Ok(data)
    }
}

fn resolver_with(providers: Vec<ScriptedProvider>) -> MarketDataResolver {
    let mut registry = ProviderRegistry::new();
    for provider in providers {
        registry.register(ProviderClient::new(Box::new(provider)));
    }
    MarketDataResolver::new(registry, Arc::new(PriceCache::new()), CacheTtl::default())
}

fn day(d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, d, 15, 30, 0).unwrap()
}

fn lot(ticker: &str, quantity: u64, price: Decimal, purchased: u32) -> Lot {
    Lot::new(ticker, "", quantity, price, day(purchased))
}

fn sell(lot: &mut Lot, quantity: u64, price: Decimal, sold: u32) {
    lot.sales.push(Sale::new(lot.id, quantity, price, day(sold)));
}

fn calls(counter: &Arc<AtomicUsize>) -> usize {
    counter.load(Ordering::SeqCst)
}

// ═══════════════════════════════════════════════════════════════════
// MarketDataResolver Tests
// ═══════════════════════════════════════════════════════════════════

mod resolver {
    use super::*;

    #[tokio::test]
    async fn second_read_is_served_from_cache() {
        let yahoo = ScriptedProvider::new("Yahoo").price("AAPL", dec!(189.84));
        let counter = yahoo.counter();
        let resolver = resolver_with(vec![yahoo]);

        assert_eq!(resolver.get_price("AAPL").await, Some(dec!(189.84)));
        assert_eq!(resolver.get_price("AAPL").await, Some(dec!(189.84)));
        assert_eq!(calls(&counter), 1);
    }

    #[tokio::test]
    async fn ticker_is_normalized_before_keying() {
        let yahoo = ScriptedProvider::new("Yahoo").price("AAPL", dec!(100));
        let counter = yahoo.counter();
        let resolver = resolver_with(vec![yahoo]);

        assert_eq!(resolver.get_price(" aapl ").await, Some(dec!(100)));
        assert_eq!(resolver.get_price("AAPL").await, Some(dec!(100)));
        assert!(resolver.cache().contains("price:AAPL"));
        assert_eq!(calls(&counter), 1);
    }

    #[tokio::test]
    async fn falls_back_when_primary_has_nothing() {
        let primary = ScriptedProvider::new("Primary");
        let secondary = ScriptedProvider::new("Secondary").price("IBM", dec!(150.25));
        let (p, s) = (primary.counter(), secondary.counter());
        let resolver = resolver_with(vec![primary, secondary]);

        assert_eq!(resolver.get_price("IBM").await, Some(dec!(150.25)));
        assert_eq!((calls(&p), calls(&s)), (1, 1));

        // Cached now: neither provider is asked again.
        assert_eq!(resolver.get_price("IBM").await, Some(dec!(150.25)));
        assert_eq!((calls(&p), calls(&s)), (1, 1));
    }

    #[tokio::test]
    async fn falls_back_when_primary_fails() {
        let primary = ScriptedProvider::new("Primary").failing();
        let secondary = ScriptedProvider::new("Secondary").price("IBM", dec!(150.25));
        let resolver = resolver_with(vec![primary, secondary]);

        assert_eq!(resolver.get_price("IBM").await, Some(dec!(150.25)));
    }

    #[tokio::test]
    async fn first_provider_wins() {
        let primary = ScriptedProvider::new("Primary").price("IBM", dec!(1));
        let secondary = ScriptedProvider::new("Secondary").price("IBM", dec!(2));
        let s = secondary.counter();
        let resolver = resolver_with(vec![primary, secondary]);

        assert_eq!(resolver.get_price("IBM").await, Some(dec!(1)));
        assert_eq!(calls(&s), 0);
    }

    #[tokio::test]
    async fn all_empty_is_none_and_not_cached() {
        let primary = ScriptedProvider::new("Primary");
        let secondary = ScriptedProvider::new("Secondary").failing();
        let p = primary.counter();
        let resolver = resolver_with(vec![primary, secondary]);

        assert_eq!(resolver.get_price("NOPE").await, None);
        assert!(resolver.cache().is_empty());

        // No negative caching: the next read asks again.
        assert_eq!(resolver.get_price("NOPE").await, None);
        assert_eq!(calls(&p), 2);
    }

    #[tokio::test]
    async fn no_providers_is_none() {
        let resolver = resolver_with(vec![]);
        assert_eq!(resolver.get_quote("AAPL").await, None);
        assert!(resolver.search("apple").await.is_empty());
        assert!(!resolver.has_provider_for(DataKind::Price));
    }

    #[tokio::test]
    async fn invalidate_forces_exactly_one_more_call() {
        let yahoo = ScriptedProvider::new("Yahoo").price("AAPL", dec!(10));
        let counter = yahoo.counter();
        let resolver = resolver_with(vec![yahoo]);

        resolver.get_price("AAPL").await;
        resolver.invalidate("aapl");
        resolver.get_price("AAPL").await;
        resolver.get_price("AAPL").await;

        assert_eq!(calls(&counter), 2);
    }

    #[tokio::test]
    async fn invalidate_drops_price_and_quote_only() {
        let yahoo = ScriptedProvider::new("Yahoo")
            .price("AAPL", dec!(10))
            .company("AAPL", "Apple Inc.");
        let resolver = resolver_with(vec![yahoo]);

        resolver.get_price("AAPL").await;
        resolver.get_quote("AAPL").await;
        resolver.get_overview("AAPL").await;
        assert_eq!(resolver.cache().len(), 3);

        resolver.invalidate("AAPL");

        assert!(!resolver.cache().contains("price:AAPL"));
        assert!(!resolver.cache().contains("quote:AAPL"));
        assert!(resolver.cache().contains("overview:AAPL"));
    }

    #[tokio::test]
    async fn refresh_price_goes_back_to_provider() {
        let yahoo = ScriptedProvider::new("Yahoo").price("AAPL", dec!(10));
        let counter = yahoo.counter();
        let resolver = resolver_with(vec![yahoo]);

        resolver.get_price("AAPL").await;
        assert_eq!(resolver.refresh_price("AAPL").await, Some(dec!(10)));
        assert_eq!(calls(&counter), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_price_is_fetched_again() {
        let yahoo = ScriptedProvider::new("Yahoo").price("AAPL", dec!(10));
        let counter = yahoo.counter();
        let resolver = resolver_with(vec![yahoo]);

        resolver.get_price("AAPL").await;
        tokio::time::advance(Duration::from_secs(299)).await;
        resolver.get_price("AAPL").await;
        assert_eq!(calls(&counter), 1);

        tokio::time::advance(Duration::from_secs(2)).await;
        resolver.get_price("AAPL").await;
        assert_eq!(calls(&counter), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn overview_outlives_price() {
        let yahoo = ScriptedProvider::new("Yahoo").company("AAPL", "Apple Inc.");
        let counter = yahoo.counter();
        let resolver = resolver_with(vec![yahoo]);

        let overview = resolver.get_overview("AAPL").await.expect("overview");
        assert_eq!(overview.name, "Apple Inc.");

        tokio::time::advance(Duration::from_secs(600)).await;
        resolver.get_overview("AAPL").await;
        assert_eq!(calls(&counter), 1);

        tokio::time::advance(Duration::from_secs(3600)).await;
        resolver.get_overview("AAPL").await;
        assert_eq!(calls(&counter), 2);
    }

    #[tokio::test]
    async fn quote_carries_change_percent() {
        let resolver = resolver_with(vec![ScriptedProvider::new("Yahoo").price("IBM", dec!(101))]);
        let quote = resolver.get_quote("IBM").await.expect("quote");
        assert_eq!(quote.change_percent, "1.00%");
        assert_eq!(quote.source, "Yahoo");
    }

    #[tokio::test]
    async fn search_is_cached_by_lowercased_query() {
        let yahoo = ScriptedProvider::new("Yahoo").company("AAPL", "Apple Inc.");
        let counter = yahoo.counter();
        let resolver = resolver_with(vec![yahoo]);

        let first = resolver.search("Apple").await;
        let second = resolver.search("  apple ").await;

        assert_eq!(first.len(), 1);
        assert_eq!(first, second);
        assert_eq!(calls(&counter), 1);
    }

    #[tokio::test]
    async fn blank_search_skips_providers() {
        let yahoo = ScriptedProvider::new("Yahoo").company("AAPL", "Apple Inc.");
        let counter = yahoo.counter();
        let resolver = resolver_with(vec![yahoo]);

        assert!(resolver.search("   ").await.is_empty());
        assert_eq!(calls(&counter), 0);
    }

    #[tokio::test]
    async fn empty_search_falls_through_to_next_provider() {
        let primary = ScriptedProvider::new("Primary");
        let secondary = ScriptedProvider::new("Secondary").company("IBM", "IBM Corp");
        let resolver = resolver_with(vec![primary, secondary]);

        let matches = resolver.search("ibm").await;
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].symbol, "IBM");
    }

    #[tokio::test]
    async fn shared_cache_is_visible_to_other_resolvers() {
        let cache = Arc::new(PriceCache::new());
        let mut registry = ProviderRegistry::new();
        registry.register(ProviderClient::new(Box::new(
            ScriptedProvider::new("Yahoo").price("AAPL", dec!(5)),
        )));
        let warm = MarketDataResolver::new(registry, Arc::clone(&cache), CacheTtl::default());
        warm.get_price("AAPL").await;

        let cold = MarketDataResolver::new(ProviderRegistry::new(), cache, CacheTtl::default());
        assert_eq!(cold.get_price("AAPL").await, Some(dec!(5)));
    }
}

// ═══════════════════════════════════════════════════════════════════
// LotAccountant Tests
// ═══════════════════════════════════════════════════════════════════

mod lot_accountant {
    use super::*;

    #[test]
    fn weighted_average_of_remaining_shares() {
        let lots = vec![lot("AAPL", 10, dec!(10.00), 1), lot("AAPL", 10, dec!(20.00), 2)];
        assert_eq!(LotAccountant::new().average_price(&lots), dec!(15.00));
    }

    #[test]
    fn average_ignores_sold_shares() {
        let mut first = lot("AAPL", 10, dec!(10), 1);
        sell(&mut first, 10, dec!(12), 3);
        let lots = vec![first, lot("AAPL", 4, dec!(30), 2)];
        assert_eq!(LotAccountant::new().average_price(&lots), dec!(30));
    }

    #[test]
    fn average_is_zero_when_nothing_remains() {
        let mut only = lot("AAPL", 5, dec!(10), 1);
        sell(&mut only, 5, dec!(11), 2);
        assert_eq!(LotAccountant::new().average_price(&[only]), Decimal::ZERO);
    }

    #[test]
    fn unrealized_profit_at_market_price() {
        let lots = vec![lot("AAPL", 10, dec!(10), 1), lot("AAPL", 10, dec!(20), 2)];
        let accountant = LotAccountant::new();
        assert_eq!(accountant.unrealized_profit(&lots, Some(dec!(25))), dec!(200));
    }

    #[test]
    fn missing_price_values_at_purchase_price() {
        let lots = vec![lot("AAPL", 10, dec!(10), 1), lot("AAPL", 10, dec!(20), 2)];
        let summary = LotAccountant::new().summarize("AAPL", &lots, None);

        assert_eq!(summary.unrealized_profit, Decimal::ZERO);
        assert_eq!(summary.current_value, summary.invested);
        assert_eq!(summary.price_source, PriceSource::PurchasePrice);
        assert_eq!(summary.current_price, None);
    }

    #[test]
    fn percent_is_zero_when_nothing_invested() {
        assert_eq!(percent_return(dec!(50), Decimal::ZERO), Decimal::ZERO);
        assert_eq!(percent_return(dec!(50), dec!(200)), dec!(25));
    }

    #[test]
    fn percent_is_zero_when_ratio_overflows() {
        let tiny = Decimal::new(1, 28);
        assert_eq!(percent_return(Decimal::MAX, tiny), Decimal::ZERO);
        assert_eq!(percent_return(dec!(1000), tiny), Decimal::ZERO);
    }

    #[test]
    fn partial_sale_has_no_realized_section() {
        let mut first = lot("AAPL", 10, dec!(10), 1);
        sell(&mut first, 4, dec!(15), 5);
        let summary = LotAccountant::new().summarize("AAPL", &[first], Some(dec!(12)));

        assert!(summary.is_active());
        assert_eq!(summary.sold_quantity, 4);
        assert_eq!(summary.remaining_quantity, 6);
        assert!(summary.realized.is_none());
        assert_eq!(summary.unrealized_profit, dec!(12));
        assert_eq!(summary.price_source, PriceSource::Market);
    }

    #[test]
    fn fully_sold_ticker_has_sorted_ledger() {
        let mut first = lot("AAPL", 10, dec!(10), 1);
        let mut second = lot("AAPL", 5, dec!(20), 2);
        sell(&mut second, 5, dec!(18), 20);
        sell(&mut first, 6, dec!(15), 10);
        sell(&mut first, 4, dec!(12), 15);

        let summary = LotAccountant::new().summarize("AAPL", &[first, second], None);
        let realized = summary.realized.expect("fully sold");

        let dates: Vec<_> = realized.sales.iter().map(|s| s.sold_at).collect();
        assert_eq!(dates, vec![day(10), day(15), day(20)]);

        // 6×5 + 4×2 + 5×(−2)
        assert_eq!(realized.profit, dec!(28));
        assert_eq!(realized.total_received, dec!(228));
        assert_eq!(realized.cost_basis, dec!(200));
        assert_eq!(realized.percent_profit, dec!(14));
        assert_eq!(summary.unrealized_profit, Decimal::ZERO);
        assert_eq!(summary.average_price, Decimal::ZERO);
    }

    #[test]
    fn ledger_rows_carry_lot_purchase_data() {
        let mut first = lot("AAPL", 10, dec!(10), 1);
        sell(&mut first, 3, dec!(14), 4);
        let ledger = LotAccountant::new().sales_ledger(&[&first]);

        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger[0].lot_id, first.id);
        assert_eq!(ledger[0].purchase_price, dec!(10));
        assert_eq!(ledger[0].purchased_at, day(1));
        assert_eq!(ledger[0].profit, dec!(12));
    }

    #[test]
    fn company_name_comes_from_oldest_lot() {
        let newer = Lot::new("AAPL", "Apple (new)", 1, dec!(1), day(5));
        let older = Lot::new("AAPL", "Apple Inc.", 1, dec!(1), day(1));
        let summary = LotAccountant::new().summarize("AAPL", &[newer, older], None);
        assert_eq!(summary.company_name, "Apple Inc.");
    }

    #[test]
    fn fifo_spills_into_next_lot() {
        let older = lot("AAPL", 10, dec!(10), 1);
        let newer = lot("AAPL", 5, dec!(20), 2);
        let plan = LotAccountant::new()
            .plan_fifo_sale("AAPL", &[&newer, &older], 12)
            .unwrap();

        assert_eq!(plan.len(), 2);
        assert_eq!((plan[0].lot_id, plan[0].quantity), (older.id, 10));
        assert_eq!((plan[1].lot_id, plan[1].quantity), (newer.id, 2));
    }

    #[test]
    fn fifo_skips_exhausted_lots() {
        let mut older = lot("AAPL", 10, dec!(10), 1);
        sell(&mut older, 10, dec!(11), 3);
        let newer = lot("AAPL", 5, dec!(20), 2);
        let plan = LotAccountant::new()
            .plan_fifo_sale("AAPL", &[&older, &newer], 3)
            .unwrap();

        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].lot_id, newer.id);
    }

    #[test]
    fn fifo_rejects_shortage() {
        let lots = vec![lot("AAPL", 10, dec!(10), 1), lot("AAPL", 5, dec!(20), 2)];
        let err = LotAccountant::new()
            .plan_fifo_sale("AAPL", &lots, 16)
            .unwrap_err();

        match err {
            CoreError::InsufficientShares {
                ticker,
                requested,
                available,
            } => {
                assert_eq!(ticker, "AAPL");
                assert_eq!(requested, 16);
                assert_eq!(available, 15);
            }
            other => panic!("expected InsufficientShares, got {other:?}"),
        }
    }

    #[test]
    fn fifo_rejects_zero_quantity() {
        let lots = vec![lot("AAPL", 10, dec!(10), 1)];
        let err = LotAccountant::new().plan_fifo_sale("AAPL", &lots, 0).unwrap_err();
        assert!(matches!(err, CoreError::ValidationError(_)));
    }
}

// ═══════════════════════════════════════════════════════════════════
// PortfolioService Tests
// ═══════════════════════════════════════════════════════════════════

mod portfolio_service {
    use super::*;

    fn two_lot_portfolio() -> (Portfolio, uuid::Uuid, uuid::Uuid) {
        let service = PortfolioService::new();
        let mut portfolio = Portfolio::new("Test");
        // Inserted newest first on purpose.
        let newer = service
            .add_lot(&mut portfolio, "AAPL", "Apple", 5, dec!(20), day(2))
            .unwrap();
        let older = service
            .add_lot(&mut portfolio, "AAPL", "Apple", 10, dec!(10), day(1))
            .unwrap();
        (portfolio, older, newer)
    }

    #[test]
    fn add_lot_normalizes_ticker() {
        let service = PortfolioService::new();
        let mut portfolio = Portfolio::new("Test");
        let id = service
            .add_lot(&mut portfolio, " brk.b ", "", 3, dec!(350.10), day(1))
            .unwrap();

        let lot = portfolio.lot(id).unwrap();
        assert_eq!(lot.ticker, "BRK.B");
        assert_eq!(lot.company_name, "BRK.B");
        assert_eq!(lot.remaining(), 3);
    }

    #[test]
    fn add_lot_rejects_bad_input() {
        let service = PortfolioService::new();
        let mut portfolio = Portfolio::new("Test");
        let cases: Vec<(&str, u64, Decimal)> = vec![
            ("", 1, dec!(10)),
            ("   ", 1, dec!(10)),
            ("ABCDEFGHIJK", 1, dec!(10)),
            ("AA PL", 1, dec!(10)),
            ("A$", 1, dec!(10)),
            ("AAPL", 0, dec!(10)),
            ("AAPL", 1, dec!(0)),
            ("AAPL", 1, dec!(-5)),
            ("AAPL", 1, dec!(100000.01)),
            ("AAPL", 1, dec!(0.00001)),
            ("AAPL", 1, Decimal::new(1, 28)),
        ];

        for (ticker, quantity, price) in cases {
            let result = service.add_lot(&mut portfolio, ticker, "", quantity, price, day(1));
            assert!(
                matches!(result, Err(CoreError::ValidationError(_))),
                "{ticker:?} {quantity} {price} should be rejected"
            );
        }
        assert!(portfolio.lots.is_empty());
    }

    #[test]
    fn max_price_is_accepted() {
        let service = PortfolioService::new();
        let mut portfolio = Portfolio::new("Test");
        assert!(service
            .add_lot(&mut portfolio, "BRK-A", "", 1, dec!(100000), day(1))
            .is_ok());
    }

    #[test]
    fn price_scale_is_checked_after_trailing_zeros() {
        let service = PortfolioService::new();
        let mut portfolio = Portfolio::new("Test");
        assert!(service
            .add_lot(&mut portfolio, "AAPL", "", 1, dec!(0.0001), day(1))
            .is_ok());
        assert!(service
            .add_lot(&mut portfolio, "AAPL", "", 1, dec!(12.5000000), day(1))
            .is_ok());
    }

    #[test]
    fn smallest_price_summarizes_without_overflow() {
        let service = PortfolioService::new();
        let mut portfolio = Portfolio::new("Penny");
        service
            .add_lot(&mut portfolio, "AAPL", "", 1, dec!(0.0001), day(1))
            .unwrap();

        let prices = HashMap::from([("AAPL".to_string(), dec!(1000))]);
        let summary = PortfolioAggregator::new().summarize_with_prices(&portfolio, &prices);

        assert_eq!(summary.active[0].unrealized_profit, dec!(999.9999));
        assert_eq!(summary.active[0].unrealized_percent, dec!(999999900));
    }

    #[test]
    fn sell_lot_records_sale() {
        let service = PortfolioService::new();
        let (mut portfolio, older, _) = two_lot_portfolio();

        let sale = service
            .sell_lot(&mut portfolio, older, 4, dec!(12.5), day(9))
            .unwrap();

        assert_eq!(sale.lot_id, older);
        assert_eq!(sale.total_sale_value(), dec!(50.0));
        assert_eq!(portfolio.lot(older).unwrap().remaining(), 6);
    }

    #[test]
    fn sell_lot_unknown_id() {
        let service = PortfolioService::new();
        let (mut portfolio, _, _) = two_lot_portfolio();
        let err = service
            .sell_lot(&mut portfolio, uuid::Uuid::new_v4(), 1, dec!(1), day(9))
            .unwrap_err();
        assert!(matches!(err, CoreError::LotNotFound(_)));
    }

    #[test]
    fn sell_lot_cannot_oversell() {
        let service = PortfolioService::new();
        let (mut portfolio, _, newer) = two_lot_portfolio();
        let err = service
            .sell_lot(&mut portfolio, newer, 6, dec!(1), day(9))
            .unwrap_err();

        assert!(matches!(err, CoreError::InsufficientShares { available: 5, .. }));
        assert!(portfolio.lot(newer).unwrap().sales.is_empty());
    }

    #[test]
    fn sell_ticker_consumes_oldest_first() {
        let service = PortfolioService::new();
        let (mut portfolio, older, newer) = two_lot_portfolio();

        let sales = service
            .sell_ticker(&mut portfolio, "aapl", 12, dec!(30), day(9))
            .unwrap();

        assert_eq!(sales.len(), 2);
        assert_eq!(sales[0].quantity, 10);
        assert_eq!(sales[1].quantity, 2);
        assert_eq!(portfolio.lot(older).unwrap().remaining(), 0);
        assert_eq!(portfolio.lot(newer).unwrap().remaining(), 3);
        assert_eq!(service.available_quantity(&portfolio, "AAPL"), 3);
    }

    #[test]
    fn rejected_fifo_sale_leaves_portfolio_untouched() {
        let service = PortfolioService::new();
        let (mut portfolio, _, _) = two_lot_portfolio();
        let before = portfolio.lots.clone();

        let err = service
            .sell_ticker(&mut portfolio, "AAPL", 16, dec!(30), day(9))
            .unwrap_err();

        assert!(err.is_validation());
        assert_eq!(portfolio.lots, before);
    }

    #[test]
    fn sell_ticker_validates_price() {
        let service = PortfolioService::new();
        let (mut portfolio, _, _) = two_lot_portfolio();
        let err = service
            .sell_ticker(&mut portfolio, "AAPL", 1, dec!(0), day(9))
            .unwrap_err();
        assert!(matches!(err, CoreError::ValidationError(_)));
    }

    #[test]
    fn lots_for_ticker_in_purchase_order() {
        let service = PortfolioService::new();
        let (portfolio, older, newer) = two_lot_portfolio();
        let ids: Vec<_> = service
            .lots_for_ticker(&portfolio, "aapl")
            .iter()
            .map(|l| l.id)
            .collect();
        assert_eq!(ids, vec![older, newer]);
    }

    #[test]
    fn tickers_are_distinct_and_sorted() {
        let service = PortfolioService::new();
        let (mut portfolio, _, _) = two_lot_portfolio();
        service
            .add_lot(&mut portfolio, "MSFT", "", 1, dec!(300), day(3))
            .unwrap();
        service
            .add_lot(&mut portfolio, "GOOGL", "", 1, dec!(100), day(3))
            .unwrap();

        assert_eq!(service.tickers(&portfolio), vec!["AAPL", "GOOGL", "MSFT"]);
        assert_eq!(service.available_quantity(&portfolio, "TSLA"), 0);
    }
}

// ═══════════════════════════════════════════════════════════════════
// PortfolioAggregator Tests
// ═══════════════════════════════════════════════════════════════════

mod aggregator {
    use super::*;

    /// AAPL: 10 @ 100, all sold @ 150. MSFT: 5 @ 200, held.
    fn sample_portfolio() -> Portfolio {
        let mut portfolio = Portfolio::new("Sample");
        let mut aapl = lot("AAPL", 10, dec!(100), 1);
        sell(&mut aapl, 10, dec!(150), 5);
        portfolio.lots.push(lot("MSFT", 5, dec!(200), 2));
        portfolio.lots.push(aapl);
        portfolio
    }

    #[test]
    fn partitions_active_and_history() {
        let mut portfolio = sample_portfolio();
        portfolio.lots.push(lot("GOOG", 1, dec!(100), 3));

        let summary = PortfolioAggregator::new().summarize_with_prices(&portfolio, &HashMap::new());

        let active: Vec<&str> = summary.active.iter().map(|s| s.ticker.as_str()).collect();
        let history: Vec<&str> = summary.history.iter().map(|s| s.ticker.as_str()).collect();
        assert_eq!(active, vec!["GOOG", "MSFT"]);
        assert_eq!(history, vec!["AAPL"]);
        assert_eq!(summary.portfolio_name, "Sample");
    }

    #[test]
    fn totals() {
        let portfolio = sample_portfolio();
        let prices = HashMap::from([("MSFT".to_string(), dec!(220))]);
        let totals = PortfolioAggregator::new()
            .summarize_with_prices(&portfolio, &prices)
            .totals;

        assert_eq!(totals.realized_profit, dec!(500));
        assert_eq!(totals.total_received, dec!(1500));
        assert_eq!(totals.sold_cost_basis, dec!(1000));
        assert_eq!(totals.realized_percent, dec!(50));
        assert_eq!(totals.available_money, dec!(500));
        assert_eq!(totals.current_value, dec!(1100));
        assert_eq!(totals.purchase_value, dec!(1000));
        assert_eq!(totals.unrealized_profit, dec!(100));
        assert_eq!(totals.total_value, dec!(1600));
        assert_eq!(totals.percent_return, dec!(30));
    }

    #[test]
    fn partial_sales_of_held_tickers_count_as_realized() {
        let mut portfolio = Portfolio::new("Partial");
        let mut msft = lot("MSFT", 10, dec!(100), 1);
        sell(&mut msft, 4, dec!(110), 3);
        portfolio.lots.push(msft);

        let summary = PortfolioAggregator::new().summarize_with_prices(&portfolio, &HashMap::new());

        assert!(summary.history.is_empty());
        assert!(summary.active[0].realized.is_none());
        assert_eq!(summary.totals.realized_profit, dec!(40));
        assert_eq!(summary.totals.purchase_value, dec!(600));
    }

    #[test]
    fn empty_portfolio_is_all_zero() {
        let summary =
            PortfolioAggregator::new().summarize_with_prices(&Portfolio::new("Empty"), &HashMap::new());
        assert!(summary.active.is_empty());
        assert!(summary.history.is_empty());
        assert_eq!(summary.totals, Default::default());
    }

    #[tokio::test]
    async fn resolves_prices_for_held_tickers_only() {
        let yahoo = ScriptedProvider::new("Yahoo")
            .price("MSFT", dec!(220))
            .price("AAPL", dec!(999));
        let counter = yahoo.counter();
        let resolver = resolver_with(vec![yahoo]);

        let summary = PortfolioAggregator::new()
            .summarize(&sample_portfolio(), &resolver)
            .await;

        assert_eq!(calls(&counter), 1);
        assert_eq!(summary.active[0].current_price, Some(dec!(220)));
        assert_eq!(summary.totals.total_value, dec!(1600));
    }

    #[tokio::test]
    async fn unresolvable_ticker_still_summarized() {
        let resolver = resolver_with(vec![ScriptedProvider::new("Yahoo")]);
        let summary = PortfolioAggregator::new()
            .summarize(&sample_portfolio(), &resolver)
            .await;

        let msft = &summary.active[0];
        assert_eq!(msft.price_source, PriceSource::PurchasePrice);
        assert_eq!(msft.current_value, dec!(1000));
        assert_eq!(summary.totals.unrealized_profit, Decimal::ZERO);
    }

    #[tokio::test]
    async fn ticker_detail() {
        let yahoo = ScriptedProvider::new("Yahoo")
            .price("MSFT", dec!(220))
            .company("MSFT", "Microsoft Corporation");
        let resolver = resolver_with(vec![yahoo]);
        let mut portfolio = sample_portfolio();
        portfolio.lots.push(lot("MSFT", 1, dec!(150), 1));

        let detail = PortfolioAggregator::new()
            .ticker_detail(&portfolio, "msft", &resolver)
            .await
            .expect("MSFT is held");

        assert_eq!(detail.summary.remaining_quantity, 6);
        assert_eq!(detail.lots.len(), 2);
        assert_eq!(detail.lots[0].purchased_at, day(1));
        assert!(detail.sales.is_empty());
        assert_eq!(detail.quote.map(|q| q.price), Some(dec!(220)));
        assert_eq!(
            detail.overview.map(|o| o.name),
            Some("Microsoft Corporation".to_string())
        );
    }

    #[tokio::test]
    async fn ticker_detail_of_sold_out_ticker_has_sales() {
        let resolver = resolver_with(vec![]);
        let detail = PortfolioAggregator::new()
            .ticker_detail(&sample_portfolio(), "AAPL", &resolver)
            .await
            .expect("AAPL was held");

        assert_eq!(detail.sales.len(), 1);
        assert!(detail.summary.realized.is_some());
        assert!(detail.quote.is_none());
    }

    #[tokio::test]
    async fn ticker_detail_unknown_ticker() {
        let resolver = resolver_with(vec![]);
        let detail = PortfolioAggregator::new()
            .ticker_detail(&sample_portfolio(), "TSLA", &resolver)
            .await;
        assert!(detail.is_none());
    }
}

// ═══════════════════════════════════════════════════════════════════
// PriceRefreshJob Tests
// ═══════════════════════════════════════════════════════════════════

mod refresh_job {
    use super::*;

    fn portfolios() -> Vec<Portfolio> {
        let mut first = Portfolio::new("First");
        first.lots.push(lot("AAPL", 1, dec!(100), 1));
        first.lots.push(lot("AAPL", 2, dec!(110), 2));
        first.lots.push(lot("MSFT", 3, dec!(300), 1));
        let mut second = Portfolio::new("Second");
        second.lots.push(lot("AAPL", 4, dec!(120), 3));
        second.lots.push(lot("DEAD", 1, dec!(5), 3));
        vec![first, second]
    }

    #[tokio::test]
    async fn each_ticker_resolved_once() {
        let yahoo = ScriptedProvider::new("Yahoo")
            .price("AAPL", dec!(190))
            .price("MSFT", dec!(410));
        let counter = yahoo.counter();
        let resolver = resolver_with(vec![yahoo]);
        let mut portfolios = portfolios();

        let report = PriceRefreshJob::new().run(&mut portfolios, &resolver).await;

        // AAPL, DEAD, MSFT
        assert_eq!(calls(&counter), 3);
        assert_eq!(report.updated, vec!["AAPL", "MSFT"]);
        assert_eq!(report.failed, vec!["DEAD"]);
        assert_eq!(report.total(), 3);
        for lot in portfolios.iter().flat_map(|p| &p.lots) {
            match lot.ticker.as_str() {
                "AAPL" => assert_eq!(lot.current_price, Some(dec!(190))),
                "MSFT" => assert_eq!(lot.current_price, Some(dec!(410))),
                _ => assert_eq!(lot.current_price, None),
            }
        }
    }

    #[tokio::test]
    async fn second_run_is_unchanged_and_cached() {
        let yahoo = ScriptedProvider::new("Yahoo").price("AAPL", dec!(190));
        let counter = yahoo.counter();
        let resolver = resolver_with(vec![yahoo]);
        let mut portfolios = vec![portfolios().remove(0)];
        portfolios[0].lots.retain(|l| l.ticker == "AAPL");

        PriceRefreshJob::new().run(&mut portfolios, &resolver).await;
        let report = PriceRefreshJob::new().run(&mut portfolios, &resolver).await;

        assert_eq!(report.unchanged, vec!["AAPL"]);
        assert!(report.updated.is_empty());
        assert_eq!(calls(&counter), 1);
    }

    #[tokio::test]
    async fn forced_run_bypasses_cache() {
        let yahoo = ScriptedProvider::new("Yahoo").price("AAPL", dec!(190));
        let counter = yahoo.counter();
        let resolver = resolver_with(vec![yahoo]);
        let mut portfolios = vec![portfolios().remove(0)];
        portfolios[0].lots.retain(|l| l.ticker == "AAPL");

        PriceRefreshJob::new().run(&mut portfolios, &resolver).await;
        let job = PriceRefreshJob::forced();
        assert!(job.is_forced());
        job.run(&mut portfolios, &resolver).await;

        assert_eq!(calls(&counter), 2);
    }

    #[tokio::test]
    async fn failed_ticker_keeps_old_snapshot() {
        let resolver = resolver_with(vec![ScriptedProvider::new("Yahoo")]);
        let mut portfolios = portfolios();
        portfolios[1].lots[1].current_price = Some(dec!(4.20));

        let report = PriceRefreshJob::new().run(&mut portfolios, &resolver).await;

        assert_eq!(report.failed.len(), 3);
        assert_eq!(portfolios[1].lots[1].current_price, Some(dec!(4.20)));
    }
}

// ═══════════════════════════════════════════════════════════════════
// ImportJob Tests
// ═══════════════════════════════════════════════════════════════════

mod import_job {
    use super::*;

    #[test]
    fn default_positions() {
        let positions = ImportJob::default_positions();
        assert_eq!(positions.len(), 13);
        assert_eq!(positions[0], ImportPosition::new("TSLA", 9, dec!(269.25)));
        assert_eq!(positions[7], ImportPosition::new("PFE", 140, dec!(49.00)));
        assert_eq!(positions[12], ImportPosition::new("LEG", 170, dec!(38.51)));
        assert_eq!(ImportJob::default().positions().len(), 13);
    }

    #[tokio::test]
    async fn adds_new_lots_with_names_and_prices() {
        let yahoo = ScriptedProvider::new("Yahoo")
            .price("AAPL", dec!(200))
            .company("AAPL", "Apple Inc.");
        let resolver = resolver_with(vec![yahoo]);
        let mut portfolio = Portfolio::new("Imported");
        let job = ImportJob::new(vec![
            ImportPosition::new("aapl", 10, dec!(150)),
            ImportPosition::new("XYZ", 2, dec!(50)),
        ]);

        let report = job.run(&mut portfolio, &resolver, day(1)).await.unwrap();

        assert_eq!((report.added, report.updated), (2, 0));
        assert_eq!(report.current_value, dec!(2100));
        assert_eq!(report.purchase_value, dec!(1600));
        assert_eq!(report.profit(), dec!(500));

        let aapl = &portfolio.lots[0];
        assert_eq!(aapl.ticker, "AAPL");
        assert_eq!(aapl.company_name, "Apple Inc.");
        assert_eq!(aapl.current_price, Some(dec!(200)));
        assert_eq!(aapl.purchased_at, day(1));
        assert_eq!(portfolio.lots[1].company_name, "XYZ");
    }

    #[tokio::test]
    async fn rerun_updates_instead_of_duplicating() {
        let resolver = resolver_with(vec![ScriptedProvider::new("Yahoo")]);
        let mut portfolio = Portfolio::new("Imported");

        ImportJob::with_default_positions()
            .run(&mut portfolio, &resolver, day(1))
            .await
            .unwrap();
        let report = ImportJob::new(vec![ImportPosition::new("TSLA", 12, dec!(269.25))])
            .run(&mut portfolio, &resolver, day(2))
            .await
            .unwrap();

        assert_eq!((report.added, report.updated), (0, 1));
        assert_eq!(portfolio.lots.len(), 13);
        let tsla = portfolio.lots.iter().find(|l| l.ticker == "TSLA").unwrap();
        assert_eq!(tsla.quantity, 12);
        assert_eq!(tsla.purchased_at, day(1));
    }

    #[tokio::test]
    async fn same_ticker_other_price_is_a_new_lot() {
        let resolver = resolver_with(vec![]);
        let mut portfolio = Portfolio::new("Imported");
        portfolio.lots.push(lot("TSLA", 1, dec!(100), 1));

        let report = ImportJob::new(vec![ImportPosition::new("TSLA", 1, dec!(200))])
            .run(&mut portfolio, &resolver, day(2))
            .await
            .unwrap();

        assert_eq!(report.added, 1);
        assert_eq!(portfolio.lots.len(), 2);
    }

    #[tokio::test]
    async fn one_bad_row_rejects_everything() {
        let resolver = resolver_with(vec![]);
        let mut portfolio = Portfolio::new("Imported");

        let err = ImportJob::new(vec![
            ImportPosition::new("AAPL", 1, dec!(10)),
            ImportPosition::new("NOT A TICKER", 1, dec!(10)),
        ])
        .run(&mut portfolio, &resolver, day(1))
        .await
        .unwrap_err();

        assert!(matches!(err, CoreError::ValidationError(_)));
        assert!(portfolio.lots.is_empty());
    }

    #[tokio::test]
    async fn cannot_shrink_lot_below_sold_quantity() {
        let resolver = resolver_with(vec![]);
        let mut portfolio = Portfolio::new("Imported");
        let mut existing = lot("AAPL", 10, dec!(100), 1);
        sell(&mut existing, 8, dec!(120), 2);
        portfolio.lots.push(existing);

        let result = ImportJob::new(vec![ImportPosition::new("AAPL", 5, dec!(100))])
            .run(&mut portfolio, &resolver, day(3))
            .await;

        assert!(result.is_err());
        assert_eq!(portfolio.lots[0].quantity, 10);
    }

    #[tokio::test]
    async fn update_without_market_data_keeps_snapshot_and_name() {
        let resolver = resolver_with(vec![ScriptedProvider::new("Yahoo").failing()]);
        let mut portfolio = Portfolio::new("Imported");
        let mut existing = Lot::new("AAPL", "Apple Inc.", 10, dec!(150), day(1));
        existing.current_price = Some(dec!(190));
        portfolio.lots.push(existing);

        let report = ImportJob::new(vec![ImportPosition::new("AAPL", 12, dec!(150))])
            .run(&mut portfolio, &resolver, day(2))
            .await
            .unwrap();

        assert_eq!(report.updated, 1);
        let aapl = &portfolio.lots[0];
        assert_eq!(aapl.quantity, 12);
        assert_eq!(aapl.current_price, Some(dec!(190)));
        assert_eq!(aapl.company_name, "Apple Inc.");
    }
}
