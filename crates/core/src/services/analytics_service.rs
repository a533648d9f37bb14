use log::debug;
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};

use crate::models::analytics::{PortfolioSummary, PortfolioTotals, TickerDetail, TickerSummary};
use crate::models::lot::Lot;
use crate::models::portfolio::Portfolio;
use crate::services::accounting_service::{percent_return, LotAccountant};
use crate::services::market_data_service::MarketDataResolver;

/// Folds per-ticker accounting into whole-portfolio results.
///
/// Prices come from the resolver (current or cached). A ticker whose price
/// cannot be resolved is still summarized, valued at purchase price.
pub struct PortfolioAggregator {
    accountant: LotAccountant,
}

impl PortfolioAggregator {
    pub fn new() -> Self {
        Self {
            accountant: LotAccountant::new(),
        }
    }

    /// Lots grouped by ticker; groups are ordered by ticker, lots by purchase date.
    pub fn group_by_ticker<'a>(&self, portfolio: &'a Portfolio) -> BTreeMap<String, Vec<&'a Lot>> {
        let mut groups: BTreeMap<String, Vec<&Lot>> = BTreeMap::new();
        for lot in &portfolio.lots {
            groups.entry(lot.ticker.clone()).or_default().push(lot);
        }
        for lots in groups.values_mut() {
            lots.sort_by_key(|lot| lot.purchased_at);
        }
        groups
    }

    /// Resolve a price for every held ticker, then summarize.
    ///
    /// Fully-sold tickers need no price, so none is requested for them.
    pub async fn summarize(
        &self,
        portfolio: &Portfolio,
        resolver: &MarketDataResolver,
    ) -> PortfolioSummary {
        let mut prices = HashMap::new();
        for (ticker, lots) in self.group_by_ticker(portfolio) {
            if self.accountant.remaining_quantity(&lots) == 0 {
                continue;
            }
            match resolver.get_price(&ticker).await {
                Some(price) => {
                    prices.insert(ticker, price);
                }
                None => debug!("No price for {ticker}, valuing at purchase price"),
            }
        }
        self.summarize_with_prices(portfolio, &prices)
    }

    /// Summarize with already-resolved prices. Tickers missing from `prices`
    /// are valued at purchase price.
    pub fn summarize_with_prices(
        &self,
        portfolio: &Portfolio,
        prices: &HashMap<String, Decimal>,
    ) -> PortfolioSummary {
        let (active, history): (Vec<TickerSummary>, Vec<TickerSummary>) = self
            .group_by_ticker(portfolio)
            .into_iter()
            .map(|(ticker, lots)| {
                let price = prices.get(&ticker).copied();
                self.accountant.summarize(&ticker, &lots, price)
            })
            .partition(TickerSummary::is_active);

        let totals = self.totals(portfolio, &active);

        PortfolioSummary {
            portfolio_id: portfolio.id,
            portfolio_name: portfolio.name.clone(),
            active,
            history,
            totals,
        }
    }

    /// Whole-portfolio totals.
    ///
    /// Realized figures cover every sale, including partial sales of tickers
    /// that are still held. Unrealized figures come from the active summaries.
    pub fn totals(&self, portfolio: &Portfolio, active: &[TickerSummary]) -> PortfolioTotals {
        let realized = self.accountant.realized_summary(&portfolio.lots);

        let current_value: Decimal = active.iter().map(|s| s.current_value).sum();
        let purchase_value: Decimal = active.iter().map(|s| s.invested).sum();
        let unrealized_profit = current_value - purchase_value;
        let available_money = realized.total_received - realized.cost_basis;

        PortfolioTotals {
            realized_profit: realized.profit,
            total_received: realized.total_received,
            sold_cost_basis: realized.cost_basis,
            realized_percent: percent_return(realized.profit, realized.cost_basis),
            available_money,
            current_value,
            purchase_value,
            unrealized_profit,
            total_value: current_value + available_money,
            percent_return: percent_return(
                realized.profit + unrealized_profit,
                realized.cost_basis + purchase_value,
            ),
        }
    }

    /// Detail view for one ticker, or `None` if the portfolio never held it.
    pub async fn ticker_detail(
        &self,
        portfolio: &Portfolio,
        ticker: &str,
        resolver: &MarketDataResolver,
    ) -> Option<TickerDetail> {
        let ticker = ticker.trim().to_uppercase();
        let lots = self.group_by_ticker(portfolio).remove(&ticker)?;

        let price = if self.accountant.remaining_quantity(&lots) > 0 {
            resolver.get_price(&ticker).await
        } else {
            None
        };
        let quote = resolver.get_quote(&ticker).await;
        let overview = resolver.get_overview(&ticker).await;

        Some(TickerDetail {
            summary: self.accountant.summarize(&ticker, &lots, price),
            sales: self.accountant.sales_ledger(&lots),
            lots: lots.into_iter().cloned().collect(),
            quote,
            overview,
        })
    }
}

impl Default for PortfolioAggregator {
    fn default() -> Self {
        Self::new()
    }
}
