use log::{info, warn};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::models::portfolio::Portfolio;
use crate::services::market_data_service::MarketDataResolver;

/// Outcome of one refresh run, by ticker.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RefreshReport {
    /// Tickers whose snapshot changed on at least one lot
    pub updated: Vec<String>,
    /// Tickers resolved to the price already stored on every lot
    pub unchanged: Vec<String>,
    /// Tickers no provider had a price for; their snapshots are left alone
    pub failed: Vec<String>,
}

impl RefreshReport {
    pub fn total(&self) -> usize {
        self.updated.len() + self.unchanged.len() + self.failed.len()
    }
}

/// Writes fresh market prices into the `current_price` snapshot of lots.
///
/// Each distinct ticker is resolved once per run, however many lots and
/// portfolios hold it. With `force`, cached prices are dropped first so the
/// providers are asked again.
#[derive(Debug, Clone, Copy, Default)]
pub struct PriceRefreshJob {
    force: bool,
}

impl PriceRefreshJob {
    pub fn new() -> Self {
        Self { force: false }
    }

    pub fn forced() -> Self {
        Self { force: true }
    }

    pub fn is_forced(&self) -> bool {
        self.force
    }

    pub async fn run(
        &self,
        portfolios: &mut [Portfolio],
        resolver: &MarketDataResolver,
    ) -> RefreshReport {
        let tickers: BTreeSet<String> = portfolios
            .iter()
            .flat_map(|p| p.lots.iter().map(|lot| lot.ticker.clone()))
            .collect();

        info!(
            "Refreshing prices for {} tickers{}",
            tickers.len(),
            if self.force { " (forced)" } else { "" }
        );

        let mut prices: BTreeMap<String, Option<Decimal>> = BTreeMap::new();
        for ticker in tickers {
            let price = if self.force {
                resolver.refresh_price(&ticker).await
            } else {
                resolver.get_price(&ticker).await
            };
            prices.insert(ticker, price);
        }

        let mut report = RefreshReport::default();
        for (ticker, price) in prices {
            let Some(price) = price else {
                warn!("Could not fetch price for {ticker}");
                report.failed.push(ticker);
                continue;
            };

            let mut changed = false;
            for lot in portfolios
                .iter_mut()
                .flat_map(|p| p.lots.iter_mut())
                .filter(|lot| lot.ticker == ticker)
            {
                if lot.current_price != Some(price) {
                    lot.current_price = Some(price);
                    changed = true;
                }
            }

            if changed {
                info!("Updated {ticker}: {price}");
                report.updated.push(ticker);
            } else {
                report.unchanged.push(ticker);
            }
        }

        info!(
            "Price refresh done: {} updated, {} unchanged, {} failed",
            report.updated.len(),
            report.unchanged.len(),
            report.failed.len()
        );
        report
    }
}
