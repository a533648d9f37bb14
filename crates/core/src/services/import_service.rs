use chrono::{DateTime, Utc};
use log::info;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::errors::CoreError;
use crate::models::lot::Lot;
use crate::models::portfolio::Portfolio;
use crate::services::market_data_service::MarketDataResolver;
use crate::services::portfolio_service::{validate_price, validate_quantity, validate_ticker};

/// One row to import: `quantity` shares of `ticker` bought at `price`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportPosition {
    pub ticker: String,
    pub quantity: u64,
    pub price: Decimal,
}

impl ImportPosition {
    pub fn new(ticker: impl Into<String>, quantity: u64, price: Decimal) -> Self {
        Self {
            ticker: ticker.into(),
            quantity,
            price,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImportReport {
    pub added: usize,
    pub updated: usize,
    /// Σ remaining × snapshot price (purchase price when no snapshot)
    pub current_value: Decimal,
    /// Σ remaining × purchase price
    pub purchase_value: Decimal,
}

impl ImportReport {
    pub fn profit(&self) -> Decimal {
        self.current_value - self.purchase_value
    }
}

/// Seeds a portfolio from a list of positions.
///
/// A position matching an existing lot by ticker and purchase price updates
/// that lot in place; anything else becomes a new lot. Rows are validated up
/// front: one bad row rejects the whole import and nothing is written.
pub struct ImportJob {
    positions: Vec<ImportPosition>,
}

impl ImportJob {
    pub fn new(positions: Vec<ImportPosition>) -> Self {
        Self { positions }
    }

    pub fn with_default_positions() -> Self {
        Self::new(Self::default_positions())
    }

    /// Starter portfolio shipped with the tracker.
    pub fn default_positions() -> Vec<ImportPosition> {
        [
            ("TSLA", 9, Decimal::new(26925, 2)),
            ("META", 30, Decimal::new(17357, 2)),
            ("GOOGL", 70, Decimal::new(11196, 2)),
            ("AAPL", 47, Decimal::new(16094, 2)),
            ("MSFT", 38, Decimal::new(26355, 2)),
            ("VOO", 18, Decimal::new(37713, 2)),
            ("JNJ", 20, Decimal::new(16613, 2)),
            ("PFE", 140, Decimal::new(4900, 2)),
            ("JPM", 57, Decimal::new(11600, 2)),
            ("STX", 105, Decimal::new(7297, 2)),
            ("ABBV", 50, Decimal::new(13915, 2)),
            ("C", 150, Decimal::new(4818, 2)),
            ("LEG", 170, Decimal::new(3851, 2)),
        ]
        .into_iter()
        .map(|(ticker, quantity, price)| ImportPosition::new(ticker, quantity, price))
        .collect()
    }

    pub fn positions(&self) -> &[ImportPosition] {
        &self.positions
    }

    pub async fn run(
        &self,
        portfolio: &mut Portfolio,
        resolver: &MarketDataResolver,
        purchased_at: DateTime<Utc>,
    ) -> Result<ImportReport, CoreError> {
        let rows = self.validate(portfolio)?;

        let mut report = ImportReport::default();
        for (ticker, position) in rows {
            let current_price = resolver.get_price(&ticker).await;
            let company_name = resolver
                .get_overview(&ticker)
                .await
                .map(|o| o.name)
                .filter(|name| !name.trim().is_empty());

            match portfolio
                .lots
                .iter_mut()
                .find(|lot| lot.ticker == ticker && lot.purchase_price == position.price)
            {
                Some(lot) => {
                    lot.quantity = position.quantity;
                    // Without fresh data the stored name and snapshot stay.
                    if let Some(name) = company_name {
                        lot.company_name = name;
                    }
                    if let Some(price) = current_price {
                        lot.current_price = Some(price);
                    }
                    info!("Updated {ticker}: {} shares @ ${}", position.quantity, position.price);
                    report.updated += 1;
                }
                None => {
                    let mut lot = Lot::new(
                        ticker.as_str(),
                        company_name.unwrap_or_else(|| ticker.clone()),
                        position.quantity,
                        position.price,
                        purchased_at,
                    );
                    lot.current_price = current_price;
                    portfolio.lots.push(lot);
                    info!("Added {ticker}: {} shares @ ${}", position.quantity, position.price);
                    report.added += 1;
                }
            }
        }

        for lot in &portfolio.lots {
            let remaining = Decimal::from(lot.remaining());
            report.current_value += remaining * lot.current_price.unwrap_or(lot.purchase_price);
            report.purchase_value += remaining * lot.purchase_price;
        }

        info!(
            "Import into '{}' done: {} added, {} updated",
            portfolio.name, report.added, report.updated
        );
        Ok(report)
    }

    /// Check every row before anything is written. Returns the rows with
    /// normalized tickers.
    fn validate<'a>(
        &'a self,
        portfolio: &Portfolio,
    ) -> Result<Vec<(String, &'a ImportPosition)>, CoreError> {
        self.positions
            .iter()
            .map(|position| {
                let ticker = validate_ticker(&position.ticker)?;
                validate_quantity(position.quantity)?;
                validate_price(position.price)?;

                // Shrinking an existing lot below what was already sold out of it
                // would break the lot's sale invariant.
                if let Some(lot) = portfolio
                    .lots
                    .iter()
                    .find(|lot| lot.ticker == ticker && lot.purchase_price == position.price)
                {
                    if position.quantity < lot.sold_quantity() {
                        return Err(CoreError::ValidationError(format!(
                            "Cannot set {ticker} lot to {} shares: {} already sold",
                            position.quantity,
                            lot.sold_quantity()
                        )));
                    }
                }
                Ok((ticker, position))
            })
            .collect()
    }
}

impl Default for ImportJob {
    fn default() -> Self {
        Self::with_default_positions()
    }
}
