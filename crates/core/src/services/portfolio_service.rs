use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::BTreeSet;
use uuid::Uuid;

use crate::errors::CoreError;
use crate::models::lot::{Lot, Sale};
use crate::models::portfolio::Portfolio;
use crate::services::accounting_service::LotAccountant;

/// Upper bound for a purchase or sale price per share.
pub const MAX_PRICE: Decimal = Decimal::from_parts(100_000, 0, 0, false, 0);

/// Most fraction digits a purchase or sale price may carry.
pub const MAX_PRICE_SCALE: u32 = 4;

/// Longest accepted ticker symbol.
pub const MAX_TICKER_LEN: usize = 10;

/// Records lots and sales in a portfolio.
///
/// Pure business logic, no I/O. Every check runs before the portfolio is
/// touched, so a rejected call leaves it exactly as it was.
pub struct PortfolioService {
    accountant: LotAccountant,
}

impl PortfolioService {
    pub fn new() -> Self {
        Self {
            accountant: LotAccountant::new(),
        }
    }

    /// Add a purchase lot. Returns the new lot's id.
    pub fn add_lot(
        &self,
        portfolio: &mut Portfolio,
        ticker: &str,
        company_name: &str,
        quantity: u64,
        price: Decimal,
        purchased_at: DateTime<Utc>,
    ) -> Result<Uuid, CoreError> {
        let ticker = validate_ticker(ticker)?;
        validate_quantity(quantity)?;
        validate_price(price)?;

        let lot = Lot::new(ticker, company_name, quantity, price, purchased_at);
        let id = lot.id;
        portfolio.lots.push(lot);
        Ok(id)
    }

    /// Record a sale against one specific lot.
    pub fn sell_lot(
        &self,
        portfolio: &mut Portfolio,
        lot_id: Uuid,
        quantity: u64,
        price: Decimal,
        sold_at: DateTime<Utc>,
    ) -> Result<Sale, CoreError> {
        validate_quantity(quantity)?;
        validate_price(price)?;

        let lot = portfolio
            .lot_mut(lot_id)
            .ok_or_else(|| CoreError::LotNotFound(lot_id.to_string()))?;

        let available = lot.remaining();
        if quantity > available {
            return Err(CoreError::InsufficientShares {
                ticker: lot.ticker.clone(),
                requested: quantity,
                available,
            });
        }

        let sale = Sale::new(lot.id, quantity, price, sold_at);
        lot.sales.push(sale.clone());
        Ok(sale)
    }

    /// Sell `quantity` shares of a ticker, consuming lots oldest first.
    ///
    /// Either every sale of the plan is recorded or none is.
    pub fn sell_ticker(
        &self,
        portfolio: &mut Portfolio,
        ticker: &str,
        quantity: u64,
        price: Decimal,
        sold_at: DateTime<Utc>,
    ) -> Result<Vec<Sale>, CoreError> {
        let ticker = validate_ticker(ticker)?;
        validate_quantity(quantity)?;
        validate_price(price)?;

        let plan = {
            let lots = self.lots_for_ticker(portfolio, &ticker);
            self.accountant.plan_fifo_sale(&ticker, &lots, quantity)?
        };

        let mut sales = Vec::with_capacity(plan.len());
        for allocation in plan {
            // The plan was built from this portfolio, so the lot is present.
            if let Some(lot) = portfolio.lot_mut(allocation.lot_id) {
                let sale = Sale::new(lot.id, allocation.quantity, price, sold_at);
                lot.sales.push(sale.clone());
                sales.push(sale);
            }
        }
        Ok(sales)
    }

    /// Lots of one ticker (case-insensitive), in purchase order.
    pub fn lots_for_ticker<'a>(&self, portfolio: &'a Portfolio, ticker: &str) -> Vec<&'a Lot> {
        let ticker = ticker.trim();
        let mut lots: Vec<&Lot> = portfolio
            .lots
            .iter()
            .filter(|lot| lot.ticker.eq_ignore_ascii_case(ticker))
            .collect();
        lots.sort_by_key(|lot| lot.purchased_at);
        lots
    }

    /// Distinct tickers in the portfolio, sorted.
    pub fn tickers(&self, portfolio: &Portfolio) -> Vec<String> {
        portfolio
            .lots
            .iter()
            .map(|lot| lot.ticker.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Shares of a ticker still held across all its lots.
    pub fn available_quantity(&self, portfolio: &Portfolio, ticker: &str) -> u64 {
        self.accountant
            .remaining_quantity(&self.lots_for_ticker(portfolio, ticker))
    }
}

impl Default for PortfolioService {
    fn default() -> Self {
        Self::new()
    }
}

/// Trim and uppercase a ticker, rejecting anything that cannot be a symbol.
pub fn validate_ticker(ticker: &str) -> Result<String, CoreError> {
    let ticker = ticker.trim();
    if ticker.is_empty() {
        return Err(CoreError::ValidationError("Ticker must not be empty".into()));
    }
    if ticker.len() > MAX_TICKER_LEN {
        return Err(CoreError::ValidationError(format!(
            "Ticker '{ticker}' is longer than {MAX_TICKER_LEN} characters"
        )));
    }
    if !ticker
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-')
    {
        return Err(CoreError::ValidationError(format!(
            "Ticker '{ticker}' contains invalid characters"
        )));
    }
    Ok(ticker.to_ascii_uppercase())
}

pub fn validate_quantity(quantity: u64) -> Result<(), CoreError> {
    if quantity == 0 {
        return Err(CoreError::ValidationError(
            "Quantity must be greater than 0".into(),
        ));
    }
    Ok(())
}

pub fn validate_price(price: Decimal) -> Result<(), CoreError> {
    if price <= Decimal::ZERO {
        return Err(CoreError::ValidationError(
            "Price must be greater than 0".into(),
        ));
    }
    if price > MAX_PRICE {
        return Err(CoreError::ValidationError(format!(
            "Price {price} exceeds the maximum of {MAX_PRICE}"
        )));
    }
    if price.normalize().scale() > MAX_PRICE_SCALE {
        return Err(CoreError::ValidationError(format!(
            "Price {price} has more than {MAX_PRICE_SCALE} decimal places"
        )));
    }
    Ok(())
}
