use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::lot::Lot;
use super::market::{CompanyOverview, Quote};

/// Where the price used for valuing remaining shares came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PriceSource {
    /// Resolved from the market-data resolver (cache or provider).
    Market,
    /// No price could be resolved; each lot is valued at its own purchase
    /// price, so unrealized profit for the ticker is zero.
    PurchasePrice,
}

/// One sale, joined with the purchase data of the lot it came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaleRecord {
    pub sale_id: Uuid,
    pub lot_id: Uuid,
    pub quantity: u64,
    pub sale_price: Decimal,
    pub sold_at: DateTime<Utc>,
    pub purchase_price: Decimal,
    pub purchased_at: DateTime<Utc>,

    /// quantity × (sale_price − purchase_price)
    pub profit: Decimal,
}

/// Realized results for a ticker with nothing left to sell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RealizedSummary {
    /// Every sale of every lot, sorted by sale date ascending
    pub sales: Vec<SaleRecord>,

    pub profit: Decimal,

    /// profit / cost_basis × 100 (zero when cost_basis is zero)
    pub percent_profit: Decimal,

    /// Σ quantity × sale_price
    pub total_received: Decimal,

    /// Σ quantity × purchase_price over sold shares
    pub cost_basis: Decimal,
}

/// Per-ticker results computed from all of a portfolio's lots for that ticker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickerSummary {
    pub ticker: String,
    pub company_name: String,

    /// Σ lot.quantity
    pub total_quantity: u64,

    /// Σ sale.quantity
    pub sold_quantity: u64,

    pub remaining_quantity: u64,

    /// Weighted-average purchase price of the remaining shares
    pub average_price: Decimal,

    /// Resolved market price, if any
    pub current_price: Option<Decimal>,

    pub price_source: PriceSource,

    /// Σ remaining × effective price
    pub current_value: Decimal,

    /// Σ remaining × purchase price
    pub invested: Decimal,

    pub unrealized_profit: Decimal,

    /// unrealized_profit / invested × 100 (zero when invested is zero)
    pub unrealized_percent: Decimal,

    /// Present only when `remaining_quantity == 0`
    pub realized: Option<RealizedSummary>,
}

impl TickerSummary {
    pub fn is_active(&self) -> bool {
        self.remaining_quantity > 0
    }
}

/// Whole-portfolio figures.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PortfolioTotals {
    /// Realized profit over every sale in the portfolio
    pub realized_profit: Decimal,

    /// Σ quantity × sale_price over every sale
    pub total_received: Decimal,

    /// Σ quantity × purchase_price over every sold share
    pub sold_cost_basis: Decimal,

    /// realized_profit / sold_cost_basis × 100
    pub realized_percent: Decimal,

    /// Reinvestable cash from prior sales: total_received − sold_cost_basis
    pub available_money: Decimal,

    /// Σ remaining × effective price
    pub current_value: Decimal,

    /// Σ remaining × purchase price
    pub purchase_value: Decimal,

    /// current_value − purchase_value
    pub unrealized_profit: Decimal,

    /// current_value + available_money
    pub total_value: Decimal,

    /// (realized + unrealized) / (sold_cost_basis + purchase_value) × 100
    pub percent_return: Decimal,
}

/// Summary of an entire portfolio split into held and fully-sold tickers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioSummary {
    pub portfolio_id: Uuid,
    pub portfolio_name: String,

    /// Tickers with shares still held, sorted by ticker
    pub active: Vec<TickerSummary>,

    /// Fully-sold tickers, sorted by ticker
    pub history: Vec<TickerSummary>,

    pub totals: PortfolioTotals,
}

/// Everything the ticker detail view needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickerDetail {
    pub summary: TickerSummary,

    /// The ticker's lots in purchase order
    pub lots: Vec<Lot>,

    /// All sales of the ticker sorted by sale date, regardless of remaining quantity
    pub sales: Vec<SaleRecord>,

    pub quote: Option<Quote>,
    pub overview: Option<CompanyOverview>,
}
