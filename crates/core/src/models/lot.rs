use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One discrete purchase of shares at a specific price and time.
///
/// Everything except `current_price` is fixed at creation. `current_price`
/// is a convenience snapshot written by the price refresh job; it is not
/// authoritative and summaries never read it in place of a resolved price.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lot {
    pub id: Uuid,

    /// Ticker symbol, uppercased (e.g., "AAPL", "BRK.B")
    pub ticker: String,

    /// Display name captured at entry time (falls back to the ticker)
    pub company_name: String,

    pub quantity: u64,

    pub purchase_price: Decimal,

    pub purchased_at: DateTime<Utc>,

    /// Last price written by the refresh job, if any.
    #[serde(default)]
    pub current_price: Option<Decimal>,

    /// Sales recorded against this lot, in insertion order.
    #[serde(default)]
    pub sales: Vec<Sale>,
}

impl Lot {
    pub fn new(
        ticker: impl Into<String>,
        company_name: impl Into<String>,
        quantity: u64,
        purchase_price: Decimal,
        purchased_at: DateTime<Utc>,
    ) -> Self {
        let ticker = ticker.into().trim().to_uppercase();
        let company_name = company_name.into();
        let company_name = if company_name.trim().is_empty() {
            ticker.clone()
        } else {
            company_name
        };
        Self {
            id: Uuid::new_v4(),
            ticker,
            company_name,
            quantity,
            purchase_price,
            purchased_at,
            current_price: None,
            sales: Vec::new(),
        }
    }

    /// Total quantity sold out of this lot.
    pub fn sold_quantity(&self) -> u64 {
        self.sales.iter().map(|s| s.quantity).sum()
    }

    /// Shares still held from this lot.
    ///
    /// Saturates at zero: an over-sold lot is a data-integrity problem of the
    /// persistence layer and must not turn into a huge unsigned value here.
    pub fn remaining(&self) -> u64 {
        self.quantity.saturating_sub(self.sold_quantity())
    }

    /// Cost of the whole lot at purchase.
    pub fn total_purchase_value(&self) -> Decimal {
        Decimal::from(self.quantity) * self.purchase_price
    }
}

/// A sale of shares out of exactly one lot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sale {
    pub id: Uuid,
    pub lot_id: Uuid,
    pub quantity: u64,
    pub sale_price: Decimal,
    pub sold_at: DateTime<Utc>,
}

impl Sale {
    pub fn new(lot_id: Uuid, quantity: u64, sale_price: Decimal, sold_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            lot_id,
            quantity,
            sale_price,
            sold_at,
        }
    }

    /// Proceeds received for this sale.
    pub fn total_sale_value(&self) -> Decimal {
        Decimal::from(self.quantity) * self.sale_price
    }
}
