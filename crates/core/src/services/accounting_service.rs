use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use uuid::Uuid;

use crate::errors::CoreError;
use crate::models::analytics::{PriceSource, RealizedSummary, SaleRecord, TickerSummary};
use crate::models::lot::Lot;

/// Shares to take out of one lot as part of a FIFO sale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleAllocation {
    pub lot_id: Uuid,
    pub quantity: u64,
}

/// Per-ticker lot accounting.
///
/// Pure business logic: no I/O, no API calls. The current price is passed
/// in already resolved. When it is `None`, every lot is valued at its own
/// purchase price and the summary says so through `PriceSource::PurchasePrice`.
///
/// All functions accept `&[Lot]` as well as `&[&Lot]`.
pub struct LotAccountant;

impl LotAccountant {
    pub fn new() -> Self {
        Self
    }

    /// Σ remaining(lot)
    pub fn remaining_quantity<L: Borrow<Lot>>(&self, lots: &[L]) -> u64 {
        lots.iter().map(|l| l.borrow().remaining()).sum()
    }

    /// Weighted-average purchase price of the remaining shares.
    /// Zero when nothing remains.
    pub fn average_price<L: Borrow<Lot>>(&self, lots: &[L]) -> Decimal {
        let remaining = self.remaining_quantity(lots);
        if remaining == 0 {
            return Decimal::ZERO;
        }
        self.remaining_cost(lots) / Decimal::from(remaining)
    }

    /// Σ remaining × purchase price
    pub fn remaining_cost<L: Borrow<Lot>>(&self, lots: &[L]) -> Decimal {
        lots.iter()
            .map(|l| {
                let lot = l.borrow();
                Decimal::from(lot.remaining()) * lot.purchase_price
            })
            .sum()
    }

    /// Σ remaining × effective price, where the effective price is
    /// `current_price` or, when absent, each lot's own purchase price.
    pub fn current_value<L: Borrow<Lot>>(&self, lots: &[L], current_price: Option<Decimal>) -> Decimal {
        lots.iter()
            .map(|l| {
                let lot = l.borrow();
                Decimal::from(lot.remaining()) * current_price.unwrap_or(lot.purchase_price)
            })
            .sum()
    }

    /// Σ remaining × (effective price − purchase price) over lots still held.
    pub fn unrealized_profit<L: Borrow<Lot>>(&self, lots: &[L], current_price: Option<Decimal>) -> Decimal {
        lots.iter()
            .map(|l| l.borrow())
            .filter(|lot| lot.remaining() > 0)
            .map(|lot| {
                let effective = current_price.unwrap_or(lot.purchase_price);
                Decimal::from(lot.remaining()) * (effective - lot.purchase_price)
            })
            .sum()
    }

    /// Σ sale.quantity × (sale price − purchase price) over every sale of every lot.
    pub fn realized_profit<L: Borrow<Lot>>(&self, lots: &[L]) -> Decimal {
        self.sales_ledger(lots).iter().map(|s| s.profit).sum()
    }

    /// Every sale joined with its lot's purchase data, sorted by sale date ascending.
    pub fn sales_ledger<L: Borrow<Lot>>(&self, lots: &[L]) -> Vec<SaleRecord> {
        let mut records: Vec<SaleRecord> = lots
            .iter()
            .map(|l| l.borrow())
            .flat_map(|lot| {
                lot.sales.iter().map(move |sale| SaleRecord {
                    sale_id: sale.id,
                    lot_id: lot.id,
                    quantity: sale.quantity,
                    sale_price: sale.sale_price,
                    sold_at: sale.sold_at,
                    purchase_price: lot.purchase_price,
                    purchased_at: lot.purchased_at,
                    profit: Decimal::from(sale.quantity) * (sale.sale_price - lot.purchase_price),
                })
            })
            .collect();
        records.sort_by_key(|r| r.sold_at);
        records
    }

    /// Realized results over all sales: ledger, profit, percent, proceeds.
    pub fn realized_summary<L: Borrow<Lot>>(&self, lots: &[L]) -> RealizedSummary {
        let sales = self.sales_ledger(lots);
        let mut profit = Decimal::ZERO;
        let mut total_received = Decimal::ZERO;
        let mut cost_basis = Decimal::ZERO;
        for sale in &sales {
            let quantity = Decimal::from(sale.quantity);
            profit += sale.profit;
            total_received += quantity * sale.sale_price;
            cost_basis += quantity * sale.purchase_price;
        }
        RealizedSummary {
            sales,
            profit,
            percent_profit: percent_return(profit, cost_basis),
            total_received,
            cost_basis,
        }
    }

    /// Full summary for one ticker's lots.
    pub fn summarize<L: Borrow<Lot>>(
        &self,
        ticker: &str,
        lots: &[L],
        current_price: Option<Decimal>,
    ) -> TickerSummary {
        let total_quantity = lots.iter().map(|l| l.borrow().quantity).sum();
        let sold_quantity = lots.iter().map(|l| l.borrow().sold_quantity()).sum();
        let remaining_quantity = self.remaining_quantity(lots);
        let invested = self.remaining_cost(lots);
        let unrealized_profit = self.unrealized_profit(lots, current_price);

        let company_name = lots
            .iter()
            .map(|l| l.borrow())
            .min_by_key(|lot| lot.purchased_at)
            .map(|lot| lot.company_name.clone())
            .unwrap_or_else(|| ticker.to_string());

        TickerSummary {
            ticker: ticker.to_string(),
            company_name,
            total_quantity,
            sold_quantity,
            remaining_quantity,
            average_price: self.average_price(lots),
            current_price,
            price_source: if current_price.is_some() {
                PriceSource::Market
            } else {
                PriceSource::PurchasePrice
            },
            current_value: self.current_value(lots, current_price),
            invested,
            unrealized_profit,
            unrealized_percent: percent_return(unrealized_profit, invested),
            realized: (remaining_quantity == 0).then(|| self.realized_summary(lots)),
        }
    }

    /// Split a sale of `quantity` shares across lots, oldest purchase first.
    ///
    /// Nothing is mutated. If the lots do not hold enough shares the whole
    /// request is rejected, so callers never apply a partial sale.
    pub fn plan_fifo_sale<L: Borrow<Lot>>(
        &self,
        ticker: &str,
        lots: &[L],
        quantity: u64,
    ) -> Result<Vec<SaleAllocation>, CoreError> {
        if quantity == 0 {
            return Err(CoreError::ValidationError(
                "Sale quantity must be greater than 0".into(),
            ));
        }

        let available = self.remaining_quantity(lots);
        if quantity > available {
            return Err(CoreError::InsufficientShares {
                ticker: ticker.to_string(),
                requested: quantity,
                available,
            });
        }

        let mut ordered: Vec<&Lot> = lots.iter().map(|l| l.borrow()).collect();
        // Stable sort: lots bought at the same instant keep their recorded order.
        ordered.sort_by_key(|lot| lot.purchased_at);

        let mut left = quantity;
        let mut allocations = Vec::new();
        for lot in ordered {
            if left == 0 {
                break;
            }
            let take = left.min(lot.remaining());
            if take == 0 {
                continue;
            }
            allocations.push(SaleAllocation {
                lot_id: lot.id,
                quantity: take,
            });
            left -= take;
        }

        Ok(allocations)
    }
}

impl Default for LotAccountant {
    fn default() -> Self {
        Self::new()
    }
}

/// `profit / invested × 100`, or zero when nothing was invested or the
/// ratio does not fit in a `Decimal`.
pub fn percent_return(profit: Decimal, invested: Decimal) -> Decimal {
    profit
        .checked_div(invested)
        .and_then(|ratio| ratio.checked_mul(Decimal::ONE_HUNDRED))
        .unwrap_or(Decimal::ZERO)
}
