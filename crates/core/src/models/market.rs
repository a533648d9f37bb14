use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Detailed quote for a ticker, in the provider-independent shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub symbol: String,
    pub price: Decimal,

    /// price − previous_close
    pub change: Decimal,

    /// Two-decimal percent string, e.g. "-1.25%"
    pub change_percent: String,

    pub volume: u64,
    pub previous_close: Decimal,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub latest_trading_day: Option<NaiveDate>,

    /// Name of the provider that produced this quote
    pub source: String,
}

impl Quote {
    /// Format a change ratio the way providers display it: `"{:.2}%"`.
    pub fn format_change_percent(change: Decimal, previous_close: Decimal) -> String {
        let pct = change
            .checked_div(previous_close)
            .and_then(|ratio| ratio.checked_mul(Decimal::ONE_HUNDRED))
            .unwrap_or(Decimal::ZERO);
        format!("{:.2}%", pct.round_dp(2))
    }
}

/// Company metadata. Changes rarely, so it is cached the longest.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompanyOverview {
    pub symbol: String,
    pub name: String,
    pub description: String,
    pub exchange: String,
    pub currency: String,
    pub country: String,
    pub sector: String,
    pub industry: String,
    pub market_cap: Option<u64>,
    pub employee_count: Option<u64>,
    pub website: String,
    pub source: String,
}

/// One hit from a symbol search.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SymbolMatch {
    pub symbol: String,
    pub name: String,

    /// Instrument type as reported by the provider ("Equity", "ETF", ...)
    pub kind: String,

    pub region: String,
    pub exchange: String,
    pub currency: String,
}

/// Maximum number of search matches returned to callers.
pub const MAX_SEARCH_RESULTS: usize = 10;
