use async_trait::async_trait;
use chrono::NaiveDate;
use log::{debug, warn};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::str::FromStr;
use std::time::Duration;

use crate::errors::CoreError;
use crate::models::market::{CompanyOverview, Quote, SymbolMatch, MAX_SEARCH_RESULTS};
use super::traits::{DataRequest, MarketData, MarketDataProvider};

const BASE_URL: &str = "https://www.alphavantage.co/query";
const PROVIDER_NAME: &str = "Alpha Vantage";

/// Alpha Vantage API provider, used as the fallback after Yahoo Finance.
///
/// - **Free tier**: 5 requests/minute, 25/day (across ALL endpoints).
/// - **Requires**: API key (settings key "alphavantage").
/// - **Endpoints**: GLOBAL_QUOTE (price, quote), OVERVIEW, SYMBOL_SEARCH.
///
/// When the quota is exhausted Alpha Vantage still answers 200 OK, with a
/// `Note` or `Information` message instead of data. Those answers become
/// [`CoreError::RateLimited`]; unknown symbols are "no data".
pub struct AlphaVantageProvider {
    client: Client,
    api_key: String,
}

impl AlphaVantageProvider {
    pub fn new(api_key: String, timeout: Duration) -> Self {
        Self {
            client: Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_else(|_| Client::new()),
            api_key,
        }
    }

    async fn query(&self, params: &[(&str, &str)]) -> Result<String, CoreError> {
        let body = self
            .client
            .get(BASE_URL)
            .query(params)
            .query(&[("apikey", self.api_key.as_str())])
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        Ok(body)
    }
}

// ── Alpha Vantage API response types ────────────────────────────────

/// Fields Alpha Vantage uses instead of data when throttling or rejecting a call.
#[derive(Deserialize, Default)]
struct Notices {
    #[serde(rename = "Note")]
    note: Option<String>,
    #[serde(rename = "Information")]
    information: Option<String>,
    #[serde(rename = "Error Message")]
    error_message: Option<String>,
}

impl Notices {
    /// Fail with `RateLimited` on a quota notice. Returns `true` when the
    /// call was rejected outright, which counts as "no data".
    fn check(&self, what: &str) -> Result<bool, CoreError> {
        match (&self.note, &self.information, &self.error_message) {
            (Some(msg), _, _) | (_, Some(msg), _) => {
                debug!("{PROVIDER_NAME} declined {what}: {msg}");
                Err(CoreError::RateLimited(PROVIDER_NAME.into()))
            }
            (_, _, Some(msg)) => {
                warn!("{PROVIDER_NAME} rejected {what}: {msg}");
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[derive(Deserialize)]
struct GlobalQuoteResponse {
    #[serde(rename = "Global Quote")]
    global_quote: Option<GlobalQuote>,
    #[serde(flatten)]
    notices: Notices,
}

#[derive(Deserialize)]
struct GlobalQuote {
    #[serde(rename = "01. symbol")]
    symbol: Option<String>,
    #[serde(rename = "02. open")]
    open: Option<String>,
    #[serde(rename = "03. high")]
    high: Option<String>,
    #[serde(rename = "04. low")]
    low: Option<String>,
    #[serde(rename = "05. price")]
    price: Option<String>,
    #[serde(rename = "06. volume")]
    volume: Option<String>,
    #[serde(rename = "07. latest trading day")]
    latest_trading_day: Option<String>,
    #[serde(rename = "08. previous close")]
    previous_close: Option<String>,
    #[serde(rename = "09. change")]
    change: Option<String>,
    #[serde(rename = "10. change percent")]
    change_percent: Option<String>,
}

#[derive(Deserialize)]
struct OverviewResponse {
    #[serde(rename = "Symbol")]
    symbol: Option<String>,
    #[serde(rename = "Name")]
    name: Option<String>,
    #[serde(rename = "Description")]
    description: Option<String>,
    #[serde(rename = "Exchange")]
    exchange: Option<String>,
    #[serde(rename = "Currency")]
    currency: Option<String>,
    #[serde(rename = "Country")]
    country: Option<String>,
    #[serde(rename = "Sector")]
    sector: Option<String>,
    #[serde(rename = "Industry")]
    industry: Option<String>,
    #[serde(rename = "MarketCapitalization")]
    market_cap: Option<String>,
    #[serde(rename = "FullTimeEmployees")]
    employees: Option<String>,
    #[serde(rename = "OfficialSite", alias = "Website")]
    website: Option<String>,
    #[serde(flatten)]
    notices: Notices,
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(rename = "bestMatches")]
    best_matches: Option<Vec<SearchMatch>>,
    #[serde(flatten)]
    notices: Notices,
}

#[derive(Deserialize)]
struct SearchMatch {
    #[serde(rename = "1. symbol")]
    symbol: String,
    #[serde(rename = "2. name", default)]
    name: String,
    #[serde(rename = "3. type", default)]
    kind: String,
    #[serde(rename = "4. region", default)]
    region: String,
    #[serde(rename = "8. currency", default)]
    currency: String,
}

// ── Response mapping ────────────────────────────────────────────────

fn parse_decimal(raw: Option<&str>) -> Option<Decimal> {
    raw.map(str::trim)
        .filter(|s| !s.is_empty())
        .and_then(|s| Decimal::from_str(s).ok())
}

fn parse_count(raw: Option<&str>) -> Option<u64> {
    raw.and_then(|s| s.trim().parse().ok())
}

fn text(raw: Option<String>) -> String {
    raw.filter(|s| s != "None" && s != "-").unwrap_or_default()
}

fn parse_quote(body: &str, ticker: &str) -> Result<Option<Quote>, CoreError> {
    let resp: GlobalQuoteResponse = serde_json::from_str(body)?;
    if resp.notices.check(&format!("quote for {ticker}"))? {
        return Ok(None);
    }
    let Some(q) = resp.global_quote else {
        return Ok(None);
    };
    // Unknown symbols come back as an empty "Global Quote" object.
    let Some(price) = parse_decimal(q.price.as_deref()).filter(|p| *p > Decimal::ZERO) else {
        return Ok(None);
    };

    let previous_close = parse_decimal(q.previous_close.as_deref()).unwrap_or(price);
    let change = parse_decimal(q.change.as_deref()).unwrap_or(price - previous_close);
    let change_percent = q
        .change_percent
        .as_deref()
        .and_then(|s| parse_decimal(Some(s.trim_end_matches('%'))))
        .map(|pct| format!("{:.2}%", pct.round_dp(2)))
        .unwrap_or_else(|| Quote::format_change_percent(change, previous_close));

    Ok(Some(Quote {
        symbol: q.symbol.unwrap_or_else(|| ticker.to_string()).to_uppercase(),
        price,
        change,
        change_percent,
        volume: parse_count(q.volume.as_deref()).unwrap_or(0),
        previous_close,
        open: parse_decimal(q.open.as_deref()).unwrap_or(price),
        high: parse_decimal(q.high.as_deref()).unwrap_or(price),
        low: parse_decimal(q.low.as_deref()).unwrap_or(price),
        latest_trading_day: q
            .latest_trading_day
            .as_deref()
            .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok()),
        source: PROVIDER_NAME.to_string(),
    }))
}

fn parse_overview(body: &str, ticker: &str) -> Result<Option<CompanyOverview>, CoreError> {
    let resp: OverviewResponse = serde_json::from_str(body)?;
    if resp.notices.check(&format!("overview for {ticker}"))? {
        return Ok(None);
    }
    // An unknown symbol yields `{}`.
    let (Some(symbol), Some(name)) = (resp.symbol, resp.name) else {
        return Ok(None);
    };

    Ok(Some(CompanyOverview {
        symbol: symbol.to_uppercase(),
        name,
        description: text(resp.description),
        exchange: text(resp.exchange),
        currency: text(resp.currency),
        country: text(resp.country),
        sector: text(resp.sector),
        industry: text(resp.industry),
        market_cap: parse_count(resp.market_cap.as_deref()),
        employee_count: parse_count(resp.employees.as_deref()),
        website: text(resp.website),
        source: PROVIDER_NAME.to_string(),
    }))
}

fn parse_search(body: &str, query: &str) -> Result<Option<Vec<SymbolMatch>>, CoreError> {
    let resp: SearchResponse = serde_json::from_str(body)?;
    if resp.notices.check(&format!("search for '{query}'"))? {
        return Ok(None);
    }

    let matches: Vec<SymbolMatch> = resp
        .best_matches
        .unwrap_or_default()
        .into_iter()
        .take(MAX_SEARCH_RESULTS)
        .map(|m| SymbolMatch {
            symbol: m.symbol,
            name: m.name,
            kind: m.kind,
            region: m.region,
            exchange: String::new(),
            currency: m.currency,
        })
        .collect();

    Ok((!matches.is_empty()).then_some(matches))
}

#[async_trait]
impl MarketDataProvider for AlphaVantageProvider {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    async fn fetch(&self, request: &DataRequest) -> Result<Option<MarketData>, CoreError> {
        match request {
            DataRequest::Price(ticker) => {
                let body = self.query(&[("function", "GLOBAL_QUOTE"), ("symbol", ticker.as_str())]).await?;
                Ok(parse_quote(&body, ticker)?.map(|q| MarketData::Price(q.price)))
            }
            DataRequest::Quote(ticker) => {
                let body = self.query(&[("function", "GLOBAL_QUOTE"), ("symbol", ticker.as_str())]).await?;
                Ok(parse_quote(&body, ticker)?.map(MarketData::Quote))
            }
            DataRequest::Overview(ticker) => {
                let body = self.query(&[("function", "OVERVIEW"), ("symbol", ticker.as_str())]).await?;
                Ok(parse_overview(&body, ticker)?.map(MarketData::Overview))
            }
            DataRequest::Search(query) => {
                let body = self
                    .query(&[("function", "SYMBOL_SEARCH"), ("keywords", query.as_str())])
                    .await?;
                Ok(parse_search(&body, query)?.map(MarketData::Search))
            }
        }
    }
}
