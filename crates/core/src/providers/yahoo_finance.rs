use async_trait::async_trait;
use chrono::NaiveDate;
use log::debug;
use reqwest::{header, Client, StatusCode};
use rust_decimal::Decimal;
use serde::Deserialize;
use tokio::sync::RwLock;
use yahoo_finance_api::{YahooConnector, YahooError};

use crate::errors::CoreError;
use crate::models::market::{CompanyOverview, Quote, SymbolMatch, MAX_SEARCH_RESULTS};
use super::traits::{DataRequest, MarketData, MarketDataProvider};

const PROVIDER_NAME: &str = "Yahoo Finance";

const COOKIE_URL: &str = "https://fc.yahoo.com";
const CRUMB_URL: &str = "https://query1.finance.yahoo.com/v1/test/getcrumb";
const QUOTE_SUMMARY_URL: &str = "https://query1.finance.yahoo.com/v10/finance/quoteSummary";
const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";

/// Session cookie plus the crumb Yahoo requires on quoteSummary calls.
#[derive(Debug, Clone)]
struct Crumb {
    cookie: String,
    value: String,
}

/// Yahoo Finance provider, first in the default chain.
///
/// - **Free**: No API key required.
/// - **Unofficial API**: throttles aggressively, so the registry gates it
///   behind a small per-minute limit.
/// - **Data**: latest bars (price, quote), quoteSummary (overview) and the
///   search endpoint (search). When quoteSummary is unavailable the overview
///   falls back to search, which only carries name and exchange.
///
/// Yahoo reports prices as `f64`; they are converted to `Decimal` here, once,
/// rounded to 4 decimal places to drop binary noise.
pub struct YahooFinanceProvider {
    connector: YahooConnector,
    http: Client,
    crumb: RwLock<Option<Crumb>>,
}

impl YahooFinanceProvider {
    pub fn new() -> Result<Self, CoreError> {
        let connector = YahooConnector::new().map_err(|e| CoreError::Api {
            provider: PROVIDER_NAME.into(),
            message: format!("Failed to create connector: {e}"),
        })?;
        let http = Client::builder().user_agent(USER_AGENT).build()?;
        Ok(Self {
            connector,
            http,
            crumb: RwLock::new(None),
        })
    }

    /// The cached crumb, or a fresh one fetched with a new session cookie.
    async fn crumb(&self) -> Result<Crumb, CoreError> {
        if let Some(crumb) = self.crumb.read().await.clone() {
            return Ok(crumb);
        }

        // fc.yahoo.com answers 404 but still sets the session cookie.
        let response = self.http.get(COOKIE_URL).send().await?;
        let cookie = response
            .headers()
            .get(header::SET_COOKIE)
            .and_then(|h| h.to_str().ok())
            .and_then(|s| s.split_once(';'))
            .map(|(value, _)| value.to_string())
            .ok_or_else(|| CoreError::Api {
                provider: PROVIDER_NAME.into(),
                message: "No session cookie in response".into(),
            })?;

        let value = self
            .http
            .get(CRUMB_URL)
            .header(header::COOKIE, &cookie)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        let crumb = Crumb { cookie, value };
        *self.crumb.write().await = Some(crumb.clone());
        debug!("Fetched a new {PROVIDER_NAME} crumb");
        Ok(crumb)
    }

    async fn latest_price(&self, ticker: &str) -> Result<Option<Decimal>, CoreError> {
        let resp = match self.connector.get_latest_quotes(ticker, "1d").await {
            Ok(resp) => resp,
            Err(e) if is_no_data(&e) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let bar = match resp.last_quote() {
            Ok(bar) => bar,
            Err(e) if is_no_data(&e) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(to_decimal(bar.close).filter(|p| *p > Decimal::ZERO))
    }

    async fn quote(&self, ticker: &str) -> Result<Option<Quote>, CoreError> {
        // Two daily bars are enough to derive the previous close.
        let resp = match self.connector.get_quote_range(ticker, "1d", "5d").await {
            Ok(resp) => resp,
            Err(e) if is_no_data(&e) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let bars = match resp.quotes() {
            Ok(bars) => bars,
            Err(e) if is_no_data(&e) => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let Some(latest) = bars.last() else {
            return Ok(None);
        };
        let Some(price) = to_decimal(latest.close).filter(|p| *p > Decimal::ZERO) else {
            return Ok(None);
        };
        let previous_close = bars
            .len()
            .checked_sub(2)
            .and_then(|i| to_decimal(bars[i].close))
            .unwrap_or(price);
        let change = price - previous_close;

        Ok(Some(Quote {
            symbol: ticker.to_uppercase(),
            price,
            change,
            change_percent: Quote::format_change_percent(change, previous_close),
            volume: latest.volume,
            previous_close,
            open: to_decimal(latest.open).unwrap_or(price),
            high: to_decimal(latest.high).unwrap_or(price),
            low: to_decimal(latest.low).unwrap_or(price),
            latest_trading_day: timestamp_to_naive_date(latest.timestamp as i64),
            source: PROVIDER_NAME.to_string(),
        }))
    }

    async fn overview(&self, ticker: &str) -> Result<Option<CompanyOverview>, CoreError> {
        match self.summary_overview(ticker).await {
            Ok(overview) => return Ok(overview),
            Err(e) => debug!("quoteSummary failed for {ticker}: {e}, trying search"),
        }
        self.search_overview(ticker).await
    }

    /// Full company profile from quoteSummary.
    async fn summary_overview(&self, ticker: &str) -> Result<Option<CompanyOverview>, CoreError> {
        let crumb = self.crumb().await?;
        let response = self
            .http
            .get(format!("{QUOTE_SUMMARY_URL}/{}", urlencoding::encode(ticker)))
            .query(&[
                ("modules", "price,summaryProfile,summaryDetail"),
                ("crumb", crumb.value.as_str()),
            ])
            .header(header::COOKIE, &crumb.cookie)
            .send()
            .await?;

        match response.status() {
            StatusCode::NOT_FOUND => return Ok(None),
            StatusCode::TOO_MANY_REQUESTS => {
                return Err(CoreError::RateLimited(PROVIDER_NAME.into()))
            }
            StatusCode::UNAUTHORIZED => {
                *self.crumb.write().await = None;
                return Err(CoreError::Api {
                    provider: PROVIDER_NAME.into(),
                    message: "Session expired".into(),
                });
            }
            _ => {}
        }

        let body = response.error_for_status()?.text().await?;
        parse_quote_summary(&body, ticker)
    }

    /// Name and exchange only, from the search endpoint.
    async fn search_overview(&self, ticker: &str) -> Result<Option<CompanyOverview>, CoreError> {
        let result = self
            .connector
            .search_ticker(&urlencoding::encode(ticker))
            .await?;

        let overview = result
            .quotes
            .iter()
            .find(|item| item.symbol.eq_ignore_ascii_case(ticker))
            .map(|item| CompanyOverview {
                symbol: ticker.to_uppercase(),
                name: display_name(&item.long_name, &item.short_name, ticker),
                exchange: item.exchange.clone(),
                source: PROVIDER_NAME.to_string(),
                ..Default::default()
            });
        Ok(overview)
    }

    async fn search(&self, query: &str) -> Result<Option<Vec<SymbolMatch>>, CoreError> {
        let result = self
            .connector
            .search_ticker(&urlencoding::encode(query))
            .await?;

        let matches: Vec<SymbolMatch> = result
            .quotes
            .iter()
            .take(MAX_SEARCH_RESULTS)
            .map(|item| SymbolMatch {
                symbol: item.symbol.clone(),
                name: display_name(&item.long_name, &item.short_name, &item.symbol),
                kind: item.quote_type.clone(),
                region: String::new(),
                exchange: item.exchange.clone(),
                currency: String::new(),
            })
            .collect();
        Ok((!matches.is_empty()).then_some(matches))
    }
}

// ── quoteSummary response types ───────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct QuoteSummaryResponse {
    quote_summary: QuoteSummary,
}

#[derive(Deserialize)]
struct QuoteSummary {
    // `null` when Yahoo reports an error.
    #[serde(default)]
    result: Option<Vec<QuoteSummaryResult>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct QuoteSummaryResult {
    #[serde(default)]
    price: SummaryPrice,
    #[serde(default)]
    summary_profile: SummaryProfile,
    #[serde(default)]
    summary_detail: SummaryDetail,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct SummaryPrice {
    short_name: Option<String>,
    long_name: Option<String>,
    exchange_name: Option<String>,
    currency: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct SummaryProfile {
    sector: Option<String>,
    industry: Option<String>,
    website: Option<String>,
    long_business_summary: Option<String>,
    country: Option<String>,
    full_time_employees: Option<u64>,
}

/// Yahoo sends `{"raw": 123.0, "fmt": "123"}`, or `{}` when unknown.
#[derive(Deserialize, Default)]
struct RawValue {
    raw: Option<f64>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct SummaryDetail {
    market_cap: Option<RawValue>,
    currency: Option<String>,
}

fn parse_quote_summary(body: &str, ticker: &str) -> Result<Option<CompanyOverview>, CoreError> {
    let resp: QuoteSummaryResponse = serde_json::from_str(body)?;
    let Some(result) = resp
        .quote_summary
        .result
        .and_then(|results| results.into_iter().next())
    else {
        return Ok(None);
    };
    let QuoteSummaryResult {
        price,
        summary_profile: profile,
        summary_detail: detail,
    } = result;

    let name = display_name(
        price.long_name.as_deref().unwrap_or_default(),
        price.short_name.as_deref().unwrap_or_default(),
        ticker,
    );
    let market_cap = detail
        .market_cap
        .and_then(|m| m.raw)
        .filter(|v| v.is_finite() && *v >= 0.0)
        .map(|v| v as u64);

    Ok(Some(CompanyOverview {
        symbol: ticker.to_uppercase(),
        name,
        description: profile.long_business_summary.unwrap_or_default(),
        exchange: price.exchange_name.unwrap_or_default(),
        currency: price.currency.or(detail.currency).unwrap_or_default(),
        country: profile.country.unwrap_or_default(),
        sector: profile.sector.unwrap_or_default(),
        industry: profile.industry.unwrap_or_default(),
        market_cap,
        employee_count: profile.full_time_employees,
        website: profile.website.unwrap_or_default(),
        source: PROVIDER_NAME.to_string(),
    }))
}

/// Yahoo signals unknown tickers through errors rather than empty payloads.
fn is_no_data(e: &YahooError) -> bool {
    matches!(e, YahooError::NoQuotes | YahooError::NoResult)
}

fn to_decimal(value: f64) -> Option<Decimal> {
    if !value.is_finite() {
        return None;
    }
    Decimal::from_f64_retain(value).map(|d| d.round_dp(4).normalize())
}

/// Convert a unix timestamp (seconds) to `chrono::NaiveDate`.
fn timestamp_to_naive_date(ts: i64) -> Option<NaiveDate> {
    chrono::DateTime::from_timestamp(ts, 0).map(|dt| dt.date_naive())
}

fn display_name(long_name: &str, short_name: &str, symbol: &str) -> String {
    [long_name, short_name]
        .into_iter()
        .map(str::trim)
        .find(|n| !n.is_empty())
        .unwrap_or(symbol)
        .to_string()
}

#[async_trait]
impl MarketDataProvider for YahooFinanceProvider {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    async fn fetch(&self, request: &DataRequest) -> Result<Option<MarketData>, CoreError> {
        match request {
            DataRequest::Price(ticker) => Ok(self.latest_price(ticker).await?.map(MarketData::Price)),
            DataRequest::Quote(ticker) => Ok(self.quote(ticker).await?.map(MarketData::Quote)),
            DataRequest::Overview(ticker) => {
                Ok(self.overview(ticker).await?.map(MarketData::Overview))
            }
            DataRequest::Search(query) => Ok(self.search(query).await?.map(MarketData::Search)),
        }
    }
}
