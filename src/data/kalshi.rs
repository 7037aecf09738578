use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use regex::Regex;
use reqwest::Client;
use serde::Deserialize;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::debug;
use crate::data::types::{DailyProbability, Market, MarketStatus};

/// One page of a series listing
#[derive(Debug, Clone, Default)]
pub struct MarketPage {
    pub markets: Vec<Market>,
    pub cursor: Option<String>,
}

/// Candlestick request window, UNIX seconds
#[derive(Debug, Clone, Copy)]
pub struct CandleWindow {
    pub start_ts: i64,
    pub end_ts: i64,
    pub period_interval: u32,
}

/// Prediction-market data access.
///
/// The collector only ever talks to this trait, so it can be driven by an
/// in-memory fake without network access.
#[async_trait]
pub trait MarketDataApi {
    async fn list_markets(
        &self,
        series_ticker: &str,
        status: Option<&str>,
        cursor: Option<&str>,
        page_size: usize,
    ) -> Result<MarketPage>;

    async fn candlesticks(
        &self,
        series_ticker: &str,
        market_ticker: &str,
        window: CandleWindow,
    ) -> Result<Vec<DailyProbability>>;
}

pub struct KalshiClient {
    client: Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct KalshiMarketsResponse {
    #[serde(default)]
    markets: Vec<KalshiMarket>,
    #[serde(default)]
    cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct KalshiMarket {
    ticker: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    open_time: Option<String>,
    #[serde(default)]
    close_time: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandlesticksResponse {
    #[serde(default)]
    candlesticks: Vec<Candle>,
}

/// Candle record in either the nested (`end_period_ts`, `price.close`) or
/// the legacy flat (`ts`, `close`) shape
#[derive(Debug, Deserialize)]
pub(crate) struct Candle {
    #[serde(default, alias = "ts")]
    end_period_ts: Option<i64>,
    #[serde(default)]
    price: Option<CandlePrice>,
    #[serde(default)]
    close: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct CandlePrice {
    #[serde(default)]
    close: Option<f64>,
}

impl Candle {
    fn close_cents(&self) -> Option<f64> {
        self.price.as_ref().and_then(|p| p.close).or(self.close)
    }

    /// Convert to (date of period end, close / 100); None when the candle
    /// has no usable timestamp or its close is off the 0..=100 scale
    pub(crate) fn to_daily(&self) -> Option<DailyProbability> {
        let ts = self.end_period_ts?;
        let close = self.close_cents()?;
        if !(0.0..=100.0).contains(&close) {
            return None;
        }
        let date = DateTime::<Utc>::from_timestamp(ts, 0)?.date_naive();
        Some(DailyProbability {
            date,
            probability: close / 100.0,
        })
    }
}

impl KalshiClient {
    pub fn new(base_url: String) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn convert_market(km: KalshiMarket) -> Market {
        Market {
            status: MarketStatus::parse(&km.status),
            open_time: km.open_time.as_deref().and_then(parse_time),
            close_time: km.close_time.as_deref().and_then(parse_time),
            ticker: km.ticker,
            title: km.title,
        }
    }
}

#[async_trait]
impl MarketDataApi for KalshiClient {
    async fn list_markets(
        &self,
        series_ticker: &str,
        status: Option<&str>,
        cursor: Option<&str>,
        page_size: usize,
    ) -> Result<MarketPage> {
        let url = format!("{}/markets", self.base_url);

        let mut query: Vec<(&str, String)> = vec![
            ("series_ticker", series_ticker.to_string()),
            ("limit", page_size.to_string()),
        ];
        if let Some(status) = status {
            query.push(("status", status.to_string()));
        }
        if let Some(cursor) = cursor {
            query.push(("cursor", cursor.to_string()));
        }

        debug!("GET {} {:?}", url, query);

        let response: KalshiMarketsResponse = self.client
            .get(&url)
            .query(&query)
            .send()
            .await
            .context("Failed to fetch markets")?
            .error_for_status()
            .context("Markets request rejected")?
            .json()
            .await
            .context("Failed to parse markets response")?;

        Ok(MarketPage {
            markets: response.markets.into_iter().map(Self::convert_market).collect(),
            cursor: response.cursor.filter(|c| !c.is_empty()),
        })
    }

    async fn candlesticks(
        &self,
        series_ticker: &str,
        market_ticker: &str,
        window: CandleWindow,
    ) -> Result<Vec<DailyProbability>> {
        let url = format!(
            "{}/series/{}/markets/{}/candlesticks",
            self.base_url, series_ticker, market_ticker
        );

        let response: CandlesticksResponse = self.client
            .get(&url)
            .query(&[
                ("start_ts", window.start_ts.to_string()),
                ("end_ts", window.end_ts.to_string()),
                ("period_interval", window.period_interval.to_string()),
            ])
            .send()
            .await
            .with_context(|| format!("Failed to fetch candles for {}", market_ticker))?
            .error_for_status()
            .with_context(|| format!("Candles request rejected for {}", market_ticker))?
            .json()
            .await
            .with_context(|| format!("Failed to parse candles for {}", market_ticker))?;

        Ok(candles_to_daily(&response.candlesticks))
    }
}

/// Dated probabilities from raw candles, date ascending
pub(crate) fn candles_to_daily(candles: &[Candle]) -> Vec<DailyProbability> {
    let mut daily: Vec<DailyProbability> = candles.iter().filter_map(Candle::to_daily).collect();
    daily.sort_by_key(|d| d.date);
    daily
}

fn parse_time(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn threshold_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)above\s*([0-9]+(?:\.[0-9]+)?)").expect("valid threshold pattern")
    })
}

/// Extract the numeric threshold from a title such as
/// "Will Core CPI YoY be above 2.9%?"
pub fn extract_threshold(title: &str) -> Option<f64> {
    threshold_regex()
        .captures(title)
        .and_then(|cap| cap[1].parse::<f64>().ok())
}

/// Earliest open and latest close across a set of markets
pub fn listing_span(markets: &[Market]) -> Option<(NaiveDate, NaiveDate)> {
    let first = markets.iter().filter_map(|m| m.open_time).min()?;
    let last = markets.iter().filter_map(|m| m.close_time).max()?;
    Some((first.date_naive(), last.date_naive()))
}
