//! In-memory API fakes for collector tests.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use crate::data::kalshi::{CandleWindow, MarketDataApi, MarketPage};
use crate::data::types::{DailyProbability, Market, MarketStatus};
use crate::data::yahoo::ReferenceApi;

pub fn market(ticker: &str, title: &str, status: MarketStatus) -> Market {
    Market {
        ticker: ticker.to_string(),
        title: title.to_string(),
        status,
        open_time: None,
        close_time: None,
    }
}

#[derive(Default)]
pub struct FakeMarketApi {
    pages: Mutex<VecDeque<MarketPage>>,
    by_series: HashMap<String, Vec<Market>>,
    candles: HashMap<String, Vec<DailyProbability>>,
    failing: Vec<String>,
    cursors: Mutex<Vec<Option<String>>>,
    statuses: Mutex<Vec<Option<String>>>,
    last_window: Mutex<Option<CandleWindow>>,
    fetch_times: Mutex<Vec<tokio::time::Instant>>,
}

impl FakeMarketApi {
    /// Serves `pages` in order, then empty pages
    pub fn with_pages(pages: Vec<MarketPage>) -> Self {
        Self {
            pages: Mutex::new(pages.into()),
            ..Self::default()
        }
    }

    /// Serves one full page per series ticker
    pub fn with_series(series: Vec<(&str, Vec<Market>)>) -> Self {
        Self {
            by_series: series
                .into_iter()
                .map(|(s, m)| (s.to_string(), m))
                .collect(),
            ..Self::default()
        }
    }

    pub fn candles(mut self, ticker: &str, candles: Vec<DailyProbability>) -> Self {
        self.candles.insert(ticker.to_string(), candles);
        self
    }

    pub fn failing(mut self, ticker: &str) -> Self {
        self.failing.push(ticker.to_string());
        self
    }

    pub fn cursors(&self) -> Vec<Option<String>> {
        self.cursors.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn statuses(&self) -> Vec<Option<String>> {
        self.statuses.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn last_window(&self) -> Option<CandleWindow> {
        self.last_window.lock().ok().and_then(|w| *w)
    }

    /// When each candlestick request arrived, on the tokio clock
    pub fn fetch_times(&self) -> Vec<tokio::time::Instant> {
        self.fetch_times.lock().map(|t| t.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl MarketDataApi for FakeMarketApi {
    async fn list_markets(
        &self,
        series_ticker: &str,
        status: Option<&str>,
        cursor: Option<&str>,
        page_size: usize,
    ) -> Result<MarketPage> {
        if let Ok(mut c) = self.cursors.lock() {
            c.push(cursor.map(str::to_string));
        }
        if let Ok(mut s) = self.statuses.lock() {
            s.push(status.map(str::to_string));
        }

        if !self.by_series.is_empty() {
            return self
                .by_series
                .get(series_ticker)
                .map(|markets| MarketPage {
                    markets: markets.iter().take(page_size).cloned().collect(),
                    cursor: None,
                })
                .ok_or_else(|| anyhow!("HTTP 404 for series {}", series_ticker));
        }

        let mut pages = self.pages.lock().map_err(|_| anyhow!("poisoned"))?;
        let mut page = pages.pop_front().unwrap_or_default();
        page.markets.truncate(page_size);
        Ok(page)
    }

    async fn candlesticks(
        &self,
        _series_ticker: &str,
        market_ticker: &str,
        window: CandleWindow,
    ) -> Result<Vec<DailyProbability>> {
        if let Ok(mut w) = self.last_window.lock() {
            *w = Some(window);
        }
        if let Ok(mut t) = self.fetch_times.lock() {
            t.push(tokio::time::Instant::now());
        }
        if self.failing.iter().any(|t| t == market_ticker) {
            return Err(anyhow!("connection reset fetching {}", market_ticker));
        }
        Ok(self.candles.get(market_ticker).cloned().unwrap_or_default())
    }
}

#[derive(Default)]
pub struct FakeReferenceApi {
    closes: HashMap<String, Vec<(NaiveDate, f64)>>,
    failing: Vec<String>,
    requests: Mutex<Vec<(String, NaiveDate, NaiveDate)>>,
}

impl FakeReferenceApi {
    pub fn closes(mut self, symbol: &str, closes: Vec<(NaiveDate, f64)>) -> Self {
        self.closes.insert(symbol.to_string(), closes);
        self
    }

    pub fn failing(mut self, symbol: &str) -> Self {
        self.failing.push(symbol.to_string());
        self
    }

    pub fn requests(&self) -> Vec<(String, NaiveDate, NaiveDate)> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl ReferenceApi for FakeReferenceApi {
    async fn daily_closes(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<(NaiveDate, f64)>> {
        if let Ok(mut r) = self.requests.lock() {
            r.push((symbol.to_string(), start, end));
        }
        if self.failing.iter().any(|s| s == symbol) {
            return Err(anyhow!("Yahoo chart error for {}", symbol));
        }
        Ok(self.closes.get(symbol).cloned().unwrap_or_default())
    }
}
