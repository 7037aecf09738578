use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};
use crate::config::MarketsConfig;
use crate::data::kalshi::{extract_threshold, CandleWindow, MarketDataApi};
use crate::data::types::{Market, MarketObservation, MarketPanel};
use crate::error::PipelineError;

/// Largest page the list endpoint serves
const MAX_PAGE_SIZE: usize = 1000;

/// A market whose title carries a parseable threshold
#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdMarket {
    pub market: Market,
    pub threshold: f64,
}

/// Follow the listing cursor until `limit` markets or the last page
pub async fn list_series<A: MarketDataApi + Sync>(
    api: &A,
    series_ticker: &str,
    status: Option<&str>,
    limit: usize,
) -> Result<Vec<Market>> {
    let mut markets: Vec<Market> = Vec::new();
    let mut cursor: Option<String> = None;

    while markets.len() < limit {
        let page_size = (limit - markets.len()).min(MAX_PAGE_SIZE);
        let page = api
            .list_markets(series_ticker, status, cursor.as_deref(), page_size)
            .await?;
        debug!("Page of {} markets for {}", page.markets.len(), series_ticker);

        let fetched = page.markets.len();
        markets.extend(page.markets);

        match page.cursor.filter(|c| !c.is_empty()) {
            Some(next) if fetched > 0 && cursor.as_deref() != Some(next.as_str()) => {
                cursor = Some(next)
            }
            _ => break,
        }
    }

    markets.truncate(limit);
    Ok(markets)
}

/// Terminal markets, or active ones when none have resolved and the
/// fallback is enabled
pub fn select_markets(markets: Vec<Market>, fallback_to_active: bool) -> Vec<Market> {
    let (terminal, rest): (Vec<Market>, Vec<Market>) =
        markets.into_iter().partition(|m| m.status.is_terminal());
    if !terminal.is_empty() || !fallback_to_active {
        return terminal;
    }
    warn!("No settled markets found, falling back to active markets");
    rest.into_iter().filter(|m| m.status.is_active()).collect()
}

/// Attach thresholds, dropping unparseable titles; listing order is kept
pub fn threshold_markets(markets: Vec<Market>) -> Vec<ThresholdMarket> {
    markets
        .into_iter()
        .filter_map(|market| {
            extract_threshold(&market.title).map(|threshold| ThresholdMarket { market, threshold })
        })
        .collect()
}

pub struct MarketCollector<'a, A: MarketDataApi> {
    api: &'a A,
    config: &'a MarketsConfig,
}

impl<'a, A: MarketDataApi + Sync> MarketCollector<'a, A> {
    pub fn new(api: &'a A, config: &'a MarketsConfig) -> Self {
        Self { api, config }
    }

    /// Markets of the configured series worth fetching history for
    pub async fn discover(&self) -> Result<Vec<ThresholdMarket>> {
        let series = &self.config.series_ticker;
        let status = Some(self.config.status.as_str()).filter(|s| !s.is_empty());

        info!("Fetching markets for series {}", series);
        let mut listed = list_series(self.api, series, status, self.config.list_limit).await?;
        info!("Total markets found: {}", listed.len());

        let mut candidates = select_markets(listed.clone(), false);
        if candidates.is_empty() && self.config.fallback_to_active {
            // The status filter may have hidden the live markets
            if status.is_some() {
                listed = list_series(self.api, series, None, self.config.list_limit).await?;
            }
            candidates = select_markets(listed.clone(), true);
        }
        if listed.is_empty() {
            return Err(PipelineError::NoMarkets(series.clone()).into());
        }

        let mut parsed = threshold_markets(candidates);
        if parsed.is_empty() {
            return Err(PipelineError::NoThresholds(series.clone()).into());
        }
        if parsed.len() > self.config.max_markets {
            info!("Limiting to {} of {} threshold markets", self.config.max_markets, parsed.len());
            parsed.truncate(self.config.max_markets);
        }
        info!("Threshold markets found: {}", parsed.len());
        for tm in parsed.iter().take(20) {
            debug!("  {} threshold={} {}", tm.market.ticker, tm.threshold, tm.market.title);
        }
        Ok(parsed)
    }

    /// Daily history of every discovered market over the lookback window
    /// ending at `now`
    pub async fn collect(&self, now: DateTime<Utc>) -> Result<MarketPanel> {
        let mut markets = self.discover().await?;
        // Later-closing markets are fetched last so they win same-day ties
        markets.sort_by_key(|tm| tm.market.close_time);
        let start = now - Duration::days(self.config.days_back);
        let window = CandleWindow {
            start_ts: start.timestamp(),
            end_ts: now.timestamp(),
            period_interval: self.config.period_interval_minutes,
        };
        info!("Date range: {} to {}", start.date_naive(), now.date_naive());

        let delay = std::time::Duration::from_millis(self.config.request_delay_ms);
        let mut observations = Vec::new();

        for (i, tm) in markets.iter().enumerate() {
            if i > 0 && !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            let ticker = &tm.market.ticker;
            let candles = match self
                .api
                .candlesticks(&self.config.series_ticker, ticker, window)
                .await
            {
                Ok(c) => c,
                Err(e) => {
                    warn!("Failed to fetch {}: {:#}", ticker, e);
                    continue;
                }
            };

            if candles.is_empty() {
                info!("  {} (threshold={}): no data", ticker, tm.threshold);
                continue;
            }
            info!("  {} (threshold={}): ✓ {} days", ticker, tm.threshold, candles.len());

            observations.extend(candles.into_iter().map(|c| MarketObservation {
                date: c.date,
                ticker: ticker.clone(),
                threshold: tm.threshold,
                probability: c.probability,
                title: tm.market.title.clone(),
            }));
        }

        if observations.is_empty() {
            return Err(PipelineError::NoMarketData(self.config.series_ticker.clone()).into());
        }

        let panel = MarketPanel::new(observations);
        info!(
            "Collected {} observations across {} thresholds",
            panel.len(),
            panel.thresholds().len()
        );
        Ok(panel)
    }
}
