use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One market's closing probability on one day
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketObservation {
    pub date: NaiveDate,
    pub ticker: String,
    pub threshold: f64,
    #[serde(alias = "prob_close")]
    pub probability: f64,
    #[serde(default)]
    pub title: String,
}

/// Long-format panel of every threshold market in a series
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MarketPanel {
    pub observations: Vec<MarketObservation>,
}

impl MarketPanel {
    /// Orders by date; rows sharing a date keep their input order, so the
    /// later row wins when one threshold is quoted twice that day
    pub fn new(mut observations: Vec<MarketObservation>) -> Self {
        observations.sort_by_key(|o| o.date);
        Self { observations }
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    /// Distinct thresholds, ascending
    pub fn thresholds(&self) -> Vec<f64> {
        let mut thresholds: Vec<f64> = self.observations.iter().map(|o| o.threshold).collect();
        thresholds.sort_by(f64::total_cmp);
        thresholds.dedup();
        thresholds
    }

    pub fn date_range(&self) -> Option<(NaiveDate, NaiveDate)> {
        let first = self.observations.iter().map(|o| o.date).min()?;
        let last = self.observations.iter().map(|o| o.date).max()?;
        Some((first, last))
    }
}

/// Wide table of daily reference closes keyed by date.
///
/// Every row holds one slot per column; a symbol without a close that day
/// leaves its slot empty.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReferenceTable {
    pub columns: Vec<String>,
    pub rows: BTreeMap<NaiveDate, Vec<Option<f64>>>,
}

impl ReferenceTable {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: BTreeMap::new(),
        }
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Append a whole column of closes, widening every existing row
    pub fn push_column(&mut self, name: &str, closes: &[(NaiveDate, f64)]) {
        let idx = self.columns.len();
        self.columns.push(name.to_string());
        let width = self.columns.len();

        for slots in self.rows.values_mut() {
            slots.resize(width, None);
        }
        for (date, close) in closes {
            let slots = self.rows.entry(*date).or_insert_with(|| vec![None; width]);
            slots[idx] = Some(*close);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Market listing as the collectors need it
#[derive(Debug, Clone, PartialEq)]
pub struct Market {
    pub ticker: String,
    pub title: String,
    pub status: MarketStatus,
    pub open_time: Option<DateTime<Utc>>,
    pub close_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarketStatus {
    Active,
    Closed,
    Settled,
    Finalized,
    Determined,
    Other(String),
}

impl MarketStatus {
    pub fn parse(raw: &str) -> Self {
        match raw.to_ascii_lowercase().as_str() {
            "active" | "open" => MarketStatus::Active,
            "closed" => MarketStatus::Closed,
            "settled" => MarketStatus::Settled,
            "finalized" => MarketStatus::Finalized,
            "determined" => MarketStatus::Determined,
            other => MarketStatus::Other(other.to_string()),
        }
    }

    /// Resolved markets carry their full trading history
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            MarketStatus::Settled | MarketStatus::Finalized | MarketStatus::Determined
        )
    }

    pub fn is_active(&self) -> bool {
        matches!(self, MarketStatus::Active)
    }
}

/// Candle close converted to a dated probability
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DailyProbability {
    pub date: NaiveDate,
    pub probability: f64,
}
