use chrono::NaiveDate;
use tracing::{info, warn};
use crate::collect::markets::list_series;
use crate::data::kalshi::{listing_span, MarketDataApi};
use crate::data::types::Market;

const SAMPLE_TITLES: usize = 5;

/// How much resolved history a candidate series offers
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesSurvey {
    pub series: String,
    pub total: usize,
    pub terminal: usize,
    pub active: usize,
    pub span: Option<(NaiveDate, NaiveDate)>,
    pub samples: Vec<String>,
}

impl SeriesSurvey {
    pub fn from_markets(series: &str, markets: &[Market]) -> Self {
        let terminal: Vec<&Market> = markets.iter().filter(|m| m.status.is_terminal()).collect();
        Self {
            series: series.to_string(),
            total: markets.len(),
            terminal: terminal.len(),
            active: markets.iter().filter(|m| m.status.is_active()).count(),
            span: listing_span(markets),
            samples: terminal
                .iter()
                .take(SAMPLE_TITLES)
                .map(|m| format!("{}: {}", m.ticker, m.title.chars().take(60).collect::<String>()))
                .collect(),
        }
    }

    pub fn has_history(&self) -> bool {
        self.terminal > 0
    }
}

/// List each candidate series and summarise it. Series the API rejects are
/// logged and left out.
pub async fn survey_series<A: MarketDataApi + Sync>(
    api: &A,
    candidates: &[String],
    limit: usize,
) -> Vec<SeriesSurvey> {
    let mut surveys = Vec::new();

    for series in candidates {
        let markets = match list_series(api, series, None, limit).await {
            Ok(m) => m,
            Err(e) => {
                warn!("{}: not found or error ({:#})", series, e);
                continue;
            }
        };
        if markets.is_empty() {
            info!("{}: no markets", series);
            continue;
        }

        let survey = SeriesSurvey::from_markets(series, &markets);
        info!(
            "{}: {} markets, {} settled, {} active",
            survey.series, survey.total, survey.terminal, survey.active
        );
        if let Some((first, last)) = survey.span {
            info!("  date range: {} to {}", first, last);
        }
        if survey.has_history() {
            info!("  ✓ has historical data");
        }
        for sample in &survey.samples {
            info!("    {}", sample);
        }
        surveys.push(survey);
    }

    surveys
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collect::testing::{market, FakeMarketApi};
    use crate::data::types::MarketStatus;
    use chrono::{TimeZone, Utc};

    #[tokio::test]
    async fn test_survey_counts_and_span() {
        let mut settled = market("FED-A", "Fed funds above 5.25", MarketStatus::Finalized);
        settled.open_time = Some(Utc.with_ymd_and_hms(2023, 1, 10, 0, 0, 0).unwrap());
        settled.close_time = Some(Utc.with_ymd_and_hms(2023, 3, 1, 0, 0, 0).unwrap());
        let mut live = market("FED-B", "Fed funds above 5.5", MarketStatus::Active);
        live.open_time = Some(Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap());
        live.close_time = Some(Utc.with_ymd_and_hms(2024, 9, 18, 0, 0, 0).unwrap());

        let api = FakeMarketApi::with_series(vec![
            ("KXFED", vec![settled, live]),
            ("KXU3", Vec::new()),
        ]);
        let candidates = vec!["KXFED".to_string(), "KXU3".to_string(), "NOPE".to_string()];

        let surveys = survey_series(&api, &candidates, 100).await;

        assert_eq!(surveys.len(), 1);
        let fed = &surveys[0];
        assert_eq!((fed.total, fed.terminal, fed.active), (2, 1, 1));
        assert!(fed.has_history());
        assert_eq!(
            fed.span,
            Some((
                NaiveDate::from_ymd_opt(2023, 1, 10).unwrap(),
                NaiveDate::from_ymd_opt(2024, 9, 18).unwrap()
            ))
        );
        assert_eq!(fed.samples, vec!["FED-A: Fed funds above 5.25"]);
    }
}
