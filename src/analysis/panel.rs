use chrono::NaiveDate;
use crate::config::ThresholdPolicy;
use crate::data::types::{MarketPanel, ReferenceTable};
use crate::error::PipelineError;

const THRESHOLD_EPSILON: f64 = 1e-9;

impl ThresholdPolicy {
    /// Pick the representative threshold from distinct ascending thresholds
    pub fn select(&self, thresholds: &[f64]) -> Result<f64, PipelineError> {
        if thresholds.is_empty() {
            return Err(PipelineError::EmptyPanel);
        }
        match self {
            ThresholdPolicy::Median => Ok(thresholds[thresholds.len() / 2]),
            ThresholdPolicy::Fixed(wanted) => thresholds
                .iter()
                .copied()
                .find(|t| (t - wanted).abs() < THRESHOLD_EPSILON)
                .ok_or(PipelineError::ThresholdNotFound(*wanted)),
        }
    }
}

/// Sort by date and keep the last value seen for each date
pub fn dedup_keep_last(mut series: Vec<(NaiveDate, f64)>) -> Vec<(NaiveDate, f64)> {
    // Stable sort keeps input order among equal dates
    series.sort_by_key(|(date, _)| *date);
    let mut out: Vec<(NaiveDate, f64)> = Vec::with_capacity(series.len());
    for (date, value) in series {
        match out.last_mut() {
            Some(last) if last.0 == date => last.1 = value,
            _ => out.push((date, value)),
        }
    }
    out
}

/// Daily probability series for one threshold, one value per date
pub fn probability_signal(panel: &MarketPanel, threshold: f64) -> Vec<(NaiveDate, f64)> {
    let raw = panel
        .observations
        .iter()
        .filter(|o| (o.threshold - threshold).abs() < THRESHOLD_EPSILON)
        .map(|o| (o.date, o.probability))
        .collect();
    dedup_keep_last(raw)
}

#[derive(Debug, Clone, PartialEq)]
pub struct AlignedRow {
    pub date: NaiveDate,
    pub probability: f64,
    pub reference: Vec<Option<f64>>,
}

/// One probability signal joined on date with the reference table
#[derive(Debug, Clone, PartialEq)]
pub struct AlignedPanel {
    pub threshold: f64,
    pub columns: Vec<String>,
    pub rows: Vec<AlignedRow>,
    pub differenced: bool,
}

/// The two series the statistical tests consume, missing rows removed
#[derive(Debug, Clone, PartialEq)]
pub struct SignalPair {
    pub dates: Vec<NaiveDate>,
    pub probability: Vec<f64>,
    pub reference: Vec<f64>,
    pub reference_name: String,
}

impl SignalPair {
    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }
}

/// Inner join on date; only dates present in both inputs survive
pub fn align(
    signal: &[(NaiveDate, f64)],
    reference: &ReferenceTable,
    threshold: f64,
) -> Result<AlignedPanel, PipelineError> {
    let rows: Vec<AlignedRow> = signal
        .iter()
        .filter_map(|(date, probability)| {
            reference.rows.get(date).map(|slots| AlignedRow {
                date: *date,
                probability: *probability,
                reference: slots.clone(),
            })
        })
        .collect();

    if rows.is_empty() {
        return Err(PipelineError::NoOverlap);
    }

    Ok(AlignedPanel {
        threshold,
        columns: reference.columns.clone(),
        rows,
        differenced: false,
    })
}

/// Select the signal by policy and align it with the reference table
pub fn build_aligned_panel(
    market: &MarketPanel,
    reference: &ReferenceTable,
    policy: &ThresholdPolicy,
) -> Result<AlignedPanel, PipelineError> {
    let threshold = policy.select(&market.thresholds())?;
    let signal = probability_signal(market, threshold);
    align(&signal, reference, threshold)
}

impl AlignedPanel {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn dates(&self) -> Vec<NaiveDate> {
        self.rows.iter().map(|r| r.date).collect()
    }

    pub fn probabilities(&self) -> Vec<f64> {
        self.rows.iter().map(|r| r.probability).collect()
    }

    fn column_index(&self, name: &str) -> Result<usize, PipelineError> {
        self.columns
            .iter()
            .position(|c| c == name)
            .ok_or_else(|| PipelineError::UnknownColumn(name.to_string()))
    }

    /// First differences of every numeric column; the first row is dropped
    pub fn differenced(&self) -> AlignedPanel {
        let rows = self
            .rows
            .windows(2)
            .map(|w| AlignedRow {
                date: w[1].date,
                probability: w[1].probability - w[0].probability,
                reference: w[1]
                    .reference
                    .iter()
                    .zip(&w[0].reference)
                    .map(|(cur, prev)| Some((*cur)? - (*prev)?))
                    .collect(),
            })
            .collect();

        AlignedPanel {
            threshold: self.threshold,
            columns: self.columns.clone(),
            rows,
            differenced: true,
        }
    }

    /// Probability against one reference column, rows with a gap removed
    pub fn signal_pair(&self, name: &str) -> Result<SignalPair, PipelineError> {
        let idx = self.column_index(name)?;
        let mut pair = SignalPair {
            dates: Vec::new(),
            probability: Vec::new(),
            reference: Vec::new(),
            reference_name: name.to_string(),
        };
        for row in &self.rows {
            if let Some(v) = row.reference[idx] {
                pair.dates.push(row.date);
                pair.probability.push(row.probability);
                pair.reference.push(v);
            }
        }
        Ok(pair)
    }

    /// Reference column to analyse: the configured one when present,
    /// otherwise the first column
    pub fn pick_column(&self, preferred: &str) -> Option<String> {
        if self.columns.iter().any(|c| c == preferred) {
            Some(preferred.to_string())
        } else {
            self.columns.first().cloned()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::types::MarketObservation;
    use std::collections::BTreeSet;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 2, d).unwrap()
    }

    fn obs(d: u32, threshold: f64, probability: f64) -> MarketObservation {
        MarketObservation {
            date: day(d),
            ticker: format!("KX-T{}", threshold),
            threshold,
            probability,
            title: format!("above {}", threshold),
        }
    }

    #[test]
    fn test_median_policy() {
        let policy = ThresholdPolicy::Median;
        assert_eq!(policy.select(&[2.5, 2.7, 2.9]).unwrap(), 2.7);
        // Even count takes the upper of the two middles, index len / 2
        assert_eq!(policy.select(&[2.5, 2.7, 2.9, 3.1]).unwrap(), 2.9);
        assert_eq!(policy.select(&[4.0]).unwrap(), 4.0);
        assert!(matches!(policy.select(&[]), Err(PipelineError::EmptyPanel)));
    }

    #[test]
    fn test_fixed_policy() {
        assert_eq!(ThresholdPolicy::Fixed(2.9).select(&[2.5, 2.9]).unwrap(), 2.9);
        assert!(matches!(
            ThresholdPolicy::Fixed(3.3).select(&[2.5, 2.9]),
            Err(PipelineError::ThresholdNotFound(_))
        ));
    }

    #[test]
    fn test_dedup_keeps_last_and_is_idempotent() {
        let raw = vec![(day(3), 0.3), (day(1), 0.1), (day(3), 0.35), (day(2), 0.2)];
        let once = dedup_keep_last(raw);
        assert_eq!(once, vec![(day(1), 0.1), (day(2), 0.2), (day(3), 0.35)]);
        assert_eq!(dedup_keep_last(once.clone()), once);
    }

    #[test]
    fn test_aligned_dates_are_intersection() {
        let signal = vec![(day(1), 0.1), (day(2), 0.2), (day(4), 0.4), (day(5), 0.5)];
        let mut reference = ReferenceTable::new(Vec::new());
        reference.push_column("VIX", &[(day(2), 12.0), (day(3), 13.0), (day(5), 15.0)]);

        let panel = align(&signal, &reference, 2.7).unwrap();

        let left: BTreeSet<_> = signal.iter().map(|s| s.0).collect();
        let right: BTreeSet<_> = reference.rows.keys().copied().collect();
        let expected: Vec<_> = left.intersection(&right).copied().collect();
        assert_eq!(panel.dates(), expected);
    }

    #[test]
    fn test_no_overlap_is_an_error() {
        let mut reference = ReferenceTable::new(Vec::new());
        reference.push_column("VIX", &[(day(9), 12.0)]);
        assert!(matches!(
            align(&[(day(1), 0.1)], &reference, 2.7),
            Err(PipelineError::NoOverlap)
        ));
    }

    #[test]
    fn test_build_panel_uses_selected_threshold() {
        let market = MarketPanel::new(vec![
            obs(1, 2.5, 0.9),
            obs(1, 2.7, 0.5),
            obs(1, 2.9, 0.1),
            obs(2, 2.7, 0.55),
            obs(2, 2.7, 0.6),
        ]);
        let mut reference = ReferenceTable::new(Vec::new());
        reference.push_column("VIX", &[(day(1), 13.0), (day(2), 14.0)]);

        let panel = build_aligned_panel(&market, &reference, &ThresholdPolicy::Median).unwrap();
        assert_eq!(panel.threshold, 2.7);
        assert_eq!(panel.probabilities(), vec![0.5, 0.6]);
    }

    #[test]
    fn test_differencing_drops_one_row() {
        let mut reference = ReferenceTable::new(Vec::new());
        reference.push_column("VIX", &[(day(1), 10.0), (day(2), 12.0), (day(4), 11.0)]);
        reference.push_column("VIX1D", &[(day(2), 8.0), (day(3), 9.0), (day(4), 9.5)]);
        let signal = vec![(day(1), 0.2), (day(2), 0.25), (day(3), 0.5), (day(4), 0.4)];
        let panel = align(&signal, &reference, 2.7).unwrap();

        let diffed = panel.differenced();
        assert_eq!(diffed.len(), panel.len() - 1);
        assert!(diffed.differenced);
        assert_eq!(diffed.dates(), vec![day(2), day(3), day(4)]);
        assert!((diffed.rows[0].probability - 0.05).abs() < 1e-12);
        assert_eq!(diffed.rows[0].reference, vec![Some(2.0), None]);
        assert_eq!(diffed.rows[1].reference, vec![None, Some(1.0)]);
        assert_eq!(diffed.rows[2].reference, vec![None, Some(0.5)]);
    }

    #[test]
    fn test_differencing_is_order_sensitive() {
        let mut reference = ReferenceTable::new(Vec::new());
        reference.push_column("VIX", &[(day(1), 10.0), (day(2), 12.0)]);
        let panel = align(&[(day(1), 0.2), (day(2), 0.6)], &reference, 2.7).unwrap();

        let mut reversed = panel.clone();
        reversed.rows.reverse();
        assert!((panel.differenced().rows[0].probability - 0.4).abs() < 1e-12);
        assert!((reversed.differenced().rows[0].probability + 0.4).abs() < 1e-12);
    }

    #[test]
    fn test_signal_pair_skips_gaps_and_unknown_column() {
        let mut reference = ReferenceTable::new(Vec::new());
        reference.push_column("VIX", &[(day(1), 10.0), (day(3), 11.0)]);
        reference.push_column("SPX", &[(day(2), 5000.0)]);
        let signal = vec![(day(1), 0.2), (day(2), 0.3), (day(3), 0.4)];
        let panel = align(&signal, &reference, 2.7).unwrap();

        let pair = panel.signal_pair("VIX").unwrap();
        assert_eq!(pair.dates, vec![day(1), day(3)]);
        assert_eq!(pair.reference, vec![10.0, 11.0]);
        assert!(matches!(
            panel.signal_pair("VVIX"),
            Err(PipelineError::UnknownColumn(_))
        ));
        assert_eq!(panel.pick_column("VVIX"), Some("VIX".to_string()));
    }
}
