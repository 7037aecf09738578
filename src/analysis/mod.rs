pub mod causality;
pub mod lead_lag;
pub mod panel;
pub mod regression;
pub mod stationarity;

use anyhow::Result;
use chrono::NaiveDate;
use tracing::{info, warn};
use crate::config::AnalysisConfig;
use crate::data::store::PanelSource;
use crate::data::types::{MarketPanel, ReferenceTable};
use crate::error::PipelineError;
use causality::{granger_test, CausalityOutcome, LagOutcome};
use lead_lag::{lead_lag, LeadLagReport, Leader};
use panel::{align, build_aligned_panel, probability_signal, AlignedPanel, SignalPair};
use stationarity::{adf_test, AdfResult, StationarityError};

pub const PROBABILITY_LEVEL: &str = "kalshi_prob";
pub const PROBABILITY_CHANGE: &str = "kalshi_change";

/// ADF outcome for one named series
#[derive(Debug, Clone, PartialEq)]
pub struct StationarityCheck {
    pub series: String,
    pub result: Result<AdfResult, StationarityError>,
}

impl StationarityCheck {
    fn run(series: &str, values: &[f64], significance: f64) -> Self {
        let check = Self {
            series: series.to_string(),
            result: adf_test(values, significance),
        };
        check.log();
        check
    }

    /// A test that could not run counts as non-stationary
    pub fn is_stationary(&self) -> bool {
        matches!(&self.result, Ok(r) if r.stationary)
    }

    fn log(&self) {
        match &self.result {
            Ok(r) => {
                info!(
                    "ADF {}: statistic={:.4} p={:.4} lag={} nobs={} (1%={:.4} 5%={:.4} 10%={:.4})",
                    self.series,
                    r.statistic,
                    r.p_value,
                    r.used_lag,
                    r.nobs,
                    r.critical_values.one_pct,
                    r.critical_values.five_pct,
                    r.critical_values.ten_pct
                );
                if r.stationary {
                    info!("✓ {} is stationary", self.series);
                } else {
                    info!("✗ {} is NOT stationary", self.series);
                }
            }
            Err(e) => warn!("ADF {} could not run: {}", self.series, e),
        }
    }
}

/// Series pair ready for causality testing, differenced when required
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedSignals {
    pub pair: SignalPair,
    pub probability_name: String,
    pub reference_name: String,
    pub levels: (StationarityCheck, StationarityCheck),
    /// Re-check on first differences, present only when differencing ran
    pub differenced: Option<(StationarityCheck, StationarityCheck)>,
}

/// Forward causality for one threshold of the scan
#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdResult {
    pub threshold: f64,
    pub observations: usize,
    pub differenced: bool,
    pub forward: CausalityOutcome,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisReport {
    pub threshold: f64,
    pub aligned_rows: usize,
    pub date_range: Option<(NaiveDate, NaiveDate)>,
    pub signals: PreparedSignals,
    /// Probability as the candidate cause of the reference series
    pub forward: CausalityOutcome,
    pub reverse: CausalityOutcome,
    pub lead_lag: LeadLagReport,
    pub scan: Vec<ThresholdResult>,
}

/// Check stationarity of both level series and difference them when
/// either fails
pub fn prepare_signals(
    panel: &AlignedPanel,
    column: &str,
    significance: f64,
) -> Result<PreparedSignals, PipelineError> {
    let pair = panel.signal_pair(column)?;
    let levels = (
        StationarityCheck::run(PROBABILITY_LEVEL, &pair.probability, significance),
        StationarityCheck::run(column, &pair.reference, significance),
    );

    if levels.0.is_stationary() && levels.1.is_stationary() {
        return Ok(PreparedSignals {
            pair,
            probability_name: PROBABILITY_LEVEL.to_string(),
            reference_name: column.to_string(),
            levels,
            differenced: None,
        });
    }

    let diffed = panel.differenced();
    let pair = diffed.signal_pair(column)?;
    let reference_name = format!("{}_change", column);
    info!("Converted to first differences: {} observations", pair.len());

    let recheck = (
        StationarityCheck::run(PROBABILITY_CHANGE, &pair.probability, significance),
        StationarityCheck::run(&reference_name, &pair.reference, significance),
    );

    Ok(PreparedSignals {
        pair,
        probability_name: PROBABILITY_CHANGE.to_string(),
        reference_name,
        levels,
        differenced: Some(recheck),
    })
}

/// Full analysis over the tables served by `source`
pub fn run(source: &impl PanelSource, cfg: &AnalysisConfig) -> Result<AnalysisReport> {
    let market = source.market_panel()?;
    let reference = source.reference_table()?;
    if market.is_empty() {
        return Err(PipelineError::EmptyPanel.into());
    }

    info!("Available thresholds: {:?}", market.thresholds());
    let panel = build_aligned_panel(&market, &reference, &cfg.threshold)?;
    let dates = panel.dates();
    let date_range = dates.first().copied().zip(dates.last().copied());
    info!("Using threshold: {}", panel.threshold);
    info!("Merged dataset: {} observations", panel.len());
    if let Some((first, last)) = date_range {
        info!("Date range: {} to {}", first, last);
    }

    let signals = prepare_signals(&panel, &cfg.target_column, cfg.significance)?;
    let prob = (signals.probability_name.as_str(), signals.pair.probability.as_slice());
    let refr = (signals.reference_name.as_str(), signals.pair.reference.as_slice());

    let forward = granger_test(prob, refr, cfg.max_granger_lag, cfg.significance);
    log_causality(&forward, prob.0, refr.0);
    let reverse = granger_test(refr, prob, cfg.max_granger_lag, cfg.significance);
    log_causality(&reverse, refr.0, prob.0);

    let lead_lag = lead_lag(prob, refr, cfg.max_lead_lag);
    log_lead_lag(&lead_lag);

    let scan = if cfg.scan_thresholds {
        scan_thresholds(&market, &reference, cfg)
    } else {
        Vec::new()
    };

    Ok(AnalysisReport {
        threshold: panel.threshold,
        aligned_rows: panel.len(),
        date_range,
        signals,
        forward,
        reverse,
        lead_lag,
        scan,
    })
}

/// Forward causality for every threshold in the panel
pub fn scan_thresholds(
    market: &MarketPanel,
    reference: &ReferenceTable,
    cfg: &AnalysisConfig,
) -> Vec<ThresholdResult> {
    let mut results = Vec::new();
    for threshold in market.thresholds() {
        let signal = probability_signal(market, threshold);
        let prepared = align(&signal, reference, threshold)
            .and_then(|panel| prepare_signals(&panel, &cfg.target_column, cfg.significance));
        let signals = match prepared {
            Ok(s) => s,
            Err(e) => {
                warn!("Threshold {} skipped: {}", threshold, e);
                continue;
            }
        };

        let forward = granger_test(
            (signals.probability_name.as_str(), signals.pair.probability.as_slice()),
            (signals.reference_name.as_str(), signals.pair.reference.as_slice()),
            cfg.max_granger_lag,
            cfg.significance,
        );
        match forward.report().and_then(|r| r.strongest()) {
            Some((lag, f)) => info!(
                "Threshold {}: min p={:.4} at lag {} ({} obs)",
                threshold,
                f.p_value,
                lag,
                signals.pair.len()
            ),
            None => info!("Threshold {}: no computable lag", threshold),
        }

        results.push(ThresholdResult {
            threshold,
            observations: signals.pair.len(),
            differenced: signals.differenced.is_some(),
            forward,
        });
    }
    results
}

fn log_causality(outcome: &CausalityOutcome, cause: &str, effect: &str) {
    info!("Granger causality: does {} → {}?", cause, effect);
    let report = match outcome {
        CausalityOutcome::InsufficientData { observations, required } => {
            warn!(
                "✗ Not enough observations ({}) for the lag window, need {}",
                observations, required
            );
            return;
        }
        CausalityOutcome::Tested(report) => report,
    };

    for lag in &report.lags {
        match &lag.outcome {
            LagOutcome::Computed(f) => info!(
                "  lag {}: F={:.4} p={:.4} {}",
                lag.lag,
                f.f_statistic,
                f.p_value,
                if f.p_value < report.significance { "significant" } else { "not significant" }
            ),
            LagOutcome::Skipped { reason } => warn!("  lag {}: skipped ({})", lag.lag, reason),
        }
    }

    match report.strongest() {
        Some((lag, f)) if report.granger_causes() => info!(
            "✓ {} DOES Granger-cause {} (min p={:.4} at lag {})",
            cause, effect, f.p_value, lag
        ),
        Some((lag, f)) => info!(
            "✗ {} does NOT Granger-cause {} (min p={:.4} at lag {})",
            cause, effect, f.p_value, lag
        ),
        None => warn!("No lag could be tested for {} → {}", cause, effect),
    }
}

fn log_lead_lag(report: &LeadLagReport) {
    for lc in report.correlations.iter().filter(|lc| lc.lag.abs() <= 5) {
        match lc.correlation {
            Some(c) => info!("  lag {:>3}: {:.4}", lc.lag, c),
            None => info!("  lag {:>3}: n/a", lc.lag),
        }
    }

    let Some((lag, corr)) = report.peak() else {
        warn!("No lag produced a correlation");
        return;
    };
    info!("Maximum correlation {:.4} at lag {}", corr, lag);
    match report.leader() {
        Some(Leader::First(days)) => info!("✓ {} leads {} by {} days", report.first, report.second, days),
        Some(Leader::Second(days)) => info!("✓ {} leads {} by {} days", report.second, report.first, days),
        _ => info!("Contemporaneous relationship, no clear leader"),
    }
}
