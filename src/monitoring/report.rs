use anyhow::{Context, Result};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;
use crate::analysis::causality::{CausalityOutcome, LagOutcome};
use crate::analysis::lead_lag::LeadLagReport;
use crate::analysis::{AnalysisReport, ThresholdResult};

#[derive(Debug, Serialize)]
struct GrangerRow {
    direction: String,
    lag: Option<usize>,
    f_statistic: Option<f64>,
    p_value: Option<f64>,
    significant: bool,
    note: String,
}

#[derive(Debug, Serialize)]
struct LeadLagRow {
    lag: i64,
    correlation: Option<f64>,
}

#[derive(Debug, Serialize)]
struct ScanRow {
    threshold: f64,
    observations: usize,
    differenced: bool,
    best_lag: Option<usize>,
    min_p_value: Option<f64>,
    significant: bool,
}

/// Writes analysis tables as CSV under the output directory
pub struct ReportWriter {
    output_dir: PathBuf,
}

impl ReportWriter {
    pub fn new(output_dir: impl AsRef<Path>) -> Self {
        Self {
            output_dir: output_dir.as_ref().to_path_buf(),
        }
    }

    /// Every table of one analysis run; returns the files written
    pub fn write(&self, report: &AnalysisReport) -> Result<Vec<PathBuf>> {
        fs::create_dir_all(&self.output_dir)
            .with_context(|| format!("Failed to create {}", self.output_dir.display()))?;

        let prob = &report.signals.probability_name;
        let refr = &report.signals.reference_name;
        let mut written = vec![
            self.write_granger(&[
                (&report.forward, format!("{} -> {}", prob, refr)),
                (&report.reverse, format!("{} -> {}", refr, prob)),
            ])?,
            self.write_lead_lag(&report.lead_lag)?,
        ];
        if !report.scan.is_empty() {
            written.push(self.write_scan(&report.scan)?);
        }
        Ok(written)
    }

    /// Each outcome paired with its `cause -> effect` label
    fn write_granger(&self, outcomes: &[(&CausalityOutcome, String)]) -> Result<PathBuf> {
        let rows = outcomes.iter().flat_map(|(o, direction)| granger_rows(o, direction));
        self.write_rows("granger_results.csv", rows)
    }

    fn write_lead_lag(&self, report: &LeadLagReport) -> Result<PathBuf> {
        let rows = report.correlations.iter().map(|lc| LeadLagRow {
            lag: lc.lag,
            correlation: lc.correlation,
        });
        self.write_rows("lead_lag.csv", rows)
    }

    fn write_scan(&self, scan: &[ThresholdResult]) -> Result<PathBuf> {
        let rows = scan.iter().map(|r| {
            let report = r.forward.report();
            let best = report.and_then(|rep| rep.strongest());
            ScanRow {
                threshold: r.threshold,
                observations: r.observations,
                differenced: r.differenced,
                best_lag: best.map(|(lag, _)| lag),
                min_p_value: best.map(|(_, f)| f.p_value),
                significant: report.map_or(false, |rep| rep.granger_causes()),
            }
        });
        self.write_rows("threshold_scan.csv", rows)
    }

    fn write_rows<R: Serialize>(&self, file: &str, rows: impl Iterator<Item = R>) -> Result<PathBuf> {
        let path = self.output_dir.join(file);
        let mut writer = csv::Writer::from_path(&path)
            .with_context(|| format!("Failed to create {}", path.display()))?;
        for row in rows {
            writer.serialize(row)?;
        }
        writer.flush()?;
        info!("✓ Saved {}", path.display());
        Ok(path)
    }
}

/// One row per lag; a single explanatory row when the test never ran
fn granger_rows(outcome: &CausalityOutcome, direction: &str) -> Vec<GrangerRow> {
    match outcome {
        CausalityOutcome::InsufficientData { observations, required } => vec![GrangerRow {
            direction: direction.to_string(),
            lag: None,
            f_statistic: None,
            p_value: None,
            significant: false,
            note: format!("insufficient data: {} observations, need {}", observations, required),
        }],
        CausalityOutcome::Tested(report) => report
            .lags
            .iter()
            .map(|lag| match &lag.outcome {
                LagOutcome::Computed(f) => GrangerRow {
                    direction: direction.to_string(),
                    lag: Some(lag.lag),
                    f_statistic: Some(f.f_statistic),
                    p_value: Some(f.p_value),
                    significant: f.p_value < report.significance,
                    note: String::new(),
                },
                LagOutcome::Skipped { reason } => GrangerRow {
                    direction: direction.to_string(),
                    lag: Some(lag.lag),
                    f_statistic: None,
                    p_value: None,
                    significant: false,
                    note: reason.clone(),
                },
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::causality::{CausalityReport, FTest, LagTest};
    use crate::analysis::lead_lag::LagCorrelation;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("kalshi-iv-report-{}-{}", name, std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    fn tested() -> CausalityOutcome {
        CausalityOutcome::Tested(CausalityReport {
            cause: "kalshi_change".to_string(),
            effect: "VIX_change".to_string(),
            observations: 40,
            significance: 0.05,
            lags: vec![
                LagTest {
                    lag: 1,
                    outcome: LagOutcome::Computed(FTest {
                        f_statistic: 6.5,
                        p_value: 0.015,
                        df_num: 1,
                        df_denom: 36,
                    }),
                },
                LagTest {
                    lag: 2,
                    outcome: LagOutcome::Skipped {
                        reason: "singular design matrix".to_string(),
                    },
                },
            ],
        })
    }

    #[test]
    fn test_granger_rows() {
        let rows = granger_rows(&tested(), "kalshi_change -> VIX_change");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].direction, "kalshi_change -> VIX_change");
        assert!(rows[0].significant);
        assert_eq!(rows[1].p_value, None);
        assert_eq!(rows[1].note, "singular design matrix");

        let short = CausalityOutcome::InsufficientData { observations: 9, required: 15 };
        let forward = granger_rows(&short, "kalshi_change -> VIX_change");
        let reverse = granger_rows(&short, "VIX_change -> kalshi_change");
        assert_eq!(forward.len(), 1);
        assert!(forward[0].note.contains("need 15"));
        assert_eq!(forward[0].direction, "kalshi_change -> VIX_change");
        assert_eq!(reverse[0].direction, "VIX_change -> kalshi_change");
    }

    #[test]
    fn test_csv_files() {
        let dir = scratch_dir("csv");
        let writer = ReportWriter::new(&dir);
        fs::create_dir_all(&dir).unwrap();

        let granger = writer
            .write_granger(&[(&tested(), "kalshi_change -> VIX_change".to_string())])
            .unwrap();
        let body = fs::read_to_string(granger).unwrap();
        let mut lines = body.lines();
        assert_eq!(
            lines.next(),
            Some("direction,lag,f_statistic,p_value,significant,note")
        );
        assert_eq!(lines.next(), Some("kalshi_change -> VIX_change,1,6.5,0.015,true,"));

        let lead_lag = writer
            .write_lead_lag(&LeadLagReport {
                first: "a".to_string(),
                second: "b".to_string(),
                correlations: vec![
                    LagCorrelation { lag: -1, correlation: None },
                    LagCorrelation { lag: 0, correlation: Some(0.25) },
                ],
            })
            .unwrap();
        let body = fs::read_to_string(lead_lag).unwrap();
        assert_eq!(body, "lag,correlation\n-1,\n0,0.25\n");
        let _ = fs::remove_dir_all(&dir);
    }
}
