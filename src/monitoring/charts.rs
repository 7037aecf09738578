use anyhow::{bail, Context, Result};
use chrono::{Duration, NaiveDate};
use plotters::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;
use crate::analysis::causality::CausalityOutcome;
use crate::analysis::lead_lag::LeadLagReport;
use crate::config::Config;

const SIGNAL_COLOR: RGBColor = RGBColor(46, 134, 171);
const REFERENCE_COLOR: RGBColor = RGBColor(162, 59, 114);

/// One bar of a bar chart
#[derive(Debug, Clone, Copy)]
struct Bar {
    center: f64,
    value: f64,
    color: RGBColor,
}

/// One named line of a dated line chart
struct Line<'a> {
    name: String,
    color: RGBColor,
    values: &'a [f64],
}

/// Writes SVG charts into the output directory
pub struct ChartWriter {
    output_dir: PathBuf,
    width: u32,
    height: u32,
}

impl ChartWriter {
    pub fn new(output_dir: impl AsRef<Path>, width: u32, height: u32) -> Self {
        Self {
            output_dir: output_dir.as_ref().to_path_buf(),
            width,
            height,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.system.output_dir, config.plots.width, config.plots.height)
    }

    /// Probability of the chosen threshold over time
    pub fn signal(&self, dates: &[NaiveDate], probability: &[f64], threshold: f64) -> Result<PathBuf> {
        self.line_chart(
            "kalshi_signal.svg",
            &format!("Kalshi: P(>= {}%)", threshold),
            "Probability",
            dates,
            &[Line {
                name: format!("P(>={})", threshold),
                color: SIGNAL_COLOR,
                values: probability,
            }],
        )
    }

    pub fn reference(&self, dates: &[NaiveDate], values: &[f64], column: &str) -> Result<PathBuf> {
        self.line_chart(
            "iv_proxy.svg",
            &format!("{} - Implied Volatility Proxy", column),
            column,
            dates,
            &[Line {
                name: column.to_string(),
                color: REFERENCE_COLOR,
                values,
            }],
        )
    }

    /// Both series as z-scores on one axis
    pub fn overlay(
        &self,
        dates: &[NaiveDate],
        probability: &[f64],
        reference: &[f64],
        column: &str,
    ) -> Result<PathBuf> {
        let (Some(prob_z), Some(ref_z)) = (zscore(probability), zscore(reference)) else {
            bail!("Cannot normalise a constant series for the overlay chart");
        };
        self.line_chart(
            "overlay_kalshi_vs_iv.svg",
            "Kalshi Probability vs Implied Volatility (Normalized)",
            "Z-Score",
            dates,
            &[
                Line {
                    name: "Kalshi (z-score)".to_string(),
                    color: SIGNAL_COLOR,
                    values: &prob_z,
                },
                Line {
                    name: format!("{} (z-score)", column),
                    color: REFERENCE_COLOR,
                    values: &ref_z,
                },
            ],
        )
    }

    /// Correlation per lag; positive lags in one colour, negative in another
    pub fn lead_lag(&self, report: &LeadLagReport) -> Result<PathBuf> {
        let bars: Vec<Bar> = report
            .correlations
            .iter()
            .filter_map(|lc| {
                lc.correlation.map(|value| Bar {
                    center: lc.lag as f64,
                    value,
                    color: if lc.lag >= 0 { SIGNAL_COLOR } else { REFERENCE_COLOR },
                })
            })
            .collect();

        self.bar_chart(
            "lead_lag_correlation.svg",
            &format!("Lead-Lag Correlation: {} vs {}", report.first, report.second),
            "Lag (days)",
            "Correlation",
            &bars,
            0.4,
            None,
        )
    }

    /// Per-lag p-values of both causality directions against the
    /// significance level
    pub fn granger_pvalues(
        &self,
        forward: &CausalityOutcome,
        reverse: &CausalityOutcome,
        significance: f64,
    ) -> Result<PathBuf> {
        let mut bars = Vec::new();
        for (outcome, offset, color) in [(forward, -0.2, SIGNAL_COLOR), (reverse, 0.2, REFERENCE_COLOR)] {
            let Some(report) = outcome.report() else {
                continue;
            };
            bars.extend(report.lags.iter().filter_map(|lag| {
                lag.f_test().map(|f| Bar {
                    center: lag.lag as f64 + offset,
                    value: f.p_value,
                    color,
                })
            }));
        }

        self.bar_chart(
            "granger_pvalues.svg",
            "Granger causality p-values (left: forward, right: reverse)",
            "Lag",
            "p-value",
            &bars,
            0.18,
            Some(significance),
        )
    }

    fn prepare(&self, file: &str) -> Result<PathBuf> {
        fs::create_dir_all(&self.output_dir)
            .with_context(|| format!("Failed to create {}", self.output_dir.display()))?;
        Ok(self.output_dir.join(file))
    }

    fn line_chart(
        &self,
        file: &str,
        title: &str,
        y_desc: &str,
        dates: &[NaiveDate],
        lines: &[Line<'_>],
    ) -> Result<PathBuf> {
        let Some(&origin) = dates.first() else {
            bail!("No data to plot for {}", file);
        };
        let offsets: Vec<i64> = dates.iter().map(|d| (*d - origin).num_days()).collect();
        let x_max = offsets.last().copied().unwrap_or(0).max(1);
        let (y_min, y_max) = padded_range(lines.iter().flat_map(|l| l.values.iter().copied()));

        let path = self.prepare(file)?;
        {
            let root = SVGBackend::new(&path, (self.width, self.height)).into_drawing_area();
            root.fill(&WHITE)?;

            let mut chart = ChartBuilder::on(&root)
                .caption(title, ("sans-serif", 22))
                .margin(20)
                .x_label_area_size(40)
                .y_label_area_size(60)
                .build_cartesian_2d(0i64..x_max, y_min..y_max)?;

            let format_date = |offset: &i64| (origin + Duration::days(*offset)).format("%Y-%m").to_string();
            chart
                .configure_mesh()
                .x_desc("Date")
                .y_desc(y_desc)
                .x_label_formatter(&format_date)
                .draw()?;

            for line in lines {
                let color = line.color;
                let points = offsets.iter().copied().zip(line.values.iter().copied());
                chart
                    .draw_series(LineSeries::new(points, color.stroke_width(2)))?
                    .label(line.name.as_str())
                    .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], color.stroke_width(2)));
            }

            if lines.len() > 1 {
                chart
                    .configure_series_labels()
                    .background_style(WHITE.mix(0.8))
                    .border_style(BLACK)
                    .draw()?;
            }
            root.present()?;
        }

        info!("✓ Saved {}", path.display());
        Ok(path)
    }

    #[allow(clippy::too_many_arguments)]
    fn bar_chart(
        &self,
        file: &str,
        title: &str,
        x_desc: &str,
        y_desc: &str,
        bars: &[Bar],
        half_width: f64,
        reference_line: Option<f64>,
    ) -> Result<PathBuf> {
        if bars.is_empty() {
            bail!("No data to plot for {}", file);
        }
        let x_min = bars.iter().map(|b| b.center).fold(f64::INFINITY, f64::min) - 1.0;
        let x_max = bars.iter().map(|b| b.center).fold(f64::NEG_INFINITY, f64::max) + 1.0;
        let values = bars.iter().map(|b| b.value).chain([0.0]).chain(reference_line);
        let (y_min, y_max) = padded_range(values);

        let path = self.prepare(file)?;
        {
            let root = SVGBackend::new(&path, (self.width, self.height)).into_drawing_area();
            root.fill(&WHITE)?;

            let mut chart = ChartBuilder::on(&root)
                .caption(title, ("sans-serif", 22))
                .margin(20)
                .x_label_area_size(40)
                .y_label_area_size(60)
                .build_cartesian_2d(x_min..x_max, y_min..y_max)?;

            chart
                .configure_mesh()
                .x_desc(x_desc)
                .y_desc(y_desc)
                .x_label_formatter(&|x: &f64| format!("{:.0}", x))
                .draw()?;

            chart.draw_series(bars.iter().map(|b| {
                Rectangle::new(
                    [(b.center - half_width, 0.0), (b.center + half_width, b.value)],
                    b.color.filled(),
                )
            }))?;
            chart.draw_series(LineSeries::new(vec![(x_min, 0.0), (x_max, 0.0)], BLACK.stroke_width(1)))?;
            if let Some(level) = reference_line {
                chart.draw_series(LineSeries::new(vec![(x_min, level), (x_max, level)], RED.stroke_width(1)))?;
            }
            root.present()?;
        }

        info!("✓ Saved {}", path.display());
        Ok(path)
    }
}

/// Standardise with the sample standard deviation; None for a constant or
/// too short series
pub fn zscore(values: &[f64]) -> Option<Vec<f64>> {
    if values.len() < 2 {
        return None;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    let sd = var.sqrt();
    if sd == 0.0 || !sd.is_finite() {
        return None;
    }
    Some(values.iter().map(|v| (v - mean) / sd).collect())
}

fn padded_range(values: impl Iterator<Item = f64>) -> (f64, f64) {
    let (lo, hi) = values
        .filter(|v| v.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)));
    if !lo.is_finite() {
        return (0.0, 1.0);
    }
    let pad = if hi > lo { (hi - lo) * 0.05 } else { 1.0 };
    (lo - pad, hi + pad)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::lead_lag::lead_lag;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("kalshi-iv-charts-{}-{}", name, std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn test_zscore() {
        let z = zscore(&[1.0, 2.0, 3.0]).unwrap();
        assert!((z[0] + 1.0).abs() < 1e-12);
        assert!(z[1].abs() < 1e-12);
        assert!((z[2] - 1.0).abs() < 1e-12);
        assert!(zscore(&[4.0, 4.0]).is_none());
        assert!(zscore(&[4.0]).is_none());
    }

    #[test]
    fn test_padded_range() {
        assert_eq!(padded_range([2.0, 2.0].into_iter()), (1.0, 3.0));
        assert_eq!(padded_range(std::iter::empty()), (0.0, 1.0));
        let (lo, hi) = padded_range([0.0, 10.0, f64::NAN].into_iter());
        assert!((lo + 0.5).abs() < 1e-12 && (hi - 10.5).abs() < 1e-12);
    }

    #[test]
    fn test_writes_svg_files() {
        let dir = scratch_dir("svg");
        let writer = ChartWriter::new(&dir, 640, 360);
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let dates: Vec<NaiveDate> = (0..30).map(|i| start + Duration::days(i)).collect();
        let prob: Vec<f64> = (0..30).map(|i| 0.4 + 0.01 * (i as f64 * 0.5).sin()).collect();
        let vix: Vec<f64> = (0..30).map(|i| 15.0 + (i as f64 * 0.3).cos()).collect();

        let signal = writer.signal(&dates, &prob, 2.7).unwrap();
        let overlay = writer.overlay(&dates, &prob, &vix, "VIX").unwrap();
        let bars = writer
            .lead_lag(&lead_lag(("kalshi_prob", &prob), ("VIX", &vix), 5))
            .unwrap();

        for path in [signal, overlay, bars] {
            let body = fs::read_to_string(&path).unwrap();
            assert!(body.contains("<svg"), "{}", path.display());
        }
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_empty_input_is_an_error() {
        let writer = ChartWriter::new(scratch_dir("empty"), 640, 360);
        assert!(writer.signal(&[], &[], 2.7).is_err());
        let skipped = CausalityOutcome::InsufficientData { observations: 3, required: 15 };
        assert!(writer.granger_pvalues(&skipped, &skipped, 0.05).is_err());
    }
}
