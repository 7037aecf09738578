//! Augmented Dickey-Fuller unit-root test.
//!
//! Regression with a constant:
//! Δy_t = α + β·y_{t-1} + Σ γ_i·Δy_{t-i} + ε_t
//! H0: β = 0 (unit root, non-stationary). The number of lagged differences
//! is chosen by AIC over a common sample, then the test regression is
//! refit on the longest sample that lag allows.

use nalgebra::DMatrix;
use statrs::distribution::{ContinuousCDF, Normal};
use crate::analysis::regression::ols;

/// MacKinnon (1994) bounds and polynomial coefficients for the
/// constant-only regression with a single series
const TAU_MAX: f64 = 2.74;
const TAU_MIN: f64 = -18.83;
const TAU_STAR: f64 = -1.61;
const TAU_SMALLP: [f64; 3] = [2.1659, 1.4412, 0.038269];
const TAU_LARGEP: [f64; 4] = [1.7339, 0.93202, -0.12745, -0.010368];

/// MacKinnon (2010) response-surface coefficients for 1%, 5%, 10%
const TAU_CRIT: [[f64; 4]; 3] = [
    [-3.43035, -6.5393, -16.786, -79.433],
    [-2.86154, -2.8903, -4.234, -40.04],
    [-2.56677, -1.5384, -2.809, 0.0],
];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CriticalValues {
    pub one_pct: f64,
    pub five_pct: f64,
    pub ten_pct: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AdfResult {
    pub statistic: f64,
    pub p_value: f64,
    pub used_lag: usize,
    pub nobs: usize,
    pub critical_values: CriticalValues,
    pub ic_best: f64,
    pub stationary: bool,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StationarityError {
    #[error("sample of {0} observations is too short for the ADF regression")]
    TooShort(usize),
    #[error("series is constant")]
    Constant,
    #[error("ADF regression is degenerate")]
    Degenerate,
}

/// Stationary iff the unit-root p-value is strictly below `significance`
pub fn classify_stationary(p_value: f64, significance: f64) -> bool {
    p_value < significance
}

/// Run ADF on `series`, ignoring non-finite values
pub fn adf_test(series: &[f64], significance: f64) -> Result<AdfResult, StationarityError> {
    let x: Vec<f64> = series.iter().copied().filter(|v| v.is_finite()).collect();
    let n = x.len();

    let max = x.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let min = x.iter().copied().fold(f64::INFINITY, f64::min);
    if n > 0 && max == min {
        return Err(StationarityError::Constant);
    }

    // Schwert rule, capped so the widest regression keeps residual dof
    let schwert = (12.0 * (n as f64 / 100.0).powf(0.25)).ceil() as i64;
    let cap = (n / 2) as i64 - 2;
    if cap < 0 || n < 4 {
        return Err(StationarityError::TooShort(n));
    }
    let max_lag = schwert.min(cap) as usize;

    let diff: Vec<f64> = x.windows(2).map(|w| w[1] - w[0]).collect();

    // AIC search over a fixed sample trimmed by max_lag
    let mut best: Option<(f64, usize)> = None;
    for lags in 0..=max_lag {
        let design = adf_design(&x, &diff, max_lag, lags);
        let Some(fit) = ols(&diff[max_lag..], &design) else {
            continue;
        };
        let aic = fit.aic();
        if best.map_or(true, |(ic, _)| aic < ic) {
            best = Some((aic, lags));
        }
    }
    let (ic_best, used_lag) = best.ok_or(StationarityError::Degenerate)?;

    let design = adf_design(&x, &diff, used_lag, used_lag);
    let fit = ols(&diff[used_lag..], &design).ok_or(StationarityError::Degenerate)?;
    let statistic = fit.t_value(1);
    if !statistic.is_finite() {
        return Err(StationarityError::Degenerate);
    }

    let p_value = mackinnon_p(statistic);
    Ok(AdfResult {
        statistic,
        p_value,
        used_lag,
        nobs: fit.nobs,
        critical_values: mackinnon_crit(fit.nobs),
        ic_best,
        stationary: classify_stationary(p_value, significance),
    })
}

/// Columns `[1, y_{t-1}, Δy_{t-1} .. Δy_{t-lags}]` for rows `t = trim..n-1`
fn adf_design(x: &[f64], diff: &[f64], trim: usize, lags: usize) -> DMatrix<f64> {
    let rows = diff.len() - trim;
    DMatrix::from_fn(rows, lags + 2, |r, c| {
        let t = trim + r;
        match c {
            0 => 1.0,
            1 => x[t],
            j => diff[t - (j - 1)],
        }
    })
}

/// Approximate p-value for the ADF statistic
pub fn mackinnon_p(statistic: f64) -> f64 {
    if statistic > TAU_MAX {
        return 1.0;
    }
    if statistic < TAU_MIN {
        return 0.0;
    }
    let coef: &[f64] = if statistic <= TAU_STAR {
        &TAU_SMALLP
    } else {
        &TAU_LARGEP
    };
    let z = coef
        .iter()
        .enumerate()
        .map(|(i, c)| c * statistic.powi(i as i32))
        .sum::<f64>();
    standard_normal_cdf(z)
}

/// Finite-sample critical values for `nobs` observations
pub fn mackinnon_crit(nobs: usize) -> CriticalValues {
    let n = nobs as f64;
    let value = |row: &[f64; 4]| row[0] + row[1] / n + row[2] / n.powi(2) + row[3] / n.powi(3);
    CriticalValues {
        one_pct: value(&TAU_CRIT[0]),
        five_pct: value(&TAU_CRIT[1]),
        ten_pct: value(&TAU_CRIT[2]),
    }
}

fn standard_normal_cdf(z: f64) -> f64 {
    match Normal::new(0.0, 1.0) {
        Ok(normal) => normal.cdf(z),
        Err(_) => f64::NAN,
    }
}
