//! Granger causality via the sum-of-squared-residuals F-test.
//!
//! For each lag ℓ the effect is regressed on ℓ of its own lags (restricted)
//! and on ℓ lags of both series (unrestricted), each with a constant.

use nalgebra::DMatrix;
use statrs::distribution::{ContinuousCDF, FisherSnedecor};
use crate::analysis::regression::ols;

/// F-test outcome at one lag
#[derive(Debug, Clone, PartialEq)]
pub struct FTest {
    pub f_statistic: f64,
    pub p_value: f64,
    pub df_num: usize,
    pub df_denom: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LagOutcome {
    Computed(FTest),
    Skipped { reason: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct LagTest {
    pub lag: usize,
    pub outcome: LagOutcome,
}

impl LagTest {
    pub fn f_test(&self) -> Option<&FTest> {
        match &self.outcome {
            LagOutcome::Computed(f) => Some(f),
            LagOutcome::Skipped { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CausalityReport {
    pub cause: String,
    pub effect: String,
    pub observations: usize,
    pub significance: f64,
    pub lags: Vec<LagTest>,
}

impl CausalityReport {
    /// Lag with the smallest p-value among the computed lags
    pub fn strongest(&self) -> Option<(usize, &FTest)> {
        self.lags
            .iter()
            .filter_map(|l| l.f_test().map(|f| (l.lag, f)))
            .min_by(|a, b| a.1.p_value.total_cmp(&b.1.p_value))
    }

    pub fn granger_causes(&self) -> bool {
        self.strongest()
            .map_or(false, |(_, f)| f.p_value < self.significance)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CausalityOutcome {
    /// Fewer than 3 × max_lag aligned observations; nothing was computed
    InsufficientData { observations: usize, required: usize },
    Tested(CausalityReport),
}

impl CausalityOutcome {
    pub fn report(&self) -> Option<&CausalityReport> {
        match self {
            CausalityOutcome::Tested(r) => Some(r),
            CausalityOutcome::InsufficientData { .. } => None,
        }
    }
}

/// Does `cause` Granger-cause `effect`? Tests every lag in `1..=max_lag`.
pub fn granger_test(
    cause: (&str, &[f64]),
    effect: (&str, &[f64]),
    max_lag: usize,
    significance: f64,
) -> CausalityOutcome {
    let (cause_name, x) = cause;
    let (effect_name, y) = effect;
    let n = x.len().min(y.len());
    let required = 3 * max_lag;

    if max_lag == 0 || n < required {
        return CausalityOutcome::InsufficientData {
            observations: n,
            required,
        };
    }

    let lags = (1..=max_lag)
        .map(|lag| LagTest {
            lag,
            outcome: ssr_f_test(&x[..n], &y[..n], lag),
        })
        .collect();

    CausalityOutcome::Tested(CausalityReport {
        cause: cause_name.to_string(),
        effect: effect_name.to_string(),
        observations: n,
        significance,
        lags,
    })
}

fn ssr_f_test(x: &[f64], y: &[f64], lag: usize) -> LagOutcome {
    let n = y.len();
    let nobs = n - lag;
    let joint_k = 2 * lag + 1;
    if nobs <= joint_k {
        return LagOutcome::Skipped {
            reason: format!("{} observations leave no residual degrees of freedom", nobs),
        };
    }

    let target = &y[lag..];
    // Own lags first, the constant last
    let restricted = DMatrix::from_fn(nobs, lag + 1, |r, c| {
        let t = lag + r;
        if c < lag { y[t - 1 - c] } else { 1.0 }
    });
    let unrestricted = DMatrix::from_fn(nobs, joint_k, |r, c| {
        let t = lag + r;
        if c < lag {
            y[t - 1 - c]
        } else if c < 2 * lag {
            x[t - 1 - (c - lag)]
        } else {
            1.0
        }
    });

    let (Some(own), Some(joint)) = (ols(target, &restricted), ols(target, &unrestricted)) else {
        return LagOutcome::Skipped {
            reason: "singular design matrix".to_string(),
        };
    };
    if joint.ssr <= 0.0 {
        return LagOutcome::Skipped {
            reason: "unrestricted model fits exactly".to_string(),
        };
    }

    let df_denom = joint.df_resid;
    let f_statistic =
        ((own.ssr - joint.ssr) / joint.ssr / lag as f64 * df_denom as f64).max(0.0);
    let p_value = match FisherSnedecor::new(lag as f64, df_denom as f64) {
        Ok(dist) => dist.sf(f_statistic),
        Err(e) => {
            return LagOutcome::Skipped {
                reason: format!("F distribution unavailable: {}", e),
            }
        }
    };

    LagOutcome::Computed(FTest {
        f_statistic,
        p_value,
        df_num: lag,
        df_denom,
    })
}
