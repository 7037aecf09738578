//! Ordinary least squares on small dense designs.

use nalgebra::{DMatrix, DVector};
use std::f64::consts::PI;

/// Fitted OLS model
#[derive(Debug, Clone)]
pub struct OlsFit {
    pub params: DVector<f64>,
    pub ssr: f64,
    pub nobs: usize,
    pub df_resid: usize,
    xtx_inv: DMatrix<f64>,
}

impl OlsFit {
    pub fn std_error(&self, j: usize) -> f64 {
        let sigma2 = self.ssr / self.df_resid as f64;
        (sigma2 * self.xtx_inv[(j, j)]).sqrt()
    }

    pub fn t_value(&self, j: usize) -> f64 {
        self.params[j] / self.std_error(j)
    }

    /// Gaussian log-likelihood at the OLS estimate
    pub fn log_likelihood(&self) -> f64 {
        let n = self.nobs as f64;
        -n / 2.0 * ((2.0 * PI).ln() + (self.ssr / n).ln() + 1.0)
    }

    /// Akaike information criterion counting every regressor
    pub fn aic(&self) -> f64 {
        -2.0 * self.log_likelihood() + 2.0 * self.params.len() as f64
    }
}

/// Regress `y` on the columns of `x`.
///
/// Returns None when there are no residual degrees of freedom or the design
/// is singular.
pub fn ols(y: &[f64], x: &DMatrix<f64>) -> Option<OlsFit> {
    let (nobs, k) = x.shape();
    if nobs != y.len() || nobs <= k || k == 0 {
        return None;
    }

    let y_vec = DVector::from_column_slice(y);
    let xt = x.transpose();
    let xtx_inv = (&xt * x).try_inverse()?;
    let params = &xtx_inv * (&xt * &y_vec);

    let residuals = &y_vec - x * &params;
    let ssr = residuals.dot(&residuals);
    if !ssr.is_finite() {
        return None;
    }

    Some(OlsFit {
        params,
        ssr,
        nobs,
        df_resid: nobs - k,
        xtx_inv,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recovers_exact_line() {
        let xs: Vec<f64> = (0..10).map(|i| i as f64).collect();
        let y: Vec<f64> = xs.iter().map(|x| 1.5 + 2.0 * x).collect();
        let design = DMatrix::from_fn(xs.len(), 2, |i, j| if j == 0 { 1.0 } else { xs[i] });

        let fit = ols(&y, &design).unwrap();
        assert!((fit.params[0] - 1.5).abs() < 1e-9);
        assert!((fit.params[1] - 2.0).abs() < 1e-9);
        assert!(fit.ssr < 1e-18);
        assert_eq!(fit.df_resid, 8);
    }

    #[test]
    fn test_standard_error_of_mean() {
        // Intercept-only regression: the t value is mean / (sd / sqrt(n))
        let y = [1.0, 2.0, 3.0, 4.0, 5.0];
        let design = DMatrix::from_element(5, 1, 1.0);

        let fit = ols(&y, &design).unwrap();
        let sd = (10.0_f64 / 4.0).sqrt();
        assert!((fit.params[0] - 3.0).abs() < 1e-12);
        assert!((fit.std_error(0) - sd / 5.0_f64.sqrt()).abs() < 1e-12);
        assert!((fit.t_value(0) - 3.0 / (sd / 5.0_f64.sqrt())).abs() < 1e-9);
    }

    #[test]
    fn test_singular_design_is_rejected() {
        let design = DMatrix::from_fn(6, 2, |i, _| i as f64);
        let y = [0.0, 1.0, 2.0, 3.0, 4.0, 5.0];
        assert!(ols(&y, &design).is_none());
    }

    #[test]
    fn test_needs_residual_degrees_of_freedom() {
        let design = DMatrix::from_element(2, 2, 1.0);
        assert!(ols(&[1.0, 2.0], &design).is_none());
    }
}
