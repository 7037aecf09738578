//! Lead-lag cross-correlation.
//!
//! A positive lag ℓ pairs `first[t-ℓ]` with `second[t]` (first leads);
//! a negative lag pairs `first[t]` with `second[t-|ℓ|]` (second leads).

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LagCorrelation {
    pub lag: i64,
    pub correlation: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Leader {
    First(usize),
    Second(usize),
    Contemporaneous,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LeadLagReport {
    pub first: String,
    pub second: String,
    pub correlations: Vec<LagCorrelation>,
}

impl LeadLagReport {
    /// Lag of maximum absolute correlation; the earliest lag wins ties
    pub fn peak(&self) -> Option<(i64, f64)> {
        let mut best: Option<(i64, f64)> = None;
        for lc in &self.correlations {
            if let Some(c) = lc.correlation {
                if best.map_or(true, |(_, b)| c.abs() > b.abs()) {
                    best = Some((lc.lag, c));
                }
            }
        }
        best
    }

    pub fn leader(&self) -> Option<Leader> {
        self.peak().map(|(lag, _)| match lag {
            l if l > 0 => Leader::First(l as usize),
            l if l < 0 => Leader::Second(l.unsigned_abs() as usize),
            _ => Leader::Contemporaneous,
        })
    }

    pub fn at(&self, lag: i64) -> Option<f64> {
        self.correlations
            .iter()
            .find(|lc| lc.lag == lag)
            .and_then(|lc| lc.correlation)
    }
}

/// Pearson correlation over the pairs where both values are finite.
///
/// None when fewer than two pairs remain or either side has no variance.
pub fn pearson<I>(pairs: I) -> Option<f64>
where
    I: IntoIterator<Item = (f64, f64)>,
{
    let pairs: Vec<(f64, f64)> = pairs
        .into_iter()
        .filter(|(a, b)| a.is_finite() && b.is_finite())
        .collect();
    if pairs.len() < 2 {
        return None;
    }

    let n = pairs.len() as f64;
    let mean_a = pairs.iter().map(|p| p.0).sum::<f64>() / n;
    let mean_b = pairs.iter().map(|p| p.1).sum::<f64>() / n;

    let (mut cov, mut var_a, mut var_b) = (0.0, 0.0, 0.0);
    for (a, b) in &pairs {
        let da = a - mean_a;
        let db = b - mean_b;
        cov += da * db;
        var_a += da * da;
        var_b += db * db;
    }

    let denom = (var_a * var_b).sqrt();
    if denom == 0.0 || !denom.is_finite() {
        return None;
    }
    Some((cov / denom).clamp(-1.0, 1.0))
}

/// Correlation of `first` shifted against `second` for every lag in
/// `-max_lag..=max_lag`
pub fn lead_lag(
    first: (&str, &[f64]),
    second: (&str, &[f64]),
    max_lag: usize,
) -> LeadLagReport {
    let (first_name, a) = first;
    let (second_name, b) = second;
    let n = a.len().min(b.len());
    let w = max_lag as i64;

    let correlations = (-w..=w)
        .map(|lag| {
            let shift = lag.unsigned_abs() as usize;
            let correlation = if shift >= n {
                None
            } else if lag >= 0 {
                pearson((shift..n).map(|t| (a[t - shift], b[t])))
            } else {
                pearson((shift..n).map(|t| (a[t], b[t - shift])))
            };
            LagCorrelation { lag, correlation }
        })
        .collect();

    LeadLagReport {
        first: first_name.to_string(),
        second: second_name.to_string(),
        correlations,
    }
}
