//! Summary statistics shared by the sampling and bootstrap code.

use ndarray::prelude::*;
use ndarray_stats::CorrelationExt;
use statrs::function::erf::{erf, erf_inv};
use std::f64::consts::SQRT_2;

/// Standard normal cumulative distribution function.
pub fn phi(x: f64) -> f64 {
    0.5 * (1.0 + erf(x / SQRT_2))
}

/// Standard normal quantile function. Returns `-inf`/`inf` at 0 and 1.
pub fn inv_phi(p: f64) -> f64 {
    if p <= 0.0 {
        f64::NEG_INFINITY
    } else if p >= 1.0 {
        f64::INFINITY
    } else {
        SQRT_2 * erf_inv(2.0 * p - 1.0)
    }
}

/// Standard normal density.
pub fn normal_pdf(x: f64) -> f64 {
    (-0.5 * x * x).exp() / (2.0 * std::f64::consts::PI).sqrt()
}

/// Pearson correlation between `x` and `y`.
///
/// Returns NaN when the correlation is undefined (mismatched or empty input,
/// or zero variance in either variable).
pub fn pearson(x: &[f64], y: &[f64]) -> f64 {
    if x.len() != y.len() || x.len() < 2 {
        return f64::NAN;
    }
    let mut observations = Array2::<f64>::zeros((2, x.len()));
    observations.row_mut(0).assign(&ArrayView1::from(x));
    observations.row_mut(1).assign(&ArrayView1::from(y));
    match observations.pearson_correlation() {
        Ok(corr) => corr[[0, 1]],
        Err(_) => f64::NAN,
    }
}

/// The `p`-th percentile (`0 <= p <= 1`) of the finite entries of `values`,
/// taken as the sorted element at index `floor(p * n)`.
pub fn percentile(values: &[f64], p: f64) -> f64 {
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if sorted.is_empty() {
        return f64::NAN;
    }
    sorted.sort_unstable_by(f64::total_cmp);
    let idx = ((p.clamp(0.0, 1.0) * sorted.len() as f64).floor() as usize).min(sorted.len() - 1);
    sorted[idx]
}

/// Entropy of the normalised weights divided by `ln N`, where `N` is the
/// number of weights with nonzero mass. Lies in `[0, 1]`; 0 when `N <= 1`.
pub fn normalized_entropy(weights: &[f64]) -> f64 {
    let total: f64 = weights.iter().filter(|w| w.is_finite()).sum();
    if total.is_nan() || total <= 0.0 {
        return 0.0;
    }
    let (h, n) = weights
        .iter()
        .filter(|w| w.is_finite() && **w > 0.0)
        .fold((0.0, 0usize), |(h, n), &w| {
            let p = w / total;
            (h - p * p.ln(), n + 1)
        });
    if n <= 1 {
        0.0
    } else {
        (h / (n as f64).ln()).clamp(0.0, 1.0)
    }
}

/// Column means and sample standard deviations of an `(n_rows, n_cols)` matrix.
pub fn column_mean_std(samples: &Array2<f64>) -> (Array1<f64>, Array1<f64>) {
    let n_cols = samples.ncols();
    if samples.nrows() == 0 {
        return (
            Array1::from_elem(n_cols, f64::NAN),
            Array1::from_elem(n_cols, f64::NAN),
        );
    }
    let mean = samples
        .mean_axis(Axis(0))
        .unwrap_or_else(|| Array1::from_elem(n_cols, f64::NAN));
    let std = if samples.nrows() > 1 {
        samples.std_axis(Axis(0), 1.0)
    } else {
        Array1::zeros(n_cols)
    };
    (mean, std)
}
