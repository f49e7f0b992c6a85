/*!
One-dimensional quadrature on fixed grids and moment matching.

All routines use the trapezoidal rule over the grid points whose density is
finite. A non-finite density value is skipped and the next finite point is
joined to the last finite one, so isolated holes in a marginal do not poison
the integral.

# Examples

```rust
use psi_asir::integrate::{lingrid, match_gauss, normalize_probability};

let x: Vec<f64> = lingrid(-10.0, 10.0, 401);
let mut fx: Vec<f64> = x.iter().map(|v| (-0.5 * v * v).exp()).collect();
normalize_probability(&x, &mut fx);
let (mean, std) = match_gauss(&x, &fx);
assert!(mean.abs() < 1e-9);
assert!((std - 1.0).abs() < 1e-3);
```
*/

use num_traits::Float;

/// `size` evenly spaced points from `min` to `max` inclusive. Reversed
/// endpoints are swapped first.
pub fn lingrid<T: Float>(min: T, max: T, size: usize) -> Vec<T> {
    let (lo, hi) = if min > max { (max, min) } else { (min, max) };
    match size {
        0 => Vec::new(),
        1 => vec![lo],
        _ => {
            let steps = T::from(size - 1).unwrap_or_else(T::one);
            let dx = (hi - lo) / steps;
            (0..size)
                .map(|i| lo + T::from(i).unwrap_or_else(T::zero) * dx)
                .collect()
        }
    }
}

// Trapezoidal integral of `g(x_i, f_i)`, bridging non-finite `f_i`.
fn trapz_with<T, G>(x: &[T], fx: &[T], g: G) -> T
where
    T: Float,
    G: Fn(T, T) -> T,
{
    let half = T::from(0.5).unwrap_or_else(T::zero);
    let mut points = x.iter().zip(fx).filter(|(_, f)| f.is_finite());
    let Some((&x0, &f0)) = points.next() else {
        return T::zero();
    };
    let (mut last_x, mut last_g) = (x0, g(x0, f0));
    let mut total = T::zero();
    for (&xi, &fi) in points {
        let gi = g(xi, fi);
        total = total + half * (gi + last_g) * (xi - last_x);
        last_x = xi;
        last_g = gi;
    }
    total
}

/// Trapezoidal integral of `fx` over `x`.
pub fn trapz<T: Float>(x: &[T], fx: &[T]) -> T {
    trapz_with(x, fx, |_, f| f)
}

/// Divides `fx` by its trapezoidal integral and returns that integral.
///
/// Every entry is divided, including the non-finite ones the integral skipped.
pub fn normalize_probability<T: Float>(x: &[T], fx: &mut [T]) -> T {
    let z = trapz(x, fx);
    for f in fx.iter_mut() {
        *f = *f / z;
    }
    z
}

/// `∫ x f(x) dx` for a normalised density `fx`.
pub fn numerical_mean<T: Float>(x: &[T], fx: &[T]) -> T {
    trapz_with(x, fx, |xi, fi| xi * fi)
}

/// `∫ (x - mean)^2 f(x) dx` for a normalised density `fx`.
pub fn numerical_variance<T: Float>(x: &[T], fx: &[T], mean: T) -> T {
    trapz_with(x, fx, |xi, fi| (xi - mean) * (xi - mean) * fi)
}

/// Gaussian `(mean, standard deviation)` with the density's first two moments.
pub fn match_gauss<T: Float>(x: &[T], fx: &[T]) -> (T, T) {
    let m = numerical_mean(x, fx);
    let v = numerical_variance(x, fx, m);
    (m, v.sqrt())
}

/// Gamma `(shape, scale)`: `scale = v / m`, `shape = m / scale`.
pub fn match_gamma<T: Float>(x: &[T], fx: &[T]) -> (T, T) {
    let m = numerical_mean(x, fx);
    let v = numerical_variance(x, fx, m);
    let scale = v / m;
    (m / scale, scale)
}

/// Beta `(alpha, beta)` with `alpha = m^2 (1 - m) / v - m` and
/// `beta = m (1 - m)^2 / v - (1 - m)`.
pub fn match_beta<T: Float>(x: &[T], fx: &[T]) -> (T, T) {
    let m = numerical_mean(x, fx);
    let v = numerical_variance(x, fx, m);
    beta_from_moments(m, v)
}

pub(crate) fn beta_from_moments<T: Float>(m: T, v: T) -> (T, T) {
    let one = T::one();
    let alpha = m * m * (one - m) / v - m;
    let beta = m * (one - m) * (one - m) / v - (one - m);
    (alpha, beta)
}
