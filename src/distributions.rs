/*!
Prior distributions over single model parameters.

A [`Prior`] is one of a closed set of families. The same type is used for the
priors attached to a psychometric model and for the closed-form posterior
approximations fitted by [`crate::marginals`].

# Examples

```rust
use psi_asir::distributions::Prior;
use rand::{rngs::SmallRng, SeedableRng};

let prior: Prior = "Gamma(1.01,2000)".parse().unwrap();
assert!(prior.pdf(1.0) > 0.0);
assert_eq!(prior.pdf(-1.0), 0.0);

let mut rng = SmallRng::seed_from_u64(42);
let draw = prior.sample(&mut rng).unwrap();
assert!(draw > 0.0);
```
*/

use rand::Rng;
use rand_distr::{Beta, Distribution, Gamma, Normal};
use statrs::function::beta::ln_beta;
use statrs::function::gamma::ln_gamma;
use std::f64::consts::PI;
use std::fmt;
use std::str::FromStr;

use crate::error::{PsiError, Result};

/// Distribution family tag, without parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Family {
    Gauss,
    Gamma,
    NGamma,
    Beta,
    Uniform,
    Unconstrained,
}

impl Family {
    /// Closed interval containing the support of every member of the family.
    pub fn support(&self) -> (f64, f64) {
        match self {
            Family::Gamma => (0.0, f64::INFINITY),
            Family::NGamma => (f64::NEG_INFINITY, 0.0),
            Family::Beta => (0.0, 1.0),
            Family::Gauss | Family::Uniform | Family::Unconstrained => {
                (f64::NEG_INFINITY, f64::INFINITY)
            }
        }
    }
}

/// A one-dimensional prior.
///
/// `Gamma` uses the shape/scale parameterisation, `NGamma` is a Gamma
/// distribution mirrored at zero. `Unconstrained` contributes nothing to the
/// posterior: its density is 1 everywhere and it cannot be sampled.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Prior {
    Gauss { mu: f64, sigma: f64 },
    Gamma { shape: f64, scale: f64 },
    NGamma { shape: f64, scale: f64 },
    Beta { alpha: f64, beta: f64 },
    Uniform { lower: f64, upper: f64 },
    Unconstrained,
}

impl Prior {
    /// Builds a prior from a family and its two shape parameters, checking
    /// that the parameters lie in the family's domain.
    pub fn new(family: Family, a: f64, b: f64) -> Result<Self> {
        let valid_pair = a.is_finite() && b.is_finite();
        let prior = match family {
            Family::Gauss if valid_pair && b > 0.0 => Prior::Gauss { mu: a, sigma: b },
            Family::Gamma if valid_pair && a > 0.0 && b > 0.0 => Prior::Gamma { shape: a, scale: b },
            Family::NGamma if valid_pair && a > 0.0 && b > 0.0 => {
                Prior::NGamma { shape: a, scale: b }
            }
            Family::Beta if valid_pair && a > 0.0 && b > 0.0 => Prior::Beta { alpha: a, beta: b },
            Family::Uniform if valid_pair && a < b => Prior::Uniform { lower: a, upper: b },
            Family::Unconstrained => Prior::Unconstrained,
            _ => {
                return Err(PsiError::InvalidPrior(format!(
                    "parameters ({a}, {b}) are outside the domain of {family:?}"
                )))
            }
        };
        Ok(prior)
    }

    pub fn gauss(mu: f64, sigma: f64) -> Result<Self> {
        Self::new(Family::Gauss, mu, sigma)
    }

    pub fn gamma(shape: f64, scale: f64) -> Result<Self> {
        Self::new(Family::Gamma, shape, scale)
    }

    pub fn beta(alpha: f64, beta: f64) -> Result<Self> {
        Self::new(Family::Beta, alpha, beta)
    }

    pub fn family(&self) -> Family {
        match self {
            Prior::Gauss { .. } => Family::Gauss,
            Prior::Gamma { .. } => Family::Gamma,
            Prior::NGamma { .. } => Family::NGamma,
            Prior::Beta { .. } => Family::Beta,
            Prior::Uniform { .. } => Family::Uniform,
            Prior::Unconstrained => Family::Unconstrained,
        }
    }

    /// Returns the `i`-th shape parameter (0 or 1), or `None`.
    pub fn param(&self, i: usize) -> Option<f64> {
        let (a, b) = match *self {
            Prior::Gauss { mu, sigma } => (mu, sigma),
            Prior::Gamma { shape, scale } | Prior::NGamma { shape, scale } => (shape, scale),
            Prior::Beta { alpha, beta } => (alpha, beta),
            Prior::Uniform { lower, upper } => (lower, upper),
            Prior::Unconstrained => return None,
        };
        match i {
            0 => Some(a),
            1 => Some(b),
            _ => None,
        }
    }

    /// Probability density at `x`.
    pub fn pdf(&self, x: f64) -> f64 {
        match *self {
            Prior::Uniform { lower, upper } => {
                if (lower..=upper).contains(&x) {
                    1.0 / (upper - lower)
                } else {
                    0.0
                }
            }
            Prior::Unconstrained => 1.0,
            _ => self.ln_pdf(x).exp(),
        }
    }

    /// Natural log of the density at `x` (`-inf` outside the support).
    pub fn ln_pdf(&self, x: f64) -> f64 {
        match *self {
            Prior::Gauss { mu, sigma } => {
                let z = (x - mu) / sigma;
                -0.5 * z * z - sigma.ln() - 0.5 * (2.0 * PI).ln()
            }
            Prior::Gamma { shape, scale } => ln_gamma_pdf(x, shape, scale),
            Prior::NGamma { shape, scale } => ln_gamma_pdf(-x, shape, scale),
            Prior::Beta { alpha, beta } => {
                if !(0.0..=1.0).contains(&x) {
                    return f64::NEG_INFINITY;
                }
                xlny(alpha - 1.0, x) + xlny(beta - 1.0, 1.0 - x) - ln_beta(alpha, beta)
            }
            Prior::Uniform { .. } => self.pdf(x).ln(),
            Prior::Unconstrained => 0.0,
        }
    }

    /// Draws one value.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<f64> {
        let invalid = |e: &dyn fmt::Display| PsiError::InvalidPrior(format!("{self}: {e}"));
        let x = match *self {
            Prior::Gauss { mu, sigma } => Normal::new(mu, sigma)
                .map_err(|e| invalid(&e))?
                .sample(rng),
            Prior::Gamma { shape, scale } => Gamma::new(shape, scale)
                .map_err(|e| invalid(&e))?
                .sample(rng),
            Prior::NGamma { shape, scale } => -Gamma::new(shape, scale)
                .map_err(|e| invalid(&e))?
                .sample(rng),
            Prior::Beta { alpha, beta } => Beta::new(alpha, beta)
                .map_err(|e| invalid(&e))?
                .sample(rng),
            Prior::Uniform { lower, upper } => lower + (upper - lower) * rng.gen::<f64>(),
            Prior::Unconstrained => return Err(PsiError::UnconstrainedSample),
        };
        Ok(x)
    }

    /// Mean of the distribution, `None` for `Unconstrained`.
    pub fn mean(&self) -> Option<f64> {
        match *self {
            Prior::Gauss { mu, .. } => Some(mu),
            Prior::Gamma { shape, scale } => Some(shape * scale),
            Prior::NGamma { shape, scale } => Some(-shape * scale),
            Prior::Beta { alpha, beta } => Some(alpha / (alpha + beta)),
            Prior::Uniform { lower, upper } => Some(0.5 * (lower + upper)),
            Prior::Unconstrained => None,
        }
    }

    /// Variance of the distribution, `None` for `Unconstrained`.
    pub fn variance(&self) -> Option<f64> {
        match *self {
            Prior::Gauss { sigma, .. } => Some(sigma * sigma),
            Prior::Gamma { shape, scale } | Prior::NGamma { shape, scale } => {
                Some(shape * scale * scale)
            }
            Prior::Beta { alpha, beta } => {
                let s = alpha + beta;
                Some(alpha * beta / (s * s * (s + 1.0)))
            }
            Prior::Uniform { lower, upper } => Some((upper - lower).powi(2) / 12.0),
            Prior::Unconstrained => None,
        }
    }
}

// `a * ln(y)` with the convention `0 * ln(0) = 0`.
fn xlny(a: f64, y: f64) -> f64 {
    if a == 0.0 {
        0.0
    } else {
        a * y.ln()
    }
}

fn ln_gamma_pdf(x: f64, shape: f64, scale: f64) -> f64 {
    if x < 0.0 {
        return f64::NEG_INFINITY;
    }
    xlny(shape - 1.0, x) - x / scale - ln_gamma(shape) - shape * scale.ln()
}

impl fmt::Display for Prior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Prior::Gauss { mu, sigma } => write!(f, "Gauss({mu},{sigma})"),
            Prior::Gamma { shape, scale } => write!(f, "Gamma({shape},{scale})"),
            Prior::NGamma { shape, scale } => write!(f, "nGamma({shape},{scale})"),
            Prior::Beta { alpha, beta } => write!(f, "Beta({alpha},{beta})"),
            Prior::Uniform { lower, upper } => write!(f, "Uniform({lower},{upper})"),
            Prior::Unconstrained => write!(f, "unconstrained"),
        }
    }
}

impl FromStr for Prior {
    type Err = PsiError;

    /// Parses strings such as `"Gauss(0,5)"`, `"nGamma(1.5,3)"`,
    /// `"Uniform(0,0.1)"` or `"unconstrained"`.
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let malformed = || PsiError::InvalidPrior(format!("cannot parse prior {s:?}"));
        let (name, args) = match s.find('(') {
            Some(open) => {
                let inner = s[open + 1..].strip_suffix(')').ok_or_else(malformed)?;
                (s[..open].trim(), Some(inner))
            }
            None => (s, None),
        };
        let family = match name.to_ascii_lowercase().as_str() {
            "gauss" | "normal" => Family::Gauss,
            "gamma" => Family::Gamma,
            "ngamma" => Family::NGamma,
            "beta" => Family::Beta,
            "uniform" => Family::Uniform,
            "unconstrained" | "flat" | "none" => return Ok(Prior::Unconstrained),
            _ => return Err(malformed()),
        };
        let values = args
            .ok_or_else(malformed)?
            .split(',')
            .map(|v| v.trim().parse::<f64>().map_err(|_| malformed()))
            .collect::<Result<Vec<f64>>>()?;
        match values.as_slice() {
            [a, b] => Prior::new(family, *a, *b),
            _ => Err(malformed()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use rand::{rngs::SmallRng, SeedableRng};

    fn trapezoid(prior: &Prior, lo: f64, hi: f64, n: usize) -> f64 {
        let dx = (hi - lo) / (n - 1) as f64;
        (0..n - 1)
            .map(|i| {
                let x = lo + i as f64 * dx;
                0.5 * (prior.pdf(x) + prior.pdf(x + dx)) * dx
            })
            .sum()
    }

    #[test]
    fn densities_integrate_to_one() {
        let cases = [
            (Prior::gauss(1.0, 2.0).unwrap(), -20.0, 22.0),
            (Prior::gamma(3.0, 0.5).unwrap(), 0.0, 30.0),
            (Prior::new(Family::NGamma, 3.0, 0.5).unwrap(), -30.0, 0.0),
            (Prior::beta(2.0, 20.0).unwrap(), 0.0, 1.0),
            (Prior::new(Family::Uniform, 0.0, 0.1).unwrap(), -0.5, 0.5),
        ];
        for (prior, lo, hi) in cases {
            let mass = trapezoid(&prior, lo, hi, 200_001);
            assert_abs_diff_eq!(mass, 1.0, epsilon = 1e-3);
        }
    }

    #[test]
    fn ln_pdf_matches_pdf() {
        let prior = Prior::beta(2.5, 4.0).unwrap();
        for &x in &[0.1, 0.3, 0.9] {
            assert_abs_diff_eq!(prior.ln_pdf(x).exp(), prior.pdf(x), epsilon = 1e-12);
        }
        assert_eq!(prior.pdf(1.5), 0.0);
        assert_eq!(Prior::Unconstrained.pdf(-1e9), 1.0);
    }

    #[test]
    fn parses_and_displays() {
        let prior: Prior = "Gauss(0,5)".parse().unwrap();
        assert_eq!(prior, Prior::Gauss { mu: 0.0, sigma: 5.0 });
        assert_eq!(prior.to_string(), "Gauss(0,5)");
        let prior: Prior = " nGamma(1.5, 3) ".parse().unwrap();
        assert_eq!(prior.family(), Family::NGamma);
        assert_eq!(prior.param(1), Some(3.0));
        assert_eq!("flat".parse::<Prior>().unwrap(), Prior::Unconstrained);
    }

    #[test]
    fn rejects_malformed_priors() {
        for s in ["Gauss(0)", "Beta(-1,2)", "Cauchy(0,1)", "Gamma(1,2", "Uniform(1,0)"] {
            assert!(s.parse::<Prior>().is_err(), "{s} should not parse");
        }
    }

    #[test]
    fn sample_moments() {
        let mut rng = SmallRng::seed_from_u64(42);
        let prior = Prior::gamma(4.0, 0.5).unwrap();
        let n = 20_000;
        let draws: Vec<f64> = (0..n).map(|_| prior.sample(&mut rng).unwrap()).collect();
        let mean = draws.iter().sum::<f64>() / n as f64;
        assert_abs_diff_eq!(mean, prior.mean().unwrap(), epsilon = 0.05);
        assert_eq!(
            Prior::Unconstrained.sample(&mut rng),
            Err(PsiError::UnconstrainedSample)
        );
    }
}
