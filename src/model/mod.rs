/*!
Psychometric function models.

The inference routines only see the [`Model`] trait. [`PsychometricFunction`]
is the standard implementation,

```text
psi(x) = guess + (1 - guess - lapse) * F(g(x; a, b))
```

with a [`Sigmoid`] `F` and a [`Core`] `g`. n-AFC models have the parameters
`(a, b, lapse)` and a fixed guess rate `1/n`; yes/no models
(`n_alternatives == 1`) add the guess rate as a fourth parameter.

# Examples

```rust
use psi_asir::data::TrialData;
use psi_asir::model::{Model, PsychometricFunction};

let model = PsychometricFunction::from_names(2, "logistic", "ab").unwrap();
let data = TrialData::new(&[1.0, 2.0, 3.0], &[20, 20, 20], &[11, 15, 19], 2).unwrap();
let prm = [2.0, 0.5, 0.02];
assert!((model.evaluate(2.0, &prm) - 0.74).abs() < 1e-12);
assert!(model.deviance(&prm, &data) >= 0.0);
```
*/

pub mod cores;
pub mod sigmoids;

pub use cores::Core;
pub use sigmoids::Sigmoid;

use nalgebra::DMatrix;
use rand::Rng;

use crate::data::TrialData;
use crate::distributions::Prior;
use crate::error::{PsiError, Result};
use crate::stats::pearson;

/// The model interface consumed by the marginal builder, the resampler, the
/// diagnostics pass and the bootstrap.
pub trait Model: Sync {
    fn n_params(&self) -> usize;

    /// Predicted probability of a correct response at intensity `x`.
    fn evaluate(&self, x: f64, prm: &[f64]) -> f64;

    /// `-sum(ln prior_i(prm_i))`.
    fn neg_log_prior(&self, prm: &[f64]) -> f64;

    /// Heuristic range of plausible values of parameter `index`.
    fn parameter_range(&self, data: &TrialData, index: usize) -> (f64, f64);

    /// Domain of parameter `index`. The optimizer searches inside it and the
    /// marginal builder checks it against the posterior family of the index.
    /// Defaults to a free location, a positive scale and rates in `[0, 1]`.
    fn parameter_bounds(&self, index: usize) -> (f64, f64) {
        match index {
            0 => (f64::NEG_INFINITY, f64::INFINITY),
            1 => (0.0, f64::INFINITY),
            _ => (0.0, 1.0),
        }
    }

    /// One parameter vector drawn from the prior. Models without a proper
    /// prior return [`PsiError::UnconstrainedSample`].
    fn sample_prior<R: Rng + ?Sized>(&self, _rng: &mut R) -> Result<Vec<f64>> {
        Err(PsiError::UnconstrainedSample)
    }

    /// Starting values for the optimizer.
    fn start(&self, data: &TrialData) -> Vec<f64>;

    /// Intensity at which the sigmoid reaches `cut`.
    fn threshold(&self, prm: &[f64], cut: f64) -> f64;

    /// Slope of the sigmoid with respect to intensity at the `cut` threshold.
    fn slope(&self, prm: &[f64], cut: f64) -> f64;

    fn neg_log_likelihood(&self, prm: &[f64], data: &TrialData) -> f64 {
        data.blocks()
            .iter()
            .map(|block| {
                let p = self.evaluate(block.intensity, prm);
                let k = block.n_correct as f64;
                let n = block.n_trials as f64;
                -(xlny(k, p) + xlny(n - k, 1.0 - p))
            })
            .sum()
    }

    fn neg_log_posterior(&self, prm: &[f64], data: &TrialData) -> f64 {
        self.neg_log_likelihood(prm, data) + self.neg_log_prior(prm)
    }

    fn deviance(&self, prm: &[f64], data: &TrialData) -> f64 {
        data.blocks()
            .iter()
            .map(|block| block_deviance(self.evaluate(block.intensity, prm), block.n_trials, block.n_correct))
            .sum()
    }

    /// Signed square roots of the per-block deviance contributions.
    fn deviance_residuals(&self, prm: &[f64], data: &TrialData) -> Vec<f64> {
        data.blocks()
            .iter()
            .map(|block| {
                let p = self.evaluate(block.intensity, prm);
                let d = block_deviance(p, block.n_trials, block.n_correct).max(0.0);
                (block.proportion() - p).signum() * d.sqrt()
            })
            .collect()
    }

    /// Correlation of deviance residuals with predicted probabilities.
    fn rpd(&self, residuals: &[f64], prm: &[f64], data: &TrialData) -> f64 {
        let predicted: Vec<f64> = data
            .blocks()
            .iter()
            .map(|block| self.evaluate(block.intensity, prm))
            .collect();
        pearson(residuals, &predicted)
    }

    /// Correlation of deviance residuals with block order.
    fn rkd(&self, residuals: &[f64], data: &TrialData) -> f64 {
        let order: Vec<f64> = (0..data.n_blocks()).map(|k| k as f64).collect();
        pearson(residuals, &order)
    }

    /// Hessian of the negative log-likelihood by central finite differences.
    fn hessian(&self, prm: &[f64], data: &TrialData) -> DMatrix<f64> {
        let n = prm.len();
        let steps: Vec<f64> = prm.iter().map(|v| 1e-4 * (1.0 + v.abs())).collect();
        let f = |x: &[f64]| self.neg_log_likelihood(x, data);
        let mut x = prm.to_vec();
        let f0 = f(&x);
        let mut h = DMatrix::<f64>::zeros(n, n);
        for i in 0..n {
            let hi = steps[i];
            x[i] = prm[i] + hi;
            let fp = f(&x);
            x[i] = prm[i] - hi;
            let fm = f(&x);
            x[i] = prm[i];
            h[(i, i)] = (fp - 2.0 * f0 + fm) / (hi * hi);
            for j in 0..i {
                let hj = steps[j];
                let mut corner = |si: f64, sj: f64| {
                    x[i] = prm[i] + si * hi;
                    x[j] = prm[j] + sj * hj;
                    let v = f(&x);
                    x[i] = prm[i];
                    x[j] = prm[j];
                    v
                };
                let value = (corner(1.0, 1.0) - corner(1.0, -1.0) - corner(-1.0, 1.0)
                    + corner(-1.0, -1.0))
                    / (4.0 * hi * hj);
                h[(i, j)] = value;
                h[(j, i)] = value;
            }
        }
        h
    }
}

// `a * ln(y)` with `0 * ln(y) = 0` for any `y`.
pub(crate) fn xlny(a: f64, y: f64) -> f64 {
    if a == 0.0 {
        0.0
    } else {
        a * y.ln()
    }
}

fn block_deviance(p: f64, n_trials: u32, n_correct: u32) -> f64 {
    let n = n_trials as f64;
    let k = n_correct as f64;
    if n_trials == 0 {
        return 0.0;
    }
    2.0 * (xlny(k, k / (n * p)) + xlny(n - k, (n - k) / (n * (1.0 - p))))
}

/// `guess + (1 - guess - lapse) * F(g(x))`.
#[derive(Debug, Clone, PartialEq)]
pub struct PsychometricFunction {
    n_alternatives: u32,
    sigmoid: Sigmoid,
    core: Core,
    priors: Vec<Prior>,
}

impl PsychometricFunction {
    /// Creates a model with unconstrained priors on every parameter.
    pub fn new(n_alternatives: u32, sigmoid: Sigmoid, core: Core) -> Result<Self> {
        if n_alternatives == 0 {
            return Err(PsiError::InvalidArgument(
                "number of alternatives must be at least 1",
            ));
        }
        let n_params = if n_alternatives == 1 { 4 } else { 3 };
        Ok(Self {
            n_alternatives,
            sigmoid,
            core,
            priors: vec![Prior::Unconstrained; n_params],
        })
    }

    /// Creates a model from sigmoid and core names such as `"gumbel_l"` and `"mw0.1"`.
    pub fn from_names(n_alternatives: u32, sigmoid: &str, core: &str) -> Result<Self> {
        let sigmoid: Sigmoid = sigmoid.parse()?;
        let core = Core::parse(core, sigmoid)?;
        Self::new(n_alternatives, sigmoid, core)
    }

    pub fn with_prior(mut self, index: usize, prior: Prior) -> Result<Self> {
        let n_params = self.priors.len();
        let slot = self.priors.get_mut(index).ok_or(PsiError::LengthMismatch {
            what: "prior index",
            expected: n_params,
            actual: index + 1,
        })?;
        *slot = prior;
        Ok(self)
    }

    pub fn with_priors(mut self, priors: Vec<Prior>) -> Result<Self> {
        if priors.len() != self.priors.len() {
            return Err(PsiError::LengthMismatch {
                what: "priors",
                expected: self.priors.len(),
                actual: priors.len(),
            });
        }
        self.priors = priors;
        Ok(self)
    }

    pub fn prior(&self, index: usize) -> Option<&Prior> {
        self.priors.get(index)
    }

    pub fn sigmoid(&self) -> Sigmoid {
        self.sigmoid
    }

    pub fn core(&self) -> Core {
        self.core
    }

    pub fn n_alternatives(&self) -> u32 {
        self.n_alternatives
    }

    fn guess(&self, prm: &[f64]) -> f64 {
        if self.n_alternatives == 1 {
            prm[3]
        } else {
            1.0 / self.n_alternatives as f64
        }
    }
}

impl Model for PsychometricFunction {
    fn n_params(&self) -> usize {
        self.priors.len()
    }

    fn evaluate(&self, x: f64, prm: &[f64]) -> f64 {
        let guess = self.guess(prm);
        let lapse = prm[2];
        guess + (1.0 - guess - lapse) * self.sigmoid.f(self.core.g(x, prm))
    }

    fn neg_log_prior(&self, prm: &[f64]) -> f64 {
        self.priors
            .iter()
            .zip(prm)
            .map(|(prior, &v)| -prior.ln_pdf(v))
            .sum()
    }

    fn parameter_range(&self, data: &TrialData, index: usize) -> (f64, f64) {
        match index {
            0 | 1 => self.core.parameter_range(data, index),
            _ => (0.0, 0.5),
        }
    }

    fn parameter_bounds(&self, index: usize) -> (f64, f64) {
        match index {
            0 | 1 => self.core.parameter_bounds(index),
            _ => (0.0, 1.0),
        }
    }

    fn sample_prior<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<Vec<f64>> {
        self.priors.iter().map(|prior| prior.sample(&mut *rng)).collect()
    }

    /// Coarse grid search over the plausible ranges of the first two
    /// parameters, with lapse (and guess) rates fixed at 0.02.
    fn start(&self, data: &TrialData) -> Vec<f64> {
        const STEPS: usize = 9;
        let mut best = vec![0.0; self.n_params()];
        for v in best.iter_mut().skip(2) {
            *v = 0.02;
        }
        let (lo0, hi0) = self.parameter_range(data, 0);
        let (lo1, hi1) = self.parameter_range(data, 1);
        let mut best_value = f64::INFINITY;
        let mut prm = best.clone();
        for i in 0..STEPS {
            prm[0] = lo0 + (hi0 - lo0) * i as f64 / (STEPS - 1) as f64;
            for j in 1..=STEPS {
                prm[1] = lo1 + (hi1 - lo1) * j as f64 / STEPS as f64;
                let value = self.neg_log_posterior(&prm, data);
                if value < best_value {
                    best_value = value;
                    best.copy_from_slice(&prm);
                }
            }
        }
        if !best_value.is_finite() {
            best[0] = 0.5 * (lo0 + hi0);
            best[1] = 0.5 * (lo1 + hi1);
        }
        best
    }

    fn threshold(&self, prm: &[f64], cut: f64) -> f64 {
        self.core.inv(self.sigmoid.inv(cut), prm)
    }

    fn slope(&self, prm: &[f64], cut: f64) -> f64 {
        let y = self.sigmoid.inv(cut);
        self.sigmoid.df(y) * self.core.dg(self.core.inv(y, prm), prm)
    }
}
