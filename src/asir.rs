/*!
Adaptive sampling importance resampling.

[`sample_posterior`] draws proposals from the product of the fitted marginal
posteriors, weights each proposal by the ratio of the true posterior to the
proposal density and resamples with a single sweep over sorted uniforms.

[`Asir`] chains the full pipeline: marginals, resampling and the
posterior-predictive annotation of every sample.

# Examples

```rust
use psi_asir::asir::Asir;
use psi_asir::data::TrialData;
use psi_asir::distributions::Prior;
use psi_asir::model::PsychometricFunction;
use psi_asir::optimizer::Cobyla;

let data = TrialData::new(
    &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0],
    &[40; 6],
    &[21, 24, 30, 35, 38, 39],
    2,
)
.unwrap();
let model = PsychometricFunction::from_names(2, "logistic", "ab")
    .unwrap()
    .with_prior(2, Prior::beta(2.0, 20.0).unwrap())
    .unwrap();
let result = Asir::new()
    .n_samples(200)
    .overpropose(10)
    .set_seed(42)
    .run(&model, &data, &Cobyla::new())
    .unwrap();
assert_eq!(result.samples.len(), 200);
assert!((0.0..=1.0).contains(&result.samples.entropy));
```
*/

use log::{debug, warn};
use ndarray::{Array1, Array2};
use rand::prelude::*;
use rayon::prelude::*;

use crate::core::progress_bar;
use crate::data::TrialData;
use crate::diagnostics::annotate_with_progress;
use crate::distributions::Prior;
use crate::error::{PsiError, Result};
use crate::marginals::{build_marginals_with_grid_size, IndependentPosterior, DEFAULT_GRID_SIZE};
use crate::model::Model;
use crate::optimizer::Optimizer;
use crate::stats::{column_mean_std, normalized_entropy};

/// Proposal densities are clamped into this range before weighting.
const Q_MIN: f64 = 1e-5;
const Q_MAX: f64 = 1e10;
const Q_NAN: f64 = 1e5;

/// One resampled parameter vector and its diagnostics.
///
/// Only `params` and `deviance` are set by the resampler; the remaining
/// fields are NaN or empty until [`crate::diagnostics::annotate`] runs.
#[derive(Debug, Clone, PartialEq)]
pub struct PosteriorSample {
    pub params: Vec<f64>,
    pub deviance: f64,
    pub rpd: f64,
    pub rkd: f64,
    /// Posterior-predictive correct counts, one per block.
    pub pp_data: Vec<u32>,
    pub pp_deviance: f64,
    pub pp_rpd: f64,
    pub pp_rkd: f64,
    /// `nlp(full data) - nlp(data without block k)` for every block `k`.
    pub log_ratios: Vec<f64>,
}

impl PosteriorSample {
    fn new(params: Vec<f64>, deviance: f64) -> Self {
        Self {
            params,
            deviance,
            rpd: f64::NAN,
            rkd: f64::NAN,
            pp_data: Vec::new(),
            pp_deviance: f64::NAN,
            pp_rpd: f64::NAN,
            pp_rkd: f64::NAN,
            log_ratios: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PosteriorSampleSet {
    pub samples: Vec<PosteriorSample>,
    /// Number of samples asked for. Larger than `samples.len()` only if the
    /// resampling sweep was truncated.
    pub requested: usize,
    /// Normalised entropy of the importance weights.
    pub entropy: f64,
    /// Fraction of accepted samples that repeat the previous accepted proposal.
    pub duplicate_rate: f64,
    pub truncated: bool,
}

impl PosteriorSampleSet {
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn n_params(&self) -> usize {
        self.samples.first().map_or(0, |s| s.params.len())
    }

    /// Parameter vectors as an `(n_samples, n_params)` matrix.
    pub fn estimates(&self) -> Array2<f64> {
        let n_params = self.n_params();
        let mut out = Array2::<f64>::zeros((self.len(), n_params));
        for (mut row, sample) in out.rows_mut().into_iter().zip(&self.samples) {
            row.assign(&Array1::from(sample.params.clone()));
        }
        out
    }

    pub fn deviances(&self) -> Vec<f64> {
        self.samples.iter().map(|s| s.deviance).collect()
    }

    /// Posterior mean and standard deviation of every parameter.
    pub fn summary(&self) -> (Array1<f64>, Array1<f64>) {
        column_mean_std(&self.estimates())
    }
}

/// Draws `n_samples` approximate posterior samples by importance resampling
/// `n_samples * overpropose` proposals from the `fitted` marginals.
pub fn sample_posterior<M, R>(
    model: &M,
    data: &TrialData,
    fitted: &[Prior],
    n_samples: usize,
    overpropose: usize,
    rng: &mut R,
) -> Result<PosteriorSampleSet>
where
    M: Model,
    R: Rng + ?Sized,
{
    if fitted.len() != model.n_params() {
        return Err(PsiError::LengthMismatch {
            what: "fitted posteriors",
            expected: model.n_params(),
            actual: fitted.len(),
        });
    }
    if n_samples == 0 || overpropose == 0 {
        return Err(PsiError::InvalidArgument(
            "n_samples and overpropose must be positive",
        ));
    }

    let n_proposals = n_samples * overpropose;
    let mut proposed = Vec::with_capacity(n_proposals);
    for _ in 0..n_proposals {
        let prm = fitted
            .iter()
            .map(|posterior| posterior.sample(&mut *rng))
            .collect::<Result<Vec<f64>>>()?;
        proposed.push(prm);
    }

    let log_weights: Vec<f64> = proposed
        .par_iter()
        .map(|prm| log_weight(model, data, fitted, prm))
        .collect();
    let weights = shifted_weights(&log_weights).ok_or(PsiError::DegenerateWeights { n_proposals })?;

    let mut cumulative = Vec::with_capacity(n_proposals);
    let mut acc = 0.0;
    for w in &weights {
        acc += w;
        cumulative.push(acc);
    }
    if !acc.is_finite() || acc <= 0.0 {
        return Err(PsiError::DegenerateWeights { n_proposals });
    }
    for c in cumulative.iter_mut() {
        *c /= acc;
    }
    let entropy = normalized_entropy(&weights);

    let mut uniforms: Vec<f64> = (0..n_samples).map(|_| rng.gen::<f64>()).collect();
    uniforms.sort_unstable_by(f64::total_cmp);

    let (accepted, duplicates, truncated) = sweep(&uniforms, &cumulative);
    if truncated {
        warn!(
            "resampling sweep exhausted {n_proposals} proposals after {} of {n_samples} samples",
            accepted.len()
        );
    }
    let samples: Vec<PosteriorSample> = accepted
        .into_iter()
        .map(|j| {
            let params = proposed[j].clone();
            let deviance = model.deviance(&params, data);
            PosteriorSample::new(params, deviance)
        })
        .collect();

    let duplicate_rate = duplicates as f64 / n_samples as f64;
    debug!("importance resampling: entropy {entropy:.4}, duplicate rate {duplicate_rate:.4}");
    if entropy < 0.5 {
        warn!("importance weights are concentrated (normalised entropy {entropy:.3})");
    }

    Ok(PosteriorSampleSet {
        samples,
        requested: n_samples,
        entropy,
        duplicate_rate,
        truncated,
    })
}

fn log_weight<M: Model>(model: &M, data: &TrialData, fitted: &[Prior], prm: &[f64]) -> f64 {
    let p = -model.neg_log_posterior(prm, data);
    if !p.is_finite() {
        return f64::NEG_INFINITY;
    }
    let ln_q: f64 = fitted
        .iter()
        .zip(prm)
        .map(|(posterior, &x)| {
            let q = posterior.pdf(x);
            if q.is_nan() {
                Q_NAN.ln()
            } else {
                q.clamp(Q_MIN, Q_MAX).ln()
            }
        })
        .sum();
    p - ln_q
}

// exp(lw - max lw); None if no log-weight is finite.
fn shifted_weights(log_weights: &[f64]) -> Option<Vec<f64>> {
    let max = log_weights
        .iter()
        .copied()
        .filter(|w| w.is_finite())
        .fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        return None;
    }
    Some(
        log_weights
            .iter()
            .map(|&w| if w.is_finite() { (w - max).exp() } else { 0.0 })
            .collect(),
    )
}

// Accepted proposal indices, duplicate count and truncation flag for sorted
// `uniforms` against the normalised `cumulative` weights.
fn sweep(uniforms: &[f64], cumulative: &[f64]) -> (Vec<usize>, usize, bool) {
    let mut accepted = Vec::with_capacity(uniforms.len());
    let mut duplicates = 0;
    let mut i = 0;
    let mut j = 0;
    while i < uniforms.len() {
        if j == cumulative.len() {
            return (accepted, duplicates, true);
        }
        while i < uniforms.len() && uniforms[i] <= cumulative[j] {
            if accepted.last() == Some(&j) {
                duplicates += 1;
            }
            accepted.push(j);
            i += 1;
        }
        j += 1;
    }
    (accepted, duplicates, false)
}

/// Output of [`Asir::run`].
#[derive(Debug, Clone)]
pub struct AsirResult {
    pub posterior: IndependentPosterior,
    pub samples: PosteriorSampleSet,
}

/// Configuration of the full posterior pipeline.
#[derive(Debug, Clone)]
pub struct Asir {
    pub n_samples: usize,
    pub overpropose: usize,
    pub grid_size: usize,
    pub seed: u64,
    pub progress: bool,
}

impl Default for Asir {
    fn default() -> Self {
        Self {
            n_samples: 2000,
            overpropose: 25,
            grid_size: DEFAULT_GRID_SIZE,
            seed: thread_rng().gen::<u64>(),
            progress: false,
        }
    }
}

impl Asir {
    /// Default configuration with a random seed.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn n_samples(mut self, n_samples: usize) -> Self {
        self.n_samples = n_samples;
        self
    }

    pub fn overpropose(mut self, overpropose: usize) -> Self {
        self.overpropose = overpropose;
        self
    }

    pub fn grid_size(mut self, grid_size: usize) -> Self {
        self.grid_size = grid_size;
        self
    }

    /// Fixes the seed. The resampler uses `seed`, and sample `i` of the
    /// posterior-predictive pass uses `seed + 1 + i`.
    pub fn set_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn progress(mut self, progress: bool) -> Self {
        self.progress = progress;
        self
    }

    /// Builds the marginals, resamples and annotates the samples.
    pub fn run<M, O>(&self, model: &M, data: &TrialData, optimizer: &O) -> Result<AsirResult>
    where
        M: Model,
        O: Optimizer,
    {
        let posterior = build_marginals_with_grid_size(model, data, optimizer, self.grid_size)?;
        let mut rng = SmallRng::seed_from_u64(self.seed);
        let mut samples = sample_posterior(
            model,
            data,
            &posterior.fitted,
            self.n_samples,
            self.overpropose,
            &mut rng,
        )?;
        let pb = progress_bar(samples.len(), "Diagnostics", self.progress);
        annotate_with_progress(model, data, &mut samples, self.seed.wrapping_add(1), &pb)?;
        Ok(AsirResult { posterior, samples })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn sweep_counts_duplicates() {
        let cumulative = [0.1, 0.1, 0.7, 1.0];
        let uniforms = [0.05, 0.2, 0.3, 0.9];
        let (accepted, duplicates, truncated) = sweep(&uniforms, &cumulative);
        assert_eq!(accepted, vec![0, 2, 2, 3]);
        assert_eq!(duplicates, 1);
        assert!(!truncated);
    }

    #[test]
    fn sweep_stops_at_the_last_proposal() {
        let cumulative = [0.2, 0.5];
        let uniforms = [0.1, 0.6, 0.7];
        let (accepted, _, truncated) = sweep(&uniforms, &cumulative);
        assert_eq!(accepted, vec![0]);
        assert!(truncated);
    }

    #[test]
    fn weights_are_shifted_by_the_maximum() {
        let w = shifted_weights(&[0.0, 1.0, f64::NEG_INFINITY, f64::NAN]).unwrap();
        assert_abs_diff_eq!(w[1], 1.0);
        assert_abs_diff_eq!(w[0], (-1.0f64).exp(), epsilon = 1e-15);
        assert_eq!(&w[2..], &[0.0, 0.0]);
        assert!(shifted_weights(&[f64::NEG_INFINITY]).is_none());
    }

    #[test]
    fn estimates_matrix_matches_samples() {
        let set = PosteriorSampleSet {
            samples: vec![
                PosteriorSample::new(vec![1.0, 2.0], 0.5),
                PosteriorSample::new(vec![3.0, 4.0], 0.7),
            ],
            requested: 2,
            entropy: 1.0,
            duplicate_rate: 0.0,
            truncated: false,
        };
        let est = set.estimates();
        assert_eq!(est.shape(), &[2, 2]);
        assert_eq!(est[[1, 0]], 3.0);
        let (mean, _) = set.summary();
        assert_abs_diff_eq!(mean[1], 3.0);
        assert_eq!(set.deviances(), vec![0.5, 0.7]);
    }
}
