/*!
Bootstrap and jackknife resampling around the MAP estimate.

[`Bootstrap`] simulates replicate data sets, either from the fitted model
(parametric) or from the observed proportions (non-parametric), refits each
one and collects the refit estimates, thresholds and slopes. Confidence
intervals for thresholds and slopes are bias-corrected and accelerated (BCa).

[`jackknife`] refits the model once per held-out block and flags outlying and
influential blocks. Outliers are judged by the deviance drop; see
[`crate::evidence::outlier_bayes_factors`] for the Bayes-factor scores.

# Examples

```rust
use psi_asir::bootstrap::Bootstrap;
use psi_asir::data::TrialData;
use psi_asir::model::PsychometricFunction;
use psi_asir::optimizer::Cobyla;

let data = TrialData::new(&[1.0, 2.0, 3.0, 4.0], &[40; 4], &[22, 27, 34, 39], 2).unwrap();
let model = PsychometricFunction::from_names(2, "logistic", "ab").unwrap();
let set = Bootstrap::new()
    .n_replicates(50)
    .cuts(vec![0.5])
    .set_seed(7)
    .run(&model, &data, &Cobyla::new())
    .unwrap();
let (lo, hi) = (set.threshold_ci(0, 0.025), set.threshold_ci(0, 0.975));
assert!(lo <= hi);
```
*/

use indicatif::ProgressBar;
use log::{debug, warn};
use nalgebra::{DMatrix, DVector};
use ndarray::{Array1, Array2};
use rand::prelude::*;
use rayon::prelude::*;

use crate::core::{progress_bar, run_indexed};
use crate::data::TrialData;
use crate::error::{PsiError, Result};
use crate::model::Model;
use crate::optimizer::Optimizer;
use crate::stats::{inv_phi, percentile, phi};

/// Deviance difference beyond which a held-out block counts as an outlier
/// (99% quantile of a chi-square with one degree of freedom).
pub const OUTLIER_DEVIANCE: f64 = 6.63;

const DIFF_STEP: f64 = 1e-5;

/// One simulated data set and its refit.
#[derive(Debug, Clone, PartialEq)]
pub struct BootstrapReplicate {
    /// Simulated correct counts, one per block.
    pub data: Vec<u32>,
    pub estimate: Vec<f64>,
    pub deviance: f64,
    /// Threshold at every cut.
    pub thresholds: Vec<f64>,
    /// Slope at every cut.
    pub slopes: Vec<f64>,
    pub rpd: f64,
    pub rkd: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BootstrapReplicateSet {
    pub replicates: Vec<BootstrapReplicate>,
    /// MAP estimate on the observed data.
    pub initial: Vec<f64>,
    pub cuts: Vec<f64>,
    pub nonparametric: bool,
    pub threshold_bias: Vec<f64>,
    pub threshold_acceleration: Vec<f64>,
    pub slope_bias: Vec<f64>,
    pub slope_acceleration: Vec<f64>,
}

impl BootstrapReplicateSet {
    pub fn len(&self) -> usize {
        self.replicates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.replicates.is_empty()
    }

    /// Refit estimates as an `(n_replicates, n_params)` matrix.
    pub fn estimates(&self) -> Array2<f64> {
        let n_params = self.initial.len();
        let mut out = Array2::<f64>::zeros((self.len(), n_params));
        for (mut row, replicate) in out.rows_mut().into_iter().zip(&self.replicates) {
            row.assign(&Array1::from(replicate.estimate.clone()));
        }
        out
    }

    pub fn deviances(&self) -> Vec<f64> {
        self.replicates.iter().map(|r| r.deviance).collect()
    }

    pub fn thresholds(&self, cut: usize) -> Vec<f64> {
        self.replicates.iter().map(|r| r.thresholds[cut]).collect()
    }

    pub fn slopes(&self, cut: usize) -> Vec<f64> {
        self.replicates.iter().map(|r| r.slopes[cut]).collect()
    }

    /// The `p`-th percentile of the refit values of parameter `param`.
    pub fn percentile(&self, p: f64, param: usize) -> f64 {
        let values: Vec<f64> = self.replicates.iter().map(|r| r.estimate[param]).collect();
        percentile(&values, p)
    }

    /// BCa-adjusted `p`-th percentile of the threshold at cut index `cut`.
    pub fn threshold_ci(&self, cut: usize, p: f64) -> f64 {
        let level = bca_level(p, self.threshold_bias[cut], self.threshold_acceleration[cut]);
        percentile(&self.thresholds(cut), level)
    }

    /// BCa-adjusted `p`-th percentile of the slope at cut index `cut`.
    pub fn slope_ci(&self, cut: usize, p: f64) -> f64 {
        let level = bca_level(p, self.slope_bias[cut], self.slope_acceleration[cut]);
        percentile(&self.slopes(cut), level)
    }

    /// Equal-tailed percentile interval of every parameter at coverage `level`.
    pub fn parameter_ci(&self, level: f64) -> Vec<(f64, f64)> {
        let tail = 0.5 * (1.0 - level);
        (0..self.initial.len())
            .map(|i| (self.percentile(tail, i), self.percentile(1.0 - tail, i)))
            .collect()
    }
}

// Percentile level after bias correction `z0` and acceleration `a`.
fn bca_level(p: f64, z0: f64, a: f64) -> f64 {
    if z0.is_infinite() {
        return if z0 < 0.0 { 0.0 } else { 1.0 };
    }
    let w = z0 + inv_phi(p);
    let level = phi(z0 + w / (1.0 - a * w));
    if level.is_nan() {
        p
    } else {
        level
    }
}

/// Bootstrap configuration.
#[derive(Debug, Clone)]
pub struct Bootstrap {
    pub n_replicates: usize,
    pub cuts: Vec<f64>,
    /// Parameters to simulate from. Defaults to the MAP estimate.
    pub generating: Option<Vec<f64>>,
    pub nonparametric: bool,
    pub seed: u64,
    pub progress: bool,
}

impl Default for Bootstrap {
    fn default() -> Self {
        Self {
            n_replicates: 2000,
            cuts: vec![0.25, 0.5, 0.75],
            generating: None,
            nonparametric: false,
            seed: thread_rng().gen::<u64>(),
            progress: false,
        }
    }
}

impl Bootstrap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn n_replicates(mut self, n: usize) -> Self {
        self.n_replicates = n;
        self
    }

    pub fn cuts(mut self, cuts: Vec<f64>) -> Self {
        self.cuts = cuts;
        self
    }

    pub fn generating(mut self, generating: Vec<f64>) -> Self {
        self.generating = Some(generating);
        self
    }

    pub fn nonparametric(mut self, nonparametric: bool) -> Self {
        self.nonparametric = nonparametric;
        self
    }

    /// Replicate `i` is simulated with an RNG seeded `seed + i`.
    pub fn set_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn progress(mut self, progress: bool) -> Self {
        self.progress = progress;
        self
    }

    pub fn run<M, O>(&self, model: &M, data: &TrialData, optimizer: &O) -> Result<BootstrapReplicateSet>
    where
        M: Model,
        O: Optimizer,
    {
        let pb = progress_bar(self.n_replicates, "Bootstrap", self.progress);
        run_bootstrap(
            self.n_replicates,
            data,
            model,
            optimizer,
            &self.cuts,
            self.generating.as_deref(),
            self.nonparametric,
            self.seed,
            &pb,
        )
    }
}

/// Simulates `n` replicates and refits each one. The replicate seeds are
/// derived from a single draw of `rng`.
#[allow(clippy::too_many_arguments)]
pub fn bootstrap<M, O, R>(
    n: usize,
    data: &TrialData,
    model: &M,
    optimizer: &O,
    cuts: &[f64],
    generating: Option<&[f64]>,
    nonparametric: bool,
    rng: &mut R,
) -> Result<BootstrapReplicateSet>
where
    M: Model,
    O: Optimizer,
    R: Rng + ?Sized,
{
    let seed = rng.gen::<u64>();
    run_bootstrap(
        n,
        data,
        model,
        optimizer,
        cuts,
        generating,
        nonparametric,
        seed,
        &ProgressBar::hidden(),
    )
}

#[allow(clippy::too_many_arguments)]
fn run_bootstrap<M, O>(
    n: usize,
    data: &TrialData,
    model: &M,
    optimizer: &O,
    cuts: &[f64],
    generating: Option<&[f64]>,
    nonparametric: bool,
    seed: u64,
    pb: &ProgressBar,
) -> Result<BootstrapReplicateSet>
where
    M: Model,
    O: Optimizer,
{
    if n == 0 {
        return Err(PsiError::InvalidArgument("number of replicates must be positive"));
    }
    if cuts.iter().any(|c| !(*c > 0.0 && *c < 1.0)) {
        return Err(PsiError::InvalidArgument("cuts must lie strictly between 0 and 1"));
    }
    if let Some(g) = generating {
        if g.len() != model.n_params() {
            return Err(PsiError::LengthMismatch {
                what: "generating parameters",
                expected: model.n_params(),
                actual: g.len(),
            });
        }
    }

    let initial = optimizer.optimize(model, data, None)?;
    let probs: Vec<f64> = if nonparametric {
        data.blocks().iter().map(|b| b.proportion()).collect()
    } else {
        let source = generating.unwrap_or(&initial);
        data.blocks()
            .iter()
            .map(|b| model.evaluate(b.intensity, source))
            .collect()
    };
    debug!("bootstrap: {n} replicates, simulation probabilities {probs:?}");

    let replicates = run_indexed(n, seed, pb, |_, rng| -> Result<BootstrapReplicate> {
        let counts = data.simulate(&probs, rng)?;
        let replicate_data = data.with_correct(&counts)?;
        let estimate = optimizer.optimize(model, &replicate_data, Some(initial.as_slice()))?;
        let residuals = model.deviance_residuals(&estimate, &replicate_data);
        Ok(BootstrapReplicate {
            deviance: model.deviance(&estimate, &replicate_data),
            thresholds: cuts.iter().map(|&c| model.threshold(&estimate, c)).collect(),
            slopes: cuts.iter().map(|&c| model.slope(&estimate, c)).collect(),
            rpd: model.rpd(&residuals, &estimate, &replicate_data),
            rkd: model.rkd(&residuals, &replicate_data),
            data: counts,
            estimate,
        })
    })
    .into_iter()
    .collect::<Result<Vec<_>>>()?;

    let fisher_inv = model.hessian(&initial, data).try_inverse();
    if fisher_inv.is_none() {
        warn!("Fisher information at the MAP estimate is singular, BCa acceleration set to 0");
    }
    let replicate_data = replicates
        .iter()
        .map(|r| data.with_correct(&r.data))
        .collect::<Result<Vec<_>>>()?;

    let mut threshold_bias = Vec::with_capacity(cuts.len());
    let mut threshold_acceleration = Vec::with_capacity(cuts.len());
    let mut slope_bias = Vec::with_capacity(cuts.len());
    let mut slope_acceleration = Vec::with_capacity(cuts.len());
    for (k, &cut) in cuts.iter().enumerate() {
        let threshold = |prm: &[f64]| model.threshold(prm, cut);
        let slope = |prm: &[f64]| model.slope(prm, cut);
        let thresholds: Vec<f64> = replicates.iter().map(|r| r.thresholds[k]).collect();
        let slopes: Vec<f64> = replicates.iter().map(|r| r.slopes[k]).collect();
        threshold_bias.push(bias(&thresholds, threshold(&initial)));
        slope_bias.push(bias(&slopes, slope(&initial)));
        threshold_acceleration.push(acceleration(
            model,
            &replicate_data,
            &initial,
            fisher_inv.as_ref(),
            threshold,
        ));
        slope_acceleration.push(acceleration(
            model,
            &replicate_data,
            &initial,
            fisher_inv.as_ref(),
            slope,
        ));
    }
    debug!("BCa bias {threshold_bias:?}, acceleration {threshold_acceleration:?}");

    Ok(BootstrapReplicateSet {
        replicates,
        initial,
        cuts: cuts.to_vec(),
        nonparametric,
        threshold_bias,
        threshold_acceleration,
        slope_bias,
        slope_acceleration,
    })
}

/// `inv_phi` of the fraction of replicate values below the observed value.
fn bias(values: &[f64], observed: f64) -> f64 {
    let below = values.iter().filter(|&&v| v < observed).count();
    inv_phi(below as f64 / values.len() as f64)
}

/// Acceleration from the log-likelihood derivative of every replicate along
/// the least favourable direction `I^-1 grad(statistic)`.
fn acceleration<M, F>(
    model: &M,
    replicates: &[TrialData],
    initial: &[f64],
    fisher_inv: Option<&DMatrix<f64>>,
    statistic: F,
) -> f64
where
    M: Model,
    F: Fn(&[f64]) -> f64,
{
    let Some(fisher_inv) = fisher_inv else {
        return 0.0;
    };
    let n = initial.len();
    let mut x = initial.to_vec();
    let gradient = DVector::from_iterator(
        n,
        (0..n).map(|j| {
            let h = DIFF_STEP * (1.0 + initial[j].abs());
            x[j] = initial[j] + h;
            let up = statistic(&x);
            x[j] = initial[j] - h;
            let down = statistic(&x);
            x[j] = initial[j];
            (up - down) / (2.0 * h)
        }),
    );
    let direction = fisher_inv * gradient;
    let plus: Vec<f64> = initial
        .iter()
        .zip(direction.iter())
        .map(|(t, d)| t + DIFF_STEP * d)
        .collect();
    let minus: Vec<f64> = initial
        .iter()
        .zip(direction.iter())
        .map(|(t, d)| t - DIFF_STEP * d)
        .collect();

    let (sum2, sum3) = replicates
        .iter()
        .map(|data| {
            // Log-likelihood derivative, so the sign is flipped.
            (model.neg_log_likelihood(&minus, data) - model.neg_log_likelihood(&plus, data))
                / (2.0 * DIFF_STEP)
        })
        .filter(|l| l.is_finite())
        .fold((0.0, 0.0), |(s2, s3), l| (s2 + l * l, s3 + l * l * l));
    if sum2 <= 0.0 {
        return 0.0;
    }
    sum3 / (6.0 * sum2.powf(1.5))
}

/// Full-data fit plus one refit per held-out block.
#[derive(Debug, Clone, PartialEq)]
pub struct JackknifeSet {
    pub full_estimate: Vec<f64>,
    pub full_deviance: f64,
    /// Estimate without block `i`.
    pub estimates: Vec<Vec<f64>>,
    /// Deviance of the reduced fit on the reduced data.
    pub deviances: Vec<f64>,
}

impl JackknifeSet {
    pub fn n_blocks(&self) -> usize {
        self.estimates.len()
    }

    /// Removing block `i` improves the deviance by more than [`OUTLIER_DEVIANCE`].
    pub fn outlier(&self, i: usize) -> bool {
        self.full_deviance - self.deviances[i] > OUTLIER_DEVIANCE
    }

    /// Some parameter refit without block `i` leaves `[lower, upper]`.
    pub fn influential(&self, i: usize, lower: &[f64], upper: &[f64]) -> bool {
        self.estimates[i]
            .iter()
            .zip(lower.iter().zip(upper))
            .any(|(v, (lo, hi))| v < lo || v > hi)
    }

    /// [`JackknifeSet::influential`] against the bootstrap 2.5 and 97.5 percentiles.
    pub fn influential_blocks(&self, bootstrap: &BootstrapReplicateSet) -> Vec<bool> {
        let (lower, upper): (Vec<f64>, Vec<f64>) = bootstrap.parameter_ci(0.95).into_iter().unzip();
        (0..self.n_blocks())
            .map(|i| self.influential(i, &lower, &upper))
            .collect()
    }

    pub fn outliers(&self) -> Vec<bool> {
        (0..self.n_blocks()).map(|i| self.outlier(i)).collect()
    }
}

pub fn jackknife<M, O>(data: &TrialData, model: &M, optimizer: &O) -> Result<JackknifeSet>
where
    M: Model,
    O: Optimizer,
{
    if data.n_blocks() < 2 {
        return Err(PsiError::InvalidData("jackknife needs at least 2 blocks".into()));
    }
    let full_estimate = optimizer.optimize(model, data, None)?;
    let full_deviance = model.deviance(&full_estimate, data);
    let refits = (0..data.n_blocks())
        .into_par_iter()
        .map(|i| -> Result<(Vec<f64>, f64)> {
            let reduced = data.without_block(i)?;
            let estimate = optimizer.optimize(model, &reduced, Some(full_estimate.as_slice()))?;
            let deviance = model.deviance(&estimate, &reduced);
            Ok((estimate, deviance))
        })
        .collect::<Result<Vec<_>>>()?;
    let (estimates, deviances) = refits.into_iter().unzip();
    Ok(JackknifeSet {
        full_estimate,
        full_deviance,
        estimates,
        deviances,
    })
}

/// MAP fit with goodness-of-fit statistics and Fisher information.
#[derive(Debug, Clone, PartialEq)]
pub struct MapEstimate {
    pub estimate: Vec<f64>,
    pub deviance: f64,
    pub thresholds: Vec<f64>,
    pub slopes: Vec<f64>,
    pub rpd: f64,
    pub rkd: f64,
    /// Hessian of the negative log-likelihood at the estimate.
    pub fisher: DMatrix<f64>,
}

pub fn map_estimate<M, O>(data: &TrialData, model: &M, optimizer: &O, cuts: &[f64]) -> Result<MapEstimate>
where
    M: Model,
    O: Optimizer,
{
    let estimate = optimizer.optimize(model, data, None)?;
    let residuals = model.deviance_residuals(&estimate, data);
    Ok(MapEstimate {
        deviance: model.deviance(&estimate, data),
        thresholds: cuts.iter().map(|&c| model.threshold(&estimate, c)).collect(),
        slopes: cuts.iter().map(|&c| model.slope(&estimate, c)).collect(),
        rpd: model.rpd(&residuals, &estimate, data),
        rkd: model.rkd(&residuals, data),
        fisher: model.hessian(&estimate, data),
        estimate,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PsychometricFunction;
    use crate::optimizer::Cobyla;
    use approx::assert_abs_diff_eq;

    fn data() -> TrialData {
        TrialData::new(
            &[1.0, 2.0, 3.0, 4.0, 5.0],
            &[40; 5],
            &[21, 26, 31, 37, 39],
            2,
        )
        .unwrap()
    }

    fn model() -> PsychometricFunction {
        PsychometricFunction::from_names(2, "logistic", "ab")
            .unwrap()
            .with_prior(2, crate::distributions::Prior::beta(2.0, 50.0).unwrap())
            .unwrap()
    }

    #[test]
    fn bca_level_reduces_to_percentile() {
        assert_abs_diff_eq!(bca_level(0.975, 0.0, 0.0), 0.975, epsilon = 1e-9);
        assert!(bca_level(0.5, 0.3, 0.0) > 0.5);
        assert_eq!(bca_level(0.5, f64::NEG_INFINITY, 0.1), 0.0);
    }

    #[test]
    fn bias_counts_values_below() {
        assert_abs_diff_eq!(bias(&[1.0, 2.0, 3.0, 4.0], 2.5), 0.0, epsilon = 1e-12);
        assert!(bias(&[1.0, 2.0, 3.0, 4.0], 3.5) > 0.0);
    }

    #[test]
    fn replicates_are_reproducible() {
        let m = model();
        let d = data();
        let run = || {
            Bootstrap::new()
                .n_replicates(20)
                .set_seed(5)
                .run(&m, &d, &Cobyla::new())
                .unwrap()
        };
        let (a, b) = (run(), run());
        assert_eq!(a.replicates.len(), 20);
        for (x, y) in a.replicates.iter().zip(&b.replicates) {
            assert_eq!(x.data, y.data);
            assert_eq!(x.estimate, y.estimate);
        }
        assert_eq!(a.threshold_bias.len(), 3);
        assert!(a.threshold_acceleration.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn confidence_intervals_are_ordered() {
        let set = Bootstrap::new()
            .n_replicates(100)
            .cuts(vec![0.5])
            .set_seed(1)
            .run(&model(), &data(), &Cobyla::new())
            .unwrap();
        assert!(set.threshold_ci(0, 0.025) <= set.threshold_ci(0, 0.975));
        assert!(set.slope_ci(0, 0.025) <= set.slope_ci(0, 0.975));
        for (lo, hi) in set.parameter_ci(0.95) {
            assert!(lo <= hi);
        }
    }

    #[test]
    fn nonparametric_replicates_keep_saturated_blocks() {
        let d = TrialData::new(&[1.0, 2.0, 3.0], &[20; 3], &[10, 15, 20], 2).unwrap();
        let set = Bootstrap::new()
            .n_replicates(10)
            .nonparametric(true)
            .set_seed(9)
            .run(&model(), &d, &Cobyla::new())
            .unwrap();
        assert!(set.replicates.iter().all(|r| r.data[2] == 20));
    }

    #[test]
    fn rejects_invalid_cuts() {
        let err = Bootstrap::new()
            .cuts(vec![0.0])
            .run(&model(), &data(), &Cobyla::new())
            .unwrap_err();
        assert!(matches!(err, PsiError::InvalidArgument(_)));
    }

    #[test]
    fn jackknife_flags_outlier_block() {
        let d = TrialData::new(
            &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0],
            &[20; 6],
            &[15, 17, 18, 0, 19, 20],
            2,
        )
        .unwrap();
        let jk = jackknife(&d, &model(), &Cobyla::new()).unwrap();
        assert_eq!(jk.n_blocks(), 6);
        assert!(jk.outlier(3));
        let drop = |i: usize| jk.full_deviance - jk.deviances[i];
        assert!((0..6).filter(|&i| i != 3).all(|i| drop(i) < drop(3)));
    }

    #[test]
    fn influence_uses_band() {
        let jk = JackknifeSet {
            full_estimate: vec![0.0, 1.0],
            full_deviance: 1.0,
            estimates: vec![vec![0.1, 1.0], vec![2.0, 1.0]],
            deviances: vec![0.5, 0.5],
        };
        assert!(!jk.influential(0, &[-1.0, 0.5], &[1.0, 1.5]));
        assert!(jk.influential(1, &[-1.0, 0.5], &[1.0, 1.5]));
    }

    #[test]
    fn map_estimate_reports_fisher_information() {
        let est = map_estimate(&data(), &model(), &Cobyla::new(), &[0.5]).unwrap();
        assert_eq!(est.fisher.nrows(), 3);
        assert!(est.fisher[(0, 0)] > 0.0);
        assert_eq!(est.thresholds.len(), 1);
        assert!(est.deviance >= 0.0);
    }
}
