/*!
Model evidence and Bayes-factor outlier scores.

The evidence of a model is its likelihood averaged over the prior,

```text
P(D) = ∫ P(D|θ) P(θ) dθ ≈ 1/n Σ P(D|θ_i),   θ_i ~ P(θ)
```

and is estimated here from `n` prior draws. All values are natural logs.

[`outlier_bayes_factors`] compares the model against one alternative per
block that explains that block with its own success probability (uniform
prior) and the remaining blocks with the model. A Bayes factor below one
(negative log) favours the alternative, so the block is an outlier. Both
evidences are estimated from the same prior draws.

# Examples

```rust
use psi_asir::data::TrialData;
use psi_asir::distributions::Prior;
use psi_asir::evidence::outlier_bayes_factors;
use psi_asir::model::PsychometricFunction;
use rand::{rngs::SmallRng, SeedableRng};

let data = TrialData::new(&[1.0, 2.0, 3.0, 4.0], &[20; 4], &[12, 15, 0, 19], 2).unwrap();
let model = PsychometricFunction::from_names(2, "logistic", "ab")
    .unwrap()
    .with_priors(vec![
        Prior::gauss(2.5, 1.0).unwrap(),
        Prior::gamma(2.0, 0.5).unwrap(),
        Prior::beta(2.0, 20.0).unwrap(),
    ])
    .unwrap();
let mut rng = SmallRng::seed_from_u64(1);
let scores = outlier_bayes_factors(&model, &data, 2000, &mut rng).unwrap();
assert!(scores.outlier(2));
```
*/

use log::debug;
use rand::Rng;
use statrs::function::factorial::ln_binomial;

use crate::core::{progress_bar, run_indexed};
use crate::data::TrialData;
use crate::error::{PsiError, Result};
use crate::model::{xlny, Model};

/// Log evidence of the model and log Bayes factors of the model against the
/// per-block outlier alternatives.
#[derive(Debug, Clone, PartialEq)]
pub struct OutlierEvidence {
    pub ln_evidence: f64,
    pub ln_bayes_factors: Vec<f64>,
}

impl OutlierEvidence {
    /// The alternative with a free success probability for block `i` is
    /// more likely than the model.
    pub fn outlier(&self, i: usize) -> bool {
        self.ln_bayes_factors[i] < 0.0
    }

    pub fn outliers(&self) -> Vec<bool> {
        (0..self.ln_bayes_factors.len()).map(|i| self.outlier(i)).collect()
    }
}

/// Log evidence of `model` for `data` from `n_samples` prior draws.
pub fn model_evidence<M, R>(model: &M, data: &TrialData, n_samples: usize, rng: &mut R) -> Result<f64>
where
    M: Model,
    R: Rng + ?Sized,
{
    let rows = prior_block_likelihoods(model, data, n_samples, rng)?;
    let totals: Vec<f64> = rows.iter().map(|row| row.iter().sum()).collect();
    let ln_evidence = log_mean_exp(&totals);
    if !ln_evidence.is_finite() {
        return Err(PsiError::DegenerateWeights {
            n_proposals: n_samples,
        });
    }
    Ok(ln_evidence)
}

/// Log Bayes factor of `model` against a block-specific success probability,
/// for every block.
pub fn outlier_bayes_factors<M, R>(
    model: &M,
    data: &TrialData,
    n_samples: usize,
    rng: &mut R,
) -> Result<OutlierEvidence>
where
    M: Model,
    R: Rng + ?Sized,
{
    if data.n_blocks() < 2 {
        return Err(PsiError::InvalidData(
            "outlier detection needs at least 2 blocks".into(),
        ));
    }
    let rows = prior_block_likelihoods(model, data, n_samples, rng)?;
    let totals: Vec<f64> = rows.iter().map(|row| row.iter().sum()).collect();
    let ln_evidence = log_mean_exp(&totals);
    if !ln_evidence.is_finite() {
        return Err(PsiError::DegenerateWeights {
            n_proposals: n_samples,
        });
    }

    let ln_bayes_factors = data
        .blocks()
        .iter()
        .enumerate()
        .map(|(i, block)| {
            let reduced: Vec<f64> = rows
                .iter()
                .map(|row| {
                    row.iter()
                        .enumerate()
                        .filter(|&(j, _)| j != i)
                        .map(|(_, ll)| ll)
                        .sum()
                })
                .collect();
            // A uniform success probability integrates the block's binomial
            // likelihood to 1 / (n + 1).
            let ln_alternative = log_mean_exp(&reduced) - (block.n_trials as f64 + 1.0).ln();
            ln_evidence - ln_alternative
        })
        .collect::<Vec<f64>>();
    debug!("log evidence {ln_evidence}, log Bayes factors {ln_bayes_factors:?}");

    Ok(OutlierEvidence {
        ln_evidence,
        ln_bayes_factors,
    })
}

// Per-block log-likelihoods at `n_samples` prior draws. Draw `i` uses an RNG
// seeded with a base seed from `rng` plus `i`.
fn prior_block_likelihoods<M, R>(
    model: &M,
    data: &TrialData,
    n_samples: usize,
    rng: &mut R,
) -> Result<Vec<Vec<f64>>>
where
    M: Model,
    R: Rng + ?Sized,
{
    if n_samples == 0 {
        return Err(PsiError::InvalidArgument(
            "evidence needs at least one prior sample",
        ));
    }
    let seed = rng.gen::<u64>();
    let pb = progress_bar(n_samples, "Evidence", false);
    run_indexed(n_samples, seed, &pb, |_, rng| -> Result<Vec<f64>> {
        let prm = model.sample_prior(rng)?;
        Ok(block_log_likelihoods(model, &prm, data))
    })
    .into_iter()
    .collect()
}

// Binomial log-likelihood of every block, coefficient included. Invalid
// probabilities count as zero likelihood.
fn block_log_likelihoods<M: Model>(model: &M, prm: &[f64], data: &TrialData) -> Vec<f64> {
    data.blocks()
        .iter()
        .map(|block| {
            let p = model.evaluate(block.intensity, prm);
            let (n, k) = (block.n_trials, block.n_correct);
            let ll = ln_binomial(n as u64, k as u64)
                + xlny(k as f64, p)
                + xlny((n - k) as f64, 1.0 - p);
            if ll.is_nan() {
                f64::NEG_INFINITY
            } else {
                ll
            }
        })
        .collect()
}

fn log_mean_exp(values: &[f64]) -> f64 {
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        return max;
    }
    let sum: f64 = values.iter().map(|v| (v - max).exp()).sum();
    max + (sum / values.len() as f64).ln()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributions::Prior;
    use crate::model::PsychometricFunction;
    use approx::assert_abs_diff_eq;
    use rand::{rngs::SmallRng, SeedableRng};

    /// Success probability equal to the single parameter, uniform prior.
    struct Rate;

    impl Model for Rate {
        fn n_params(&self) -> usize {
            1
        }
        fn evaluate(&self, _x: f64, prm: &[f64]) -> f64 {
            prm[0]
        }
        fn neg_log_prior(&self, _prm: &[f64]) -> f64 {
            0.0
        }
        fn parameter_range(&self, _data: &TrialData, _index: usize) -> (f64, f64) {
            (0.0, 1.0)
        }
        fn sample_prior<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<Vec<f64>> {
            Ok(vec![rng.gen::<f64>()])
        }
        fn start(&self, _data: &TrialData) -> Vec<f64> {
            vec![0.5]
        }
        fn threshold(&self, prm: &[f64], _cut: f64) -> f64 {
            prm[0]
        }
        fn slope(&self, _prm: &[f64], _cut: f64) -> f64 {
            0.0
        }
    }

    #[test]
    fn evidence_of_a_uniform_rate() {
        let data = TrialData::new(&[1.0], &[10], &[3], 1).unwrap();
        let mut rng = SmallRng::seed_from_u64(42);
        let ln_evidence = model_evidence(&Rate, &data, 20_000, &mut rng).unwrap();
        assert_abs_diff_eq!(ln_evidence, -(11.0f64.ln()), epsilon = 0.04);
    }

    #[test]
    fn bayes_factors_of_a_shared_rate() {
        // Shared rate: C(10,3)^2 B(11,11). Alternative: (1/11)^2.
        let data = TrialData::new(&[1.0, 2.0], &[10, 10], &[3, 7], 1).unwrap();
        let mut rng = SmallRng::seed_from_u64(7);
        let scores = outlier_bayes_factors(&Rate, &data, 20_000, &mut rng).unwrap();
        let ln_shared = 2.0 * 120.0f64.ln() + statrs::function::beta::ln_beta(11.0, 11.0);
        assert_abs_diff_eq!(scores.ln_evidence, ln_shared, epsilon = 0.05);
        for &ln_bf in &scores.ln_bayes_factors {
            assert_abs_diff_eq!(ln_bf, ln_shared + 2.0 * 11.0f64.ln(), epsilon = 0.05);
        }
        assert_eq!(scores.outliers(), vec![true, true]);
    }

    #[test]
    fn contradicting_block_is_an_outlier() {
        let model = PsychometricFunction::from_names(2, "logistic", "ab")
            .unwrap()
            .with_priors(vec![
                Prior::gauss(3.5, 1.0).unwrap(),
                Prior::gamma(2.0, 0.5).unwrap(),
                Prior::beta(2.0, 20.0).unwrap(),
            ])
            .unwrap();
        let data = TrialData::new(
            &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0],
            &[20; 6],
            &[15, 17, 18, 0, 19, 20],
            2,
        )
        .unwrap();
        let mut rng = SmallRng::seed_from_u64(3);
        let scores = outlier_bayes_factors(&model, &data, 4000, &mut rng).unwrap();
        assert!(scores.ln_bayes_factors.iter().all(|v| v.is_finite()));
        // Every 2AFC prediction is at least 0.5, so 0 of 20 costs at least 20 ln 2.
        assert!(scores.ln_bayes_factors[3] < 21.0f64.ln() - 20.0 * 2.0f64.ln() + 0.5);
        assert!(scores.outlier(3));
    }

    #[test]
    fn improper_priors_cannot_be_sampled() {
        let model = PsychometricFunction::from_names(2, "logistic", "ab").unwrap();
        let data = TrialData::new(&[1.0, 2.0], &[10, 10], &[6, 9], 2).unwrap();
        let mut rng = SmallRng::seed_from_u64(0);
        assert_eq!(
            model_evidence(&model, &data, 10, &mut rng),
            Err(PsiError::UnconstrainedSample)
        );
        assert!(model_evidence(&Rate, &data, 0, &mut rng).is_err());
    }
}
