//! Posterior-predictive annotation of resampled posterior samples.
//!
//! For every sample the pass computes goodness-of-fit statistics on the
//! observed data, simulates one replicate data set from the sample's predicted
//! probabilities and scores the replicate the same way. It also records, per
//! block, how much the block changes the negative log-posterior, which flags
//! blocks that the model fits poorly.

use indicatif::ProgressBar;

use crate::asir::PosteriorSampleSet;
use crate::core::try_for_each_indexed;
use crate::data::TrialData;
use crate::error::{PsiError, Result};
use crate::model::Model;

/// Fills in the diagnostic fields of every sample in `set`.
///
/// Sample `i` draws its replicate with an RNG seeded `seed + i`.
pub fn annotate<M: Model>(model: &M, data: &TrialData, set: &mut PosteriorSampleSet, seed: u64) -> Result<()> {
    annotate_with_progress(model, data, set, seed, &ProgressBar::hidden())
}

pub(crate) fn annotate_with_progress<M: Model>(
    model: &M,
    data: &TrialData,
    set: &mut PosteriorSampleSet,
    seed: u64,
    pb: &ProgressBar,
) -> Result<()> {
    let n_blocks = data.n_blocks();
    if n_blocks < 2 {
        return Err(PsiError::InvalidData(
            "posterior-predictive diagnostics need at least 2 blocks".into(),
        ));
    }
    let reduced = (0..n_blocks)
        .map(|k| data.without_block(k))
        .collect::<Result<Vec<_>>>()?;

    try_for_each_indexed(&mut set.samples, seed, pb, |_, sample, rng| {
        let est = &sample.params;
        let probs: Vec<f64> = data
            .blocks()
            .iter()
            .map(|block| model.evaluate(block.intensity, est))
            .collect();

        let residuals = model.deviance_residuals(est, data);
        sample.rpd = model.rpd(&residuals, est, data);
        sample.rkd = model.rkd(&residuals, data);

        let replicate = data.with_correct(&data.simulate(&probs, rng)?)?;
        sample.pp_deviance = model.deviance(est, &replicate);
        let pp_residuals = model.deviance_residuals(est, &replicate);
        sample.pp_rpd = model.rpd(&pp_residuals, est, &replicate);
        sample.pp_rkd = model.rkd(&pp_residuals, &replicate);
        sample.pp_data = replicate.correct_counts();

        let full = model.neg_log_posterior(est, data);
        sample.log_ratios = reduced
            .iter()
            .map(|r| full - model.neg_log_posterior(est, r))
            .collect();
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asir::{PosteriorSample, PosteriorSampleSet};
    use crate::model::PsychometricFunction;

    fn set_of(params: Vec<Vec<f64>>) -> PosteriorSampleSet {
        let n = params.len();
        PosteriorSampleSet {
            samples: params
                .into_iter()
                .map(|p| PosteriorSample {
                    params: p,
                    deviance: 0.0,
                    rpd: f64::NAN,
                    rkd: f64::NAN,
                    pp_data: Vec::new(),
                    pp_deviance: f64::NAN,
                    pp_rpd: f64::NAN,
                    pp_rkd: f64::NAN,
                    log_ratios: Vec::new(),
                })
                .collect(),
            requested: n,
            entropy: 1.0,
            duplicate_rate: 0.0,
            truncated: false,
        }
    }

    #[test]
    fn fills_every_field() {
        let model = PsychometricFunction::from_names(2, "logistic", "ab").unwrap();
        let data = TrialData::new(&[1.0, 2.0, 3.0, 4.0], &[20; 4], &[11, 13, 17, 19], 2).unwrap();
        let mut set = set_of(vec![vec![2.5, 0.8, 0.02], vec![2.0, 1.0, 0.05]]);
        annotate(&model, &data, &mut set, 11).unwrap();
        for sample in &set.samples {
            assert_eq!(sample.pp_data.len(), 4);
            assert!(sample.pp_data.iter().all(|&k| k <= 20));
            assert_eq!(sample.log_ratios.len(), 4);
            assert!(sample.pp_deviance.is_finite());
            assert!(sample.rpd.is_finite() && sample.rkd.is_finite());
        }
    }

    #[test]
    fn same_seed_gives_same_replicates() {
        let model = PsychometricFunction::from_names(2, "gauss", "ab").unwrap();
        let data = TrialData::new(&[1.0, 2.0, 3.0], &[30; 3], &[16, 22, 28], 2).unwrap();
        let mut a = set_of(vec![vec![2.0, 1.0, 0.02]; 5]);
        let mut b = a.clone();
        annotate(&model, &data, &mut a, 3).unwrap();
        annotate(&model, &data, &mut b, 3).unwrap();
        let pp = |s: &PosteriorSampleSet| s.samples.iter().map(|x| x.pp_data.clone()).collect::<Vec<_>>();
        assert_eq!(pp(&a), pp(&b));
    }

    #[test]
    fn single_block_is_rejected() {
        let model = PsychometricFunction::from_names(2, "logistic", "ab").unwrap();
        let data = TrialData::new(&[1.0], &[20], &[15], 2).unwrap();
        let mut set = set_of(vec![vec![1.0, 1.0, 0.02]]);
        assert!(annotate(&model, &data, &mut set, 0).is_err());
    }
}
