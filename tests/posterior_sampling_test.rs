//! End-to-end tests of the importance resampling pipeline.
//!
//! 1. `test_peaked_posterior_duplicates`: a sharply peaked target against wide
//!    proposals yields duplicated samples and a low weight entropy.
//! 2. `test_same_seed_same_samples`: the full pipeline is deterministic.
//! 3. `test_outlier_block_log_ratio`: a block the model cannot explain has a
//!    large leave-one-out log-posterior ratio.

use psi_asir::asir::{sample_posterior, Asir};
use psi_asir::data::TrialData;
use psi_asir::distributions::Prior;
use psi_asir::model::{Model, PsychometricFunction};
use psi_asir::optimizer::Cobyla;

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use rand::{rngs::SmallRng, SeedableRng};

    /// Two-parameter model whose posterior is a narrow Gaussian at the origin.
    struct Peaked;

    impl Model for Peaked {
        fn n_params(&self) -> usize {
            2
        }
        fn evaluate(&self, _x: f64, _prm: &[f64]) -> f64 {
            0.5
        }
        fn neg_log_prior(&self, _prm: &[f64]) -> f64 {
            0.0
        }
        fn neg_log_posterior(&self, prm: &[f64], _data: &TrialData) -> f64 {
            prm.iter().map(|x| 0.5 * (x / 0.01).powi(2)).sum()
        }
        fn parameter_range(&self, _data: &TrialData, _index: usize) -> (f64, f64) {
            (-1.0, 1.0)
        }
        fn start(&self, _data: &TrialData) -> Vec<f64> {
            vec![0.0, 0.0]
        }
        fn threshold(&self, prm: &[f64], _cut: f64) -> f64 {
            prm[0]
        }
        fn slope(&self, prm: &[f64], _cut: f64) -> f64 {
            prm[1]
        }
    }

    fn model() -> PsychometricFunction {
        PsychometricFunction::from_names(2, "logistic", "ab")
            .unwrap()
            .with_priors(vec![
                Prior::gauss(3.0, 10.0).unwrap(),
                Prior::gamma(1.01, 2000.0).unwrap(),
                Prior::beta(2.0, 20.0).unwrap(),
            ])
            .unwrap()
    }

    #[test]
    fn test_peaked_posterior_duplicates() {
        let data = TrialData::new(&[1.0, 2.0], &[10, 10], &[5, 5], 2).unwrap();
        let fitted = [Prior::gauss(0.0, 1.0).unwrap(), Prior::gauss(0.0, 1.0).unwrap()];
        let mut rng = SmallRng::seed_from_u64(42);
        let set = sample_posterior(&Peaked, &data, &fitted, 100, 25, &mut rng).unwrap();

        assert_eq!(set.len(), 100);
        assert!(!set.truncated);
        assert!(set.duplicate_rate > 0.0 && set.duplicate_rate <= 1.0);
        assert!(set.entropy >= 0.0 && set.entropy < 1.0);

        // Resampled values concentrate near the narrow mode.
        let (mean, _) = set.summary();
        assert_abs_diff_eq!(mean[0], 0.0, epsilon = 0.1);
        assert_abs_diff_eq!(mean[1], 0.0, epsilon = 0.1);
    }

    #[test]
    fn test_same_seed_same_samples() {
        let data = TrialData::new(
            &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0],
            &[40; 6],
            &[21, 24, 30, 35, 38, 39],
            2,
        )
        .unwrap();
        let run = |seed| {
            Asir::new()
                .n_samples(300)
                .overpropose(10)
                .set_seed(seed)
                .run(&model(), &data, &Cobyla::new())
                .unwrap()
        };
        let (a, b) = (run(7), run(7));
        assert_eq!(a.samples.estimates(), b.samples.estimates());
        assert_eq!(a.samples.entropy, b.samples.entropy);
        assert_eq!(a.samples.duplicate_rate, b.samples.duplicate_rate);
        for (x, y) in a.samples.samples.iter().zip(&b.samples.samples) {
            assert_eq!(x.pp_data, y.pp_data);
            assert_eq!(x.deviance, y.deviance);
        }
        assert_eq!(a.posterior, b.posterior);

        let c = run(8);
        assert_ne!(a.samples.estimates(), c.samples.estimates());
    }

    #[test]
    fn test_outlier_block_log_ratio() {
        let data = TrialData::new(
            &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0],
            &[20; 6],
            &[15, 17, 18, 0, 19, 20],
            2,
        )
        .unwrap();
        let result = Asir::new()
            .n_samples(200)
            .overpropose(10)
            .set_seed(3)
            .run(&model(), &data, &Cobyla::new())
            .unwrap();
        let samples = &result.samples.samples;
        let mean_ratio = |k: usize| samples.iter().map(|s| s.log_ratios[k]).sum::<f64>() / samples.len() as f64;

        assert!(mean_ratio(3) > 10.0, "outlier ratio {}", mean_ratio(3));
        for k in [0, 1, 2, 4, 5] {
            assert!(mean_ratio(k) < mean_ratio(3));
        }
        for s in samples {
            assert_eq!(s.pp_data.len(), 6);
            assert!(s.pp_data.iter().all(|&k| k <= 20));
        }
    }

    #[test]
    fn test_marginals_are_normalized() {
        let data = TrialData::new(&[1.0, 2.0, 3.0, 4.0], &[30; 4], &[16, 21, 26, 29], 2).unwrap();
        let result = Asir::new()
            .n_samples(50)
            .overpropose(5)
            .set_seed(1)
            .run(&model(), &data, &Cobyla::new())
            .unwrap();
        let post = &result.posterior;
        for i in 0..3 {
            let mass = psi_asir::integrate::trapz(post.grid(i), post.margin(i));
            assert_abs_diff_eq!(mass, 1.0, epsilon = 1e-6);
        }
        assert_eq!(post.grid(2).first(), Some(&0.0));
        assert_eq!(post.grid(2).last(), Some(&1.0));
    }
}
