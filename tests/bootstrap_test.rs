//! Tests of the bootstrap and jackknife against known generating processes.
//!
//! 1. `test_parametric_counts_are_binomial`: replicate counts simulated at a
//!    success probability of 0.5 have binomial mean and variance.
//! 2. `test_jackknife_against_bootstrap_band`: jackknife flags the block that
//!    contradicts the rest of the data.

use psi_asir::bootstrap::{bootstrap, jackknife, Bootstrap};
use psi_asir::data::TrialData;
use psi_asir::distributions::Prior;
use psi_asir::model::PsychometricFunction;
use psi_asir::optimizer::Cobyla;

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use rand::{rngs::SmallRng, SeedableRng};

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
    fn test_parametric_counts_are_binomial() {
        const N_TRIALS: u32 = 50;
        let data = TrialData::new(&[1.0, 2.0, 3.0, 4.0], &[N_TRIALS; 4], &[26, 31, 40, 47], 2).unwrap();
        // A lapse rate of 0.5 in a 2AFC task fixes the success probability at 0.5.
        let set = Bootstrap::new()
            .n_replicates(400)
            .generating(vec![0.0, 1.0, 0.5])
            .set_seed(42)
            .run(&model(), &data, &Cobyla::new())
            .unwrap();

        let counts: Vec<f64> = set
            .replicates
            .iter()
            .flat_map(|r| r.data.iter().map(|&k| k as f64))
            .collect();
        let n = counts.len() as f64;
        let mean = counts.iter().sum::<f64>() / n;
        let var = counts.iter().map(|k| (k - mean).powi(2)).sum::<f64>() / (n - 1.0);
        assert_abs_diff_eq!(mean, N_TRIALS as f64 / 2.0, epsilon = 0.5);
        assert_abs_diff_eq!(var, N_TRIALS as f64 / 4.0, epsilon = 1.5);
    }

    #[test]
    fn test_free_function_matches_builder_shape() {
        let data = TrialData::new(&[1.0, 2.0, 3.0, 4.0], &[40; 4], &[22, 27, 34, 39], 2).unwrap();
        let mut rng = SmallRng::seed_from_u64(5);
        let set = bootstrap(
            30,
            &data,
            &model(),
            &Cobyla::new(),
            &[0.25, 0.5, 0.75],
            None,
            true,
            &mut rng,
        )
        .unwrap();
        assert_eq!(set.len(), 30);
        assert!(set.nonparametric);
        assert_eq!(set.estimates().shape(), &[30, 3]);
        for r in &set.replicates {
            assert_eq!(r.thresholds.len(), 3);
            assert!(r.thresholds[0] <= r.thresholds[1] && r.thresholds[1] <= r.thresholds[2]);
        }
    }

    #[test]
    fn test_jackknife_against_bootstrap_band() {
        let data = TrialData::new(
            &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0],
            &[20; 6],
            &[15, 17, 18, 0, 19, 20],
            2,
        )
        .unwrap();
        let jk = jackknife(&data, &model(), &Cobyla::new()).unwrap();
        let outliers = jk.outliers();
        assert!(outliers[3]);

        let set = Bootstrap::new()
            .n_replicates(100)
            .set_seed(2)
            .run(&model(), &data, &Cobyla::new())
            .unwrap();
        let influential = jk.influential_blocks(&set);
        assert_eq!(influential.len(), 6);
        assert!(influential[3]);
    }
}
