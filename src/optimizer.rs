//! MAP estimation.
//!
//! The posterior builder and the bootstrap only need an [`Optimizer`]; the
//! crate ships [`Cobyla`], a derivative-free search on the negative
//! log-posterior inside the model's [`Model::parameter_bounds`].

use cobyla::{minimize, Func, RhoBeg, StopTols};
use log::{debug, warn};

use crate::data::TrialData;
use crate::error::{PsiError, Result};
use crate::model::Model;

/// Objective value standing in for points where the negative log-posterior
/// is not finite.
const PENALTY: f64 = 1e30;

/// Finds the parameter vector minimising a model's negative log-posterior.
pub trait Optimizer: Sync {
    /// Returns the MAP estimate. `start` overrides [`Model::start`].
    fn optimize<M: Model>(&self, model: &M, data: &TrialData, start: Option<&[f64]>)
        -> Result<Vec<f64>>;
}

/// COBYLA (Constrained Optimization BY Linear Approximations), restarted
/// from its own optimum with a smaller initial step.
#[derive(Debug, Clone, PartialEq)]
pub struct Cobyla {
    max_eval: usize,
    rhobeg: f64,
    ftol_rel: f64,
    restarts: usize,
}

impl Default for Cobyla {
    fn default() -> Self {
        Self {
            max_eval: 5000,
            rhobeg: 0.5,
            ftol_rel: 1e-12,
            restarts: 1,
        }
    }
}

impl Cobyla {
    pub fn new() -> Self {
        Self::default()
    }

    /// Maximum number of objective evaluations per round.
    pub fn max_eval(mut self, max_eval: usize) -> Self {
        self.max_eval = max_eval;
        self
    }

    /// Initial change applied to every parameter.
    pub fn rhobeg(mut self, rhobeg: f64) -> Self {
        self.rhobeg = rhobeg;
        self
    }

    /// Relative tolerance on the objective value.
    pub fn ftol_rel(mut self, ftol_rel: f64) -> Self {
        self.ftol_rel = ftol_rel;
        self
    }

    pub fn restarts(mut self, restarts: usize) -> Self {
        self.restarts = restarts;
        self
    }

    fn minimize<F>(&self, f: &F, start: &[f64], bounds: &[(f64, f64)], rhobeg: f64) -> Result<(Vec<f64>, f64)>
    where
        F: Fn(&[f64]) -> f64,
    {
        let objective = |x: &[f64], _user_data: &mut ()| -> f64 {
            let v = f(x);
            if v.is_finite() {
                v
            } else {
                PENALTY
            }
        };
        let x0: Vec<f64> = start
            .iter()
            .zip(bounds)
            .map(|(&v, &(lower, upper))| v.clamp(lower, upper))
            .collect();
        let constraints: Vec<&dyn Func<()>> = vec![];
        let stop_tol = StopTols {
            ftol_rel: self.ftol_rel,
            ..StopTols::default()
        };

        match minimize(
            objective,
            &x0,
            bounds,
            &constraints,
            (),
            self.max_eval,
            RhoBeg::All(rhobeg),
            Some(stop_tol),
        ) {
            Ok((status, x, value)) => {
                debug!("cobyla stopped with {status:?}, objective {value}");
                Ok((x, value))
            }
            Err((cobyla::FailStatus::RoundoffLimited, x, value)) => {
                warn!("cobyla limited by roundoff, objective {value}");
                Ok((x, value))
            }
            Err((status, _, value)) => Err(PsiError::OptimizerFailure(format!(
                "cobyla failed with {status:?}, objective {value}"
            ))),
        }
    }
}

impl Optimizer for Cobyla {
    fn optimize<M: Model>(
        &self,
        model: &M,
        data: &TrialData,
        start: Option<&[f64]>,
    ) -> Result<Vec<f64>> {
        let mut x = match start {
            Some(s) if s.len() != model.n_params() => {
                return Err(PsiError::LengthMismatch {
                    what: "start",
                    expected: model.n_params(),
                    actual: s.len(),
                })
            }
            Some(s) => s.to_vec(),
            None => model.start(data),
        };
        let bounds: Vec<(f64, f64)> = (0..model.n_params())
            .map(|i| model.parameter_bounds(i))
            .collect();
        let f = |prm: &[f64]| model.neg_log_posterior(prm, data);
        let mut value = f64::INFINITY;
        let mut rhobeg = self.rhobeg;
        for round in 0..=self.restarts {
            let (next, next_value) = self.minimize(&f, &x, &bounds, rhobeg)?;
            debug!("cobyla round {round}: objective {next_value}");
            x = next;
            value = next_value;
            rhobeg *= 0.1;
        }
        if !value.is_finite() || value >= PENALTY || x.iter().any(|v| !v.is_finite()) {
            return Err(PsiError::OptimizerFailure(format!(
                "no finite optimum found, best objective {value}"
            )));
        }
        Ok(x)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PsychometricFunction;
    use approx::assert_abs_diff_eq;

    #[test]
    fn minimizes_a_quadratic() {
        let optimizer = Cobyla::new();
        let f = |x: &[f64]| (x[0] - 1.0).powi(2) + 10.0 * (x[1] + 2.0).powi(2);
        let free = [(f64::NEG_INFINITY, f64::INFINITY); 2];
        let (x, value) = optimizer.minimize(&f, &[0.0, 0.0], &free, 0.5).unwrap();
        assert_abs_diff_eq!(x[0], 1.0, epsilon = 1e-3);
        assert_abs_diff_eq!(x[1], -2.0, epsilon = 1e-3);
        assert!(value < 1e-6);
    }

    #[test]
    fn respects_bounds() {
        let optimizer = Cobyla::new();
        let f = |x: &[f64]| (x[0] + 1.0).powi(2) + (x[1] - 0.5).powi(2);
        let bounds = [(0.0, 1.0), (0.0, 1.0)];
        let (x, _) = optimizer.minimize(&f, &[0.5, 0.2], &bounds, 0.1).unwrap();
        assert_abs_diff_eq!(x[0], 0.0, epsilon = 1e-6);
        assert_abs_diff_eq!(x[1], 0.5, epsilon = 1e-3);
    }

    #[test]
    fn recovers_generating_parameters_from_clean_data() {
        let model = PsychometricFunction::from_names(2, "logistic", "ab").unwrap();
        let truth = [3.0, 0.8, 0.0];
        let x = [1.0, 2.0, 2.5, 3.0, 3.5, 4.0, 5.0];
        let n = [1000u32; 7];
        let k: Vec<u32> = x
            .iter()
            .map(|&xi| (model.evaluate(xi, &truth) * 1000.0).round() as u32)
            .collect();
        let data = TrialData::new(&x, &n, &k, 2).unwrap();
        let fit = Cobyla::new().optimize(&model, &data, None).unwrap();
        assert_abs_diff_eq!(fit[0], 3.0, epsilon = 0.05);
        assert_abs_diff_eq!(fit[1], 0.8, epsilon = 0.05);
        assert!(fit[2] >= 0.0 && fit[2] < 0.02);
    }

    #[test]
    fn rejects_wrong_start_length() {
        let model = PsychometricFunction::from_names(2, "logistic", "ab").unwrap();
        let data = TrialData::new(&[1.0, 2.0], &[10, 10], &[6, 9], 2).unwrap();
        let err = Cobyla::new()
            .optimize(&model, &data, Some(&[1.0, 1.0][..]))
            .unwrap_err();
        assert!(matches!(err, PsiError::LengthMismatch { .. }));
    }
}
