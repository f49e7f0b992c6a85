/*!
Independent marginal posterior approximations.

Each parameter's marginal is obtained by evaluating the negative log-posterior
on a grid while the other parameters are held at the MAP estimate. The
normalised marginal is then moment-matched to a closed-form family chosen by
parameter index, see [`FAMILY_BY_INDEX`].
*/

use log::{debug, warn};

use crate::data::TrialData;
use crate::distributions::{Family, Prior};
use crate::error::{PsiError, Result};
use crate::integrate::{lingrid, match_beta, match_gamma, match_gauss, normalize_probability};
use crate::model::Model;
use crate::optimizer::Optimizer;

pub const DEFAULT_GRID_SIZE: usize = 100;

/// Closed-form family used for the fitted posterior of each parameter index:
/// location, scale/width, lapse rate, guess rate.
pub const FAMILY_BY_INDEX: [Family; 4] = [Family::Gauss, Family::Gamma, Family::Beta, Family::Beta];

const CLIP_BELOW: f64 = -1e10;
const SENTINEL: f64 = 1e20;

/// Per-parameter grids, normalised marginals and moment-matched posteriors.
#[derive(Debug, Clone, PartialEq)]
pub struct IndependentPosterior {
    pub grids: Vec<Vec<f64>>,
    pub margins: Vec<Vec<f64>>,
    pub fitted: Vec<Prior>,
    /// MAP estimate the grids were evaluated around.
    pub map: Vec<f64>,
    /// Grid indices whose value was repaired, per parameter.
    pub repaired: Vec<Vec<usize>>,
    /// Grid indices where `exp(Z - nlp)` overflowed, per parameter. Such a
    /// marginal is offset by its smallest negative log-posterior instead.
    pub overflowed: Vec<Vec<usize>>,
}

impl IndependentPosterior {
    pub fn n_params(&self) -> usize {
        self.fitted.len()
    }

    pub fn grid(&self, index: usize) -> &[f64] {
        &self.grids[index]
    }

    pub fn margin(&self, index: usize) -> &[f64] {
        &self.margins[index]
    }

    pub fn posterior(&self, index: usize) -> &Prior {
        &self.fitted[index]
    }
}

/// [`build_marginals_with_grid_size`] with [`DEFAULT_GRID_SIZE`] points.
pub fn build_marginals<M, O>(model: &M, data: &TrialData, optimizer: &O) -> Result<IndependentPosterior>
where
    M: Model,
    O: Optimizer,
{
    build_marginals_with_grid_size(model, data, optimizer, DEFAULT_GRID_SIZE)
}

pub fn build_marginals_with_grid_size<M, O>(
    model: &M,
    data: &TrialData,
    optimizer: &O,
    grid_size: usize,
) -> Result<IndependentPosterior>
where
    M: Model,
    O: Optimizer,
{
    let n_params = model.n_params();
    if !(2..=FAMILY_BY_INDEX.len()).contains(&n_params) {
        return Err(PsiError::UnsupportedParameterCount(n_params));
    }
    if grid_size < 2 {
        return Err(PsiError::InvalidArgument("grid size must be at least 2"));
    }
    for (param, family) in FAMILY_BY_INDEX.iter().take(n_params).enumerate() {
        let (lower, upper) = model.parameter_bounds(param);
        let (low, high) = family.support();
        if lower < low || upper > high {
            return Err(PsiError::FamilyMismatch {
                param,
                family: *family,
                lower,
                upper,
            });
        }
    }

    let map = optimizer.optimize(model, data, None)?;
    debug!("MAP estimate for marginal grids: {map:?}");

    let mut grids = Vec::with_capacity(n_params);
    let mut margins = Vec::with_capacity(n_params);
    let mut fitted = Vec::with_capacity(n_params);
    let mut repaired = Vec::with_capacity(n_params);
    let mut overflowed = Vec::with_capacity(n_params);

    for i in 0..n_params {
        let (min, max) = search_range(model, data, i);
        let grid = lingrid(min, max, grid_size);
        let GridEvaluation {
            density: mut margin,
            repaired: fixed,
            overflowed: overflow,
        } = evaluate_grid(model, data, &map, i, &grid)?;

        let mass = normalize_probability(&grid, &mut margin);
        if !mass.is_finite() || mass <= 0.0 {
            return Err(PsiError::DegenerateGrid {
                param: i,
                reason: "marginal has no finite positive mass",
            });
        }

        let posterior = match FAMILY_BY_INDEX[i] {
            Family::Gauss => {
                let (mean, std) = match_gauss(&grid, &margin);
                Prior::new(Family::Gauss, mean, std)
            }
            Family::Gamma => {
                let (shape, scale) = match_gamma(&grid, &margin);
                Prior::new(Family::Gamma, shape, scale)
            }
            family => {
                let (alpha, beta) = match_beta(&grid, &margin);
                Prior::new(family, alpha, beta)
            }
        }
        .map_err(|e| PsiError::InvalidPrior(format!("moment matching parameter {i}: {e}")))?;
        debug!("parameter {i}: fitted {posterior}");

        grids.push(grid);
        margins.push(margin);
        fitted.push(posterior);
        repaired.push(fixed);
        overflowed.push(overflow);
    }

    Ok(IndependentPosterior {
        grids,
        margins,
        fitted,
        map,
        repaired,
        overflowed,
    })
}

fn search_range<M: Model>(model: &M, data: &TrialData, index: usize) -> (f64, f64) {
    let (min, max) = model.parameter_range(data, index);
    match index {
        0 => (min, max),
        1 => (min, 2.0 * max),
        _ => (0.0, 1.0),
    }
}

struct GridEvaluation {
    density: Vec<f64>,
    repaired: Vec<usize>,
    overflowed: Vec<usize>,
}

/// Unnormalised density `exp(Z - nlp)` on the grid, with the repaired and
/// overflowed indices.
fn evaluate_grid<M: Model>(
    model: &M,
    data: &TrialData,
    map: &[f64],
    index: usize,
    grid: &[f64],
) -> Result<GridEvaluation> {
    let mut prm = map.to_vec();
    let mut values: Vec<f64> = Vec::with_capacity(grid.len());
    let mut repaired = Vec::new();
    let mut z = 0.0;
    let mut count = 0usize;

    for (j, &x) in grid.iter().enumerate() {
        prm[index] = x;
        let p = model.neg_log_posterior(&prm, data);
        let mut value = if p.is_finite() {
            p.max(CLIP_BELOW)
        } else {
            repaired.push(j);
            match values.last() {
                Some(&previous) => previous,
                None => {
                    prm[index] = grid.get(1).copied().unwrap_or(x);
                    model.neg_log_posterior(&prm, data)
                }
            }
        };
        if !value.is_finite() {
            warn!("parameter {index}: negative log-posterior at grid point {j} is not finite, using {SENTINEL:e}");
            value = SENTINEL;
        }
        if p > CLIP_BELOW && p < -CLIP_BELOW {
            z += value;
            count += 1;
        }
        values.push(value);
    }

    if count == 0 {
        return Err(PsiError::DegenerateGrid {
            param: index,
            reason: "no finite negative log-posterior on the grid",
        });
    }
    if !repaired.is_empty() {
        debug!("parameter {index}: repaired grid points {repaired:?}");
    }
    let z = z / count as f64;
    let mut density: Vec<f64> = values.iter().map(|v| (z - v).exp()).collect();
    let overflowed: Vec<usize> = density
        .iter()
        .enumerate()
        .filter(|(_, d)| !d.is_finite())
        .map(|(j, _)| j)
        .collect();
    if !overflowed.is_empty() {
        let floor = values.iter().copied().fold(f64::INFINITY, f64::min);
        warn!(
            "parameter {index}: exp(Z - nlp) overflows at {} grid points with Z = {z}, offsetting by {floor} instead",
            overflowed.len()
        );
        density = values.iter().map(|v| (floor - v).exp()).collect();
    }
    Ok(GridEvaluation {
        density,
        repaired,
        overflowed,
    })
}
