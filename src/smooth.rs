//! Smoothing parameter selection by derivative-free GCV minimization.
//!
//! The free parameter is theta = log(alpha), one entry per smooth term, so
//! every trial stays positive without explicit bounds. Each trial runs PIRLS
//! at alpha = exp(theta) and scores the fit by GCV; the best trial observed
//! anywhere in the search is kept, so a non-improving search still returns
//! the starting fit rather than failing.

use log::debug;
use ndarray::{Array1, Array2};

use crate::diagnostics::{self, Diagnostics};
use crate::family::{Family, Link};
use crate::penalty::assemble_total_penalty;
use crate::pirls::{fit_pirls, PirlsResult};
use crate::{GamError, Result};

/// Derivative-free search method for the outer GCV loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Optimizer {
    /// Nelder-Mead simplex in log-alpha space (default).
    NelderMead,
    /// Cyclic per-term sweep over a log-spaced grid.
    GridSearch,
}

/// Fit configuration forwarded from the entry point.
#[derive(Debug, Clone)]
pub struct FitOptions {
    pub optimizer: Optimizer,
    /// Budget of outer objective evaluations.
    pub max_outer_iter: usize,
    /// Relative GCV spread at which the outer search stops.
    pub outer_tol: f64,
    pub max_inner_iter: usize,
    /// Relative deviance-change tolerance for PIRLS.
    pub inner_tol: f64,
    /// Difference order of the smoothness penalty.
    pub penalty_order: usize,
}

impl Default for FitOptions {
    fn default() -> Self {
        Self {
            optimizer: Optimizer::NelderMead,
            max_outer_iter: 200,
            outer_tol: 1e-6,
            max_inner_iter: 100,
            inner_tol: 1e-8,
            penalty_order: 2,
        }
    }
}

struct BestTrial {
    gcv: f64,
    alpha: Vec<f64>,
    fit: PirlsResult,
    diagnostics: Diagnostics,
}

/// Objective wrapper: runs PIRLS at alpha = exp(theta), scores by GCV and
/// keeps the best successful trial. Failed trials score +infinity.
struct GcvObjective<'a> {
    y: &'a Array1<f64>,
    x: &'a Array2<f64>,
    blocks: &'a [(usize, Array2<f64>)],
    family: Family,
    link: Link,
    max_inner_iter: usize,
    inner_tol: f64,
    trials: usize,
    last_alpha: Vec<f64>,
    best: Option<BestTrial>,
}

impl GcvObjective<'_> {
    fn score(&mut self, theta: &[f64]) -> f64 {
        let alpha: Vec<f64> = theta.iter().map(|t| t.exp()).collect();
        self.trials += 1;
        self.last_alpha = alpha.clone();

        let s_total = assemble_total_penalty(self.x.ncols(), self.blocks, &alpha);
        let fit = match fit_pirls(
            self.y,
            self.x,
            &s_total,
            self.family,
            self.link,
            self.max_inner_iter,
            self.inner_tol,
        ) {
            Ok(fit) => fit,
            Err(e) => {
                debug!("gcv trial at alpha {alpha:?} abandoned: {e}");
                return f64::INFINITY;
            }
        };
        let diag = match diagnostics::compute(self.y.len(), self.family, &fit, &s_total) {
            Ok(d) => d,
            Err(e) => {
                debug!("gcv trial at alpha {alpha:?} abandoned: {e}");
                return f64::INFINITY;
            }
        };
        let gcv = diag.gcv;
        if !gcv.is_finite() {
            return f64::INFINITY;
        }
        debug!("gcv trial: alpha {alpha:?} -> gcv {gcv:.6e}");

        if self.best.as_ref().map_or(true, |b| gcv < b.gcv) {
            self.best = Some(BestTrial {
                gcv,
                alpha,
                fit,
                diagnostics: diag,
            });
        }
        gcv
    }
}

/// Select smoothing parameters for the smooth-term penalty `blocks` and
/// return the winning (alpha, PIRLS fit, diagnostics) triple.
pub(crate) fn select_smoothing(
    y: &Array1<f64>,
    x: &Array2<f64>,
    blocks: &[(usize, Array2<f64>)],
    family: Family,
    link: Link,
    options: &FitOptions,
) -> Result<(Vec<f64>, PirlsResult, Diagnostics)> {
    let m = blocks.len();
    let mut objective = GcvObjective {
        y,
        x,
        blocks,
        family,
        link,
        max_inner_iter: options.max_inner_iter,
        inner_tol: options.inner_tol,
        trials: 0,
        last_alpha: Vec::new(),
        best: None,
    };

    if m == 0 {
        // No smooth term to tune; a single unpenalized fit is the model.
        objective.score(&[]);
    } else {
        let start = vec![0.0; m];
        match options.optimizer {
            Optimizer::NelderMead => {
                nelder_mead(
                    |theta| objective.score(theta),
                    &start,
                    options.max_outer_iter,
                    options.outer_tol,
                );
            }
            Optimizer::GridSearch => {
                grid_sweep(
                    |theta| objective.score(theta),
                    &start,
                    options.max_outer_iter,
                );
            }
        }
    }

    match objective.best {
        Some(best) => Ok((best.alpha, best.fit, best.diagnostics)),
        None => Err(GamError::OuterOptimization {
            trials: objective.trials,
            last_alpha: objective.last_alpha,
        }),
    }
}

/// Nelder-Mead simplex minimization. Returns the best vertex found.
///
/// Standard reflection/expansion/contraction/shrink coefficients; the search
/// stops when the evaluation budget is spent or the simplex function values
/// have collapsed to within `tol` relatively.
pub(crate) fn nelder_mead<F>(
    mut f: F,
    start: &[f64],
    max_evals: usize,
    tol: f64,
) -> (Vec<f64>, f64)
where
    F: FnMut(&[f64]) -> f64,
{
    let dim = start.len();
    let step = 1.0;

    let mut evals = 0usize;
    let mut eval = |p: &[f64], evals: &mut usize| {
        *evals += 1;
        f(p)
    };

    // Initial simplex: start plus a unit step along each axis.
    let mut simplex: Vec<(Vec<f64>, f64)> = Vec::with_capacity(dim + 1);
    let f0 = eval(start, &mut evals);
    simplex.push((start.to_vec(), f0));
    for i in 0..dim {
        let mut p = start.to_vec();
        p[i] += step;
        let fp = eval(&p, &mut evals);
        simplex.push((p, fp));
    }

    while evals < max_evals {
        simplex.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        let f_best = simplex[0].1;
        let f_worst = simplex[dim].1;
        if f_best.is_finite()
            && f_worst.is_finite()
            && (f_worst - f_best).abs() <= tol * (f_best.abs() + tol)
        {
            break;
        }

        // Centroid of all vertices except the worst.
        let mut centroid = vec![0.0; dim];
        for (p, _) in simplex.iter().take(dim) {
            for (c, &pi) in centroid.iter_mut().zip(p.iter()) {
                *c += pi / dim as f64;
            }
        }
        let worst = simplex[dim].0.clone();

        let at = |coef: f64| -> Vec<f64> {
            centroid
                .iter()
                .zip(worst.iter())
                .map(|(&c, &w)| c + coef * (c - w))
                .collect()
        };

        // Reflection.
        let xr = at(1.0);
        let fr = eval(&xr, &mut evals);

        if fr < simplex[0].1 {
            // Expansion.
            let xe = at(2.0);
            let fe = eval(&xe, &mut evals);
            simplex[dim] = if fe < fr { (xe, fe) } else { (xr, fr) };
        } else if fr < simplex[dim - 1].1 {
            simplex[dim] = (xr, fr);
        } else {
            // Contraction, outside or inside depending on the reflection.
            let xc = if fr < simplex[dim].1 { at(0.5) } else { at(-0.5) };
            let fc = eval(&xc, &mut evals);
            if fc < fr.min(simplex[dim].1) {
                simplex[dim] = (xc, fc);
            } else {
                // Shrink toward the best vertex.
                let best = simplex[0].0.clone();
                for vertex in simplex.iter_mut().skip(1) {
                    for (v, &b) in vertex.0.iter_mut().zip(best.iter()) {
                        *v = b + 0.5 * (*v - b);
                    }
                    vertex.1 = eval(&vertex.0.clone(), &mut evals);
                }
            }
        }
    }

    simplex.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
    (simplex[0].0.clone(), simplex[0].1)
}

/// Cyclic coordinate sweep over a log-spaced grid of smoothing parameters,
/// holding the other coordinates fixed. A robust, slower alternative to the
/// simplex search.
pub(crate) fn grid_sweep<F>(mut f: F, start: &[f64], max_evals: usize) -> (Vec<f64>, f64)
where
    F: FnMut(&[f64]) -> f64,
{
    const GRID_LO: f64 = -10.0;
    const GRID_HI: f64 = 10.0;
    const GRID_POINTS: usize = 21;

    let dim = start.len();
    let mut current = start.to_vec();
    let mut current_f = f(&current);
    let mut evals = 1usize;

    loop {
        let mut moved = false;
        for i in 0..dim {
            for g in 0..GRID_POINTS {
                if evals >= max_evals {
                    return (current, current_f);
                }
                let theta_i =
                    GRID_LO + (GRID_HI - GRID_LO) * g as f64 / (GRID_POINTS - 1) as f64;
                let mut candidate = current.clone();
                candidate[i] = theta_i;
                let fc = f(&candidate);
                evals += 1;
                if fc < current_f {
                    current = candidate;
                    current_f = fc;
                    moved = true;
                }
            }
        }
        if !moved || evals >= max_evals {
            return (current, current_f);
        }
    }
}
