//! PIRLS (penalized iteratively reweighted least squares) solver.
//!
//! Fits coefficients for a fixed smoothing-parameter vector by repeatedly
//! linearizing the likelihood: working weights and response are rebuilt from
//! the current mean, and the penalized weighted normal equations are solved
//! until the relative deviance change falls below tolerance.

use log::trace;
use ndarray::{Array1, Array2};
use ndarray_linalg::{ReciprocalConditionNum, Solve};

use crate::family::{Family, Link};
use crate::{GamError, Result};

/// Guard against division by a vanishing deviance in the convergence test.
const DEV_EPS: f64 = 1e-10;

/// Penalized systems with a reciprocal condition estimate below this are
/// rejected; a solution computed against them carries no usable digits.
const RCOND_MIN: f64 = 1e-12;

/// Converged (or iteration-capped) PIRLS state.
pub struct PirlsResult {
    pub beta: Array1<f64>,
    pub eta: Array1<f64>,
    pub mu: Array1<f64>,
    pub weights: Array1<f64>,
    pub deviance: f64,
    pub iterations: usize,
    pub converged: bool,
    /// X'WX from the final iteration, reused by the diagnostics calculator.
    pub xtwx: Array2<f64>,
}

/// Fit the penalized weighted GLM for a fixed total penalty `s_total`.
///
/// `x` is the assembled design matrix (intercept, smooth blocks, linear
/// columns); `s_total` the matching block-diagonal penalty. Running out of
/// iterations is a soft failure (`converged = false`); only an unsolvable
/// system is an error.
pub fn fit_pirls(
    y: &Array1<f64>,
    x: &Array2<f64>,
    s_total: &Array2<f64>,
    family: Family,
    link: Link,
    max_iter: usize,
    tol: f64,
) -> Result<PirlsResult> {
    let n = y.len();
    let p = x.ncols();

    if x.nrows() != n {
        return Err(GamError::InvalidInputData(format!(
            "design matrix has {} rows but response has {} elements",
            x.nrows(),
            n
        )));
    }
    if s_total.nrows() != p || s_total.ncols() != p {
        return Err(GamError::InvalidInputData(format!(
            "penalty is {}x{} but design has {} columns",
            s_total.nrows(),
            s_total.ncols(),
            p
        )));
    }

    let mut mu = family.initialize_mu(y);
    let mut eta = mu.mapv(|m| link.link(m));
    let mut deviance = family.deviance(y, &mu);

    let mut beta = Array1::zeros(p);
    let mut weights = Array1::ones(n);
    let mut converged = false;
    let mut iterations = 0;

    for iter in 1..=max_iter {
        iterations = iter;

        // Working weights w = 1 / (V(mu) g'(mu)^2) and working response
        // z = eta + (y - mu) g'(mu), one pass.
        let mut z = Array1::zeros(n);
        for i in 0..n {
            let g_prime = link.deriv(mu[i]);
            let v = family.variance(mu[i]).max(DEV_EPS);
            weights[i] = 1.0 / (v * g_prime * g_prime);
            z[i] = eta[i] + (y[i] - mu[i]) * g_prime;
        }

        // X'WX and X'Wz.
        let mut xw = x.to_owned();
        for (mut row, &wi) in xw.rows_mut().into_iter().zip(weights.iter()) {
            row *= wi;
        }
        let xtwx = x.t().dot(&xw);
        let wz = &weights * &z;
        let xtwz = x.t().dot(&wz);

        // Solve (X'WX + S) beta = X'Wz. An exactly singular factorization,
        // a reciprocal condition estimate below RCOND_MIN or a non-finite
        // solution all abandon this smoothing-parameter trial.
        let a = &xtwx + s_total;
        let rcond = a
            .rcond()
            .map_err(|_| GamError::SingularSystem { iteration: iter })?;
        if !rcond.is_finite() || rcond < RCOND_MIN {
            return Err(GamError::SingularSystem { iteration: iter });
        }
        beta = a
            .solve_into(xtwz)
            .map_err(|_| GamError::SingularSystem { iteration: iter })?;
        if beta.iter().any(|b| !b.is_finite()) {
            return Err(GamError::SingularSystem { iteration: iter });
        }

        eta = x.dot(&beta);
        mu = eta.mapv(|e| family.clip_mu(link.inverse(e)));

        let new_deviance = family.deviance(y, &mu);
        let rel_change = (new_deviance - deviance).abs() / (deviance.abs() + DEV_EPS);
        trace!(
            "pirls iter {iter}: deviance {new_deviance:.6e} (rel change {rel_change:.3e})"
        );
        deviance = new_deviance;

        if rel_change < tol {
            converged = true;
            break;
        }
    }

    // Weights and X'WX consistent with the final mu, for the hat-matrix
    // trace downstream.
    for i in 0..n {
        let g_prime = link.deriv(mu[i]);
        let v = family.variance(mu[i]).max(DEV_EPS);
        weights[i] = 1.0 / (v * g_prime * g_prime);
    }
    let mut xw = x.to_owned();
    for (mut row, &wi) in xw.rows_mut().into_iter().zip(weights.iter()) {
        row *= wi;
    }
    let xtwx = x.t().dot(&xw);

    Ok(PirlsResult {
        beta,
        eta,
        mu,
        weights,
        deviance,
        iterations,
        converged,
        xtwx,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::Array2;
    use ndarray_linalg::Solve;

    fn polynomial_design(n: usize, p: usize) -> Array2<f64> {
        Array2::from_shape_fn((n, p), |(i, j)| ((i as f64) * 0.1).powi(j as i32))
    }

    #[test]
    fn test_normal_identity_matches_ridge_solution() {
        // For Normal/Identity, the first PIRLS step from mu = y is the
        // closed-form ridge solution (X'X + S)^{-1} X'y.
        let n = 30;
        let p = 4;
        let x = polynomial_design(n, p);
        let y: Array1<f64> = (0..n).map(|i| (i as f64 * 0.1).sin()).collect();
        let s = Array2::eye(p) * 0.5;

        let fit = fit_pirls(&y, &x, &s, Family::Normal, Link::Identity, 50, 1e-10).unwrap();

        let a = &x.t().dot(&x) + &s;
        let ridge = a.solve_into(x.t().dot(&y)).unwrap();
        for j in 0..p {
            assert_abs_diff_eq!(fit.beta[j], ridge[j], epsilon = 1e-8);
        }
        assert!(fit.converged);
    }

    #[test]
    fn test_poisson_log_converges() {
        let n = 60;
        let x = Array2::from_shape_fn((n, 2), |(i, j)| if j == 0 { 1.0 } else { i as f64 / n as f64 });
        // True model: log(mu) = 0.5 + 1.2 x, response rounded to counts.
        let y: Array1<f64> = (0..n)
            .map(|i| (0.5 + 1.2 * (i as f64 / n as f64)).exp().round())
            .collect();

        let s = Array2::zeros((2, 2));
        let fit = fit_pirls(&y, &x, &s, Family::Poisson, Link::Log, 50, 1e-8).unwrap();
        assert!(fit.converged);
        assert!((fit.beta[1] - 1.2).abs() < 0.5);
        assert!(fit.mu.iter().all(|&m| m > 0.0));
    }

    #[test]
    fn test_bernoulli_clipping_keeps_weights_finite() {
        let n = 40;
        let x = Array2::from_shape_fn((n, 2), |(i, j)| {
            if j == 0 {
                1.0
            } else {
                (i as f64 / n as f64) * 4.0 - 2.0
            }
        });
        // Perfectly separated response drives mu to the boundary; clipping
        // must keep the loop finite and return a soft result either way.
        let y: Array1<f64> = (0..n).map(|i| if i < n / 2 { 0.0 } else { 1.0 }).collect();

        let s = Array2::eye(2) * 1e-4;
        let fit = fit_pirls(&y, &x, &s, Family::Bernoulli, Link::Logit, 25, 1e-8).unwrap();
        assert!(fit.weights.iter().all(|w| w.is_finite()));
        assert!(fit.mu.iter().all(|&m| m > 0.0 && m < 1.0));
    }

    #[test]
    fn test_iteration_cap_is_soft() {
        let n = 40;
        let x = Array2::from_shape_fn((n, 2), |(i, j)| {
            if j == 0 {
                1.0
            } else {
                (i as f64) / (n as f64)
            }
        });
        let y: Array1<f64> = (0..n).map(|i| (i % 2) as f64).collect();
        let s = Array2::zeros((2, 2));

        // One iteration cannot reach tolerance on this data.
        let fit = fit_pirls(&y, &x, &s, Family::Bernoulli, Link::Logit, 1, 1e-12).unwrap();
        assert!(!fit.converged);
        assert_eq!(fit.iterations, 1);
    }

    #[test]
    fn test_near_singular_system_is_rejected() {
        // Two columns differing only at machine precision leave the normal
        // equations without a usable reciprocal condition estimate; a finite
        // but garbage solution must not be returned.
        let n = 30;
        let mut x = Array2::ones((n, 3));
        for i in 0..n {
            let t = i as f64 / n as f64;
            x[[i, 1]] = t;
            x[[i, 2]] = t * (1.0 + 1e-14);
        }
        let y: Array1<f64> = (0..n).map(|i| i as f64 / n as f64).collect();
        let s = Array2::zeros((3, 3));
        assert!(matches!(
            fit_pirls(&y, &x, &s, Family::Normal, Link::Identity, 10, 1e-8),
            Err(GamError::SingularSystem { .. })
        ));
    }

    #[test]
    fn test_dimension_mismatch() {
        let y = Array1::zeros(10);
        let x = Array2::zeros((5, 2));
        let s = Array2::zeros((2, 2));
        assert!(matches!(
            fit_pirls(&y, &x, &s, Family::Normal, Link::Identity, 10, 1e-8),
            Err(GamError::InvalidInputData(_))
        ));
    }
}
