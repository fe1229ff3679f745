//! Model diagnostics from a converged PIRLS fit.
//!
//! The smoother matrix is H = X (X'WX + S)^{-1} X'W; its trace (the
//! effective degrees of freedom) is computed as tr((X'WX + S)^{-1} X'WX),
//! which reuses the p x p matrices from the final PIRLS iteration instead of
//! forming the n x n hat matrix.

use ndarray::Array2;
use ndarray_linalg::Inverse;

use crate::family::Family;
use crate::pirls::PirlsResult;
use crate::{GamError, Result};

/// Summary quantities for a fitted model.
#[derive(Debug, Clone)]
pub struct Diagnostics {
    /// Effective degrees of freedom, tr(H).
    pub edf: f64,
    /// Generalized cross-validation score, n D / (n - edf)^2.
    pub gcv: f64,
    /// Dispersion estimate; fixed at 1 for Poisson and Bernoulli.
    pub dispersion: f64,
    pub converged: bool,
    pub iterations: usize,
}

/// Effective degrees of freedom tr((X'WX + S)^{-1} X'WX).
pub fn effective_df(xtwx: &Array2<f64>, s_total: &Array2<f64>) -> Result<f64> {
    let a = xtwx + s_total;
    let a_inv = a.inv().map_err(|_| GamError::SingularSystem { iteration: 0 })?;
    Ok(xtwx.dot(&a_inv).diag().sum())
}

/// GCV(alpha) = n D / (n - edf)^2.
pub fn gcv_score(n: usize, deviance: f64, edf: f64) -> f64 {
    let n = n as f64;
    n * deviance / (n - edf).powi(2)
}

/// Assemble diagnostics from the final PIRLS iterate.
pub fn compute(n: usize, family: Family, fit: &PirlsResult, s_total: &Array2<f64>) -> Result<Diagnostics> {
    let edf = effective_df(&fit.xtwx, s_total)?;
    let gcv = gcv_score(n, fit.deviance, edf);
    let dispersion = if family.fixed_dispersion() {
        1.0
    } else {
        fit.deviance / (n as f64 - edf)
    };
    Ok(Diagnostics {
        edf,
        gcv,
        dispersion,
        converged: fit.converged,
        iterations: fit.iterations,
    })
}
