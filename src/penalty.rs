//! Difference penalty construction for smooth terms.
//!
//! The wiggliness of a smooth is measured on its coefficient sequence: the
//! p-th order finite-difference operator D maps k coefficients to k - p
//! differences, and S = D'D is the positive semi-definite penalty whose null
//! space is the degree-(p-1) polynomial coefficient sequences.

use ndarray::{Array2, s};

use crate::{GamError, Result};

/// The (k - order) x k finite-difference operator of the given order.
pub fn difference_matrix(k: usize, order: usize) -> Result<Array2<f64>> {
    if order == 0 || order >= k {
        return Err(GamError::InvalidBasisSpec {
            variable: String::new(),
            detail: format!("difference order {order} is out of range for k = {k}"),
        });
    }

    // Row coefficients: [1] convolved `order` times with [-1, 1].
    let mut coef = vec![1.0];
    for _ in 0..order {
        let mut next = vec![0.0; coef.len() + 1];
        for (i, &c) in coef.iter().enumerate() {
            next[i] -= c;
            next[i + 1] += c;
        }
        coef = next;
    }

    let mut d = Array2::zeros((k - order, k));
    for i in 0..(k - order) {
        for (j, &c) in coef.iter().enumerate() {
            d[[i, i + j]] = c;
        }
    }
    Ok(d)
}

/// Penalty matrix S = D'D for a k-dimensional smooth, default order 2.
pub fn difference_penalty(k: usize, order: usize) -> Result<Array2<f64>> {
    let d = difference_matrix(k, order)?;
    Ok(d.t().dot(&d))
}

/// Fixed weight pinning each smooth block's constant coefficient direction.
///
/// Column centering zeroes the block's row sums, so the constant direction
/// is invisible to the design; differencing annihilates constants too.
/// Without this term the penalized normal equations are singular for every
/// alpha. Small against any real eigenvalue, large against rounding noise.
const CENTER_PIN: f64 = 1e-6;

/// Place scaled per-term penalty blocks into a p x p block-diagonal total,
/// leaving the intercept and linear-term columns unpenalized. Each smooth
/// block also receives `CENTER_PIN` times the outer product of its unit
/// constant vector, independent of alpha.
pub fn assemble_total_penalty(
    p: usize,
    blocks: &[(usize, Array2<f64>)],
    alpha: &[f64],
) -> Array2<f64> {
    let mut total = Array2::zeros((p, p));
    for ((offset, s_j), &a_j) in blocks.iter().zip(alpha.iter()) {
        let k = s_j.nrows();
        let mut slice = total.slice_mut(s![*offset..offset + k, *offset..offset + k]);
        slice.scaled_add(a_j, s_j);
        slice += CENTER_PIN / k as f64;
    }
    total
}
