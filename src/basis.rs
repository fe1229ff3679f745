//! B-spline basis construction for smooth terms.
//!
//! A smooth term's basis is a set of `k` B-spline functions of a given degree
//! over a uniform knot sequence spanning the training range of the covariate,
//! with boundary knots repeated `degree + 1` times. Columns are centered on
//! the training data and the column means stored, so prediction matrices for
//! new data are centered consistently with the fit.

use ndarray::{Array1, Array2, Axis};

use crate::{GamError, Result};

/// A fitted smooth basis: knot sequence, degree and stored training column
/// means. Built once per fit, immutable afterwards.
#[derive(Debug, Clone)]
pub struct SmoothBasis {
    knots: Array1<f64>,
    degree: usize,
    num_basis: usize,
    col_means: Array1<f64>,
}

impl SmoothBasis {
    /// Build the basis from training data.
    ///
    /// `k` is the number of basis functions, `degree` the polynomial degree.
    /// Fails with `InvalidBasisSpec` if `k <= degree` or `x` has fewer than
    /// `k + 1` distinct values.
    pub fn new(variable: &str, x: &Array1<f64>, k: usize, degree: usize) -> Result<Self> {
        if k <= degree {
            return Err(GamError::InvalidBasisSpec {
                variable: variable.to_string(),
                detail: format!("basis dimension k = {k} must exceed degree {degree}"),
            });
        }
        let distinct = count_distinct(x);
        if distinct < k + 1 {
            return Err(GamError::InvalidBasisSpec {
                variable: variable.to_string(),
                detail: format!("{distinct} distinct values cannot support k = {k} basis functions"),
            });
        }

        let x_min = x.iter().copied().fold(f64::INFINITY, f64::min);
        let x_max = x.iter().copied().fold(f64::NEG_INFINITY, f64::max);

        // Knot sequence of length k + degree + 1: boundary knots repeated
        // degree + 1 times, k - degree - 1 uniform interior knots.
        let n_knots = k + degree + 1;
        let n_interior = k - degree - 1;
        let mut knots = Array1::zeros(n_knots);
        for i in 0..=degree {
            knots[i] = x_min;
            knots[n_knots - 1 - i] = x_max;
        }
        for i in 0..n_interior {
            let t = (i + 1) as f64 / (n_interior + 1) as f64;
            knots[degree + 1 + i] = x_min + t * (x_max - x_min);
        }

        let mut basis = Self {
            knots,
            degree,
            num_basis: k,
            col_means: Array1::zeros(k),
        };
        let raw = basis.raw_matrix(x);
        basis.col_means = raw.sum_axis(Axis(0)) / x.len() as f64;
        Ok(basis)
    }

    pub fn num_basis(&self) -> usize {
        self.num_basis
    }

    pub fn degree(&self) -> usize {
        self.degree
    }

    pub fn knots(&self) -> &Array1<f64> {
        &self.knots
    }

    pub fn col_means(&self) -> &Array1<f64> {
        &self.col_means
    }

    /// Evaluate the centered basis at `x`: the n x k raw basis matrix minus
    /// the stored training column means. On the training covariate this is
    /// the design block with mean-zero columns; on new data it is the
    /// prediction matrix consistent with training-time centering. Values
    /// outside the training range follow the boundary polynomial piece.
    pub fn model_matrix(&self, x: &Array1<f64>) -> Array2<f64> {
        let mut m = self.raw_matrix(x);
        for mut row in m.rows_mut() {
            row -= &self.col_means;
        }
        m
    }

    /// Uncentered basis matrix.
    fn raw_matrix(&self, x: &Array1<f64>) -> Array2<f64> {
        let n = x.len();
        let d = self.degree;
        let mut m = Array2::zeros((n, self.num_basis));
        let mut funs = vec![0.0; d + 1];
        for (i, &xi) in x.iter().enumerate() {
            let span = self.find_span(xi);
            self.basis_funs(span, xi, &mut funs);
            for (r, &v) in funs.iter().enumerate() {
                m[[i, span - d + r]] = v;
            }
        }
        m
    }

    /// Knot span index in [degree, num_basis - 1] containing `x`. Out-of-range
    /// values are assigned the boundary span, so evaluation extrapolates the
    /// boundary polynomial piece rather than clamping.
    fn find_span(&self, x: f64) -> usize {
        let d = self.degree;
        let k = self.num_basis;
        if x >= self.knots[k] {
            return k - 1;
        }
        let mut span = d;
        while span + 1 < k && x >= self.knots[span + 1] {
            span += 1;
        }
        span
    }

    /// The degree + 1 basis functions that are non-zero on `span`, evaluated
    /// at `x` (Cox-de Boor in its banded form; de Boor 1978).
    fn basis_funs(&self, span: usize, x: f64, out: &mut [f64]) {
        let d = self.degree;
        let t = &self.knots;
        let mut left = vec![0.0; d + 1];
        let mut right = vec![0.0; d + 1];
        out[0] = 1.0;
        for j in 1..=d {
            left[j] = x - t[span + 1 - j];
            right[j] = t[span + j] - x;
            let mut saved = 0.0;
            for r in 0..j {
                let temp = out[r] / (right[r + 1] + left[j - r]);
                out[r] = saved + right[r + 1] * temp;
                saved = left[j - r] * temp;
            }
            out[j] = saved;
        }
    }
}

fn count_distinct(x: &Array1<f64>) -> usize {
    let mut v = x.to_vec();
    v.sort_by(|a, b| a.total_cmp(b));
    v.dedup();
    v.len()
}
