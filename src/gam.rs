//! Model assembly, the fit entry point and the fitted-model container.
//!
//! A model is described by a response name and an ordered list of term specs
//! (produced upstream by a formula parser); the numeric columns come from a
//! column-oriented data table. Fitting builds one centered basis and penalty
//! per smooth term, assembles the full design matrix with a global intercept,
//! and hands the smoothing-parameter search the penalized system. The result
//! is an immutable `FittedGam`; refitting produces a new one.

use std::collections::HashMap;
use std::ops::Range;

use log::debug;
use ndarray::{s, Array1, Array2};
use rayon::prelude::*;

use crate::basis::SmoothBasis;
use crate::diagnostics::Diagnostics;
use crate::family::{Family, Link};
use crate::penalty::difference_penalty;
use crate::smooth::{select_smoothing, FitOptions};
use crate::{GamError, Result};

/// One covariate term of the additive predictor.
#[derive(Debug, Clone)]
pub struct TermSpec {
    pub name: String,
    /// Basis dimension; 0 for linear terms.
    pub k: usize,
    /// Polynomial degree; 0 for linear terms.
    pub degree: usize,
    pub smooth: bool,
}

impl TermSpec {
    pub fn smooth(name: impl Into<String>, k: usize, degree: usize) -> Self {
        Self {
            name: name.into(),
            k,
            degree,
            smooth: true,
        }
    }

    pub fn linear(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            k: 0,
            degree: 0,
            smooth: false,
        }
    }
}

/// Column-oriented numeric table keyed by variable name.
#[derive(Debug, Clone, Default)]
pub struct DataTable {
    columns: HashMap<String, Array1<f64>>,
}

impl DataTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, column: Array1<f64>) {
        self.columns.insert(name.into(), column);
    }

    pub fn column(&self, name: &str) -> Option<&Array1<f64>> {
        self.columns.get(name)
    }
}

/// The fitted representation of one term.
#[derive(Debug, Clone)]
pub enum TermKind {
    Smooth(SmoothBasis),
    Linear,
}

#[derive(Debug, Clone)]
pub struct FittedTerm {
    pub name: String,
    /// Coefficient indices of this term within the full coefficient vector.
    pub range: Range<usize>,
    pub kind: TermKind,
}

/// A fitted GAM. Immutable once returned; owned by the caller.
#[derive(Debug)]
pub struct FittedGam {
    pub family: Family,
    pub link: Link,
    pub terms: Vec<FittedTerm>,
    /// Full coefficient vector; index 0 is the intercept.
    pub coef: Array1<f64>,
    /// Smoothing parameter per term, 0 for linear terms.
    pub alpha: Vec<f64>,
    /// Fitted linear predictor on the training data.
    pub eta: Array1<f64>,
    /// Fitted mean on the training data.
    pub mu: Array1<f64>,
    pub deviance: f64,
    pub diagnostics: Diagnostics,
}

/// Headline numbers for reporting.
#[derive(Debug, Clone)]
pub struct GamSummary {
    pub edf: f64,
    pub gcv: f64,
    pub deviance: f64,
    pub dispersion: f64,
    pub alpha: Vec<f64>,
    pub converged: bool,
}

impl FittedGam {
    pub fn intercept(&self) -> f64 {
        self.coef[0]
    }

    /// Coefficient index range of a named term.
    pub fn coef_range(&self, name: &str) -> Option<Range<usize>> {
        self.terms
            .iter()
            .find(|t| t.name == name)
            .map(|t| t.range.clone())
    }

    pub fn summary(&self) -> GamSummary {
        GamSummary {
            edf: self.diagnostics.edf,
            gcv: self.diagnostics.gcv,
            deviance: self.deviance,
            dispersion: self.diagnostics.dispersion,
            alpha: self.alpha.clone(),
            converged: self.diagnostics.converged,
        }
    }

    /// Predict the mean response for new data, on the response scale.
    pub fn predict(&self, data: &DataTable) -> Result<Array1<f64>> {
        let x = self.prediction_design(data)?;
        let eta = x.dot(&self.coef);
        Ok(eta.mapv(|e| self.link.inverse(e)))
    }

    /// A single term's centered contribution to the linear predictor at new
    /// covariate values. This is what a plotting layer consumes.
    pub fn term_contribution(&self, name: &str, x: &Array1<f64>) -> Result<Array1<f64>> {
        let term = self
            .terms
            .iter()
            .find(|t| t.name == name)
            .ok_or_else(|| GamError::InvalidInputData(format!("no term named '{name}'")))?;
        let coef = self.coef.slice(s![term.range.clone()]);
        match &term.kind {
            TermKind::Smooth(basis) => Ok(basis.model_matrix(x).dot(&coef)),
            TermKind::Linear => Ok(x.mapv(|v| v * coef[0])),
        }
    }

    /// Assemble the design matrix for new data from the stored bases.
    fn prediction_design(&self, data: &DataTable) -> Result<Array2<f64>> {
        let mut resolved = Vec::with_capacity(self.terms.len());
        let mut n: Option<usize> = None;
        for term in &self.terms {
            let col = data.column(&term.name).ok_or_else(|| {
                GamError::InvalidInputData(format!("column '{}' missing from data", term.name))
            })?;
            match n {
                None => n = Some(col.len()),
                Some(len) if len != col.len() => {
                    return Err(GamError::InvalidInputData(format!(
                        "column '{}' has length {} but expected {}",
                        term.name,
                        col.len(),
                        len
                    )));
                }
                _ => {}
            }
            resolved.push((term, col));
        }
        let n = n.unwrap_or(0);
        let p = self.coef.len();

        let mut x = Array2::zeros((n, p));
        x.column_mut(0).fill(1.0);
        for (term, col) in resolved {
            match &term.kind {
                TermKind::Smooth(basis) => {
                    let block = basis.model_matrix(col);
                    x.slice_mut(s![.., term.range.clone()]).assign(&block);
                }
                TermKind::Linear => {
                    x.column_mut(term.range.start).assign(col);
                }
            }
        }
        Ok(x)
    }
}

/// One term's built design block before assembly.
struct BuiltTerm {
    name: String,
    kind: TermKind,
    block: Array2<f64>,
    penalty: Option<Array2<f64>>,
}

/// Fit a GAM.
///
/// `response` and each term name must resolve to equal-length columns of
/// `data`. Validation failures surface before any basis construction; the
/// family response-domain check in particular runs first so a mismatched
/// response never triggers basis work.
pub fn fit(
    response: &str,
    terms: &[TermSpec],
    data: &DataTable,
    family: &str,
    link: &str,
    options: &FitOptions,
) -> Result<FittedGam> {
    let family = Family::from_name(family)?;
    let link = Link::from_name(link)?;

    let y = data
        .column(response)
        .ok_or_else(|| GamError::InvalidInputData(format!("response column '{response}' missing")))?;
    let n = y.len();
    if n == 0 {
        return Err(GamError::InvalidInputData("empty response".to_string()));
    }
    if terms.is_empty() {
        return Err(GamError::InvalidInputData("no covariate terms".to_string()));
    }
    for term in terms {
        let col = data.column(&term.name).ok_or_else(|| {
            GamError::InvalidInputData(format!("column '{}' missing from data", term.name))
        })?;
        if col.len() != n {
            return Err(GamError::InvalidInputData(format!(
                "column '{}' has length {} but response has {}",
                term.name,
                col.len(),
                n
            )));
        }
    }

    family.validate_response(y)?;

    debug!(
        "fitting {} ~ {} terms, family {}, link {}, n = {n}",
        response,
        terms.len(),
        family.name(),
        link.name()
    );

    // Basis and penalty construction is independent per term.
    let built: Vec<BuiltTerm> = terms
        .par_iter()
        .map(|term| {
            let col = data.column(&term.name).ok_or_else(|| {
                GamError::InvalidInputData(format!("column '{}' missing from data", term.name))
            })?;
            if term.smooth {
                let basis = SmoothBasis::new(&term.name, col, term.k, term.degree)?;
                let block = basis.model_matrix(col);
                let penalty =
                    difference_penalty(term.k, options.penalty_order).map_err(|e| match e {
                        GamError::InvalidBasisSpec { detail, .. } => GamError::InvalidBasisSpec {
                            variable: term.name.clone(),
                            detail,
                        },
                        other => other,
                    })?;
                Ok(BuiltTerm {
                    name: term.name.clone(),
                    kind: TermKind::Smooth(basis),
                    block,
                    penalty: Some(penalty),
                })
            } else {
                let block = col
                    .to_owned()
                    .into_shape_with_order((n, 1))
                    .map_err(|e| GamError::InvalidInputData(e.to_string()))?;
                Ok(BuiltTerm {
                    name: term.name.clone(),
                    kind: TermKind::Linear,
                    block,
                    penalty: None,
                })
            }
        })
        .collect::<Result<Vec<_>>>()?;

    // Assemble X = [1 | B_1 | ... | B_m] and record per-term coefficient
    // ranges; smooth penalties keep their column offsets for the
    // block-diagonal total.
    let p = 1 + built.iter().map(|t| t.block.ncols()).sum::<usize>();
    let mut x = Array2::zeros((n, p));
    x.column_mut(0).fill(1.0);

    let mut fitted_terms = Vec::with_capacity(built.len());
    let mut penalty_blocks: Vec<(usize, Array2<f64>)> = Vec::new();
    let mut offset = 1;
    for t in built {
        let cols = t.block.ncols();
        x.slice_mut(s![.., offset..offset + cols]).assign(&t.block);
        if let Some(penalty) = t.penalty {
            penalty_blocks.push((offset, penalty));
        }
        fitted_terms.push(FittedTerm {
            name: t.name,
            range: offset..offset + cols,
            kind: t.kind,
        });
        offset += cols;
    }

    let (alpha_smooth, pirls, diagnostics) =
        select_smoothing(y, &x, &penalty_blocks, family, link, options)?;

    // Expand to one smoothing parameter per term, 0 for linear terms.
    let mut alpha = Vec::with_capacity(fitted_terms.len());
    let mut smooth_idx = 0;
    for term in &fitted_terms {
        match term.kind {
            TermKind::Smooth(_) => {
                alpha.push(alpha_smooth[smooth_idx]);
                smooth_idx += 1;
            }
            TermKind::Linear => alpha.push(0.0),
        }
    }

    debug!(
        "fit done: edf {:.3}, gcv {:.6e}, alpha {:?}, converged {}",
        diagnostics.edf, diagnostics.gcv, alpha, diagnostics.converged
    );

    Ok(FittedGam {
        family,
        link,
        terms: fitted_terms,
        coef: pirls.beta,
        alpha,
        eta: pirls.eta,
        mu: pirls.mu,
        deviance: pirls.deviance,
        diagnostics,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array1;

    fn sine_data(n: usize) -> DataTable {
        let x = Array1::linspace(0.0, 6.0, n);
        let y = x.mapv(|xi: f64| xi.sin() + 0.05 * (7.3 * xi).cos());
        let mut data = DataTable::new();
        data.insert("x", x);
        data.insert("y", y);
        data
    }

    #[test]
    fn test_fit_normal_smooth() {
        let data = sine_data(120);
        let terms = vec![TermSpec::smooth("x", 10, 3)];
        let model = fit("y", &terms, &data, "normal", "identity", &FitOptions::default()).unwrap();

        assert_eq!(model.coef.len(), 11);
        assert_eq!(model.mu.len(), 120);
        assert!(model.diagnostics.gcv > 0.0);
        assert_eq!(model.alpha.len(), 1);
        assert!(model.alpha[0] > 0.0);

        let summary = model.summary();
        assert_eq!(summary.alpha, model.alpha);
        assert!(summary.edf > 0.0);
        assert!(summary.deviance >= 0.0);
    }

    #[test]
    fn test_coef_ranges_partition_columns() {
        let mut data = sine_data(120);
        data.insert("z", Array1::linspace(-1.0, 1.0, 120));
        let terms = vec![TermSpec::smooth("x", 8, 3), TermSpec::linear("z")];
        let model = fit("y", &terms, &data, "normal", "identity", &FitOptions::default()).unwrap();

        assert_eq!(model.coef_range("x").unwrap(), 1..9);
        assert_eq!(model.coef_range("z").unwrap(), 9..10);
        assert_eq!(model.coef.len(), 10);
        assert_eq!(model.alpha, vec![model.alpha[0], 0.0]);
    }

    #[test]
    fn test_unknown_family_and_link() {
        let data = sine_data(50);
        let terms = vec![TermSpec::smooth("x", 6, 3)];
        assert!(matches!(
            fit("y", &terms, &data, "weibull", "identity", &FitOptions::default()),
            Err(GamError::UnknownFamilyOrLink(_))
        ));
        assert!(matches!(
            fit("y", &terms, &data, "normal", "probit", &FitOptions::default()),
            Err(GamError::UnknownFamilyOrLink(_))
        ));
    }

    #[test]
    fn test_length_mismatch() {
        let mut data = sine_data(50);
        data.insert("w", Array1::zeros(40));
        let terms = vec![TermSpec::linear("w")];
        assert!(matches!(
            fit("y", &terms, &data, "normal", "identity", &FitOptions::default()),
            Err(GamError::InvalidInputData(_))
        ));
    }

    #[test]
    fn test_missing_column() {
        let data = sine_data(50);
        let terms = vec![TermSpec::smooth("nope", 6, 3)];
        assert!(matches!(
            fit("y", &terms, &data, "normal", "identity", &FitOptions::default()),
            Err(GamError::InvalidInputData(_))
        ));
    }

    #[test]
    fn test_predict_on_training_data_matches_mu() {
        use approx::assert_abs_diff_eq;
        let data = sine_data(100);
        let terms = vec![TermSpec::smooth("x", 10, 3)];
        let model = fit("y", &terms, &data, "normal", "identity", &FitOptions::default()).unwrap();

        let pred = model.predict(&data).unwrap();
        for (a, b) in pred.iter().zip(model.mu.iter()) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-8);
        }
    }

    #[test]
    fn test_term_contribution_shape() {
        let data = sine_data(80);
        let terms = vec![TermSpec::smooth("x", 8, 3)];
        let model = fit("y", &terms, &data, "normal", "identity", &FitOptions::default()).unwrap();

        let grid = Array1::linspace(0.0, 6.0, 25);
        let contrib = model.term_contribution("x", &grid).unwrap();
        assert_eq!(contrib.len(), 25);
        assert!(model.term_contribution("missing", &grid).is_err());
    }
}
