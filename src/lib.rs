//! pgam: penalized generalized additive models in Rust
//!
//! This library fits GAMs by PIRLS (penalized iteratively reweighted least
//! squares), with automatic smoothing parameter selection by derivative-free
//! minimization of the GCV criterion. Smooth terms use a B-spline basis with
//! a difference penalty; each smooth is mean-centered against the intercept.
//!
//! ## Example
//!
//! ```rust,no_run
//! use pgam::prelude::*;
//! use ndarray::Array1;
//!
//! let x = Array1::linspace(0.0, 10.0, 200);
//! let y = x.mapv(|xi: f64| (xi / 2.0).sin());
//!
//! let mut data = DataTable::new();
//! data.insert("x", x);
//! data.insert("y", y);
//!
//! let terms = vec![TermSpec::smooth("x", 10, 3)];
//! let model = fit("y", &terms, &data, "normal", "identity", &FitOptions::default()).unwrap();
//!
//! println!("edf = {:.2}, gcv = {:.4}", model.diagnostics.edf, model.diagnostics.gcv);
//! ```

pub mod basis;
pub mod diagnostics;
pub mod family;
pub mod gam;
pub mod penalty;
pub mod pirls;
pub mod smooth;

pub use basis::SmoothBasis;
pub use diagnostics::Diagnostics;
pub use family::{Family, Link};
pub use gam::{fit, DataTable, FittedGam, TermSpec};
pub use smooth::{FitOptions, Optimizer};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum GamError {
    #[error("unknown family or link name: '{0}'")]
    UnknownFamilyOrLink(String),

    #[error("response is incompatible with the {family} family: {detail}")]
    FamilyMismatch { family: String, detail: String },

    #[error("invalid basis specification for '{variable}': {detail}")]
    InvalidBasisSpec { variable: String, detail: String },

    #[error("invalid input data: {0}")]
    InvalidInputData(String),

    #[error("penalized system is singular at PIRLS iteration {iteration}")]
    SingularSystem { iteration: usize },

    #[error("smoothing parameter search failed: all {trials} trials failed, last alpha {last_alpha:?}")]
    OuterOptimization { trials: usize, last_alpha: Vec<f64> },
}

pub type Result<T> = std::result::Result<T, GamError>;

pub mod prelude {
    pub use crate::basis::SmoothBasis;
    pub use crate::diagnostics::Diagnostics;
    pub use crate::family::{Family, Link};
    pub use crate::gam::{fit, DataTable, FittedGam, TermSpec};
    pub use crate::smooth::{FitOptions, Optimizer};
    pub use crate::{GamError, Result};
}
