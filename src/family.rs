//! Response distribution families and link functions.
//!
//! Both catalogs are closed enums so every family/link pair is matched
//! exhaustively; names are resolved once at the fit entry point.

use ndarray::Array1;

use crate::{GamError, Result};

/// Relative clip width keeping mu inside the family domain during PIRLS.
pub const MU_EPS: f64 = 1e-8;

/// Response distribution family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
    Normal,
    Gamma,
    Poisson,
    Bernoulli,
}

impl Family {
    pub fn from_name(name: &str) -> Result<Self> {
        match name.to_ascii_lowercase().as_str() {
            "normal" | "gaussian" => Ok(Family::Normal),
            "gamma" => Ok(Family::Gamma),
            "poisson" => Ok(Family::Poisson),
            "bernoulli" | "binomial" => Ok(Family::Bernoulli),
            _ => Err(GamError::UnknownFamilyOrLink(name.to_string())),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Family::Normal => "normal",
            Family::Gamma => "gamma",
            Family::Poisson => "poisson",
            Family::Bernoulli => "bernoulli",
        }
    }

    /// Variance function V(mu).
    pub fn variance(&self, mu: f64) -> f64 {
        match self {
            Family::Normal => 1.0,
            Family::Gamma => mu * mu,
            Family::Poisson => mu,
            Family::Bernoulli => mu * (1.0 - mu),
        }
    }

    /// Derivative V'(mu).
    pub fn variance_deriv(&self, mu: f64) -> f64 {
        match self {
            Family::Normal => 0.0,
            Family::Gamma => 2.0 * mu,
            Family::Poisson => 1.0,
            Family::Bernoulli => 1.0 - 2.0 * mu,
        }
    }

    /// Canonical (assigned) link.
    pub fn default_link(&self) -> Link {
        match self {
            Family::Normal => Link::Identity,
            Family::Gamma | Family::Poisson => Link::Log,
            Family::Bernoulli => Link::Logit,
        }
    }

    /// Check the response against the family domain before any fitting work.
    pub fn validate_response(&self, y: &Array1<f64>) -> Result<()> {
        let bad = |detail: String| {
            Err(GamError::FamilyMismatch {
                family: self.name().to_string(),
                detail,
            })
        };
        match self {
            Family::Normal => Ok(()),
            Family::Gamma => match y.iter().position(|&v| v <= 0.0) {
                Some(i) => bad(format!("y[{i}] = {} is not strictly positive", y[i])),
                None => Ok(()),
            },
            Family::Poisson => match y.iter().position(|&v| v < 0.0) {
                Some(i) => bad(format!("y[{i}] = {} is negative", y[i])),
                None => Ok(()),
            },
            Family::Bernoulli => match y.iter().position(|&v| v != 0.0 && v != 1.0) {
                Some(i) => bad(format!("y[{i}] = {} is not in {{0, 1}}", y[i])),
                None => Ok(()),
            },
        }
    }

    /// Starting value for mu, strictly inside the family domain.
    ///
    /// The starting means sit well inside the domain rather than at the
    /// MU_EPS clip: a boundary start gives vanishing first-iteration
    /// working weights and an exploding working response.
    pub fn initialize_mu(&self, y: &Array1<f64>) -> Array1<f64> {
        match self {
            Family::Normal => y.to_owned(),
            Family::Gamma | Family::Poisson => y.mapv(|yi| yi.max(0.1)),
            Family::Bernoulli => y.mapv(|yi| (yi + 0.5) / 2.0),
        }
    }

    /// Clip mu back into the valid interior of the family domain.
    pub fn clip_mu(&self, mu: f64) -> f64 {
        match self {
            Family::Normal => mu,
            Family::Gamma | Family::Poisson => mu.max(MU_EPS),
            Family::Bernoulli => mu.clamp(MU_EPS, 1.0 - MU_EPS),
        }
    }

    /// Total deviance D(y, mu).
    pub fn deviance(&self, y: &Array1<f64>, mu: &Array1<f64>) -> f64 {
        y.iter()
            .zip(mu.iter())
            .map(|(&yi, &mui)| self.unit_deviance(yi, mui))
            .sum()
    }

    /// Signed deviance residuals, sign(y - mu) * sqrt(d_i).
    pub fn deviance_residuals(&self, y: &Array1<f64>, mu: &Array1<f64>) -> Array1<f64> {
        let mut out = Array1::zeros(y.len());
        for i in 0..y.len() {
            let d = self.unit_deviance(y[i], mu[i]).max(0.0);
            out[i] = (y[i] - mu[i]).signum() * d.sqrt();
        }
        out
    }

    fn unit_deviance(&self, yi: f64, mui: f64) -> f64 {
        match self {
            Family::Normal => (yi - mui).powi(2),
            Family::Gamma => {
                let mui = mui.max(MU_EPS);
                2.0 * ((yi - mui) / mui - (yi / mui).ln())
            }
            Family::Poisson => {
                let mui = mui.max(MU_EPS);
                if yi > 0.0 {
                    2.0 * (yi * (yi / mui).ln() - (yi - mui))
                } else {
                    2.0 * mui
                }
            }
            Family::Bernoulli => {
                let mui = mui.clamp(MU_EPS, 1.0 - MU_EPS);
                let d1 = if yi > 0.0 { yi * (yi / mui).ln() } else { 0.0 };
                let d2 = if yi < 1.0 {
                    (1.0 - yi) * ((1.0 - yi) / (1.0 - mui)).ln()
                } else {
                    0.0
                };
                2.0 * (d1 + d2)
            }
        }
    }

    /// Whether the dispersion parameter is fixed at 1 for this family.
    pub fn fixed_dispersion(&self) -> bool {
        matches!(self, Family::Poisson | Family::Bernoulli)
    }
}

/// Link function g relating the mean to the linear predictor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Link {
    Identity,
    Log,
    Logit,
}

impl Link {
    pub fn from_name(name: &str) -> Result<Self> {
        match name.to_ascii_lowercase().as_str() {
            "identity" => Ok(Link::Identity),
            "log" => Ok(Link::Log),
            "logit" => Ok(Link::Logit),
            _ => Err(GamError::UnknownFamilyOrLink(name.to_string())),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Link::Identity => "identity",
            Link::Log => "log",
            Link::Logit => "logit",
        }
    }

    /// eta = g(mu)
    pub fn link(&self, mu: f64) -> f64 {
        match self {
            Link::Identity => mu,
            Link::Log => mu.max(MU_EPS).ln(),
            Link::Logit => {
                let m = mu.clamp(MU_EPS, 1.0 - MU_EPS);
                (m / (1.0 - m)).ln()
            }
        }
    }

    /// mu = g^{-1}(eta), with eta clamped to avoid overflow in exp.
    pub fn inverse(&self, eta: f64) -> f64 {
        match self {
            Link::Identity => eta,
            Link::Log => eta.min(30.0).exp(),
            Link::Logit => {
                let e = eta.clamp(-30.0, 30.0);
                1.0 / (1.0 + (-e).exp())
            }
        }
    }

    /// g'(mu)
    pub fn deriv(&self, mu: f64) -> f64 {
        match self {
            Link::Identity => 1.0,
            Link::Log => 1.0 / mu.max(MU_EPS),
            Link::Logit => {
                let m = mu.clamp(MU_EPS, 1.0 - MU_EPS);
                1.0 / (m * (1.0 - m))
            }
        }
    }

    /// g''(mu)
    pub fn second_deriv(&self, mu: f64) -> f64 {
        match self {
            Link::Identity => 0.0,
            Link::Log => -1.0 / mu.max(MU_EPS).powi(2),
            Link::Logit => {
                let m = mu.clamp(MU_EPS, 1.0 - MU_EPS);
                (2.0 * m - 1.0) / (m * m * (1.0 - m) * (1.0 - m))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn test_family_lookup() {
        assert_eq!(Family::from_name("Normal").unwrap(), Family::Normal);
        assert_eq!(Family::from_name("binomial").unwrap(), Family::Bernoulli);
        assert!(matches!(
            Family::from_name("tweedie"),
            Err(GamError::UnknownFamilyOrLink(_))
        ));
    }

    #[test]
    fn test_default_links() {
        assert_eq!(Family::Normal.default_link(), Link::Identity);
        assert_eq!(Family::Gamma.default_link(), Link::Log);
        assert_eq!(Family::Poisson.default_link(), Link::Log);
        assert_eq!(Family::Bernoulli.default_link(), Link::Logit);
    }

    #[test]
    fn test_variance_functions() {
        assert_abs_diff_eq!(Family::Normal.variance(3.0), 1.0);
        assert_abs_diff_eq!(Family::Gamma.variance(3.0), 9.0);
        assert_abs_diff_eq!(Family::Poisson.variance(2.0), 2.0);
        assert_abs_diff_eq!(Family::Bernoulli.variance(0.25), 0.1875);
        assert_abs_diff_eq!(Family::Bernoulli.variance_deriv(0.25), 0.5);
    }

    #[test]
    fn test_link_round_trip() {
        for link in [Link::Identity, Link::Log, Link::Logit] {
            for &mu in &[0.1, 0.4, 0.9] {
                let eta = link.link(mu);
                assert_abs_diff_eq!(link.inverse(eta), mu, epsilon = 1e-10);
            }
        }
    }

    #[test]
    fn test_link_deriv_consistency() {
        // g'(mu) should match a central difference of g, and g''(mu) a
        // central difference of g'.
        let h = 1e-6;
        for link in [Link::Identity, Link::Log, Link::Logit] {
            for &mu in &[0.2, 0.5, 0.8] {
                let numeric = (link.link(mu + h) - link.link(mu - h)) / (2.0 * h);
                assert_abs_diff_eq!(link.deriv(mu), numeric, epsilon = 1e-5);
                let numeric2 = (link.deriv(mu + h) - link.deriv(mu - h)) / (2.0 * h);
                assert_abs_diff_eq!(link.second_deriv(mu), numeric2, epsilon = 1e-3);
            }
        }
    }

    #[test]
    fn test_deviance_residuals_sign_and_magnitude() {
        let y = array![0.0, 1.0, 1.0];
        let mu = array![0.3, 0.6, 0.9];
        let r = Family::Bernoulli.deviance_residuals(&y, &mu);
        assert!(r[0] < 0.0);
        assert!(r[1] > 0.0);
        // Residuals square back to the unit deviances.
        let d: f64 = r.mapv(|v| v * v).sum();
        assert_abs_diff_eq!(d, Family::Bernoulli.deviance(&y, &mu), epsilon = 1e-12);
    }

    #[test]
    fn test_bernoulli_response_validation() {
        let ok = array![0.0, 1.0, 1.0, 0.0];
        assert!(Family::Bernoulli.validate_response(&ok).is_ok());

        let bad = array![0.0, 0.5, 1.0];
        let err = Family::Bernoulli.validate_response(&bad).unwrap_err();
        assert!(matches!(err, GamError::FamilyMismatch { .. }));
    }

    #[test]
    fn test_gamma_response_validation() {
        let bad = array![1.0, 0.0, 2.0];
        assert!(Family::Gamma.validate_response(&bad).is_err());
        let ok = array![1.0, 0.5, 2.0];
        assert!(Family::Gamma.validate_response(&ok).is_ok());
    }

    #[test]
    fn test_deviance_zero_at_saturated_fit() {
        let y = array![1.0, 2.0, 3.0];
        assert_abs_diff_eq!(Family::Normal.deviance(&y, &y), 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(Family::Poisson.deviance(&y, &y), 0.0, epsilon = 1e-10);
        assert_abs_diff_eq!(Family::Gamma.deviance(&y, &y), 0.0, epsilon = 1e-10);
    }

    #[test]
    fn test_initialize_mu_stays_well_interior() {
        // Extreme responses must not start the iteration at the domain clip,
        // where the working weights degenerate.
        let y = array![0.0, 1.0];
        let mu = Family::Bernoulli.initialize_mu(&y);
        assert!(mu.iter().all(|&m| m >= 0.25 && m <= 0.75));

        let counts = array![0.0, 5.0];
        let mu = Family::Poisson.initialize_mu(&counts);
        assert!(mu.iter().all(|&m| m >= 0.1));
        let mu = Family::Gamma.initialize_mu(&counts);
        assert!(mu[0] >= 0.1);
    }

    #[test]
    fn test_clip_mu() {
        assert!(Family::Bernoulli.clip_mu(0.0) > 0.0);
        assert!(Family::Bernoulli.clip_mu(1.0) < 1.0);
        assert!(Family::Poisson.clip_mu(-2.0) > 0.0);
        assert_abs_diff_eq!(Family::Normal.clip_mu(-2.0), -2.0);
    }
}
