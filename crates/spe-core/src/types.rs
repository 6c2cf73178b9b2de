//! Common data types for spefit

use serde::{Deserialize, Serialize};

/// Fit result containing parameter estimates and uncertainties
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitResult {
    /// Parameter names, in flat-vector order
    pub names: Vec<String>,

    /// Best-fit parameter values (fixed parameters included)
    pub parameters: Vec<f64>,

    /// Parameter uncertainties (sqrt of covariance diagonal).
    ///
    /// Fixed parameters report 0. Free parameters report NaN when the Hessian
    /// could not be inverted.
    pub uncertainties: Vec<f64>,

    /// Covariance matrix of the free parameters only (row-major, M×M).
    /// `None` if Hessian inversion failed.
    pub covariance: Option<Vec<f64>>,

    /// Objective value at minimum
    pub fval: f64,

    /// Convergence status
    pub converged: bool,

    /// Number of objective evaluations
    pub n_evaluations: usize,
}

impl FitResult {
    /// Create a new fit result
    pub fn new(
        names: Vec<String>,
        parameters: Vec<f64>,
        uncertainties: Vec<f64>,
        fval: f64,
        converged: bool,
        n_evaluations: usize,
    ) -> Self {
        Self { names, parameters, uncertainties, covariance: None, fval, converged, n_evaluations }
    }

    /// Attach a covariance matrix
    pub fn with_covariance(mut self, covariance: Vec<f64>) -> Self {
        self.covariance = Some(covariance);
        self
    }

    /// Best-fit value of a named parameter
    pub fn value(&self, name: &str) -> Option<f64> {
        let i = self.names.iter().position(|n| n == name)?;
        self.parameters.get(i).copied()
    }

    /// Uncertainty of a named parameter
    pub fn uncertainty(&self, name: &str) -> Option<f64> {
        let i = self.names.iter().position(|n| n == name)?;
        self.uncertainties.get(i).copied()
    }

    /// `(name, value)` pairs in flat-vector order
    pub fn values(&self) -> Vec<(String, f64)> {
        self.names.iter().cloned().zip(self.parameters.iter().copied()).collect()
    }

    /// Whether every uncertainty is finite
    pub fn has_uncertainties(&self) -> bool {
        self.uncertainties.iter().all(|u| u.is_finite())
    }
}

/// Goodness-of-fit statistics of a cost function at a parameter point
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GoodnessOfFit {
    /// Chi-square statistic
    pub chi2: f64,
    /// `chi2 / dof`
    pub reduced_chi2: f64,
    /// Chi-square survival function at `chi2` with `dof` degrees of freedom
    pub p_value: f64,
    /// Degrees of freedom
    pub dof: i64,
}

impl GoodnessOfFit {
    /// Scores for a cost function that has no chi-square (all NaN)
    pub fn unavailable(dof: i64) -> Self {
        Self { chi2: f64::NAN, reduced_chi2: f64::NAN, p_value: f64::NAN, dof }
    }

    /// Whether the scores carry numbers
    pub fn is_available(&self) -> bool {
        !self.chi2.is_nan()
    }
}
