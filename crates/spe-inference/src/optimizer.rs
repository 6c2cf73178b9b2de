//! Optimization algorithms
//!
//! Box-constrained wrappers around argmin's Nelder-Mead and L-BFGS solvers.
//! Parameters are clamped into their bounds before every objective call, and
//! non-finite objective values are replaced by a large finite penalty so the
//! solvers never see NaN.

use argmin::core::{CostFunction, Executor, Gradient, State, TerminationReason, TerminationStatus};
use argmin::solver::linesearch::MoreThuenteLineSearch;
use argmin::solver::neldermead::NelderMead;
use argmin::solver::quasinewton::LBFGS;
use serde::{Deserialize, Serialize};
use spe_core::{Error, Result};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Objective value reported in place of NaN or infinity.
pub const NON_FINITE_PENALTY: f64 = 1e100;

/// Weight of the squared distance outside the bounds (Nelder-Mead only).
const OUT_OF_BOUNDS_PENALTY: f64 = 1e6;

/// Initial simplex edge, as a fraction of the parameter range.
const SIMPLEX_FRACTION: f64 = 0.02;

/// Minimization algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Algorithm {
    /// Gradient-free downhill simplex
    #[default]
    NelderMead,
    /// Quasi-Newton with numerical gradients and projected bounds
    Lbfgs,
}

/// Minimizer configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MinimizerConfig {
    /// Algorithm
    pub algorithm: Algorithm,
    /// Maximum number of iterations per run
    pub max_iter: u64,
    /// Convergence tolerance: standard deviation of the simplex costs for
    /// Nelder-Mead, gradient norm for L-BFGS
    pub tol: f64,
    /// Additional runs started from the previous best point
    pub n_restarts: usize,
    /// Number of corrections kept by L-BFGS
    pub lbfgs_memory: usize,
}

impl Default for MinimizerConfig {
    fn default() -> Self {
        Self {
            algorithm: Algorithm::NelderMead,
            max_iter: 5000,
            tol: 1e-8,
            n_restarts: 1,
            lbfgs_memory: 10,
        }
    }
}

/// Result of optimization
#[derive(Debug, Clone)]
pub struct OptimizationResult {
    /// Best-fit parameters
    pub parameters: Vec<f64>,
    /// Function value at minimum
    pub fval: f64,
    /// Number of iterations
    pub n_iter: u64,
    /// Number of objective (cost) evaluations.
    pub n_fev: usize,
    /// Number of gradient evaluations.
    pub n_gev: usize,
    /// Convergence status
    pub converged: bool,
    /// Termination message
    pub message: String,
}

impl fmt::Display for OptimizationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "OptimizationResult(fval={:.6}, n_iter={}, n_fev={}, n_gev={}, converged={})",
            self.fval, self.n_iter, self.n_fev, self.n_gev, self.converged
        )
    }
}

/// Objective function trait for optimization
pub trait ObjectiveFunction: Send + Sync {
    /// Evaluate function at given parameters
    fn eval(&self, params: &[f64]) -> Result<f64>;

    /// Compute gradient at given parameters (numerical if not overridden)
    fn gradient(&self, params: &[f64]) -> Result<Vec<f64>> {
        let n = params.len();
        let mut grad = vec![0.0; n];

        for i in 0..n {
            let eps = 1e-6 * params[i].abs().max(1.0);

            let mut params_plus = params.to_vec();
            params_plus[i] += eps;
            let f_plus = self.eval(&params_plus)?;

            let mut params_minus = params.to_vec();
            params_minus[i] -= eps;
            let f_minus = self.eval(&params_minus)?;

            grad[i] = (f_plus - f_minus) / (2.0 * eps);
        }

        Ok(grad)
    }
}

/// Wrapper to make ObjectiveFunction compatible with argmin
struct ArgminProblem<'a> {
    objective: &'a dyn ObjectiveFunction,
    bounds: &'a [(f64, f64)],
    penalize_outside: bool,
    counts: Arc<FuncCounts>,
}

pub(crate) fn clamp_params(params: &[f64], bounds: &[(f64, f64)]) -> Vec<f64> {
    params.iter().zip(bounds.iter()).map(|(&v, &(lo, hi))| v.clamp(lo, hi)).collect()
}

#[derive(Default)]
struct FuncCounts {
    cost: AtomicUsize,
    grad: AtomicUsize,
}

impl<'a> CostFunction for ArgminProblem<'a> {
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, params: &Self::Param) -> std::result::Result<Self::Output, argmin::core::Error> {
        self.counts.cost.fetch_add(1, Ordering::Relaxed);
        let clamped = clamp_params(params, self.bounds);
        let f = self.objective.eval(&clamped).map_err(|e| argmin::core::Error::msg(e.to_string()))?;
        let f = if f.is_finite() { f } else { NON_FINITE_PENALTY };
        if !self.penalize_outside {
            return Ok(f);
        }
        let outside: f64 = params.iter().zip(&clamped).map(|(p, c)| (p - c) * (p - c)).sum();
        Ok(f + OUT_OF_BOUNDS_PENALTY * outside)
    }
}

impl<'a> Gradient for ArgminProblem<'a> {
    type Param = Vec<f64>;
    type Gradient = Vec<f64>;

    fn gradient(
        &self,
        params: &Self::Param,
    ) -> std::result::Result<Self::Gradient, argmin::core::Error> {
        self.counts.grad.fetch_add(1, Ordering::Relaxed);
        let clamped = clamp_params(params, self.bounds);
        let mut g = self
            .objective
            .gradient(&clamped)
            .map_err(|e| argmin::core::Error::msg(e.to_string()))?;

        // Projected gradient: at a bound, drop components pointing further out.
        const EPS: f64 = 1e-12;
        for (i, (&x, &(lo, hi))) in clamped.iter().zip(self.bounds.iter()).enumerate() {
            if !g[i].is_finite() {
                g[i] = 0.0;
            }
            if x <= lo + EPS && g[i] > 0.0 {
                g[i] = 0.0;
            }
            if x >= hi - EPS && g[i] < 0.0 {
                g[i] = 0.0;
            }
        }

        Ok(g)
    }
}

/// Starting simplex: `x0` plus one vertex per parameter, stepped inward from
/// the nearer bound.
fn initial_simplex(x0: &[f64], bounds: &[(f64, f64)]) -> Vec<Vec<f64>> {
    let mut simplex = Vec::with_capacity(x0.len() + 1);
    simplex.push(x0.to_vec());
    for (i, (&x, &(lo, hi))) in x0.iter().zip(bounds).enumerate() {
        let width = hi - lo;
        let mut step = if width.is_finite() && width > 0.0 {
            SIMPLEX_FRACTION * width
        } else {
            0.1 * x.abs().max(1.0)
        };
        if x + step > hi {
            step = -step;
        }
        let mut vertex = x0.to_vec();
        vertex[i] += step;
        simplex.push(vertex);
    }
    simplex
}

fn converged(termination: &TerminationStatus) -> bool {
    matches!(
        termination,
        TerminationStatus::Terminated(TerminationReason::SolverConverged)
            | TerminationStatus::Terminated(TerminationReason::TargetCostReached)
    )
}

/// Box-constrained minimizer over argmin solvers
pub struct Optimizer {
    config: MinimizerConfig,
}

impl Optimizer {
    /// Create new optimizer with given configuration
    pub fn new(config: MinimizerConfig) -> Self {
        Self { config }
    }

    /// Minimize objective function with bounds
    ///
    /// # Arguments
    /// * `objective` - Objective function to minimize
    /// * `init_params` - Initial parameter values
    /// * `bounds` - Parameter bounds as (lower, upper) for each parameter
    pub fn minimize(
        &self,
        objective: &dyn ObjectiveFunction,
        init_params: &[f64],
        bounds: &[(f64, f64)],
    ) -> Result<OptimizationResult> {
        if init_params.len() != bounds.len() {
            return Err(Error::Validation(format!(
                "Parameter and bounds length mismatch: {} != {}",
                init_params.len(),
                bounds.len()
            )));
        }
        if init_params.is_empty() {
            return Err(Error::Validation("Nothing to minimize: no parameters".into()));
        }

        let init_clamped = clamp_params(init_params, bounds);
        match self.config.algorithm {
            Algorithm::NelderMead => self.minimize_nelder_mead(objective, init_clamped, bounds),
            Algorithm::Lbfgs => self.minimize_lbfgs(objective, init_clamped, bounds),
        }
    }

    fn minimize_nelder_mead(
        &self,
        objective: &dyn ObjectiveFunction,
        init: Vec<f64>,
        bounds: &[(f64, f64)],
    ) -> Result<OptimizationResult> {
        let counts = Arc::new(FuncCounts::default());
        let problem = ArgminProblem { objective, bounds, penalize_outside: true, counts: counts.clone() };

        let solver = NelderMead::new(initial_simplex(&init, bounds))
            .with_sd_tolerance(self.config.tol)
            .map_err(|e| Error::Validation(format!("Invalid optimizer configuration (tol): {e}")))?;

        let res = Executor::new(problem, solver)
            .configure(|state| state.max_iters(self.config.max_iter))
            .run()
            .map_err(|e| Error::Computation(format!("Optimization failed: {e}")))?;

        let state = res.state();
        let best = state
            .get_best_param()
            .ok_or_else(|| Error::Computation("No best parameters found".to_string()))?;
        let termination = state.get_termination_status();

        Ok(OptimizationResult {
            parameters: clamp_params(best, bounds),
            fval: state.get_best_cost(),
            n_iter: state.get_iter(),
            n_fev: counts.cost.load(Ordering::Relaxed),
            n_gev: 0,
            converged: converged(termination),
            message: termination.to_string(),
        })
    }

    fn minimize_lbfgs(
        &self,
        objective: &dyn ObjectiveFunction,
        init: Vec<f64>,
        bounds: &[(f64, f64)],
    ) -> Result<OptimizationResult> {
        let counts = Arc::new(FuncCounts::default());
        let problem = ArgminProblem { objective, bounds, penalize_outside: false, counts: counts.clone() };

        let linesearch = MoreThuenteLineSearch::new();
        // Argmin's default cost tolerance (~EPS) is too strict for likelihood scales.
        let tol_cost =
            if self.config.tol == 0.0 { 0.0 } else { (0.1 * self.config.tol).max(1e-12) };
        let solver = LBFGS::new(linesearch, self.config.lbfgs_memory)
            .with_tolerance_grad(self.config.tol)
            .map_err(|e| Error::Validation(format!("Invalid optimizer configuration (tol): {e}")))?;
        let solver = solver.with_tolerance_cost(tol_cost).map_err(|e| {
            Error::Validation(format!("Invalid optimizer configuration (tol_cost): {e}"))
        })?;

        let res = Executor::new(problem, solver)
            .configure(|state| state.param(init).max_iters(self.config.max_iter))
            .run()
            .map_err(|e| Error::Computation(format!("Optimization failed: {e}")))?;

        let state = res.state();
        let best = state
            .get_best_param()
            .ok_or_else(|| Error::Computation("No best parameters found".to_string()))?;
        let termination = state.get_termination_status();

        Ok(OptimizationResult {
            parameters: clamp_params(best, bounds),
            fval: state.get_best_cost(),
            n_iter: state.get_iter(),
            n_fev: counts.cost.load(Ordering::Relaxed),
            n_gev: counts.grad.load(Ordering::Relaxed),
            converged: converged(termination),
            message: termination.to_string(),
        })
    }
}

impl Default for Optimizer {
    fn default() -> Self {
        Self::new(MinimizerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn lbfgs(max_iter: u64, tol: f64) -> Optimizer {
        Optimizer::new(MinimizerConfig {
            algorithm: Algorithm::Lbfgs,
            max_iter,
            tol,
            ..Default::default()
        })
    }

    // f(x, y) = (x - 2)^2 + (y - 3)^2, minimum at (2, 3) with f = 0
    struct QuadraticFunction;

    impl ObjectiveFunction for QuadraticFunction {
        fn eval(&self, params: &[f64]) -> Result<f64> {
            let x = params[0];
            let y = params[1];
            Ok((x - 2.0).powi(2) + (y - 3.0).powi(2))
        }

        fn gradient(&self, params: &[f64]) -> Result<Vec<f64>> {
            let x = params[0];
            let y = params[1];
            Ok(vec![2.0 * (x - 2.0), 2.0 * (y - 3.0)])
        }
    }

    #[test]
    fn test_nelder_mead_quadratic() {
        let optimizer = Optimizer::default();
        let result =
            optimizer.minimize(&QuadraticFunction, &[0.0, 0.0], &[(-10.0, 10.0), (-10.0, 10.0)]).unwrap();

        assert!(result.converged, "Status: {}", result.message);
        assert_relative_eq!(result.parameters[0], 2.0, epsilon = 1e-3);
        assert_relative_eq!(result.parameters[1], 3.0, epsilon = 1e-3);
        assert!(result.fval < 1e-6);
        assert_eq!(result.n_gev, 0);
        assert!(result.n_fev > 0);
    }

    #[test]
    fn test_nelder_mead_stays_in_bounds() {
        // Optimal within bounds: x=3, y=2
        let optimizer = Optimizer::default();
        let result = optimizer.minimize(&QuadraticFunction, &[4.0, 1.5], &[(3.0, 5.0), (1.0, 2.0)]).unwrap();

        assert_relative_eq!(result.parameters[0], 3.0, epsilon = 1e-3);
        assert_relative_eq!(result.parameters[1], 2.0, epsilon = 1e-3);
        assert!(result.parameters[0] >= 3.0 && result.parameters[1] <= 2.0);
    }

    #[test]
    fn test_nelder_mead_survives_non_finite_region() {
        // Undefined below zero, minimum at 0.5.
        struct LogBarrier;

        impl ObjectiveFunction for LogBarrier {
            fn eval(&self, params: &[f64]) -> Result<f64> {
                let x = params[0];
                Ok(x - 0.5 * x.ln() + if x < 0.1 { f64::NAN } else { 0.0 })
            }
        }

        let optimizer = Optimizer::default();
        let result = optimizer.minimize(&LogBarrier, &[2.0], &[(-5.0, 5.0)]).unwrap();
        assert!(result.fval.is_finite());
        assert_relative_eq!(result.parameters[0], 0.5, epsilon = 1e-3);
    }

    #[test]
    fn test_length_mismatch_rejected() {
        let optimizer = Optimizer::default();
        assert!(optimizer.minimize(&QuadraticFunction, &[0.0], &[(-1.0, 1.0), (0.0, 1.0)]).is_err());
        assert!(optimizer.minimize(&QuadraticFunction, &[], &[]).is_err());
    }

    #[test]
    fn test_lbfgs_quadratic() {
        let result =
            lbfgs(100, 1e-6).minimize(&QuadraticFunction, &[0.0, 0.0], &[(-10.0, 10.0), (-10.0, 10.0)]).unwrap();

        assert!(result.converged, "Optimizer should converge");
        assert_relative_eq!(result.parameters[0], 2.0, epsilon = 1e-4);
        assert_relative_eq!(result.parameters[1], 3.0, epsilon = 1e-4);
        assert_relative_eq!(result.fval, 0.0, epsilon = 1e-6);
    }

    #[test]
    fn test_lbfgs_with_bounds() {
        let result =
            lbfgs(1000, 1e-6).minimize(&QuadraticFunction, &[4.0, 1.5], &[(3.0, 5.0), (1.0, 2.0)]).unwrap();

        assert_relative_eq!(result.parameters[0], 3.0, epsilon = 1e-4);
        assert_relative_eq!(result.parameters[1], 2.0, epsilon = 1e-4);
        assert!(
            result.converged,
            "Optimizer should converge at constrained optimum, not MaxIter. Status: {}",
            result.message
        );
    }

    // Rosenbrock: f(x,y) = (1-x)^2 + 100(y-x^2)^2, minimum at (1, 1)
    struct RosenbrockFunction;

    impl ObjectiveFunction for RosenbrockFunction {
        fn eval(&self, params: &[f64]) -> Result<f64> {
            let x = params[0];
            let y = params[1];
            Ok((1.0 - x).powi(2) + 100.0 * (y - x.powi(2)).powi(2))
        }
    }

    #[test]
    fn test_lbfgs_rosenbrock_numerical_gradient() {
        let result =
            lbfgs(1000, 1e-6).minimize(&RosenbrockFunction, &[0.0, 0.0], &[(-10.0, 10.0), (-10.0, 10.0)]).unwrap();

        assert_relative_eq!(result.parameters[0], 1.0, epsilon = 1e-3);
        assert_relative_eq!(result.parameters[1], 1.0, epsilon = 1e-3);
        assert!(result.fval < 1e-4);
    }

    #[test]
    fn test_lbfgs_pinned_at_lower_bound() {
        // f(x) = (x + 1)^2, bound x in [0, 10]: constrained min at x = 0
        struct Quadratic1D;

        impl ObjectiveFunction for Quadratic1D {
            fn eval(&self, params: &[f64]) -> Result<f64> {
                Ok((params[0] + 1.0).powi(2))
            }

            fn gradient(&self, params: &[f64]) -> Result<Vec<f64>> {
                Ok(vec![2.0 * (params[0] + 1.0)])
            }
        }

        let result = lbfgs(100, 1e-8).minimize(&Quadratic1D, &[5.0], &[(0.0, 10.0)]).unwrap();

        assert_relative_eq!(result.parameters[0], 0.0, epsilon = 1e-10);
        assert_relative_eq!(result.fval, 1.0, epsilon = 1e-10);
        assert!(result.converged, "Status: {}", result.message);
    }

    #[test]
    fn test_initial_simplex_steps_inward() {
        let s = initial_simplex(&[1.0, 0.0], &[(0.0, 1.0), (f64::NEG_INFINITY, f64::INFINITY)]);
        assert_eq!(s.len(), 3);
        assert_relative_eq!(s[1][0], 0.98, epsilon = 1e-12);
        assert_relative_eq!(s[2][1], 0.1, epsilon = 1e-12);
    }
}
