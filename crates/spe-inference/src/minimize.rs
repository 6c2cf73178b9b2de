//! Minimization of a [`Cost`] with parabolic uncertainties.
//!
//! Only free parameters are handed to the optimizer; fixed ones stay at their
//! starting values. After the minimum is found, the Hessian of the objective
//! is estimated by finite differences and inverted into a covariance matrix
//! scaled by the cost's errordef.

use crate::cost::Cost;
use crate::optimizer::{MinimizerConfig, ObjectiveFunction, OptimizationResult, Optimizer, clamp_params};
use nalgebra::DMatrix;
use spe_core::{Error, FitResult, Result};

/// Objective over the free parameters of a cost.
struct FreeObjective<'a, C: Cost + ?Sized> {
    cost: &'a C,
    full: Vec<f64>,
    free: Vec<usize>,
}

impl<C: Cost + ?Sized> FreeObjective<'_, C> {
    fn expand(&self, free_params: &[f64]) -> Vec<f64> {
        let mut full = self.full.clone();
        for (&i, &v) in self.free.iter().zip(free_params) {
            full[i] = v;
        }
        full
    }
}

impl<C: Cost + ?Sized> ObjectiveFunction for FreeObjective<'_, C> {
    fn eval(&self, params: &[f64]) -> Result<f64> {
        self.cost.eval(&self.expand(params))
    }
}

/// Minimizes costs and estimates parameter uncertainties.
#[derive(Debug, Clone, Default)]
pub struct Minimizer {
    config: MinimizerConfig,
}

impl Minimizer {
    /// Create a minimizer with the given configuration
    pub fn new(config: MinimizerConfig) -> Self {
        Self { config }
    }

    /// Access the configuration.
    pub fn config(&self) -> &MinimizerConfig {
        &self.config
    }

    /// Minimize `cost` from the starting values of its parameters.
    pub fn minimize<C: Cost + ?Sized>(&self, cost: &C) -> Result<FitResult> {
        self.minimize_from(cost, &cost.parameter_init())
    }

    /// Minimize `cost` from an explicit starting point (fixed parameters keep
    /// their values from `init`).
    pub fn minimize_from<C: Cost + ?Sized>(&self, cost: &C, init: &[f64]) -> Result<FitResult> {
        let names = cost.parameter_names();
        let bounds = cost.parameter_bounds();
        let fixed = cost.parameter_fixed();
        if init.len() != names.len() {
            return Err(Error::Validation(format!(
                "starting point has {} values, cost has {} parameters",
                init.len(),
                names.len()
            )));
        }

        let full = clamp_params(init, &bounds);
        let free: Vec<usize> = (0..full.len()).filter(|&i| !fixed[i]).collect();
        if free.is_empty() {
            let fval = cost.eval(&full)?;
            let n = full.len();
            return Ok(FitResult::new(names, full, vec![0.0; n], fval, true, 1));
        }

        let free_bounds: Vec<(f64, f64)> = free.iter().map(|&i| bounds[i]).collect();
        let mut objective = FreeObjective { cost, full, free };
        let mut start: Vec<f64> = objective.free.iter().map(|&i| objective.full[i]).collect();

        let optimizer = Optimizer::new(self.config.clone());
        let mut n_evaluations = 0;
        let mut result: Option<OptimizationResult> = None;
        for _ in 0..=self.config.n_restarts {
            let r = optimizer.minimize(&objective, &start, &free_bounds)?;
            log::debug!("{} on {}: {r}", cost.kind(), names.join(","));
            n_evaluations += r.n_fev;
            start = r.parameters.clone();
            result = Some(r);
        }
        let Some(result) = result else {
            return Err(Error::Computation("minimizer produced no result".into()));
        };

        let best = result.parameters;
        objective.full = objective.expand(&best);
        let fval = cost.eval(&objective.full)?;

        let m = best.len();
        let hessian = compute_hessian(&objective, &best, &free_bounds)?;
        n_evaluations += 2 * m * m + m;

        let mut uncertainties = vec![0.0; objective.full.len()];
        let covariance = invert_hessian(&hessian, m).map(|h_inv| h_inv * (2.0 * cost.errordef()));
        let covariance = covariance.filter(|cov| (0..m).all(|i| cov[(i, i)].is_finite() && cov[(i, i)] > 0.0));

        let fit = match covariance {
            Some(cov) => {
                for (k, &i) in objective.free.iter().enumerate() {
                    uncertainties[i] = cov[(k, k)].sqrt();
                }
                // Row-major flat copy; symmetric, so column order matches.
                let cov_flat: Vec<f64> = cov.iter().copied().collect();
                FitResult::new(names, objective.full, uncertainties, fval, result.converged, n_evaluations)
                    .with_covariance(cov_flat)
            }
            None => {
                log::warn!("Hessian inversion failed; uncertainties are not available");
                for &i in &objective.free {
                    uncertainties[i] = f64::NAN;
                }
                FitResult::new(names, objective.full, uncertainties, fval, result.converged, n_evaluations)
            }
        };
        Ok(fit)
    }
}

/// Center offset and step of the difference stencil of one parameter.
///
/// The stencil `center - h, center, center + h` stays inside `[lo, hi]`: away
/// from the limits it is centered on `v`, next to a limit it becomes one-sided.
/// Steps only shrink when the whole range is narrower than `2h`.
fn stencil(v: f64, (lo, hi): (f64, f64)) -> (f64, f64) {
    let h = 1e-4 * v.abs().max(1.0);
    if hi - lo < 2.0 * h {
        let h = 0.5 * (hi - lo);
        return (lo + h - v, h);
    }
    if v - lo < h {
        (lo + h - v, h)
    } else if hi - v < h {
        (hi - h - v, h)
    } else {
        (0.0, h)
    }
}

/// Hessian of `objective` at `x` by second differences of function values.
///
/// Every evaluation point lies inside `bounds`.
fn compute_hessian(
    objective: &dyn ObjectiveFunction,
    x: &[f64],
    bounds: &[(f64, f64)],
) -> Result<DMatrix<f64>> {
    let n = x.len();
    let stencils: Vec<(f64, f64)> = x.iter().zip(bounds).map(|(&v, &b)| stencil(v, b)).collect();

    let eval_shifted = |shifts: &[(usize, f64)]| -> Result<f64> {
        let mut p = x.to_vec();
        for &(i, d) in shifts {
            let (lo, hi) = bounds[i];
            p[i] = (x[i] + d).clamp(lo, hi);
        }
        objective.eval(&p)
    };

    let mut hessian = DMatrix::zeros(n, n);
    for i in 0..n {
        let (ci, hi) = stencils[i];
        let f_plus = eval_shifted(&[(i, ci + hi)])?;
        let f_mid = eval_shifted(&[(i, ci)])?;
        let f_minus = eval_shifted(&[(i, ci - hi)])?;
        hessian[(i, i)] = (f_plus - 2.0 * f_mid + f_minus) / (hi * hi);

        for j in 0..i {
            let (cj, hj) = stencils[j];
            let f_pp = eval_shifted(&[(i, ci + hi), (j, cj + hj)])?;
            let f_pm = eval_shifted(&[(i, ci + hi), (j, cj - hj)])?;
            let f_mp = eval_shifted(&[(i, ci - hi), (j, cj + hj)])?;
            let f_mm = eval_shifted(&[(i, ci - hi), (j, cj - hj)])?;
            let h_ij = (f_pp - f_pm - f_mp + f_mm) / (4.0 * hi * hj);
            hessian[(i, j)] = h_ij;
            hessian[(j, i)] = h_ij;
        }
    }

    Ok(hessian)
}

/// Smallest eigenvalue, relative to the unit diagonal, of the scaled Hessian
/// that still counts as positive definite.
const MIN_SCALED_EIGENVALUE: f64 = 1e-8;

/// Covariance as the inverse of the Hessian.
///
/// The Hessian is scaled to unit diagonal first. It must have finite entries,
/// a strictly positive diagonal and a scaled spectrum bounded away from zero;
/// otherwise some direction is unconstrained and `None` is returned.
fn invert_hessian(hessian: &DMatrix<f64>, n: usize) -> Option<DMatrix<f64>> {
    if hessian.iter().any(|v| !v.is_finite()) {
        return None;
    }
    let diag: Vec<f64> = (0..n).map(|i| hessian[(i, i)]).collect();
    if diag.iter().any(|&d| d <= 0.0) {
        return None;
    }
    let scale: Vec<f64> = diag.iter().map(|d| d.sqrt().recip()).collect();
    let scaled = DMatrix::from_fn(n, n, |i, j| hessian[(i, j)] * scale[i] * scale[j]);

    let eigen = nalgebra::linalg::SymmetricEigen::new(scaled.clone());
    let min_eigenvalue = eigen.eigenvalues.iter().copied().fold(f64::INFINITY, f64::min);
    if min_eigenvalue <= MIN_SCALED_EIGENVALUE {
        return None;
    }

    let chol = nalgebra::linalg::Cholesky::new(scaled)?;
    let inv = chol.inverse();
    let cov = DMatrix::from_fn(n, n, |i, j| inv[(i, j)] * scale[i] * scale[j]);
    (0..n).all(|i| cov[(i, i)].is_finite() && cov[(i, i)] > 0.0).then_some(cov)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cost::{BinnedNll, LeastSquares};
    use crate::toys::stratified_spectrum;
    use approx::assert_relative_eq;
    use spe_core::Model;
    use spe_model::{ChargeContainer, ParameterDecl, PedestalMode, SpectrumPdf};
    use spe_prob::normal;

    fn normal_kernel(x: &[f64], params: &[f64], _mode: PedestalMode, out: &mut [f64]) -> Result<()> {
        let &[mean, sigma] = params else {
            return Err(Error::Validation("normal expects 2 params".into()));
        };
        normal::pdf_batch(x, mean, sigma, out);
        Ok(())
    }

    fn normal_pdf() -> SpectrumPdf {
        SpectrumPdf::builder(2)
            .function(normal_kernel)
            .parameters(vec![
                ("mean".to_string(), ParameterDecl::new(0.0, (-2.0, 2.0))),
                ("sigma".to_string(), ParameterDecl::new(0.1, (0.0, 2.0)).multi()),
            ])
            .build()
            .unwrap()
    }

    fn charges(truth: &[f64]) -> Vec<ChargeContainer> {
        let pdf = normal_pdf();
        let grid: Vec<f64> = (0..20_000).map(|i| -3.0 + 6.0 * i as f64 / 19_999.0).collect();
        (0..2)
            .map(|i| {
                let s = stratified_spectrum(&pdf, truth, i, &grid, 20_000).unwrap();
                ChargeContainer::from_samples(&s, 120, (-3.0, 3.0)).unwrap()
            })
            .collect()
    }

    #[test]
    fn test_recovers_normal_parameters() {
        let truth = [0.5, 0.3, 0.4];
        let mut pdf = normal_pdf();
        pdf.update_initial([("mean", 0.3), ("sigma", 0.35)]).unwrap();
        let cost = BinnedNll::new(pdf, charges(&truth)).unwrap();

        let fit = Minimizer::default().minimize(&cost).unwrap();
        assert_eq!(fit.names, ["mean", "sigma0", "sigma1"]);
        assert_relative_eq!(fit.value("mean").unwrap(), 0.5, epsilon = 2e-3);
        assert_relative_eq!(fit.value("sigma0").unwrap(), 0.3, max_relative = 1e-2);
        assert_relative_eq!(fit.value("sigma1").unwrap(), 0.4, max_relative = 1e-2);
        assert!(fit.has_uncertainties());
        assert!(fit.covariance.is_some());
        assert_eq!(fit.covariance.as_ref().unwrap().len(), 9);

        // Binned Gaussian mean: about sigma / sqrt(N) combined over both illuminations.
        let err = fit.uncertainty("mean").unwrap();
        assert!(err > 0.0005 && err < 0.005, "mean uncertainty {err}");
    }

    #[test]
    fn test_fixed_parameters_are_untouched() {
        let truth = [0.5, 0.3, 0.4];
        let mut pdf = normal_pdf();
        pdf.update_initial([("mean", 0.45), ("sigma", 0.35)]).unwrap();
        pdf.update_fixed([("mean", true)]).unwrap();
        let cost = BinnedNll::new(pdf, charges(&truth)).unwrap();

        let fit = Minimizer::default().minimize(&cost).unwrap();
        assert_eq!(fit.value("mean"), Some(0.45));
        assert_eq!(fit.uncertainty("mean"), Some(0.0));
        assert!(fit.uncertainty("sigma0").unwrap() > 0.0);
        assert_eq!(fit.covariance.as_ref().unwrap().len(), 4);
    }

    #[test]
    fn test_all_fixed_evaluates_once() {
        let truth = [0.5, 0.3, 0.4];
        let mut pdf = normal_pdf();
        pdf.update_fixed([("mean", true), ("sigma", true)]).unwrap();
        let cost = LeastSquares::new(pdf, charges(&truth)).unwrap();
        let fit = Minimizer::default().minimize(&cost).unwrap();
        assert_eq!(fit.parameters, cost.parameter_init());
        assert_eq!(fit.n_evaluations, 1);
        assert_eq!(fit.uncertainties, [0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_hessian_of_unit_parabola() {
        // f = (x-1)^2 / 2 has unit curvature.
        struct Parabola;
        impl ObjectiveFunction for Parabola {
            fn eval(&self, p: &[f64]) -> Result<f64> {
                Ok(0.5 * (p[0] - 1.0).powi(2))
            }
        }
        let h = compute_hessian(&Parabola, &[1.0], &[(-10.0, 10.0)]).unwrap();
        assert_relative_eq!(h[(0, 0)], 1.0, max_relative = 1e-4);
        let cov = invert_hessian(&h, 1).unwrap();
        assert_relative_eq!(cov[(0, 0)], 1.0, max_relative = 1e-4);
    }

    #[test]
    fn test_singular_hessian_is_rejected() {
        let h = DMatrix::from_row_slice(2, 2, &[f64::NAN, 0.0, 0.0, 1.0]);
        assert!(invert_hessian(&h, 2).is_none());
        let h = DMatrix::from_row_slice(2, 2, &[-1.0, 0.0, 0.0, -1.0]);
        assert!(invert_hessian(&h, 2).is_none());
    }

    #[test]
    fn test_unconstrained_parameter_degrades_to_nan() {
        fn kernel(x: &[f64], params: &[f64], _mode: PedestalMode, out: &mut [f64]) -> Result<()> {
            let &[mean, sigma, _unused] = params else {
                return Err(Error::Validation("expects 3 params".into()));
            };
            normal::pdf_batch(x, mean, sigma, out);
            Ok(())
        }
        let mut pdf = SpectrumPdf::builder(2)
            .function(kernel)
            .parameters(vec![
                ("mean".to_string(), ParameterDecl::new(0.0, (-2.0, 2.0))),
                ("sigma".to_string(), ParameterDecl::new(0.1, (0.0, 2.0)).multi()),
                ("unused".to_string(), ParameterDecl::new(0.0, (-5.0, 5.0))),
            ])
            .build()
            .unwrap();
        pdf.update_initial([("mean", 0.45), ("sigma", 0.35)]).unwrap();
        let cost = BinnedNll::new(pdf, charges(&[0.5, 0.3, 0.4])).unwrap();

        let fit = Minimizer::default().minimize(&cost).unwrap();
        assert_relative_eq!(fit.value("mean").unwrap(), 0.5, epsilon = 2e-3);
        assert!(fit.uncertainty("unused").unwrap().is_nan());
        assert!(fit.uncertainty("mean").unwrap().is_nan());
        assert!(fit.covariance.is_none());
    }

    #[test]
    fn test_nearly_singular_hessian_is_rejected() {
        let h = DMatrix::from_row_slice(2, 2, &[1.0, 1.0, 1.0, 1.0 + 1e-12]);
        assert!(invert_hessian(&h, 2).is_none());
        let h = DMatrix::from_row_slice(2, 2, &[1e6, 0.0, 0.0, 1e-20]);
        // Widely different curvatures are fine once scaled.
        let cov = invert_hessian(&h, 2).unwrap();
        assert_relative_eq!(cov[(1, 1)], 1e20, max_relative = 1e-9);
    }

    #[test]
    fn test_correlated_hessian_inverse() {
        let h = DMatrix::from_row_slice(2, 2, &[2.0, 1.0, 1.0, 2.0]);
        let cov = invert_hessian(&h, 2).unwrap();
        assert_relative_eq!(cov[(0, 0)], 2.0 / 3.0, max_relative = 1e-12);
        assert_relative_eq!(cov[(0, 1)], -1.0 / 3.0, max_relative = 1e-12);
    }

    /// `(x - 1)^2 / 2` on `x >= 0`, undefined below.
    struct HalfLineParabola;

    impl ObjectiveFunction for HalfLineParabola {
        fn eval(&self, p: &[f64]) -> Result<f64> {
            if p[0] < 0.0 {
                return Ok(f64::NAN);
            }
            Ok(0.5 * (p[0] - 1.0).powi(2) + 0.5 * p[1] * p[1])
        }
    }

    #[test]
    fn test_hessian_at_lower_limit_stays_inside() {
        let bounds = [(0.0, 5.0), (-1.0, 1.0)];
        let h = compute_hessian(&HalfLineParabola, &[0.0, 0.0], &bounds).unwrap();
        assert_relative_eq!(h[(0, 0)], 1.0, max_relative = 1e-4);
        assert_relative_eq!(h[(1, 1)], 1.0, max_relative = 1e-4);
        assert!(h[(0, 1)].abs() < 1e-6);

        // Barely inside the limit: the step is not collapsed.
        let h = compute_hessian(&HalfLineParabola, &[1e-12, 0.0], &bounds).unwrap();
        assert_relative_eq!(h[(0, 0)], 1.0, max_relative = 1e-4);
    }

    #[test]
    fn test_hessian_at_upper_limit_and_narrow_range() {
        let h = compute_hessian(&HalfLineParabola, &[5.0, 1.0], &[(0.0, 5.0), (-1.0, 1.0)]).unwrap();
        assert_relative_eq!(h[(0, 0)], 1.0, max_relative = 1e-4);
        assert_relative_eq!(h[(1, 1)], 1.0, max_relative = 1e-4);
        let h = compute_hessian(&HalfLineParabola, &[1.0, 0.0], &[(1.0, 1.00001), (-1.0, 1.0)]).unwrap();
        assert_relative_eq!(h[(0, 0)], 1.0, max_relative = 1e-4);
    }

    #[test]
    fn test_start_length_mismatch() {
        let cost = BinnedNll::new(normal_pdf(), charges(&[0.5, 0.3, 0.4])).unwrap();
        assert!(Minimizer::default().minimize_from(&cost, &[0.5]).is_err());
    }
}
