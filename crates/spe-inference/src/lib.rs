//! # spe-inference
//!
//! Fitting single-photoelectron spectra.
//!
//! This crate provides:
//! - Cost functions over charge histograms (unbinned, binned likelihood, least squares)
//! - Goodness-of-fit statistics (chi2, reduced chi2, p-value)
//! - Bounded minimization (Nelder-Mead, L-BFGS) with Hessian-based uncertainties
//! - Camera-wide fitting, one independent job per channel
//! - Synthetic spectra for tests and studies

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Cost functions and goodness of fit.
pub mod cost;
/// Camera-wide fitting.
pub mod fitter;
/// Minimization of a cost over its free parameters.
pub mod minimize;
/// Generic numerical optimizer (argmin backend).
pub mod optimizer;
/// Synthetic charge spectra.
pub mod toys;

pub use cost::{BinnedNll, Cost, CostKind, LeastSquares, UnbinnedNll, cost_from_name};
pub use fitter::{CameraFit, CameraFitter, ChannelFit, FitCurves, FitterConfig};
pub use minimize::Minimizer;
pub use optimizer::{Algorithm, MinimizerConfig, ObjectiveFunction, OptimizationResult, Optimizer};
