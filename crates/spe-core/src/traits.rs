//! Core traits for spefit
//!
//! The minimizer only ever sees a [`Model`]: a flat, ordered list of named
//! parameters with starting values, box limits and fixed flags. Cost functions
//! and parameter registries both expose this view.

/// Parameter view consumed by the minimizer.
///
/// All vectors returned by the methods share one ordering, which is also the
/// ordering of the flat parameter vector passed to objective evaluations.
pub trait Model: Send + Sync {
    /// Number of parameters (fixed ones included)
    fn n_parameters(&self) -> usize {
        self.parameter_names().len()
    }

    /// Parameter names
    fn parameter_names(&self) -> Vec<String>;

    /// Starting values
    fn parameter_init(&self) -> Vec<f64>;

    /// Parameter bounds (min, max)
    fn parameter_bounds(&self) -> Vec<(f64, f64)>;

    /// Whether each parameter is held at its starting value
    fn parameter_fixed(&self) -> Vec<bool>;

    /// Number of parameters the minimizer is allowed to move
    fn n_free_parameters(&self) -> usize {
        self.parameter_fixed().iter().filter(|f| !**f).count()
    }
}
