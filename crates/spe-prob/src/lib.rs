//! Special-function kernels for spefit.
//!
//! Pure, allocation-free building blocks evaluated inside the mixture-density
//! hot loops:
//! - binomial coefficient and `x*ln(y)` ([`math`])
//! - Poisson log-PMF / PMF ([`poisson`])
//! - Gaussian PDF, including the weighted accumulate kernel ([`normal`])
//!
//! Every kernel has a scalar `#[inline]` form and a slice form that writes
//! into a caller-provided buffer.

pub mod math;
pub mod normal;
pub mod poisson;

pub use math::{binom, xlog};
