//! Poisson distribution utilities.
//!
//! `k` is taken as `f64` so the log-PMF stays defined (and comparable to
//! reference implementations) for the whole real grid a caller hands in;
//! photoelectron counts convert losslessly.

use crate::math::xlog;
use statrs::function::gamma::ln_gamma;

/// Log-PMF of `Poisson(mu)` at count `k`.
///
/// `log p(k) = k*ln(mu) - lnΓ(k+1) - mu`, with the `k*ln(mu)` term taken as 0
/// at `k = 0` so that `mu = 0` yields `log p(0) = 0`.
#[inline]
pub fn logpmf(k: f64, mu: f64) -> f64 {
    xlog(k, mu) - ln_gamma(k + 1.0) - mu
}

/// PMF of `Poisson(mu)` at count `k`.
#[inline]
pub fn pmf(k: f64, mu: f64) -> f64 {
    logpmf(k, mu).exp()
}

/// Element-wise [`logpmf`] over counts at a single mean.
pub fn logpmf_batch(k: &[f64], mu: f64, out: &mut [f64]) {
    debug_assert_eq!(k.len(), out.len());
    for (o, &ki) in out.iter_mut().zip(k) {
        *o = logpmf(ki, mu);
    }
}

/// Element-wise [`pmf`] over counts at a single mean.
pub fn pmf_batch(k: &[f64], mu: f64, out: &mut [f64]) {
    logpmf_batch(k, mu, out);
    for o in out.iter_mut() {
        *o = o.exp();
    }
}
