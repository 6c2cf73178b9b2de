//! Normal distribution utilities.

/// `sqrt(2π)`.
const SQRT_2PI: f64 = 2.506_628_274_631_000_7;

/// PDF of a Normal distribution `N(mean, sigma)` at `x`.
///
/// `p(x) = exp(-0.5 * ((x-mean)/sigma)^2) / (sqrt(2π) * sigma)`
#[inline]
pub fn pdf(x: f64, mean: f64, sigma: f64) -> f64 {
    let u = (x - mean) / sigma;
    (-0.5 * u * u).exp() / (SQRT_2PI * sigma)
}

/// Element-wise [`pdf`] over `x`.
pub fn pdf_batch(x: &[f64], mean: f64, sigma: f64, out: &mut [f64]) {
    debug_assert_eq!(x.len(), out.len());
    let inv_sigma = 1.0 / sigma;
    let norm = inv_sigma / SQRT_2PI;
    for (o, &xi) in out.iter_mut().zip(x) {
        let u = (xi - mean) * inv_sigma;
        *o = norm * (-0.5 * u * u).exp();
    }
}

/// `out[i] += weight * pdf(x[i], mean, sigma)`.
///
/// Inner kernel of every mixture density: one call per mixture component.
pub fn accumulate_pdf(x: &[f64], mean: f64, sigma: f64, weight: f64, out: &mut [f64]) {
    debug_assert_eq!(x.len(), out.len());
    let inv_sigma = 1.0 / sigma;
    let norm = weight * inv_sigma / SQRT_2PI;
    for (o, &xi) in out.iter_mut().zip(x) {
        let u = (xi - mean) * inv_sigma;
        *o += norm * (-0.5 * u * u).exp();
    }
}
