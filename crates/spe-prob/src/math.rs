//! Small numerically-stable math utilities used across probability code.

use statrs::function::gamma::ln_gamma;

/// Binomial coefficient `n choose k` for non-negative integers.
///
/// `exp(lnΓ(n+1) - lnΓ(k+1) - lnΓ(n-k+1))`, so large `n` never overflows an
/// intermediate factorial. Returns 0 when `k > n`.
#[inline]
pub fn binom(n: u64, k: u64) -> f64 {
    if k > n {
        return 0.0;
    }
    let n1 = (n as f64) + 1.0;
    let k1 = (k as f64) + 1.0;
    let nk1 = ((n - k) as f64) + 1.0;
    (ln_gamma(n1) - ln_gamma(k1) - ln_gamma(nk1)).exp()
}

/// `x * ln(y)`, exactly 0 whenever `x == 0`.
///
/// The zero branch also covers `y <= 0` and `y = NaN`, where `ln(y)` is not
/// a number.
#[inline]
pub fn xlog(x: f64, y: f64) -> f64 {
    if x == 0.0 { 0.0 } else { x * y.ln() }
}

/// Element-wise [`binom`]. `out` must have the length of `n` and `k`.
pub fn binom_batch(n: &[u64], k: &[u64], out: &mut [f64]) {
    debug_assert_eq!(n.len(), k.len());
    debug_assert_eq!(n.len(), out.len());
    for ((o, &ni), &ki) in out.iter_mut().zip(n).zip(k) {
        *o = binom(ni, ki);
    }
}

/// Element-wise [`xlog`]. `out` must have the length of `x` and `y`.
pub fn xlog_batch(x: &[f64], y: &[f64], out: &mut [f64]) {
    debug_assert_eq!(x.len(), y.len());
    debug_assert_eq!(x.len(), out.len());
    for ((o, &xi), &yi) in out.iter_mut().zip(x).zip(y) {
        *o = xlog(xi, yi);
    }
}
