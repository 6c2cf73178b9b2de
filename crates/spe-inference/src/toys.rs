//! Synthetic charge spectra.
//!
//! Samples are drawn from a density tabulated on a grid: each grid point gets
//! a probability proportional to the density there, and draws pick grid points
//! by inverting the cumulative distribution. Histogram toys are Poisson
//! fluctuations of the expected bin contents.

use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Poisson};
use spe_core::{Error, Result};
use spe_model::SpectrumPdf;

/// Normalized cumulative distribution of the density on `grid`.
fn grid_cdf(pdf: &SpectrumPdf, parameters: &[f64], i_illumination: usize, grid: &[f64]) -> Result<Vec<f64>> {
    if grid.is_empty() {
        return Err(Error::Validation("sampling grid must not be empty".into()));
    }
    let y = pdf.evaluate(grid, parameters, i_illumination)?;
    let total: f64 = y.iter().sum();
    if !(total.is_finite() && total > 0.0) {
        return Err(Error::Computation(format!(
            "density has no positive finite mass on the sampling grid (sum = {total})"
        )));
    }
    let mut acc = 0.0;
    let mut cdf: Vec<f64> = y
        .iter()
        .map(|v| {
            acc += v.max(0.0) / total;
            acc
        })
        .collect();
    // Guard against the last entry rounding below 1.
    if let Some(last) = cdf.last_mut() {
        *last = 1.0;
    }
    Ok(cdf)
}

#[inline]
fn pick(grid: &[f64], cdf: &[f64], u: f64) -> f64 {
    grid[cdf.partition_point(|&c| c < u).min(grid.len() - 1)]
}

/// Draw `n` random charges from illumination `i_illumination`.
///
/// Sampling is deterministic for a given `seed`.
pub fn sample_spectrum(
    pdf: &SpectrumPdf,
    parameters: &[f64],
    i_illumination: usize,
    grid: &[f64],
    n: usize,
    seed: u64,
) -> Result<Vec<f64>> {
    let cdf = grid_cdf(pdf, parameters, i_illumination, grid)?;
    let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
    Ok((0..n).map(|_| pick(grid, &cdf, rng.random::<f64>())).collect())
}

/// `n` charges placed at the quantiles `(j + 0.5) / n` of illumination
/// `i_illumination`. Free of sampling noise; used for recovery checks.
pub fn stratified_spectrum(
    pdf: &SpectrumPdf,
    parameters: &[f64],
    i_illumination: usize,
    grid: &[f64],
    n: usize,
) -> Result<Vec<f64>> {
    let cdf = grid_cdf(pdf, parameters, i_illumination, grid)?;
    Ok((0..n).map(|j| pick(grid, &cdf, (j as f64 + 0.5) / n as f64)).collect())
}

/// Expected bin contents at `centers` for `n_total` events.
pub fn expected_histogram(
    pdf: &SpectrumPdf,
    parameters: &[f64],
    i_illumination: usize,
    centers: &[f64],
    n_total: f64,
) -> Result<Vec<f64>> {
    let y = pdf.evaluate(centers, parameters, i_illumination)?;
    let total: f64 = y.iter().sum();
    Ok(y.iter().map(|v| v * n_total / total).collect())
}

/// One Poisson-fluctuated histogram from a vector of expectations.
///
/// Non-positive or non-finite expectations produce empty bins.
pub fn poisson_histogram(expected: &[f64], seed: u64) -> Result<Vec<f64>> {
    let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
    expected
        .iter()
        .map(|&lam| {
            if !lam.is_finite() || lam <= 0.0 {
                return Ok(0.0);
            }
            let pois = Poisson::new(lam)
                .map_err(|e| Error::Computation(format!("Poisson({lam}): {e}")))?;
            Ok(pois.sample(&mut rng))
        })
        .collect()
}
