//! Mixture densities describing single-photoelectron charge spectra.
//!
//! Every density is a weighted sum of Gaussian peaks, one per number of
//! detected photoelectrons `k`. Peak `k` sits at `eped + k*pe` with width
//! `sqrt(k*pe_sigma^2 + eped_sigma^2)`. The variants differ only in how the
//! weight of peak `k` is obtained.
//!
//! All kernels share the [`DensityFn`] signature: positional parameters in
//! declaration order, an explicit [`PedestalMode`], and an output buffer the
//! same length as `x`.

use serde::{Deserialize, Serialize};
use spe_core::{Error, Result};
use spe_prob::normal;

mod pmt_single_gaussian;
mod sipm_generalized_poisson;
mod sipm_gentile;
mod sipm_modified_poisson;

pub use pmt_single_gaussian::pmt_single_gaussian;
pub use sipm_generalized_poisson::{generalized_poisson, sipm_generalized_poisson};
pub use sipm_gentile::{gentile_probability, sipm_gentile};
pub use sipm_modified_poisson::sipm_modified_poisson;

/// Hard cap on the number of photoelectron peaks summed.
pub const MAX_PHOTOELECTRONS: usize = 100;

/// Peak weights below this floor (and past the running maximum) end the sum.
pub const WEIGHT_FLOOR: f64 = 1e-4;

/// Positional density kernel: `out[i] = f(x[i]; params)`.
///
/// `out` is overwritten. `params` must hold exactly the values the kernel
/// declares, in declaration order.
pub type DensityFn =
    fn(x: &[f64], params: &[f64], mode: PedestalMode, out: &mut [f64]) -> Result<()>;

/// Whether the zero-photoelectron peak is part of the spectrum.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PedestalMode {
    /// Pedestal weighted by `exp(-lambda)`; the density integrates to 1.
    #[default]
    Included,
    /// No pedestal (threshold trigger or dark counting); the density
    /// integrates to `1 - exp(-lambda)`.
    Disabled,
}

impl PedestalMode {
    /// Weight of the `k = 0` peak for average illumination `lambda`.
    #[inline]
    pub fn pedestal_weight(self, lambda: f64) -> f64 {
        match self {
            PedestalMode::Included => (-lambda).exp(),
            PedestalMode::Disabled => 0.0,
        }
    }

    /// First photoelectron count of a sum that starts at the pedestal.
    #[inline]
    pub fn first_peak(self) -> usize {
        match self {
            PedestalMode::Included => 0,
            PedestalMode::Disabled => 1,
        }
    }
}

/// Peak positions and widths shared by all variants.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PeakLadder {
    pub eped: f64,
    pub eped_sigma: f64,
    pub pe: f64,
    pub pe_sigma: f64,
}

impl PeakLadder {
    /// Add `weight * N(eped + k*pe, sqrt(k*pe_sigma^2 + eped_sigma^2))` into `out`.
    #[inline]
    pub fn add_peak(&self, x: &[f64], k: usize, weight: f64, out: &mut [f64]) {
        let kf = k as f64;
        let sigma =
            (kf * self.pe_sigma * self.pe_sigma + self.eped_sigma * self.eped_sigma).sqrt();
        normal::accumulate_pdf(x, self.eped + kf * self.pe, sigma, weight, out);
    }

    /// Sum peaks `first..MAX_PHOTOELECTRONS`, stopping once the weights have
    /// passed their maximum and dropped below [`WEIGHT_FLOOR`].
    pub fn sum_peaks(
        &self,
        x: &[f64],
        first: usize,
        mut weight: impl FnMut(usize) -> f64,
        out: &mut [f64],
    ) {
        let mut w_max = 0.0_f64;
        for k in first..MAX_PHOTOELECTRONS {
            let w = weight(k);
            if w > w_max {
                w_max = w;
            } else if w < WEIGHT_FLOOR {
                break;
            }
            self.add_peak(x, k, w, out);
        }
    }
}

/// Reset `out` and check it matches `x`.
pub(crate) fn prepare_output(name: &str, x: &[f64], out: &mut [f64]) -> Result<()> {
    if out.len() != x.len() {
        return Err(Error::Validation(format!(
            "{name} out length mismatch: expected {}, got {}",
            x.len(),
            out.len()
        )));
    }
    out.fill(0.0);
    Ok(())
}

/// Error for a parameter slice of the wrong length.
pub(crate) fn arity_error(name: &str, expected: usize, got: usize) -> Error {
    Error::Validation(format!("{name} expects {expected} params, got {got}"))
}
