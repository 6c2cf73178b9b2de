use super::{PeakLadder, PedestalMode, arity_error, prepare_output};
use spe_core::Result;
use spe_prob::poisson;

/// Charge spectrum of a photomultiplier tube whose single-photoelectron
/// response is one Gaussian.
///
/// Parameters: `[eped, eped_sigma, pe, pe_sigma, lambda]`, where `eped` is the
/// pedestal position, `pe` the spacing of photoelectron peaks and `lambda` the
/// average illumination in photoelectrons. Peak `k` is weighted by
/// `Poisson(k | lambda)`.
pub fn pmt_single_gaussian(
    x: &[f64],
    params: &[f64],
    mode: PedestalMode,
    out: &mut [f64],
) -> Result<()> {
    let &[eped, eped_sigma, pe, pe_sigma, lambda] = params else {
        return Err(arity_error("pmt_single_gaussian", 5, params.len()));
    };
    prepare_output("pmt_single_gaussian", x, out)?;

    let ladder = PeakLadder { eped, eped_sigma, pe, pe_sigma };
    ladder.add_peak(x, 0, mode.pedestal_weight(lambda), out);
    ladder.sum_peaks(x, 1, |k| poisson::pmf(k as f64, lambda), out);
    Ok(())
}
