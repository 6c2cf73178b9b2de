use super::{PeakLadder, PedestalMode, arity_error, generalized_poisson, prepare_output};
use spe_core::Result;

/// Charge spectrum of a silicon photomultiplier with photoelectron peaks
/// weighted by the modified (generalized) Poisson law and the pedestal added
/// separately as `exp(-lambda)`.
///
/// Parameters: `[eped, eped_sigma, pe, pe_sigma, opct, lambda]`.
pub fn sipm_modified_poisson(
    x: &[f64],
    params: &[f64],
    mode: PedestalMode,
    out: &mut [f64],
) -> Result<()> {
    let &[eped, eped_sigma, pe, pe_sigma, opct, lambda] = params else {
        return Err(arity_error("sipm_modified_poisson", 6, params.len()));
    };
    prepare_output("sipm_modified_poisson", x, out)?;

    let ladder = PeakLadder { eped, eped_sigma, pe, pe_sigma };
    ladder.add_peak(x, 0, mode.pedestal_weight(lambda), out);
    ladder.sum_peaks(x, 1, |k| generalized_poisson(k, lambda, opct), out);
    Ok(())
}
