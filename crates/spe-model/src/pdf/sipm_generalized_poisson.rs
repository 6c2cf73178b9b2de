use super::{PeakLadder, PedestalMode, arity_error, prepare_output};
use spe_core::Result;
use statrs::function::gamma::ln_gamma;

/// Generalized Poisson probability of `k` fired cells.
///
/// `mu * exp((k-1)*ln(mu + k*opct) - (mu + k*opct) - lnΓ(k+1))`, where `mu` is
/// the mean number of primaries and `opct` the mean number of crosstalk cells
/// per primary. `k = 0` reduces to `exp(-mu)` and is returned in that form so
/// that `mu = 0` stays finite.
#[inline]
pub fn generalized_poisson(k: usize, mu: f64, opct: f64) -> f64 {
    if k == 0 {
        return (-mu).exp();
    }
    if mu <= 0.0 {
        return 0.0;
    }
    let kf = k as f64;
    let mu_dash = mu + kf * opct;
    mu * ((kf - 1.0) * mu_dash.ln() - mu_dash - ln_gamma(kf + 1.0)).exp()
}

/// Charge spectrum of a silicon photomultiplier with peak weights from the
/// generalized Poisson law, the pedestal included in the same sum.
///
/// Parameters: `[pe0, pe0_sigma, pe, pe_sigma, opct, lambda]`.
pub fn sipm_generalized_poisson(
    x: &[f64],
    params: &[f64],
    mode: PedestalMode,
    out: &mut [f64],
) -> Result<()> {
    let &[pe0, pe0_sigma, pe, pe_sigma, opct, lambda] = params else {
        return Err(arity_error("sipm_generalized_poisson", 6, params.len()));
    };
    prepare_output("sipm_generalized_poisson", x, out)?;

    let ladder = PeakLadder { eped: pe0, eped_sigma: pe0_sigma, pe, pe_sigma };
    ladder.sum_peaks(x, mode.first_peak(), |k| generalized_poisson(k, lambda, opct), out);
    Ok(())
}
