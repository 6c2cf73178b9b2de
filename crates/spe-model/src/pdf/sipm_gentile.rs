use super::{
    MAX_PHOTOELECTRONS, PeakLadder, PedestalMode, WEIGHT_FLOOR, arity_error, prepare_output,
};
use spe_core::Result;
use spe_prob::{binom, poisson};

/// Probability of `k` fired cells given the Poisson probabilities of the
/// primary counts, `primary[j] = Poisson(j | lambda)`.
///
/// Each of `j` primaries fires `k - j` crosstalk cells with probability
/// `(1-opct)^j * opct^(k-j) * C(k-1, j-1)`. Primaries whose own probability is
/// below [`WEIGHT_FLOOR`] are skipped.
pub fn gentile_probability(k: usize, primary: &[f64], opct: f64) -> f64 {
    let mut pk = 0.0;
    for (j, &pj) in primary.iter().enumerate().take(k + 1).skip(1) {
        if pj < WEIGHT_FLOOR {
            continue;
        }
        pk += pj
            * (1.0 - opct).powi(j as i32)
            * opct.powi((k - j) as i32)
            * binom((k - 1) as u64, (j - 1) as u64);
    }
    pk
}

/// Charge spectrum of a silicon photomultiplier with optical crosstalk
/// modelled as a branching process (Gentile et al., arXiv:1006.3263).
///
/// Parameters: `[eped, eped_sigma, pe, pe_sigma, opct, lambda]`, with `opct`
/// the crosstalk probability. `pe` is the spacing of peaks after crosstalk.
pub fn sipm_gentile(
    x: &[f64],
    params: &[f64],
    mode: PedestalMode,
    out: &mut [f64],
) -> Result<()> {
    let &[eped, eped_sigma, pe, pe_sigma, opct, lambda] = params else {
        return Err(arity_error("sipm_gentile", 6, params.len()));
    };
    prepare_output("sipm_gentile", x, out)?;

    let primary: Vec<f64> =
        (0..MAX_PHOTOELECTRONS).map(|j| poisson::pmf(j as f64, lambda)).collect();

    let ladder = PeakLadder { eped, eped_sigma, pe, pe_sigma };
    ladder.add_peak(x, 0, mode.pedestal_weight(lambda), out);
    ladder.sum_peaks(x, 1, |k| gentile_probability(k, &primary, opct), out);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::trapz;
    use approx::assert_relative_eq;

    fn grid() -> Vec<f64> {
        (0..4000).map(|i| -1.0 + 21.0 * i as f64 / 3999.0).collect()
    }

    #[test]
    fn test_integrates_to_one() {
        let x = grid();
        let mut y = vec![0.0; x.len()];
        sipm_gentile(&x, &[0.0, 0.2, 1.0, 0.1, 0.2, 1.0], PedestalMode::Included, &mut y).unwrap();
        assert_relative_eq!(trapz(&y, &x), 1.0, max_relative = 1e-3);
    }

    #[test]
    fn test_disabled_pedestal() {
        let x = grid();
        let mut y = vec![0.0; x.len()];
        let lambda: f64 = 1.0;
        sipm_gentile(&x, &[0.0, 0.2, 1.0, 0.1, 0.2, lambda], PedestalMode::Disabled, &mut y)
            .unwrap();
        assert_relative_eq!(trapz(&y, &x), 1.0 - (-lambda).exp(), max_relative = 1e-3);
    }

    #[test]
    fn test_no_crosstalk_reduces_to_poisson() {
        let lambda = 1.3;
        let primary: Vec<f64> = (0..20).map(|j| poisson::pmf(j as f64, lambda)).collect();
        for k in 1..6 {
            let pk = gentile_probability(k, &primary, 0.0);
            assert_relative_eq!(pk, primary[k], max_relative = 1e-12);
        }
    }

    #[test]
    fn test_single_primary_geometric_tail() {
        // One primary (j = 1) contributes (1-opct) * opct^(k-1) to every k.
        let primary = [0.0, 1.0, 0.0, 0.0, 0.0];
        let opct: f64 = 0.3;
        for k in 1..5 {
            let expected = (1.0 - opct) * opct.powi(k as i32 - 1);
            let pk = gentile_probability(k, &primary, opct);
            assert_relative_eq!(pk, expected, max_relative = 1e-12);
        }
    }
}
