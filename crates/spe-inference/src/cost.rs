//! Cost functions over one or more illuminations.
//!
//! Every cost owns its density wrapper and one [`ChargeContainer`] per
//! illumination, and is evaluated with the flat parameter vector of the
//! density (fixed parameters included). The per-bin kernels are plain
//! functions so they can be checked in isolation.

use crate::optimizer::ObjectiveFunction;
use serde::{Deserialize, Serialize};
use spe_core::{Error, GoodnessOfFit, Model, Result};
use spe_model::{ChargeContainer, SpectrumPdf};
use spe_prob::xlog;
use statrs::distribution::{ChiSquared, ContinuousCDF};
use std::fmt;
use std::str::FromStr;

/// Bins must hold more than this many counts to enter the least-squares sum.
pub const LEAST_SQUARES_MIN_COUNT: f64 = 5.0;

/// `Σ ln(x)`.
#[inline]
pub fn sum_ln(x: &[f64]) -> f64 {
    x.iter().map(|v| v.ln()).sum()
}

/// Poisson likelihood-ratio term of one bin with expectation `expected` and
/// `observed` counts. Twice the sum over bins is chi-square distributed.
#[inline]
pub fn bin_nll(expected: f64, observed: f64) -> f64 {
    if observed == 0.0 {
        expected
    } else {
        expected - observed - xlog(observed, expected / observed)
    }
}

/// `scale` such that `Σ scale * expected == Σ observed`.
#[inline]
fn normalization(expected: &[f64], observed: &[f64]) -> f64 {
    observed.iter().sum::<f64>() / expected.iter().sum::<f64>()
}

/// Binned likelihood ratio after normalizing `expected` to the observed total.
pub fn total_binned_nll(expected: &[f64], observed: &[f64]) -> f64 {
    let scale = normalization(expected, observed);
    expected.iter().zip(observed).map(|(&f, &d)| bin_nll(f * scale, d)).sum()
}

/// Pearson chi-square after normalizing `expected` to the observed total,
/// over bins with more than [`LEAST_SQUARES_MIN_COUNT`] counts.
pub fn least_squares(expected: &[f64], observed: &[f64]) -> f64 {
    let scale = normalization(expected, observed);
    expected
        .iter()
        .zip(observed)
        .filter(|&(_, &d)| d > LEAST_SQUARES_MIN_COUNT)
        .map(|(&f, &d)| {
            let r = d - f * scale;
            r * r / d
        })
        .sum()
}

/// The registered cost variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum CostKind {
    /// [`UnbinnedNll`]
    UnbinnedNll,
    /// [`BinnedNll`]
    #[default]
    BinnedNll,
    /// [`LeastSquares`]
    LeastSquares,
}

impl CostKind {
    /// Every variant, in registry order.
    pub const ALL: [CostKind; 3] = [CostKind::UnbinnedNll, CostKind::BinnedNll, CostKind::LeastSquares];

    /// Registry name.
    pub fn name(self) -> &'static str {
        match self {
            CostKind::UnbinnedNll => "UnbinnedNLL",
            CostKind::BinnedNll => "BinnedNLL",
            CostKind::LeastSquares => "LeastSquares",
        }
    }

    /// Look up a variant by its registry name.
    pub fn from_name(name: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|k| k.name() == name)
            .ok_or_else(|| Error::UnknownVariant { kind: "Cost", name: name.to_string() })
    }

    /// Objective increase corresponding to one standard deviation.
    pub fn errordef(self) -> f64 {
        match self {
            CostKind::UnbinnedNll | CostKind::BinnedNll => 0.5,
            CostKind::LeastSquares => 1.0,
        }
    }

    /// Construct the cost over `charges` (one container per illumination).
    pub fn build(self, pdf: SpectrumPdf, charges: Vec<ChargeContainer>) -> Result<Box<dyn Cost>> {
        Ok(match self {
            CostKind::UnbinnedNll => Box::new(UnbinnedNll::new(pdf, charges)?),
            CostKind::BinnedNll => Box::new(BinnedNll::new(pdf, charges)?),
            CostKind::LeastSquares => Box::new(LeastSquares::new(pdf, charges)?),
        })
    }
}

impl fmt::Display for CostKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CostKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_name(s)
    }
}

/// Construct a cost by registry name.
pub fn cost_from_name(
    name: &str,
    pdf: SpectrumPdf,
    charges: Vec<ChargeContainer>,
) -> Result<Box<dyn Cost>> {
    CostKind::from_name(name)?.build(pdf, charges)
}

/// Scalar objective over a density and its data, with goodness-of-fit.
///
/// The [`Model`] view is the density's expanded parameter list.
pub trait Cost: ObjectiveFunction + Model {
    /// Registered variant
    fn kind(&self) -> CostKind;

    /// Density wrapper being fitted
    fn pdf(&self) -> &SpectrumPdf;

    /// Data, one container per illumination
    fn charges(&self) -> &[ChargeContainer];

    /// Objective increase corresponding to one standard deviation
    fn errordef(&self) -> f64 {
        self.kind().errordef()
    }

    /// Number of observations minus the number of free parameters.
    fn dof(&self) -> i64;

    /// Chi-square statistic at `params`.
    fn chi2(&self, params: &[f64]) -> Result<f64>;

    /// `chi2 / dof`
    fn reduced_chi2(&self, params: &[f64]) -> Result<f64> {
        Ok(self.chi2(params)? / self.dof() as f64)
    }

    /// Survival function of the chi-square distribution with `dof` degrees of
    /// freedom at `chi2`.
    fn p_value(&self, params: &[f64]) -> Result<f64> {
        let chi2 = self.chi2(params)?;
        chi2_sf(chi2, self.dof())
    }

    /// `chi2`, `reduced_chi2` and `p_value` together.
    fn scores(&self, params: &[f64]) -> Result<GoodnessOfFit> {
        let chi2 = self.chi2(params)?;
        let dof = self.dof();
        Ok(GoodnessOfFit { chi2, reduced_chi2: chi2 / dof as f64, p_value: chi2_sf(chi2, dof)?, dof })
    }
}

fn chi2_sf(chi2: f64, dof: i64) -> Result<f64> {
    if dof <= 0 {
        return Err(Error::InvalidOperation(format!(
            "p-value requires positive degrees of freedom, got {dof}"
        )));
    }
    let dist = ChiSquared::new(dof as f64)
        .map_err(|e| Error::Computation(format!("chi-square distribution: {e}")))?;
    Ok(dist.sf(chi2))
}

fn check_illuminations(name: &str, pdf: &SpectrumPdf, charges: &[ChargeContainer]) -> Result<()> {
    if charges.len() != pdf.n_illuminations() {
        return Err(Error::Validation(format!(
            "{name}: charges must hold one container per illumination (expected {}, got {})",
            pdf.n_illuminations(),
            charges.len()
        )));
    }
    Ok(())
}

macro_rules! delegate_model {
    ($ty:ty) => {
        impl Model for $ty {
            fn parameter_names(&self) -> Vec<String> {
                self.pdf.parameter_names()
            }

            fn parameter_init(&self) -> Vec<f64> {
                self.pdf.parameter_init()
            }

            fn parameter_bounds(&self) -> Vec<(f64, f64)> {
                self.pdf.parameter_bounds()
            }

            fn parameter_fixed(&self) -> Vec<bool> {
                self.pdf.parameter_fixed()
            }

            fn n_free_parameters(&self) -> usize {
                self.pdf.parameters().n_free_parameters()
            }
        }
    };
}

/// Unbinned negative log-likelihood: `-Σ_i Σ_events ln f_i(q)`.
///
/// No binning loss, but slower than [`BinnedNll`], and there is no valid
/// chi-square for it (Heinrich, PHYSTAT2003, arXiv:physics/0310167).
#[derive(Debug, Clone)]
pub struct UnbinnedNll {
    pdf: SpectrumPdf,
    charges: Vec<ChargeContainer>,
}

impl UnbinnedNll {
    /// Requires containers built from samples.
    pub fn new(pdf: SpectrumPdf, charges: Vec<ChargeContainer>) -> Result<Self> {
        check_illuminations("UnbinnedNLL", &pdf, &charges)?;
        if charges.iter().any(|c| c.values().is_none()) {
            return Err(Error::Validation(
                "UnbinnedNLL requires sample values; prebinned containers have none".into(),
            ));
        }
        Ok(Self { pdf, charges })
    }
}

impl ObjectiveFunction for UnbinnedNll {
    fn eval(&self, params: &[f64]) -> Result<f64> {
        let mut nll = 0.0;
        let mut f = Vec::new();
        for (i, c) in self.charges.iter().enumerate() {
            let values = c.values().unwrap_or_default();
            f.resize(values.len(), 0.0);
            self.pdf.evaluate_into(values, params, i, &mut f)?;
            nll -= sum_ln(&f);
        }
        Ok(nll)
    }
}

delegate_model!(UnbinnedNll);

impl Cost for UnbinnedNll {
    fn kind(&self) -> CostKind {
        CostKind::UnbinnedNll
    }

    fn pdf(&self) -> &SpectrumPdf {
        &self.pdf
    }

    fn charges(&self) -> &[ChargeContainer] {
        &self.charges
    }

    fn dof(&self) -> i64 {
        let n: usize = self.charges.iter().map(|c| c.values().map_or(0, <[f64]>::len)).sum();
        n as i64 - self.n_free_parameters() as i64
    }

    fn chi2(&self, _params: &[f64]) -> Result<f64> {
        Err(Error::InvalidOperation("chi2 is not defined for UnbinnedNLL".into()))
    }
}

/// Binned negative log-likelihood in likelihood-ratio form. `chi2 = 2 * NLL`.
#[derive(Debug, Clone)]
pub struct BinnedNll {
    pdf: SpectrumPdf,
    charges: Vec<ChargeContainer>,
}

impl BinnedNll {
    /// One container per illumination.
    pub fn new(pdf: SpectrumPdf, charges: Vec<ChargeContainer>) -> Result<Self> {
        check_illuminations("BinnedNLL", &pdf, &charges)?;
        Ok(Self { pdf, charges })
    }
}

impl ObjectiveFunction for BinnedNll {
    fn eval(&self, params: &[f64]) -> Result<f64> {
        let mut nll = 0.0;
        let mut f_y = Vec::new();
        for (i, c) in self.charges.iter().enumerate() {
            f_y.resize(c.n_bins(), 0.0);
            self.pdf.evaluate_into(c.centers(), params, i, &mut f_y)?;
            nll += total_binned_nll(&f_y, c.hist());
        }
        Ok(nll)
    }
}

delegate_model!(BinnedNll);

impl Cost for BinnedNll {
    fn kind(&self) -> CostKind {
        CostKind::BinnedNll
    }

    fn pdf(&self) -> &SpectrumPdf {
        &self.pdf
    }

    fn charges(&self) -> &[ChargeContainer] {
        &self.charges
    }

    fn dof(&self) -> i64 {
        let n: usize = self.charges.iter().map(ChargeContainer::n_bins).sum();
        n as i64 - self.n_free_parameters() as i64
    }

    fn chi2(&self, params: &[f64]) -> Result<f64> {
        Ok(2.0 * self.eval(params)?)
    }
}

/// Pearson chi-square over bins above [`LEAST_SQUARES_MIN_COUNT`].
#[derive(Debug, Clone)]
pub struct LeastSquares {
    pdf: SpectrumPdf,
    charges: Vec<ChargeContainer>,
}

impl LeastSquares {
    /// One container per illumination.
    pub fn new(pdf: SpectrumPdf, charges: Vec<ChargeContainer>) -> Result<Self> {
        check_illuminations("LeastSquares", &pdf, &charges)?;
        Ok(Self { pdf, charges })
    }
}

impl ObjectiveFunction for LeastSquares {
    fn eval(&self, params: &[f64]) -> Result<f64> {
        let mut chi2 = 0.0;
        let mut f_y = Vec::new();
        for (i, c) in self.charges.iter().enumerate() {
            f_y.resize(c.n_bins(), 0.0);
            self.pdf.evaluate_into(c.centers(), params, i, &mut f_y)?;
            chi2 += least_squares(&f_y, c.hist());
        }
        Ok(chi2)
    }
}

delegate_model!(LeastSquares);

impl Cost for LeastSquares {
    fn kind(&self) -> CostKind {
        CostKind::LeastSquares
    }

    fn pdf(&self) -> &SpectrumPdf {
        &self.pdf
    }

    fn charges(&self) -> &[ChargeContainer] {
        &self.charges
    }

    fn dof(&self) -> i64 {
        let n: usize = self
            .charges
            .iter()
            .map(|c| c.hist().iter().filter(|&&d| d > LEAST_SQUARES_MIN_COUNT).count())
            .sum();
        n as i64 - self.n_free_parameters() as i64
    }

    fn chi2(&self, params: &[f64]) -> Result<f64> {
        self.eval(params)
    }
}
