//! Density wrapper binding a mixture density to its parameter model.

use crate::parameter::{ParameterDecl, ParameterModel};
use crate::pdf::{
    DensityFn, PedestalMode, pmt_single_gaussian, sipm_generalized_poisson, sipm_gentile,
    sipm_modified_poisson,
};
use serde::{Deserialize, Serialize};
use spe_core::{Error, Model, Result};
use std::fmt;
use std::str::FromStr;

/// Kernel arguments up to this count are gathered on the stack.
const INLINE_ARGS: usize = 16;

/// The closed family of spectrum densities, addressable by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SpectrumKind {
    /// Photomultiplier tube, one Gaussian per photoelectron.
    PmtSingleGaussian,
    /// SiPM with branching-process optical crosstalk.
    SipmGentile,
    /// SiPM with generalized Poisson crosstalk, pedestal outside the sum.
    SipmModifiedPoisson,
    /// SiPM with generalized Poisson crosstalk, pedestal inside the sum.
    SipmGeneralizedPoisson,
}

impl SpectrumKind {
    /// Every variant, in registry order.
    pub const ALL: [SpectrumKind; 4] = [
        SpectrumKind::PmtSingleGaussian,
        SpectrumKind::SipmGentile,
        SpectrumKind::SipmModifiedPoisson,
        SpectrumKind::SipmGeneralizedPoisson,
    ];

    /// Registry name.
    pub fn name(self) -> &'static str {
        match self {
            SpectrumKind::PmtSingleGaussian => "PMTSingleGaussian",
            SpectrumKind::SipmGentile => "SiPMGentile",
            SpectrumKind::SipmModifiedPoisson => "SiPMModifiedPoisson",
            SpectrumKind::SipmGeneralizedPoisson => "SiPMGeneralizedPoisson",
        }
    }

    /// Look up a variant by its registry name.
    pub fn from_name(name: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|k| k.name() == name)
            .ok_or_else(|| Error::UnknownVariant { kind: "PDF", name: name.to_string() })
    }

    /// Density kernel.
    pub fn function(self) -> DensityFn {
        match self {
            SpectrumKind::PmtSingleGaussian => pmt_single_gaussian,
            SpectrumKind::SipmGentile => sipm_gentile,
            SpectrumKind::SipmModifiedPoisson => sipm_modified_poisson,
            SpectrumKind::SipmGeneralizedPoisson => sipm_generalized_poisson,
        }
    }

    /// Default declarations, ordered as the kernel's positional parameters.
    pub fn declarations(self) -> Vec<(String, ParameterDecl)> {
        let lambda = ParameterDecl::new(0.7, (0.0, 5.0)).multi();
        let opct = ParameterDecl::new(0.2, (0.0, 1.0));
        let decls = match self {
            SpectrumKind::PmtSingleGaussian => vec![
                ("eped", ParameterDecl::new(0.0, (-2.0, 2.0))),
                ("eped_sigma", ParameterDecl::new(0.1, (0.0, 2.0))),
                ("pe", ParameterDecl::new(1.0, (-2.0, 3.0))),
                ("pe_sigma", ParameterDecl::new(0.1, (0.0, 2.0))),
                ("lambda", lambda),
            ],
            SpectrumKind::SipmGentile => vec![
                ("eped", ParameterDecl::new(0.0, (-2.0, 2.0))),
                ("eped_sigma", ParameterDecl::new(0.1, (0.0, 2.0))),
                ("pe", ParameterDecl::new(1.0, (-2.0, 3.0))),
                ("pe_sigma", ParameterDecl::new(0.1, (0.0, 2.0))),
                ("opct", opct),
                ("lambda", lambda),
            ],
            SpectrumKind::SipmModifiedPoisson => vec![
                ("eped", ParameterDecl::new(0.0, (-2.0, 2.0))),
                ("eped_sigma", ParameterDecl::new(0.1, (0.0, 2.0))),
                ("pe", ParameterDecl::new(1.0, (0.0, 3.0))),
                ("pe_sigma", ParameterDecl::new(0.1, (0.0, 2.0))),
                ("opct", opct),
                ("lambda", lambda),
            ],
            SpectrumKind::SipmGeneralizedPoisson => vec![
                ("pe0", ParameterDecl::new(0.0, (-2.0, 2.0))),
                ("pe0_sigma", ParameterDecl::new(0.1, (0.0, 2.0))),
                ("pe", ParameterDecl::new(1.0, (-2.0, 3.0))),
                ("pe_sigma", ParameterDecl::new(0.1, (0.0, 2.0))),
                ("opct", opct),
                ("lambda", lambda),
            ],
        };
        decls.into_iter().map(|(n, d)| (n.to_string(), d)).collect()
    }
}

impl fmt::Display for SpectrumKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SpectrumKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_name(s)
    }
}

/// A density kernel bound to an expanded parameter model.
///
/// Evaluated with the flat parameter vector of all illuminations (ordered as
/// [`ParameterModel::names`]) and an illumination index.
#[derive(Debug, Clone)]
pub struct SpectrumPdf {
    function: DensityFn,
    mode: PedestalMode,
    parameters: ParameterModel,
}

/// Builder for [`SpectrumPdf`] with a caller-supplied kernel.
#[derive(Debug, Clone, Default)]
pub struct SpectrumPdfBuilder {
    n_illuminations: usize,
    function: Option<DensityFn>,
    declarations: Option<Vec<(String, ParameterDecl)>>,
    mode: PedestalMode,
}

impl SpectrumPdfBuilder {
    /// Density kernel
    pub fn function(mut self, function: DensityFn) -> Self {
        self.function = Some(function);
        self
    }

    /// Declarations, ordered as the kernel's positional parameters
    pub fn parameters(mut self, declarations: Vec<(String, ParameterDecl)>) -> Self {
        self.declarations = Some(declarations);
        self
    }

    /// Pedestal mode passed to every kernel call
    pub fn pedestal(mut self, mode: PedestalMode) -> Self {
        self.mode = mode;
        self
    }

    /// Expand the declarations and bind the kernel.
    pub fn build(self) -> Result<SpectrumPdf> {
        let (Some(function), Some(declarations)) = (self.function, self.declarations) else {
            return Err(Error::Validation(
                "SpectrumPdf must define the function and parameters".into(),
            ));
        };
        let parameters = ParameterModel::new(declarations, self.n_illuminations)?;
        Ok(SpectrumPdf { function, mode: self.mode, parameters })
    }
}

impl SpectrumPdf {
    /// Start building a density for `n_illuminations`.
    pub fn builder(n_illuminations: usize) -> SpectrumPdfBuilder {
        SpectrumPdfBuilder { n_illuminations, ..Default::default() }
    }

    /// Registered density with its default declarations and the pedestal included.
    pub fn from_kind(kind: SpectrumKind, n_illuminations: usize) -> Result<Self> {
        Self::builder(n_illuminations)
            .function(kind.function())
            .parameters(kind.declarations())
            .build()
    }

    /// Registered density by registry name.
    pub fn from_name(name: &str, n_illuminations: usize) -> Result<Self> {
        Self::from_kind(SpectrumKind::from_name(name)?, n_illuminations)
    }

    /// Same density with a different pedestal mode.
    pub fn with_pedestal(mut self, mode: PedestalMode) -> Self {
        self.mode = mode;
        self
    }

    /// Bound kernel
    pub fn function(&self) -> DensityFn {
        self.function
    }

    /// Pedestal mode
    pub fn pedestal(&self) -> PedestalMode {
        self.mode
    }

    /// Expanded parameters
    pub fn parameters(&self) -> &ParameterModel {
        &self.parameters
    }

    /// Mutable access to the expanded parameters
    pub fn parameters_mut(&mut self) -> &mut ParameterModel {
        &mut self.parameters
    }

    /// Number of illuminations fitted simultaneously
    pub fn n_illuminations(&self) -> usize {
        self.parameters.n_illuminations()
    }

    /// See [`ParameterModel::update_initial`].
    pub fn update_initial<'a>(
        &mut self,
        updates: impl IntoIterator<Item = (&'a str, f64)>,
    ) -> Result<()> {
        self.parameters.update_initial(updates)
    }

    /// See [`ParameterModel::update_limits`].
    pub fn update_limits<'a>(
        &mut self,
        updates: impl IntoIterator<Item = (&'a str, (f64, f64))>,
    ) -> Result<()> {
        self.parameters.update_limits(updates)
    }

    /// See [`ParameterModel::update_fixed`].
    pub fn update_fixed<'a>(
        &mut self,
        updates: impl IntoIterator<Item = (&'a str, bool)>,
    ) -> Result<()> {
        self.parameters.update_fixed(updates)
    }

    /// Evaluate illumination `i_illumination` at `x` into `out`.
    pub fn evaluate_into(
        &self,
        x: &[f64],
        parameters: &[f64],
        i_illumination: usize,
        out: &mut [f64],
    ) -> Result<()> {
        let row = self.parameters.lookup_row(i_illumination)?;
        if row.len() > INLINE_ARGS {
            let mut args = Vec::with_capacity(row.len());
            self.parameters.lookup_parameters_into(parameters, i_illumination, &mut args)?;
            return (self.function)(x, &args, self.mode, out);
        }
        let mut args = [0.0; INLINE_ARGS];
        for (slot, &offset) in args.iter_mut().zip(row) {
            *slot = *parameters.get(offset).ok_or(Error::IndexOutOfRange {
                what: "parameter",
                index: offset,
                len: parameters.len(),
            })?;
        }
        (self.function)(x, &args[..row.len()], self.mode, out)
    }

    /// Evaluate illumination `i_illumination` at `x`.
    pub fn evaluate(&self, x: &[f64], parameters: &[f64], i_illumination: usize) -> Result<Vec<f64>> {
        let mut out = vec![0.0; x.len()];
        self.evaluate_into(x, parameters, i_illumination, &mut out)?;
        Ok(out)
    }
}

impl Model for SpectrumPdf {
    fn n_parameters(&self) -> usize {
        self.parameters.n_parameters()
    }

    fn parameter_names(&self) -> Vec<String> {
        self.parameters.parameter_names()
    }

    fn parameter_init(&self) -> Vec<f64> {
        self.parameters.parameter_init()
    }

    fn parameter_bounds(&self) -> Vec<(f64, f64)> {
        self.parameters.parameter_bounds()
    }

    fn parameter_fixed(&self) -> Vec<bool> {
        self.parameters.parameter_fixed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use spe_prob::normal;

    fn normal_kernel(x: &[f64], params: &[f64], _mode: PedestalMode, out: &mut [f64]) -> Result<()> {
        let &[mean, sigma] = params else {
            return Err(Error::Validation("normal expects 2 params".into()));
        };
        normal::pdf_batch(x, mean, sigma, out);
        Ok(())
    }

    fn normal_decls() -> Vec<(String, ParameterDecl)> {
        vec![
            ("mean".to_string(), ParameterDecl::new(0.0, (-2.0, 2.0))),
            ("sigma".to_string(), ParameterDecl::new(0.1, (0.0, 2.0)).multi()),
        ]
    }

    fn sum_kernel(x: &[f64], params: &[f64], _mode: PedestalMode, out: &mut [f64]) -> Result<()> {
        let total: f64 = params.iter().sum();
        for (o, _) in out.iter_mut().zip(x) {
            *o = total;
        }
        Ok(())
    }

    fn sum_pdf(n_args: usize) -> SpectrumPdf {
        let decls = (0..n_args)
            .map(|i| (format!("p{i}_"), ParameterDecl::new(i as f64, (-100.0, 100.0))))
            .collect();
        SpectrumPdf::builder(1).function(sum_kernel).parameters(decls).build().unwrap()
    }

    #[test]
    fn test_evaluate_gathers_any_argument_count() {
        for n_args in [1, INLINE_ARGS, INLINE_ARGS + 5] {
            let pdf = sum_pdf(n_args);
            let params = pdf.parameter_init();
            let y = pdf.evaluate(&[0.0, 1.0], &params, 0).unwrap();
            let expected = (n_args * (n_args - 1) / 2) as f64;
            assert_eq!(y, [expected, expected]);
        }
    }

    #[test]
    fn test_evaluate_rejects_short_parameter_vector() {
        for n_args in [3, INLINE_ARGS + 1] {
            let pdf = sum_pdf(n_args);
            let err = pdf.evaluate(&[0.0], &[1.0, 2.0], 0).unwrap_err();
            assert!(matches!(err, Error::IndexOutOfRange { what: "parameter", index: 2, len: 2 }));
        }
    }

    #[test]
    fn test_builder_requires_function_and_parameters() {
        assert!(SpectrumPdf::builder(1).parameters(normal_decls()).build().is_err());
        assert!(SpectrumPdf::builder(1).function(normal_kernel).build().is_err());
        assert!(SpectrumPdf::builder(1).build().is_err());
        assert!(
            SpectrumPdf::builder(1).function(normal_kernel).parameters(normal_decls()).build().is_ok()
        );
    }

    #[test]
    fn test_evaluate_selects_illumination_values() {
        let pdf = SpectrumPdf::builder(2)
            .function(normal_kernel)
            .parameters(normal_decls())
            .build()
            .unwrap();
        assert_eq!(pdf.parameters().names(), ["mean", "sigma0", "sigma1"]);

        let x = [-0.5, 0.0, 0.3];
        let params = [0.1, 0.2, 0.4];
        let y0 = pdf.evaluate(&x, &params, 0).unwrap();
        let y1 = pdf.evaluate(&x, &params, 1).unwrap();
        for (i, &xi) in x.iter().enumerate() {
            assert_relative_eq!(y0[i], normal::pdf(xi, 0.1, 0.2), max_relative = 1e-12);
            assert_relative_eq!(y1[i], normal::pdf(xi, 0.1, 0.4), max_relative = 1e-12);
        }
    }

    #[test]
    fn test_evaluate_index_errors() {
        let pdf = SpectrumPdf::builder(2)
            .function(normal_kernel)
            .parameters(normal_decls())
            .build()
            .unwrap();
        let x = [0.0];
        assert!(matches!(
            pdf.evaluate(&x, &[0.0, 0.1, 0.1], 2),
            Err(Error::IndexOutOfRange { .. })
        ));
        assert!(matches!(pdf.evaluate(&x, &[0.0, 0.1], 1), Err(Error::IndexOutOfRange { .. })));
    }

    #[test]
    fn test_registry_names() {
        for kind in SpectrumKind::ALL {
            assert_eq!(SpectrumKind::from_name(kind.name()).unwrap(), kind);
            assert_eq!(kind.to_string().parse::<SpectrumKind>().unwrap(), kind);
        }
        let err = SpectrumPdf::from_name("NULL", 1).unwrap_err();
        assert_eq!(err, Error::UnknownVariant { kind: "PDF", name: "NULL".into() });
        assert_eq!(err.to_string(), "No PDF with the name: NULL");
    }

    #[test]
    fn test_registered_parameter_layout() {
        let pdf = SpectrumPdf::from_kind(SpectrumKind::PmtSingleGaussian, 2).unwrap();
        assert_eq!(
            pdf.parameter_names(),
            ["eped", "eped_sigma", "pe", "pe_sigma", "lambda0", "lambda1"]
        );
        assert_eq!(pdf.parameters().lookup(), [vec![0, 1, 2, 3, 4], vec![0, 1, 2, 3, 5]]);

        let pdf = SpectrumPdf::from_kind(SpectrumKind::SipmGeneralizedPoisson, 1).unwrap();
        assert_eq!(
            pdf.parameter_names(),
            ["pe0", "pe0_sigma", "pe", "pe_sigma", "opct", "lambda0"]
        );

        let pdf = SpectrumPdf::from_kind(SpectrumKind::SipmModifiedPoisson, 1).unwrap();
        assert_eq!(pdf.parameters().get("pe").unwrap().limits(), (0.0, 3.0));
    }

    #[test]
    fn test_update_through_wrapper() {
        let mut pdf = SpectrumPdf::from_kind(SpectrumKind::SipmGentile, 2).unwrap();
        pdf.update_initial([("lambda", 1.5), ("opct", 0.4)]).unwrap();
        pdf.update_fixed([("eped", true)]).unwrap();
        assert_eq!(pdf.parameters().get("lambda0").unwrap().initial(), 1.5);
        assert_eq!(pdf.parameters().get("lambda1").unwrap().initial(), 1.5);
        assert_eq!(pdf.parameters().get("opct").unwrap().initial(), 0.4);
        assert_eq!(pdf.n_free_parameters(), 6);
        assert!(pdf.update_limits([("lambda2", (0.0, 1.0))]).is_err());
    }

    #[test]
    fn test_pedestal_mode_is_threaded_through() {
        let pdf = SpectrumPdf::from_kind(SpectrumKind::PmtSingleGaussian, 1).unwrap();
        let disabled = pdf.clone().with_pedestal(PedestalMode::Disabled);
        assert_eq!(disabled.pedestal(), PedestalMode::Disabled);

        let params = pdf.parameter_init();
        let x = [0.0];
        let with = pdf.evaluate(&x, &params, 0).unwrap();
        let without = disabled.evaluate(&x, &params, 0).unwrap();
        let pedestal = (-0.7f64).exp() * normal::pdf(0.0, 0.0, 0.1);
        assert_relative_eq!(with[0] - without[0], pedestal, max_relative = 1e-9);
    }
}
