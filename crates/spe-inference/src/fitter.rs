//! Fitting the charge spectra of every channel of a camera.
//!
//! Each channel is an independent job: it histograms its own charges, works
//! on its own copy of the density, and returns an immutable [`ChannelFit`].
//! The records are collected into one [`CameraFit`] table afterwards.

use crate::cost::CostKind;
use crate::minimize::Minimizer;
use crate::optimizer::MinimizerConfig;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use spe_core::{Error, FitResult, GoodnessOfFit, Model, Result};
use spe_model::{ChargeContainer, SpectrumPdf};

/// Number of fit-curve points per histogram bin.
const CURVE_OVERSAMPLING: usize = 10;

/// Per-camera fit configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitterConfig {
    /// Histogram bins (binned costs and curves)
    pub n_bins: usize,
    /// Charges outside `[range.0, range.1]` are ignored
    pub range: (f64, f64),
    /// Cost variant
    pub cost: CostKind,
    /// Minimizer settings
    pub minimizer: MinimizerConfig,
}

impl FitterConfig {
    /// Binned likelihood fit over `n_bins` in `range`.
    pub fn new(n_bins: usize, range: (f64, f64)) -> Self {
        Self { n_bins, range, cost: CostKind::default(), minimizer: MinimizerConfig::default() }
    }

    /// Same configuration with a different cost variant.
    pub fn with_cost(mut self, cost: CostKind) -> Self {
        self.cost = cost;
        self
    }
}

/// Histogram and fitted curve of one illumination of one channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitCurves {
    /// Bin centers
    pub hist_x: Vec<f64>,
    /// Counts
    pub hist_y: Vec<f64>,
    /// Bin edges
    pub hist_edges: Vec<f64>,
    /// Fine grid over the fit range
    pub fit_x: Vec<f64>,
    /// Fitted density on `fit_x`
    pub fit_y: Vec<f64>,
}

/// Fit of one channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelFit {
    /// Channel index
    pub channel: usize,
    /// Best-fit values and uncertainties
    pub fit: FitResult,
    /// Goodness of fit; NaN for the unbinned likelihood
    pub scores: GoodnessOfFit,
    /// One entry per illumination
    pub curves: Vec<FitCurves>,
    /// Why the channel could not be fitted
    pub error: Option<String>,
}

impl ChannelFit {
    /// Placeholder for a channel whose fit failed: NaN values and
    /// uncertainties, unavailable scores, no curves.
    pub fn failed(channel: usize, names: Vec<String>, error: &Error) -> Self {
        let n = names.len();
        let fit = FitResult::new(names, vec![f64::NAN; n], vec![f64::NAN; n], f64::NAN, false, 0);
        Self {
            channel,
            fit,
            scores: GoodnessOfFit::unavailable(0),
            curves: Vec::new(),
            error: Some(error.to_string()),
        }
    }

    /// Whether the fit ran to completion
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Fits of all channels, ordered by channel.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CameraFit {
    channels: Vec<ChannelFit>,
}

impl CameraFit {
    /// Aggregate per-channel records.
    pub fn from_channels(mut channels: Vec<ChannelFit>) -> Self {
        channels.sort_by_key(|c| c.channel);
        Self { channels }
    }

    /// Number of fitted channels
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    /// Whether no channel was fitted
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Records, ordered by channel
    pub fn channels(&self) -> &[ChannelFit] {
        &self.channels
    }

    /// Record of one channel
    pub fn get(&self, channel: usize) -> Option<&ChannelFit> {
        self.channels
            .binary_search_by_key(&channel, |c| c.channel)
            .ok()
            .map(|i| &self.channels[i])
    }

    /// Best-fit value of `name` for every channel (NaN where unknown).
    pub fn values(&self, name: &str) -> Vec<f64> {
        self.channels.iter().map(|c| c.fit.value(name).unwrap_or(f64::NAN)).collect()
    }

    /// Uncertainty of `name` for every channel (NaN where unknown).
    pub fn uncertainties(&self, name: &str) -> Vec<f64> {
        self.channels.iter().map(|c| c.fit.uncertainty(name).unwrap_or(f64::NAN)).collect()
    }

    /// Goodness-of-fit of every channel
    pub fn scores(&self) -> Vec<GoodnessOfFit> {
        self.channels.iter().map(|c| c.scores).collect()
    }

    /// Channels whose fit failed
    pub fn failures(&self) -> impl Iterator<Item = &ChannelFit> {
        self.channels.iter().filter(|c| !c.is_ok())
    }
}

/// Sets starting values for one channel from its histograms.
pub type Seeder = dyn Fn(&mut SpectrumPdf, &[ChargeContainer]) -> Result<()> + Send + Sync;

/// Fits the same density to every channel of a camera.
pub struct CameraFitter {
    pdf: SpectrumPdf,
    config: FitterConfig,
    seeder: Option<Box<Seeder>>,
}

impl CameraFitter {
    /// Fitter for `pdf` (its declarations give the starting values).
    pub fn new(pdf: SpectrumPdf, config: FitterConfig) -> Result<Self> {
        let (lo, hi) = config.range;
        if config.n_bins == 0 {
            return Err(Error::Validation("n_bins must be at least 1".into()));
        }
        if !(lo.is_finite() && hi.is_finite() && lo < hi) {
            return Err(Error::Validation(format!("invalid fit range ({lo}, {hi})")));
        }
        Ok(Self { pdf, config, seeder: None })
    }

    /// Run `seeder` on each channel's copy of the density before minimizing.
    pub fn with_seeder(
        mut self,
        seeder: impl Fn(&mut SpectrumPdf, &[ChargeContainer]) -> Result<()> + Send + Sync + 'static,
    ) -> Self {
        self.seeder = Some(Box::new(seeder));
        self
    }

    /// Number of illuminations fitted simultaneously
    pub fn n_illuminations(&self) -> usize {
        self.pdf.n_illuminations()
    }

    /// Configuration
    pub fn config(&self) -> &FitterConfig {
        &self.config
    }

    fn n_channels(&self, charges: &[Vec<Vec<f64>>]) -> Result<usize> {
        if charges.len() != self.n_illuminations() {
            return Err(Error::Validation(format!(
                "charges must hold one entry per illumination (expected {}, got {})",
                self.n_illuminations(),
                charges.len()
            )));
        }
        let n = charges.first().map_or(0, Vec::len);
        if charges.iter().any(|c| c.len() != n) {
            return Err(Error::Validation(
                "every illumination must hold the same number of channels".into(),
            ));
        }
        Ok(n)
    }

    /// Fit one channel. `charges[i]` holds the charges of illumination `i`.
    pub fn fit_channel(&self, channel: usize, charges: &[&[f64]]) -> Result<ChannelFit> {
        if charges.len() != self.n_illuminations() {
            return Err(Error::Validation(format!(
                "channel {channel}: expected {} illuminations, got {}",
                self.n_illuminations(),
                charges.len()
            )));
        }
        let containers = charges
            .iter()
            .map(|c| ChargeContainer::from_samples(c, self.config.n_bins, self.config.range))
            .collect::<Result<Vec<_>>>()?;
        if let Some(i) = containers.iter().position(|c| c.total() == 0.0) {
            return Err(Error::Validation(format!(
                "channel {channel}: illumination {i} has no charges inside the fit range"
            )));
        }

        let mut pdf = self.pdf.clone();
        if let Some(seeder) = &self.seeder {
            seeder(&mut pdf, &containers)?;
        }

        let cost = self.config.cost.build(pdf, containers)?;
        let fit = Minimizer::new(self.config.minimizer.clone()).minimize(cost.as_ref())?;

        let scores = match cost.scores(&fit.parameters) {
            Ok(s) => s,
            Err(Error::InvalidOperation(_)) => GoodnessOfFit::unavailable(cost.dof()),
            Err(e) => return Err(e),
        };

        let (lo, hi) = self.config.range;
        let n_fit = self.config.n_bins * CURVE_OVERSAMPLING;
        let fit_x: Vec<f64> = (0..n_fit)
            .map(|i| if n_fit > 1 { lo + (hi - lo) * i as f64 / (n_fit - 1) as f64 } else { lo })
            .collect();
        let curves = cost
            .charges()
            .iter()
            .enumerate()
            .map(|(i, c)| {
                Ok(FitCurves {
                    hist_x: c.centers().to_vec(),
                    hist_y: c.hist().to_vec(),
                    hist_edges: c.edges().to_vec(),
                    fit_y: cost.pdf().evaluate(&fit_x, &fit.parameters, i)?,
                    fit_x: fit_x.clone(),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        log::debug!("channel {channel}: fval={:.4} p={:.3}", fit.fval, scores.p_value);
        Ok(ChannelFit { channel, fit, scores, curves, error: None })
    }

    /// Fit one channel of the camera table; failures become a degraded record.
    fn job(&self, charges: &[Vec<Vec<f64>>], channel: usize) -> ChannelFit {
        let per_illumination: Vec<&[f64]> = charges.iter().map(|c| c[channel].as_slice()).collect();
        self.fit_channel(channel, &per_illumination).unwrap_or_else(|e| {
            log::warn!("channel {channel}: fit failed: {e}");
            ChannelFit::failed(channel, self.pdf.parameter_names(), &e)
        })
    }

    /// Fit every channel in order.
    ///
    /// `charges[i][channel]` holds the charges of `channel` under illumination `i`.
    /// Only a malformed table is an error; a channel that cannot be fitted is
    /// kept as a degraded record (see [`ChannelFit::failed`]).
    pub fn process(&self, charges: &[Vec<Vec<f64>>]) -> Result<CameraFit> {
        let n = self.n_channels(charges)?;
        log::info!("Fitting {n} channels ({})", self.config.cost);
        let fits: Vec<ChannelFit> = (0..n).map(|ch| self.job(charges, ch)).collect();
        Ok(Self::finish(fits))
    }

    fn finish(fits: Vec<ChannelFit>) -> CameraFit {
        let table = CameraFit::from_channels(fits);
        let n_failed = table.failures().count();
        log::info!("Fitted {} channels ({n_failed} failed)", table.len());
        table
    }

    /// Fit every channel on the rayon thread pool. Produces the same table
    /// as [`CameraFitter::process`].
    pub fn process_parallel(&self, charges: &[Vec<Vec<f64>>]) -> Result<CameraFit> {
        let n = self.n_channels(charges)?;
        log::info!(
            "Fitting {n} channels in parallel ({}, {} threads)",
            self.config.cost,
            rayon::current_num_threads()
        );
        let fits: Vec<ChannelFit> = (0..n).into_par_iter().map(|ch| self.job(charges, ch)).collect();
        Ok(Self::finish(fits))
    }
}
