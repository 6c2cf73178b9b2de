//! Per-illumination charge data: retained samples and their histogram.

use spe_core::{Error, Result};

/// Charge measurements of one illumination, ready for any cost variant.
///
/// Built either from raw samples (histogrammed on construction) or from an
/// already binned `(x, y)` pair. `hist`, `centers` have `n_bins` entries and
/// `edges` has `n_bins + 1`. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct ChargeContainer {
    values: Option<Vec<f64>>,
    hist: Vec<f64>,
    edges: Vec<f64>,
    centers: Vec<f64>,
}

fn check_bins(n_bins: usize) -> Result<()> {
    if n_bins == 0 {
        return Err(Error::Validation("ChargeContainer requires at least one bin".into()));
    }
    Ok(())
}

impl ChargeContainer {
    /// Keep the samples inside the closed `range` and histogram them into
    /// `n_bins` equal-width bins. The last bin is closed on the right.
    pub fn from_samples(values: &[f64], n_bins: usize, range: (f64, f64)) -> Result<Self> {
        check_bins(n_bins)?;
        let (lo, hi) = range;
        if !lo.is_finite() || !hi.is_finite() || lo >= hi {
            return Err(Error::Validation(format!(
                "invalid histogram range: expected finite low < high, got ({lo}, {hi})"
            )));
        }

        let width = (hi - lo) / n_bins as f64;
        let edges: Vec<f64> = (0..=n_bins).map(|i| lo + width * i as f64).collect();
        let centers: Vec<f64> = edges.windows(2).map(|e| 0.5 * (e[0] + e[1])).collect();

        let retained: Vec<f64> = values.iter().copied().filter(|&v| v >= lo && v <= hi).collect();
        let mut hist = vec![0.0f64; n_bins];
        let scale = n_bins as f64 / (hi - lo);
        for &v in &retained {
            let mut bin = (((v - lo) * scale) as usize).min(n_bins - 1);
            // Rounding in `scale` may place a sample one bin off its edges.
            if v < edges[bin] {
                bin -= 1;
            } else if bin + 1 < n_bins && v >= edges[bin + 1] {
                bin += 1;
            }
            hist[bin] += 1.0;
        }

        Ok(Self { values: Some(retained), hist, edges, centers })
    }

    /// Wrap an existing histogram with bin centers `x` and counts `y`.
    ///
    /// Edges are placed halfway between consecutive centers and extended by
    /// half a bin at both ends. There are no samples, so unbinned costs
    /// cannot use this container.
    pub fn from_prebinned(x: &[f64], y: &[f64]) -> Result<Self> {
        if x.len() != y.len() {
            return Err(Error::Validation(format!(
                "prebinned length mismatch: {} centers, {} counts",
                x.len(),
                y.len()
            )));
        }
        if x.len() < 2 {
            return Err(Error::Validation("prebinned data requires at least two bins".into()));
        }
        if x.windows(2).any(|w| w[1] <= w[0]) {
            return Err(Error::Validation("prebinned centers must be strictly increasing".into()));
        }

        let n = x.len();
        let mut edges = Vec::with_capacity(n + 1);
        edges.push(x[0] - 0.5 * (x[1] - x[0]));
        edges.extend(x.windows(2).map(|w| 0.5 * (w[0] + w[1])));
        edges.push(x[n - 1] + 0.5 * (x[n - 1] - x[n - 2]));

        Ok(Self { values: None, hist: y.to_vec(), edges, centers: x.to_vec() })
    }

    /// Samples inside the range, or `None` for prebinned data.
    pub fn values(&self) -> Option<&[f64]> {
        self.values.as_deref()
    }

    /// Counts per bin
    pub fn hist(&self) -> &[f64] {
        &self.hist
    }

    /// Bin edges (`n_bins + 1`)
    pub fn edges(&self) -> &[f64] {
        &self.edges
    }

    /// Bin centers
    pub fn centers(&self) -> &[f64] {
        &self.centers
    }

    /// Number of bins
    pub fn n_bins(&self) -> usize {
        self.hist.len()
    }

    /// Total count over all bins
    pub fn total(&self) -> f64 {
        self.hist.iter().sum()
    }
}
