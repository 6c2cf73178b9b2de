//! # spe-model
//!
//! Charge-spectrum models for photon-counting sensors.
//!
//! This crate provides:
//! - The four mixture densities of single-photoelectron spectra ([`pdf`]).
//! - A [`ParameterModel`] that expands shared and per-illumination parameter
//!   declarations into one flat vector for simultaneous fits.
//! - A [`SpectrumPdf`] binding a density to its parameters, registered by name
//!   through [`SpectrumKind`].
//! - A [`ChargeContainer`] holding the samples and histogram of one illumination.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod container;
pub mod parameter;
pub mod pdf;
pub mod spectrum;

pub use container::ChargeContainer;
pub use parameter::{ParameterDecl, ParameterModel};
pub use pdf::{DensityFn, PedestalMode};
pub use spectrum::{SpectrumKind, SpectrumPdf, SpectrumPdfBuilder};
