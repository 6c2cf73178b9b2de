//! # spe-core
//!
//! Shared error type, result records and the parameter-view trait used by the
//! spefit crates.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod traits;
pub mod types;

pub use error::{Error, Result};
pub use traits::Model;
pub use types::{FitResult, GoodnessOfFit};
