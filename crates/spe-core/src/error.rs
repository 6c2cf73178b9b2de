//! Error types for spefit

use thiserror::Error;

/// spefit error type
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// Configuration error detected at construction time
    #[error("Validation error: {0}")]
    Validation(String),

    /// Update call referenced a parameter that the model does not declare
    #[error("No parameter named {0}")]
    UnknownParameter(String),

    /// Factory lookup by name failed
    #[error("No {kind} with the name: {name}")]
    UnknownVariant {
        /// Family that was searched (e.g. "PDF", "Cost").
        kind: &'static str,
        /// Requested name.
        name: String,
    },

    /// Index past the end of an illumination table or parameter vector
    #[error("Index error: {what} index {index} out of range (length {len})")]
    IndexOutOfRange {
        /// What was being indexed.
        what: &'static str,
        /// Offending index.
        index: usize,
        /// Length of the indexed collection.
        len: usize,
    },

    /// Operation is not defined for this object
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// Computation error
    #[error("Computation error: {0}")]
    Computation(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
