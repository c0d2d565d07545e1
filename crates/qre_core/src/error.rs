//! Configuration errors raised before any tracing starts.
//!
//! Numerical trouble inside the engine is never an error: it surfaces as a
//! [`Termination`](crate::continuation::Termination) value instead.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum QreError {
    #[error("starting profile assigns probability {value} to {label}; probabilities must be positive")]
    NonPositiveProbability { label: String, value: f64 },

    #[error("starting probabilities of {group} sum to {sum}, not 1")]
    UnnormalizedGroup { group: String, sum: f64 },

    #[error("dimension mismatch: expected {expected}, got {found}")]
    DimensionMismatch { expected: usize, found: usize },

    #[error("starting lambda must be finite and non-negative, got {0}")]
    InvalidLambda(f64),

    #[error("invalid trace configuration: {0}")]
    InvalidConfig(String),

    #[error("likelihood weight {value} for {label} must be finite and non-negative")]
    InvalidWeight { label: String, value: f64 },

    #[error("{0} has no members")]
    EmptyGroup(String),

    #[error("malformed game: {0}")]
    MalformedGame(String),
}
