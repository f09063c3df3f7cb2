//! Time arithmetic and configuration errors.

use thiserror::Error;

use crate::TimeUnit;

/// Errors produced by exact time arithmetic and run configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TimeError {
    #[error("{value} ns is not a whole number of {unit}")]
    Inexact { value: u128, unit: TimeUnit },

    #[error("time value overflows u64 {unit}")]
    Overflow { unit: TimeUnit },

    #[error("configuration error: {0}")]
    Config(String),
}

/// Shorthand result type for time arithmetic.
pub type TimeResult<T> = Result<T, TimeError>;
