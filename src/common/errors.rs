//! Error types for the simulator core.
//!
//! The taxonomy is narrow: configuration problems are rejected once, when a
//! [`SimConfig`](crate::common::config::SimConfig) is validated, and a physics
//! tick that produces a non-finite state is reported to the caller as a
//! terminal condition. Sensor dropout and missing measurements are ordinary
//! values (`Option`), never errors.

use thiserror::Error;

/// Result type for configuration loading and validation.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Result type for operations that check the physical state.
pub type StateResult<T> = Result<T, StateError>;

/// Invalid calibration or configuration data.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A standard deviation, variance or other magnitude is negative or NaN.
    #[error("{name} must be non-negative and finite, got {value}")]
    Negative {
        /// Name of the offending parameter.
        name: &'static str,
        /// The rejected value.
        value: f64,
    },

    /// A value that must be finite is NaN or infinite.
    #[error("{name} must be finite, got {value}")]
    NotFinite {
        /// Name of the offending parameter.
        name: &'static str,
        /// The rejected value.
        value: f64,
    },

    /// A rate, timestep or limit that must be strictly positive is not.
    #[error("{name} must be strictly positive and finite, got {value}")]
    NonPositive {
        /// Name of the offending parameter.
        name: &'static str,
        /// The rejected value.
        value: f64,
    },

    /// A probability outside `[0, 1]`.
    #[error("{name} must be a probability in [0, 1], got {value}")]
    InvalidProbability {
        /// Name of the offending parameter.
        name: &'static str,
        /// The rejected value.
        value: f64,
    },

    /// A matrix or table does not have the expected shape.
    #[error("{name} has dimension {actual}, expected {expected}")]
    DimensionMismatch {
        /// Name of the offending parameter.
        name: &'static str,
        /// Expected dimension.
        expected: usize,
        /// Dimension that was supplied.
        actual: usize,
    },

    /// A covariance matrix is not symmetric positive-definite.
    #[error("{name} is not symmetric positive-definite")]
    NotPositiveDefinite {
        /// Name of the offending matrix.
        name: &'static str,
    },

    /// Breakpoints of a lookup table are not strictly increasing.
    #[error("{name} breakpoints must be strictly increasing")]
    UnsortedBreakpoints {
        /// Name of the offending table.
        name: &'static str,
    },

    /// The configuration document could not be parsed.
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),
}

/// The physical state left the domain the simulator can represent.
#[derive(Error, Debug, Clone, Copy, PartialEq)]
pub enum StateError {
    /// A state field became NaN or infinite after integration.
    #[error("vehicle state field `{field}` is not finite")]
    NonFinite {
        /// Name of the first non-finite field found.
        field: &'static str,
    },
}
