//! Error Types for Calibration Failures
//!
//! ## Design Philosophy
//!
//! DriftGuard's error system is designed with embedded systems in mind:
//!
//! 1. **Small Size**: Each error variant is kept minimal since errors are
//!    returned in hot paths.
//!
//! 2. **No Heap Allocation**: All error data is inline - no String, only
//!    `&'static str` for messages. This ensures deterministic memory usage.
//!
//! 3. **Copy Semantics**: Errors implement Copy for efficient return from
//!    functions without move semantics complications.
//!
//! ## Where Errors Appear
//!
//! Almost nothing in this core is an error: insufficient data means
//! "defer and wait", an out-of-range fit candidate means "keep the previous
//! calibration", and a non-converged solve means "no update this cycle" -
//! all handled internally without surfacing to the caller. `CalError` is
//! reserved for the restore seams, where a host hands the core previously
//! persisted numbers that may be garbage:
//!
//! - [`crate::ThreeAxisCalData::validated`] rejects NaN/Inf blobs
//! - `set_bias` / `set_model` / `set_model_data` reject out-of-range values
//!
//! Numeric primitives ([`crate::matrix`]) signal failure with `bool` returns
//! instead; the solver reports a typed [`crate::lm::SolverStatus`].

use thiserror_no_std::Error;

/// Result type for calibration restore operations
pub type CalResult<T> = Result<T, CalError>;

/// Calibration errors - kept small for embedded use
#[derive(Error, Debug, Clone, Copy, PartialEq)]
pub enum CalError {
    /// Value is NaN or infinite
    #[error("Invalid value: not a finite number")]
    InvalidValue,

    /// Value outside the configured or physical limits
    #[error("Value {value} outside range [{min}, {max}]")]
    OutOfRange {
        /// The offending value
        value: f32,
        /// Minimum acceptable value
        min: f32,
        /// Maximum acceptable value
        max: f32,
    },

    /// A restored model carried more points than the fixed capacity
    #[error("Capacity exceeded: {requested} points, capacity {capacity}")]
    CapacityExceeded {
        /// Number of points the caller tried to restore
        requested: usize,
        /// Fixed capacity of the receiving container
        capacity: usize,
    },
}

#[cfg(feature = "defmt")]
impl defmt::Format for CalError {
    fn format(&self, fmt: defmt::Formatter) {
        match self {
            Self::InvalidValue =>
                defmt::write!(fmt, "Invalid value"),
            Self::OutOfRange { value, min, max } =>
                defmt::write!(fmt, "Value {} outside [{}, {}]", value, min, max),
            Self::CapacityExceeded { requested, capacity } =>
                defmt::write!(fmt, "{} points exceed capacity {}", requested, capacity),
        }
    }
}
