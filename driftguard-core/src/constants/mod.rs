//! Constants for DriftGuard Core
//!
//! Centralized, documented constants used throughout the calibration system.
//! Numeric values live here with their purpose and source so that tuning a
//! threshold never requires hunting through algorithm code.
//!
//! ## Organization
//!
//! - **Physics**: gravity, geomagnetic field strength, operating temperatures
//! - **Time**: unit conversions and default window durations
//!
//! Per-engine thresholds (variance bands, bucket capacities, radius limits)
//! are deliberately *not* here: they are fields of the engine config structs
//! with documented defaults, so a caller can override them per device.

/// Physical constants and environmental limits for inertial/magnetic sensing.
pub mod physics;

/// Time unit conversions and default calibration window durations.
pub mod time;

// Re-export commonly used constants for convenience
pub use physics::{
    GRAVITY_M_PER_S2, GEOMAGNETIC_FIELD_MIN_UT, GEOMAGNETIC_FIELD_MAX_UT,
    GEOMAGNETIC_FIELD_NOMINAL_UT, OPERATING_TEMP_MIN_C, OPERATING_TEMP_MAX_C,
};

pub use time::{NS_PER_MS, NS_PER_SEC, NS_PER_MIN, NS_PER_HOUR};
