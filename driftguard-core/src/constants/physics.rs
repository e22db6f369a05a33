//! Physical Constants for DriftGuard
//!
//! Fundamental constants and environmental limits used by the calibration
//! engines. All values are based on established physics references or sensor
//! datasheet conventions.

// ===== GRAVITY =====

/// Standard gravitational acceleration (m/s²).
///
/// Reference value used to convert accelerometer readings to gravity units
/// and as the expected norm of a still accelerometer vector.
///
/// Source: CGPM standard gravity, ISO 80000-3
pub const GRAVITY_M_PER_S2: f32 = 9.80665;

// ===== GEOMAGNETIC FIELD =====

/// Minimum plausible geomagnetic field magnitude at Earth's surface (µT).
///
/// The weakest surface field occurs over the South Atlantic Anomaly.
/// A fitted sphere radius below this indicates a degenerate magnetometer fit
/// or heavy magnetic interference, not the ambient field.
///
/// Source: NOAA World Magnetic Model 2020
pub const GEOMAGNETIC_FIELD_MIN_UT: f32 = 20.0;

/// Maximum plausible geomagnetic field magnitude at Earth's surface (µT).
///
/// The strongest surface field occurs near the magnetic poles (~65 µT);
/// a small margin is added for sensor scale error.
///
/// Source: NOAA World Magnetic Model 2020
pub const GEOMAGNETIC_FIELD_MAX_UT: f32 = 70.0;

/// Nominal mid-latitude geomagnetic field magnitude (µT).
///
/// Used to seed the diversity gate thresholds before a local field estimate
/// is available.
pub const GEOMAGNETIC_FIELD_NOMINAL_UT: f32 = 50.0;

// ===== OPERATING TEMPERATURE =====

/// Minimum valid sensor die temperature (°C).
///
/// Lower bound of the industrial temperature grade common to consumer MEMS
/// parts. Temperatures below this indicate a faulty temperature reading and
/// are rejected by the over-temperature model.
pub const OPERATING_TEMP_MIN_C: f32 = -40.0;

/// Maximum valid sensor die temperature (°C).
///
/// Upper bound of the industrial MEMS temperature grade.
pub const OPERATING_TEMP_MAX_C: f32 = 85.0;
