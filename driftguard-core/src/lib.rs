//! Core calibration engine for DriftGuard
//!
//! Runtime bias/scale/skew estimation for accelerometer, gyroscope, and
//! magnetometer streams, with temperature-drift compensation. Designed for
//! edge devices with limited resources.
//!
//! Key constraints:
//! - No heap allocation anywhere; all state is fixed-size
//! - No internal threading; the caller drives everything sample by sample
//! - Deterministic: the same sample stream always produces the same output
//!
//! ```
//! use driftguard_core::{GyroCalibrator, GyroCalConfig};
//!
//! let mut cal = GyroCalibrator::new(GyroCalConfig::default());
//!
//! // Feed timestamped samples as they arrive
//! let (timestamp, die_temp_c) = (1_000_000, 22.5);
//! let accel = [0.0, 0.0, 9.81];
//! let gyro = [0.002, -0.001, 0.0005];
//! cal.update_accel(timestamp, &accel);
//! cal.update(timestamp, &gyro, die_temp_c);
//!
//! if cal.new_calibration_available() {
//!     let bias = cal.bias();
//!     // persist bias, cal.temperature(), cal.confidence()
//! }
//! let corrected = cal.remove_bias(&gyro);
//! ```

#![cfg_attr(not(feature = "std"), no_std)]
#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod buffer;
pub mod cal;
pub mod constants;
pub mod diversity;
pub mod engines;
pub mod errors;
pub mod kasa;
pub mod lm;
pub mod matrix;
pub mod overtemp;
pub mod sphere_fit;
pub mod stillness;
pub mod telemetry;
pub mod time;

// Public API
pub use cal::{Sample3, ThreeAxisCalData};
pub use engines::{
    AccelCalConfig, AccelCalibrator, GyroCalConfig, GyroCalibrator, MagCalConfig, MagCalibrator,
};
pub use errors::{CalError, CalResult};
pub use overtemp::{OverTempCompensator, OverTempConfig, OverTempModelPoint};
pub use telemetry::{NoTelemetry, SensorKind, TelemetryHook};

/// Crate version string
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_exists() {
        assert!(!VERSION.is_empty());
    }
}
