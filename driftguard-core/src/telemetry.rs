//! Telemetry Hooks
//!
//! Optional observer callbacks invoked from fixed points inside the
//! calibration engines: fit attempts and their outcomes, stillness
//! transitions, model maintenance. Hosts use them to drive diagnostics or
//! counters; the engines never read anything back, so a hook can observe but
//! not steer.
//!
//! Engines are generic over the hook with [`NoTelemetry`] as the default - a
//! zero-sized type whose provided no-op methods compile away entirely, so
//! callers that want no telemetry pay nothing.

use crate::matrix::Vec3;
use crate::time::Timestamp;

/// Which sensor an event refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorKind {
    /// Accelerometer
    Accel,
    /// Gyroscope
    Gyro,
    /// Magnetometer
    Mag,
}

/// Observer for calibration engine events
///
/// All methods have no-op defaults; implement only what you need.
pub trait TelemetryHook {
    /// A complete data set triggered a fit attempt
    fn fit_attempted(&mut self, _sensor: SensorKind, _timestamp: Timestamp) {}

    /// A fit produced an accepted calibration candidate
    fn fit_accepted(&mut self, _sensor: SensorKind, _bias: &Vec3, _timestamp: Timestamp) {}

    /// A fit attempt was discarded
    fn fit_rejected(&mut self, _sensor: SensorKind, _reason: &'static str) {}

    /// The stillness consensus changed state
    fn stillness_changed(&mut self, _sensor: SensorKind, _still: bool, _confidence: f32) {}

    /// The over-temperature model evicted a stored point
    fn point_evicted(&mut self, _temperature: f32) {}

    /// The over-temperature model refit its linear parameters
    fn model_refit(&mut self, _accepted: bool) {}
}

/// Zero-cost default hook
#[derive(Debug, Clone, Copy, Default)]
pub struct NoTelemetry;

impl TelemetryHook for NoTelemetry {}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Counter {
        accepted: u32,
        rejected: u32,
    }

    impl TelemetryHook for Counter {
        fn fit_accepted(&mut self, _s: SensorKind, _b: &Vec3, _t: Timestamp) {
            self.accepted += 1;
        }
        fn fit_rejected(&mut self, _s: SensorKind, _r: &'static str) {
            self.rejected += 1;
        }
    }

    #[test]
    fn hooks_default_to_noop() {
        // NoTelemetry implements every method; just exercise a couple
        let mut hook = NoTelemetry;
        hook.fit_attempted(SensorKind::Accel, 0);
        hook.model_refit(true);
    }

    #[test]
    fn custom_hook_observes() {
        let mut hook = Counter::default();
        hook.fit_accepted(SensorKind::Gyro, &[0.0; 3], 1);
        hook.fit_rejected(SensorKind::Mag, "radius out of band");
        assert_eq!(hook.accepted, 1);
        assert_eq!(hook.rejected, 1);
    }
}
