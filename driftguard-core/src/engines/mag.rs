//! Magnetometer Calibration Engine
//!
//! ## Overview
//!
//! Estimates the magnetometer hard-iron bias (and optionally a soft-iron
//! scale/skew matrix) from ordinary device motion. As the device rotates,
//! magnetometer readings trace a sphere centered at the hard-iron offset
//! with radius equal to the local field magnitude; no stillness is required,
//! so every incoming sample feeds the accumulator.
//!
//! Samples are collected in *batches*: once enough time has elapsed with
//! enough samples, the engine runs the eigenvalue-spread gate and the Kasa
//! fit. A batch that drags past the hard timeout without completing is
//! thrown away - stale moments mix field environments (indoors/outdoors)
//! and fit nothing useful.
//!
//! A successful Kasa fit updates the local field estimate, then must pass
//! the diversity gate's norm-quality check before the bias is published.
//! With the sphere-fit variant enabled, an accepted Kasa update additionally
//! refines a full scale/skew/bias model over a decimated sample history;
//! whether or not the refinement converges, the accumulator and solver state
//! reset and the next batch starts clean.

use crate::buffer::SampleBuffer;
use crate::cal::{Sample3, ThreeAxisCalData};
use crate::constants::physics::{
    GEOMAGNETIC_FIELD_MAX_UT, GEOMAGNETIC_FIELD_MIN_UT, GEOMAGNETIC_FIELD_NOMINAL_UT,
};
use crate::constants::time::{NS_PER_MS, NS_PER_SEC};
use crate::diversity::{DiversityChecker, DiversityConfig};
use crate::errors::{CalError, CalResult};
use crate::kasa::KasaAccumulator;
use crate::matrix::{jacobi_eigen, Vec3};
use crate::sphere_fit::{SphereFitCal, SphereFitConfig, SPHERE_FIT_MAX_POINTS};
use crate::telemetry::{NoTelemetry, SensorKind, TelemetryHook};
use crate::time::{elapsed, Duration, Timestamp};

/// Capacity of the diversity history
pub const MAG_DIVERSITY_CAPACITY: usize = 24;

/// Capacity of the decimated history feeding the sphere-fit refinement
pub const MAG_HISTORY_CAPACITY: usize = SPHERE_FIT_MAX_POINTS;

/// Magnetometer engine configuration
#[derive(Debug, Clone, Copy)]
pub struct MagCalConfig {
    /// Minimum batch duration before a fit attempt
    pub batch_window: Duration,
    /// Minimum batch sample count before a fit attempt
    pub min_batch_samples: u32,
    /// Hard timeout: a batch older than this resets without a fit
    pub batch_timeout: Duration,
    /// Kasa radius acceptance band, in µT
    pub min_fit_radius: f32,
    /// Upper edge of the radius band, in µT
    pub max_fit_radius: f32,
    /// Minimum min/max eigenvalue ratio of the sample covariance
    pub eigen_ratio_threshold: f32,
    /// Minimum sqrt of the covariance eigenvalue sum, in µT
    pub eigen_magnitude_threshold: f32,
    /// Diversity gate tuning
    pub diversity: DiversityConfig,
    /// Enable the nonlinear scale/skew refinement
    pub sphere_fit_enabled: bool,
    /// Refinement settings (used only when enabled)
    pub sphere_fit: SphereFitConfig,
    /// Minimum spacing between samples entering the refinement history
    pub history_decimation: Duration,
}

impl Default for MagCalConfig {
    fn default() -> Self {
        Self {
            batch_window: 3 * NS_PER_SEC,
            min_batch_samples: 50,
            batch_timeout: 20 * NS_PER_SEC,
            min_fit_radius: GEOMAGNETIC_FIELD_MIN_UT,
            max_fit_radius: GEOMAGNETIC_FIELD_MAX_UT,
            eigen_ratio_threshold: 0.1,
            eigen_magnitude_threshold: 25.0,
            diversity: DiversityConfig::default(),
            sphere_fit_enabled: false,
            sphere_fit: SphereFitConfig::default(),
            history_decimation: 200 * NS_PER_MS,
        }
    }
}

impl MagCalConfig {
    /// Enable the sphere-fit refinement with the given settings
    pub fn with_sphere_fit(mut self, sphere_fit: SphereFitConfig) -> Self {
        self.sphere_fit_enabled = true;
        self.sphere_fit = sphere_fit;
        self
    }
}

/// Magnetometer calibration engine
pub struct MagCalibrator<H: TelemetryHook = NoTelemetry> {
    config: MagCalConfig,
    kasa: KasaAccumulator,
    diversity: DiversityChecker<MAG_DIVERSITY_CAPACITY>,
    sphere: SphereFitCal,
    history: SampleBuffer<MAG_HISTORY_CAPACITY>,
    last_history_push: Timestamp,
    batch_start: Timestamp,
    batch_started: bool,
    cal: ThreeAxisCalData,
    local_field: f32,
    new_available: bool,
    hook: H,
}

impl MagCalibrator<NoTelemetry> {
    /// Create an engine with no telemetry
    pub fn new(config: MagCalConfig) -> Self {
        Self::with_telemetry(config, NoTelemetry)
    }
}

impl<H: TelemetryHook> MagCalibrator<H> {
    /// Create an engine that reports events to `hook`
    pub fn with_telemetry(config: MagCalConfig, hook: H) -> Self {
        Self {
            config,
            kasa: KasaAccumulator::new(),
            diversity: DiversityChecker::new(config.diversity),
            sphere: SphereFitCal::new(config.sphere_fit),
            history: SampleBuffer::new(),
            last_history_push: 0,
            batch_start: 0,
            batch_started: false,
            cal: ThreeAxisCalData::identity(),
            local_field: GEOMAGNETIC_FIELD_NOMINAL_UT,
            new_available: false,
            hook,
        }
    }

    /// Feed one raw magnetometer sample, in µT
    pub fn update(&mut self, timestamp: Timestamp, mag: &Vec3) {
        if !self.batch_started {
            self.batch_start = timestamp;
            self.batch_started = true;
        }

        self.kasa.update(mag);
        self.diversity.update(mag);

        if self.config.sphere_fit_enabled {
            let due = self.history.is_empty()
                || elapsed(timestamp, self.last_history_push) >= self.config.history_decimation;
            if due {
                self.history.push(Sample3 { timestamp, values: *mag });
                self.last_history_push = timestamp;
            }
        }

        let batch_age = elapsed(timestamp, self.batch_start);
        if batch_age >= self.config.batch_timeout {
            // Hard timeout: throw the batch away, no fit attempt
            self.reset_batch();
            self.hook.fit_rejected(SensorKind::Mag, "batch timeout");
            return;
        }

        if batch_age >= self.config.batch_window
            && self.kasa.count() >= self.config.min_batch_samples
        {
            self.attempt_fit(timestamp);
        }
    }

    fn attempt_fit(&mut self, timestamp: Timestamp) {
        self.hook.fit_attempted(SensorKind::Mag, timestamp);

        let geometry_ok = self.kasa.covariance().is_some_and(|mut cov| {
            crate::matrix::make_symmetric(&mut cov);
            let mut eigenvalues = [0.0; 3];
            let mut eigenvectors = [[0.0; 3]; 3];
            if !jacobi_eigen(&cov, &mut eigenvalues, &mut eigenvectors) {
                return false;
            }
            let (max_eig, min_eig) = (eigenvalues[0], eigenvalues[2]);
            let sum: f32 = eigenvalues.iter().sum();
            min_eig > self.config.eigen_ratio_threshold * max_eig
                && libm::sqrtf(sum.max(0.0)) > self.config.eigen_magnitude_threshold
        });
        if !geometry_ok {
            self.reset_batch();
            self.hook.fit_rejected(SensorKind::Mag, "poor geometry");
            return;
        }

        let fit = self
            .kasa
            .fit(self.config.min_fit_radius, self.config.max_fit_radius);
        let Some(fit) = fit else {
            self.reset_batch();
            self.hook.fit_rejected(SensorKind::Mag, "radius out of band");
            return;
        };

        // A plausible radius is our best local field estimate; rescale the
        // diversity thresholds before judging the bias against them
        self.local_field = fit.radius;
        self.diversity.local_field_update(fit.radius);

        if !self.diversity.norm_quality(&fit.center) {
            self.reset_batch();
            self.hook.fit_rejected(SensorKind::Mag, "norm quality");
            return;
        }

        self.cal.bias = fit.center;
        self.cal.cal_time = timestamp;
        self.new_available = true;
        self.hook.fit_accepted(SensorKind::Mag, &fit.center, timestamp);

        if self.config.sphere_fit_enabled {
            self.refine(timestamp, &fit.center);
        }

        // Accepted update consumed the diversity history
        self.diversity.reset();
        self.reset_batch();
    }

    /// Nonlinear refinement over the decimated history, seeded by the Kasa
    /// bias. The history and solver state reset regardless of the outcome;
    /// the next batch starts clean either way.
    fn refine(&mut self, timestamp: Timestamp, seed_bias: &Vec3) {
        let mut points = [[0.0f32; 3]; MAG_HISTORY_CAPACITY];
        let mut count = 0;
        for s in self.history.iter() {
            points[count] = s.values;
            count += 1;
        }

        if let Some(est) = self.sphere.fit(&points[..count], self.local_field, seed_bias) {
            self.cal.scale = est.scale;
            self.cal.bias = est.bias;
            self.cal.cal_time = timestamp;
        } else {
            self.hook.fit_rejected(SensorKind::Mag, "refinement did not converge");
        }

        self.history.clear();
        self.last_history_push = 0;
    }

    fn reset_batch(&mut self) {
        self.kasa.reset();
        self.batch_started = false;
    }

    /// Active calibration (scale stays identity unless refinement ran)
    pub fn calibration(&self) -> &ThreeAxisCalData {
        &self.cal
    }

    /// Active hard-iron bias, in µT
    pub fn bias(&self) -> Vec3 {
        self.cal.bias
    }

    /// Latest local field magnitude estimate, in µT
    pub fn local_field(&self) -> f32 {
        self.local_field
    }

    /// Edge-triggered: true once per accepted update, then clears
    pub fn new_calibration_available(&mut self) -> bool {
        core::mem::take(&mut self.new_available)
    }

    /// Restore a previously persisted calibration
    pub fn set_calibration(&mut self, cal: ThreeAxisCalData) -> CalResult<()> {
        let validated = ThreeAxisCalData::validated(cal.scale, cal.bias, cal.cal_time)?;
        let limit = self.config.max_fit_radius;
        for v in &validated.bias {
            if libm::fabsf(*v) > limit {
                return Err(CalError::OutOfRange { value: *v, min: -limit, max: limit });
            }
        }
        self.cal = validated;
        Ok(())
    }

    /// Apply the full correction `M·(raw − bias)` to a raw sample
    pub fn correct(&self, raw: &Vec3) -> Vec3 {
        self.cal.correct(raw)
    }

    /// Subtract only the hard-iron bias
    pub fn remove_bias(&self, raw: &Vec3) -> Vec3 {
        self.cal.remove_bias(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::SensorKind;

    /// 14 directions spread over the unit sphere
    fn directions() -> [[f32; 3]; 14] {
        let mut dirs = [[0.0f32; 3]; 14];
        let axes: [[f32; 3]; 6] = [
            [1.0, 0.0, 0.0], [-1.0, 0.0, 0.0],
            [0.0, 1.0, 0.0], [0.0, -1.0, 0.0],
            [0.0, 0.0, 1.0], [0.0, 0.0, -1.0],
        ];
        dirs[..6].copy_from_slice(&axes);
        let d = 1.0 / 3.0f32.sqrt();
        let mut i = 6;
        for sx in [-d, d] {
            for sy in [-d, d] {
                for sz in [-d, d] {
                    dirs[i] = [sx, sy, sz];
                    i += 1;
                }
            }
        }
        dirs
    }

    /// Feed `n` sphere samples (center `bias`, radius `field`) at `dt`
    /// spacing, cycling through the 14 directions. Returns the next
    /// timestamp.
    fn feed_rotation(
        cal: &mut MagCalibrator<impl TelemetryHook>,
        t0: u64,
        n: usize,
        dt: u64,
        bias: [f32; 3],
        field: f32,
    ) -> u64 {
        let dirs = directions();
        let mut t = t0;
        for i in 0..n {
            let u = dirs[i % dirs.len()];
            let m = [
                bias[0] + field * u[0],
                bias[1] + field * u[1],
                bias[2] + field * u[2],
            ];
            cal.update(t, &m);
            t += dt;
        }
        t
    }

    #[test]
    fn rotation_recovers_hard_iron_bias() {
        let mut cal = MagCalibrator::new(MagCalConfig::default());
        let bias = [12.0, -7.0, 3.0];

        // 60 samples over ~3.3 s: crosses the batch window with enough data
        feed_rotation(&mut cal, 0, 60, 55 * NS_PER_MS, bias, 48.0);

        assert!(cal.new_calibration_available());
        assert!(!cal.new_calibration_available());

        let est = cal.bias();
        for i in 0..3 {
            assert!((est[i] - bias[i]).abs() < 0.1, "axis {}: {}", i, est[i]);
        }
        assert!((cal.local_field() - 48.0).abs() < 0.1);
    }

    #[derive(Default)]
    struct Rejections {
        timeout: u32,
    }

    impl TelemetryHook for Rejections {
        fn fit_rejected(&mut self, _s: SensorKind, reason: &'static str) {
            if reason == "batch timeout" {
                self.timeout += 1;
            }
        }
    }

    #[test]
    fn sparse_batch_times_out_without_fit() {
        let mut cal = MagCalibrator::with_telemetry(MagCalConfig::default(), Rejections::default());

        // One sample per second: never reaches 50 samples before the 20 s
        // hard timeout
        feed_rotation(&mut cal, 0, 25, NS_PER_SEC, [5.0, 5.0, 5.0], 50.0);

        assert!(!cal.new_calibration_available());
        assert_eq!(cal.bias(), [0.0; 3]);
        assert!(cal.hook.timeout >= 1);
    }

    #[test]
    fn flat_orientation_rejected_by_geometry() {
        let mut cal = MagCalibrator::new(MagCalConfig::default());

        // Device lying flat: readings confined to a small arc
        let mut t = 0u64;
        for i in 0..70u64 {
            let phase = i as f32 * 0.01;
            let m = [50.0 * libm::cosf(phase), 50.0 * libm::sinf(phase), 30.0];
            cal.update(t, &m);
            t += 55 * NS_PER_MS;
        }

        assert!(!cal.new_calibration_available());
    }

    #[test]
    fn refinement_keeps_identity_scale_on_spherical_data() {
        let config = MagCalConfig {
            history_decimation: 100 * NS_PER_MS,
            ..MagCalConfig::default()
        }
        .with_sphere_fit(SphereFitConfig::default());
        let mut cal = MagCalibrator::new(config);

        let bias = [8.0, -4.0, 2.0];
        feed_rotation(&mut cal, 0, 60, 55 * NS_PER_MS, bias, 50.0);

        assert!(cal.new_calibration_available());
        let c = cal.calibration();
        for i in 0..3 {
            assert!((c.bias[i] - bias[i]).abs() < 0.1);
            assert!((c.scale[i][i] - 1.0).abs() < 0.05, "scale[{i}][{i}] = {}", c.scale[i][i]);
        }
    }

    #[test]
    fn set_calibration_validates() {
        let mut cal = MagCalibrator::new(MagCalConfig::default());

        let mut restored = ThreeAxisCalData::identity();
        restored.bias = [10.0, 0.0, -5.0];
        restored.cal_time = 99;
        assert!(cal.set_calibration(restored).is_ok());
        assert_eq!(cal.bias(), [10.0, 0.0, -5.0]);

        let mut bad = ThreeAxisCalData::identity();
        bad.bias = [500.0, 0.0, 0.0];
        assert!(matches!(
            cal.set_calibration(bad),
            Err(CalError::OutOfRange { .. })
        ));
    }

    #[test]
    fn correct_applies_scale_and_bias() {
        let mut cal = MagCalibrator::new(MagCalConfig::default());
        let mut restored = ThreeAxisCalData::identity();
        restored.bias = [1.0, 2.0, 3.0];
        cal.set_calibration(restored).unwrap();

        assert_eq!(cal.correct(&[2.0, 2.0, 3.0]), [1.0, 0.0, 0.0]);
        assert_eq!(cal.remove_bias(&[2.0, 2.0, 3.0]), [1.0, 0.0, 0.0]);
    }
}
