//! Accelerometer Calibration Engine
//!
//! ## Overview
//!
//! Estimates the accelerometer bias from still moments. While the device is
//! motionless the sensor reads exactly one gravity vector; collect enough
//! still gravity vectors pointing in enough directions and they trace a unit
//! sphere (in g units) whose center is the bias.
//!
//! The engine buckets still-window means into seven spherical caps - the six
//! axis-aligned directions plus a remainder sector - so that no orientation
//! can dominate the fit, and keeps two independent accumulator sets split at
//! a fixed temperature so a fit never mixes hot and cold bias regimes. Once
//! all six axis buckets of a temperature window are full, a Kasa fit plus an
//! eigenvalue-spread gate produces a bias candidate.
//!
//! ## Deferred Application
//!
//! Accelerometer offsets may only be written to hardware while the sensor is
//! powered down, so a successful fit is held as a *candidate*: the caller
//! observes [`AccelCalibrator::new_calibration_available`] and invokes
//! [`AccelCalibrator::apply_new_bias`] at a safe moment to swap it into the
//! active correction.

use crate::cal::ThreeAxisCalData;
use crate::constants::physics::GRAVITY_M_PER_S2;
use crate::constants::time::NS_PER_MS;
use crate::errors::{CalError, CalResult};
use crate::kasa::KasaAccumulator;
use crate::matrix::{jacobi_eigen, Vec3};
use crate::stillness::{StillnessConfig, StillnessDetector};
use crate::telemetry::{NoTelemetry, SensorKind, TelemetryHook};
use crate::time::{Duration, Timestamp};

/// Number of axis-aligned cap buckets (±X, ±Y, ±Z)
const NUM_AXIS_BUCKETS: usize = 6;

/// Temperature windows (below / above the split temperature)
const NUM_TEMP_WINDOWS: usize = 2;

/// Accelerometer engine configuration
#[derive(Debug, Clone, Copy)]
pub struct AccelCalConfig {
    /// Gravity magnitude used to scale raw samples to g units (m/s²)
    pub gravity: f32,
    /// Stillness variance band, in g² units
    pub still: StillnessConfig,
    /// Confidence a finished window needs to count as still
    pub still_confidence: f32,
    /// Stillness window length
    pub window_duration: Duration,
    /// Acceptance band for the norm of a still mean, in g
    pub min_still_norm: f32,
    /// Upper edge of the still-norm band, in g
    pub max_still_norm: f32,
    /// Cap half-angle cosine for the lateral (±X/±Y) buckets
    pub cos_lateral: f32,
    /// Cap half-angle cosine for the vertical (±Z) buckets; tighter because
    /// devices rest flat far more often than on edge
    pub cos_vertical: f32,
    /// Die temperature separating the two accumulation windows (°C)
    pub temp_split_c: f32,
    /// Still means accepted per axis bucket
    pub bucket_target: u16,
    /// Still means accepted into the remainder sector
    pub remainder_target: u16,
    /// Total accumulated means before a window is declared stuck and reset
    pub max_accumulated: u32,
    /// Kasa radius acceptance band, in g
    pub min_fit_radius: f32,
    /// Upper edge of the Kasa radius band, in g
    pub max_fit_radius: f32,
    /// Minimum min/max eigenvalue ratio of the sample covariance
    pub eigen_ratio_threshold: f32,
    /// Minimum sqrt of the covariance eigenvalue sum
    pub eigen_magnitude_threshold: f32,
    /// Per-axis absolute cap on an accepted bias, in g
    pub max_bias_g: f32,
}

impl Default for AccelCalConfig {
    fn default() -> Self {
        Self {
            gravity: GRAVITY_M_PER_S2,
            // (3 mg)² noise floor with a soft edge
            still: StillnessConfig::new(1e-5, 5e-6),
            still_confidence: 0.9,
            window_duration: 800 * NS_PER_MS,
            min_still_norm: 0.68,
            max_still_norm: 1.38,
            cos_lateral: 0.707, // 45°
            cos_vertical: 0.866, // 30°
            temp_split_c: 25.0,
            bucket_target: 5,
            remainder_target: 10,
            max_accumulated: 160,
            min_fit_radius: 0.9,
            max_fit_radius: 1.1,
            eigen_ratio_threshold: 0.35,
            eigen_magnitude_threshold: 0.8,
            max_bias_g: 0.05,
        }
    }
}

/// Per-temperature-window accumulation state
#[derive(Debug, Clone, Copy, Default)]
struct TempWindow {
    kasa: KasaAccumulator,
    axis_counts: [u16; NUM_AXIS_BUCKETS],
    remainder_count: u16,
    total: u32,
}

impl TempWindow {
    fn reset(&mut self) {
        self.kasa.reset();
        self.axis_counts = [0; NUM_AXIS_BUCKETS];
        self.remainder_count = 0;
        self.total = 0;
    }

    fn axis_buckets_full(&self, target: u16) -> bool {
        self.axis_counts.iter().all(|&c| c >= target)
    }
}

/// Spherical-cap classification of a still mean
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Bucket {
    Axis(usize),
    Remainder,
}

/// Accelerometer calibration engine
pub struct AccelCalibrator<H: TelemetryHook = NoTelemetry> {
    config: AccelCalConfig,
    still: StillnessDetector,
    windows: [TempWindow; NUM_TEMP_WINDOWS],
    cal: ThreeAxisCalData,
    new_bias: Vec3,
    has_candidate: bool,
    candidate_time: Timestamp,
    new_available: bool,
    hook: H,
}

impl AccelCalibrator<NoTelemetry> {
    /// Create an engine with no telemetry
    pub fn new(config: AccelCalConfig) -> Self {
        Self::with_telemetry(config, NoTelemetry)
    }
}

impl<H: TelemetryHook> AccelCalibrator<H> {
    /// Create an engine that reports events to `hook`
    pub fn with_telemetry(config: AccelCalConfig, hook: H) -> Self {
        Self {
            config,
            still: StillnessDetector::new(config.still),
            windows: [TempWindow::default(); NUM_TEMP_WINDOWS],
            cal: ThreeAxisCalData::identity(),
            new_bias: [0.0; 3],
            has_candidate: false,
            candidate_time: 0,
            new_available: false,
            hook,
        }
    }

    /// Feed one raw accelerometer sample (m/s² or the unit implied by the
    /// configured gravity) with the current die temperature.
    pub fn update(&mut self, timestamp: Timestamp, accel: &Vec3, temp_c: f32) {
        let inv_g = 1.0 / self.config.gravity;
        let v = [accel[0] * inv_g, accel[1] * inv_g, accel[2] * inv_g];

        if self.still.window_samples() == 0 {
            self.still
                .set_window_end(timestamp.saturating_add(self.config.window_duration));
        }
        self.still.update(timestamp, &v);

        if !self.still.window_ready() {
            return;
        }

        let confidence = self.still.compute();
        let mean = self.still.mean();
        self.still.reset(true);

        if confidence < self.config.still_confidence {
            return;
        }

        let norm = libm::sqrtf(mean[0] * mean[0] + mean[1] * mean[1] + mean[2] * mean[2]);
        if norm < self.config.min_still_norm || norm > self.config.max_still_norm {
            return;
        }

        let window_idx = if temp_c < self.config.temp_split_c { 0 } else { 1 };
        let bucket = self.classify(&mean, norm);
        self.accumulate(window_idx, bucket, &mean, timestamp);
    }

    /// Classify a still mean into one of the seven spherical caps
    fn classify(&self, mean: &Vec3, norm: f32) -> Bucket {
        let u = [mean[0] / norm, mean[1] / norm, mean[2] / norm];

        // Vertical caps first: they use the tighter cone
        if u[2] > self.config.cos_vertical {
            return Bucket::Axis(4);
        }
        if u[2] < -self.config.cos_vertical {
            return Bucket::Axis(5);
        }
        if u[0] > self.config.cos_lateral {
            return Bucket::Axis(0);
        }
        if u[0] < -self.config.cos_lateral {
            return Bucket::Axis(1);
        }
        if u[1] > self.config.cos_lateral {
            return Bucket::Axis(2);
        }
        if u[1] < -self.config.cos_lateral {
            return Bucket::Axis(3);
        }
        Bucket::Remainder
    }

    fn accumulate(&mut self, window_idx: usize, bucket: Bucket, mean: &Vec3, timestamp: Timestamp) {
        let target = self.config.bucket_target;
        let window = &mut self.windows[window_idx];

        match bucket {
            Bucket::Axis(i) => {
                if window.axis_counts[i] >= target {
                    return; // bucket already at capacity, drop silently
                }
                window.axis_counts[i] += 1;
            }
            Bucket::Remainder => {
                if window.remainder_count >= self.config.remainder_target {
                    return;
                }
                window.remainder_count += 1;
            }
        }

        window.kasa.update(mean);
        window.total += 1;

        if window.total > self.config.max_accumulated {
            window.reset();
            self.hook.fit_rejected(SensorKind::Accel, "accumulation overflow");
            return;
        }

        if window.axis_buckets_full(target) {
            self.attempt_fit(window_idx, timestamp);
        }
    }

    /// All six axis buckets full: fit and gate
    fn attempt_fit(&mut self, window_idx: usize, timestamp: Timestamp) {
        self.hook.fit_attempted(SensorKind::Accel, timestamp);
        let kasa = self.windows[window_idx].kasa;

        let geometry_ok = kasa.covariance().is_some_and(|mut cov| {
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
            self.windows[window_idx].reset();
            self.hook.fit_rejected(SensorKind::Accel, "poor geometry");
            return;
        }

        let fit = kasa.fit(self.config.min_fit_radius, self.config.max_fit_radius);
        let Some(fit) = fit else {
            self.windows[window_idx].reset();
            self.hook.fit_rejected(SensorKind::Accel, "radius out of band");
            return;
        };

        let cap = self.config.max_bias_g;
        if fit.center.iter().any(|c| libm::fabsf(*c) > cap) {
            self.windows[window_idx].reset();
            self.hook.fit_rejected(SensorKind::Accel, "bias exceeds cap");
            return;
        }

        // Publish in input units; the active bias swaps in later
        let g = self.config.gravity;
        self.new_bias = [fit.center[0] * g, fit.center[1] * g, fit.center[2] * g];
        self.has_candidate = true;
        self.candidate_time = timestamp;
        self.new_available = true;
        self.windows[window_idx].reset();
        self.hook
            .fit_accepted(SensorKind::Accel, &self.new_bias, timestamp);
    }

    /// Active calibration currently applied by [`Self::remove_bias`]
    pub fn calibration(&self) -> &ThreeAxisCalData {
        &self.cal
    }

    /// Active bias, in input units
    pub fn bias(&self) -> Vec3 {
        self.cal.bias
    }

    /// Pending candidate bias, if a fit succeeded since the last swap
    pub fn new_bias(&self) -> Option<Vec3> {
        self.has_candidate.then_some(self.new_bias)
    }

    /// Swap the pending candidate into the active calibration.
    ///
    /// Call while the sensor is powered down. Returns `false` when no
    /// candidate is pending.
    pub fn apply_new_bias(&mut self) -> bool {
        if !self.has_candidate {
            return false;
        }
        self.cal.bias = self.new_bias;
        self.cal.cal_time = self.candidate_time;
        self.has_candidate = false;
        true
    }

    /// Edge-triggered: true once per accepted fit, then clears
    pub fn new_calibration_available(&mut self) -> bool {
        core::mem::take(&mut self.new_available)
    }

    /// Restore a previously persisted bias (input units)
    pub fn set_bias(&mut self, bias: Vec3, cal_time: Timestamp) -> CalResult<()> {
        let cap = self.config.max_bias_g * self.config.gravity;
        for v in &bias {
            if !v.is_finite() {
                return Err(CalError::InvalidValue);
            }
            if libm::fabsf(*v) > cap {
                return Err(CalError::OutOfRange { value: *v, min: -cap, max: cap });
            }
        }
        self.cal.bias = bias;
        self.cal.cal_time = cal_time;
        Ok(())
    }

    /// Apply the active correction to a raw sample
    pub fn remove_bias(&self, raw: &Vec3) -> Vec3 {
        self.cal.remove_bias(raw)
    }
}
