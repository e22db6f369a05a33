//! Gyroscope Calibration Engine
//!
//! ## Overview
//!
//! A still gyroscope should read exactly zero; whatever it reads instead is
//! its bias. The entire difficulty is deciding "still" with enough
//! confidence, because averaging samples from a slowly rotating device bakes
//! the rotation into the bias.
//!
//! The engine runs up to three stillness detectors - gyroscope,
//! accelerometer, and optionally magnetometer - over a shared window
//! end-time and multiplies their confidences into a tri-sensor consensus.
//! Consecutive still windows chain into a *still period*; the bias candidate
//! is the average of the window means across the period, so one long quiet
//! stretch contributes many independent window estimates.
//!
//! Two drift gates protect the period: the die temperature spread and the
//! wander of the per-window gyro means must both stay inside tight limits,
//! otherwise the period restarts from the current window (temperature-driven
//! bias drift would otherwise smear the estimate).
//!
//! A still-to-motion transition closes the period and computes a calibration
//! if the period lasted long enough - using the *previous* window statistics,
//! since the window that detected motion is contaminated. A period that
//! exceeds the maximum still duration forces a computation immediately so an
//! overnight-on-a-desk device keeps refreshing its bias.
//!
//! A watchdog resets everything when gyro samples stop arriving or the
//! timestamp jumps backwards by more than the timeout (clock rollover).

use crate::cal::ThreeAxisCalData;
use crate::constants::time::NS_PER_SEC;
use crate::errors::{CalError, CalResult};
use crate::matrix::Vec3;
use crate::stillness::{StillnessConfig, StillnessDetector};
use crate::telemetry::{NoTelemetry, SensorKind, TelemetryHook};
use crate::time::{elapsed, moved_backwards, Duration, Timestamp};

/// Running min/max/mean tracker for a scalar stream
///
/// Owned explicitly by the engine (one for window temperatures, one per gyro
/// axis for window means) with plain methods instead of a multiplexed
/// command interface.
#[derive(Debug, Clone, Copy)]
pub struct RangeTracker {
    min: f32,
    max: f32,
    sum: f32,
    count: u32,
}

impl Default for RangeTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl RangeTracker {
    /// Create an empty tracker
    pub const fn new() -> Self {
        Self {
            min: f32::INFINITY,
            max: f32::NEG_INFINITY,
            sum: 0.0,
            count: 0,
        }
    }

    /// Clear all state
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Fold in one value
    pub fn update(&mut self, value: f32) {
        self.min = self.min.min(value);
        self.max = self.max.max(value);
        self.sum += value;
        self.count += 1;
    }

    /// Mean of the tracked values; 0 when empty
    pub fn mean(&self) -> f32 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f32
        }
    }

    /// Max − min spread; 0 when empty
    pub fn range(&self) -> f32 {
        if self.count == 0 {
            0.0
        } else {
            self.max - self.min
        }
    }

    /// Number of tracked values
    pub fn count(&self) -> u32 {
        self.count
    }
}

/// Gyroscope engine configuration
#[derive(Debug, Clone, Copy)]
pub struct GyroCalConfig {
    /// Gyro stillness variance band, in (rad/s)²
    pub gyro_still: StillnessConfig,
    /// Accel stillness variance band, in (m/s²)²
    pub accel_still: StillnessConfig,
    /// Mag stillness variance band, in µT²
    pub mag_still: StillnessConfig,
    /// Include the magnetometer in the consensus
    pub use_mag: bool,
    /// Stillness window length
    pub window_duration: Duration,
    /// Minimum still-period length for a transition-triggered calibration
    pub min_still_duration: Duration,
    /// Still-period length that forces a calibration and a fresh period
    pub max_still_duration: Duration,
    /// Watchdog limit on gyro sample gaps and backwards timestamps
    pub watchdog_timeout: Duration,
    /// Consensus confidence required to call a window still
    pub still_confidence: f32,
    /// Max die temperature spread across a still period (°C)
    pub temp_delta_limit_c: f32,
    /// Max spread of per-window gyro means across a period (rad/s)
    pub mean_delta_limit: f32,
    /// Per-axis absolute cap on an accepted bias (rad/s)
    pub max_bias: f32,
}

impl Default for GyroCalConfig {
    fn default() -> Self {
        Self {
            // Consumer MEMS gyro noise floor while still
            gyro_still: StillnessConfig::new(5e-5, 1e-5),
            accel_still: StillnessConfig::new(8e-3, 1.6e-3),
            mag_still: StillnessConfig::new(1.4, 0.25),
            use_mag: false,
            window_duration: NS_PER_SEC,
            min_still_duration: 4 * NS_PER_SEC,
            max_still_duration: 8 * NS_PER_SEC,
            watchdog_timeout: NS_PER_SEC,
            still_confidence: 0.95,
            temp_delta_limit_c: 1.5,
            mean_delta_limit: 8e-4,
            max_bias: 0.1,
        }
    }
}

/// Gyroscope calibration engine
pub struct GyroCalibrator<H: TelemetryHook = NoTelemetry> {
    config: GyroCalConfig,

    gyro_still: StillnessDetector,
    accel_still: StillnessDetector,
    mag_still: StillnessDetector,

    window_in_progress: bool,
    last_gyro_time: Timestamp,
    have_gyro_sample: bool,

    // Current window temperature accumulation
    temp_sum: f32,
    temp_count: u32,

    // Still-period state
    inside_still: bool,
    period_start: Timestamp,
    period_mean_sum: Vec3,
    period_windows: u32,
    last_still_confidence: f32,
    temp_tracker: RangeTracker,
    mean_trackers: [RangeTracker; 3],

    // Published calibration
    cal: ThreeAxisCalData,
    cal_temperature: f32,
    cal_confidence: f32,
    new_available: bool,

    hook: H,
}

impl GyroCalibrator<NoTelemetry> {
    /// Create an engine with no telemetry
    pub fn new(config: GyroCalConfig) -> Self {
        Self::with_telemetry(config, NoTelemetry)
    }
}

impl<H: TelemetryHook> GyroCalibrator<H> {
    /// Create an engine that reports events to `hook`
    pub fn with_telemetry(config: GyroCalConfig, hook: H) -> Self {
        Self {
            config,
            gyro_still: StillnessDetector::new(config.gyro_still),
            accel_still: StillnessDetector::new(config.accel_still),
            mag_still: StillnessDetector::new(config.mag_still),
            window_in_progress: false,
            last_gyro_time: 0,
            have_gyro_sample: false,
            temp_sum: 0.0,
            temp_count: 0,
            inside_still: false,
            period_start: 0,
            period_mean_sum: [0.0; 3],
            period_windows: 0,
            last_still_confidence: 0.0,
            temp_tracker: RangeTracker::new(),
            mean_trackers: [RangeTracker::new(); 3],
            cal: ThreeAxisCalData::identity(),
            cal_temperature: 0.0,
            cal_confidence: 0.0,
            new_available: false,
            hook,
        }
    }

    /// Feed one accelerometer sample (m/s²) into the consensus
    pub fn update_accel(&mut self, timestamp: Timestamp, accel: &Vec3) {
        self.accel_still.update(timestamp, accel);
    }

    /// Feed one magnetometer sample (µT) into the consensus.
    /// Ignored unless `use_mag` is configured.
    pub fn update_mag(&mut self, timestamp: Timestamp, mag: &Vec3) {
        if self.config.use_mag {
            self.mag_still.update(timestamp, mag);
        }
    }

    /// Feed one gyroscope sample (rad/s) with the current die temperature.
    ///
    /// The gyroscope stream drives all window timing; accel/mag samples only
    /// accumulate into their detectors.
    pub fn update(&mut self, timestamp: Timestamp, gyro: &Vec3, temp_c: f32) {
        // Watchdog: sample gap or clock reversal wipes every detector; the
        // next sample starts a fresh window and period
        if self.have_gyro_sample {
            let gap = elapsed(timestamp, self.last_gyro_time);
            let backwards =
                moved_backwards(timestamp, self.last_gyro_time, self.config.watchdog_timeout);
            if gap > self.config.watchdog_timeout || backwards {
                self.full_reset();
            }
        }
        self.last_gyro_time = timestamp;
        self.have_gyro_sample = true;

        if !self.window_in_progress {
            let end = timestamp.saturating_add(self.config.window_duration);
            self.gyro_still.set_window_end(end);
            self.accel_still.set_window_end(end);
            self.mag_still.set_window_end(end);
            self.temp_sum = 0.0;
            self.temp_count = 0;
            self.window_in_progress = true;
        }

        self.gyro_still.update(timestamp, gyro);
        self.temp_sum += temp_c;
        self.temp_count += 1;

        if !self.gyro_still.window_ready() {
            return;
        }
        // Wait for the rest of the consensus to cover the window
        if self.accel_still.window_samples() >= 2 && !self.accel_still.window_ready() {
            return;
        }
        if self.config.use_mag
            && self.mag_still.window_samples() >= 2
            && !self.mag_still.window_ready()
        {
            return;
        }

        self.conclude_window(timestamp);
    }

    /// All active detectors covered the window: score it and advance the
    /// still-period state machine
    fn conclude_window(&mut self, timestamp: Timestamp) {
        let gyro_conf = self.gyro_still.compute();
        let accel_conf = if self.accel_still.window_samples() >= 2 {
            self.accel_still.compute()
        } else {
            // No accel coverage this window: no consensus, score it unstill
            0.0
        };
        let mag_conf = if self.config.use_mag {
            self.mag_still.compute()
        } else {
            1.0
        };
        let confidence = gyro_conf * accel_conf * mag_conf;

        let window_start = self.gyro_still.window_start();
        let window_mean = self.gyro_still.mean();
        let window_temp = if self.temp_count > 0 {
            self.temp_sum / self.temp_count as f32
        } else {
            0.0
        };

        let still = confidence >= self.config.still_confidence;

        if still {
            if !self.inside_still {
                self.inside_still = true;
                self.start_period(window_start);
                self.hook.stillness_changed(SensorKind::Gyro, true, confidence);
            }

            self.temp_tracker.update(window_temp);
            for i in 0..3 {
                self.mean_trackers[i].update(window_mean[i]);
            }
            self.period_mean_sum[0] += window_mean[0];
            self.period_mean_sum[1] += window_mean[1];
            self.period_mean_sum[2] += window_mean[2];
            self.period_windows += 1;
            self.last_still_confidence = confidence;

            let drifting = self.temp_tracker.range() > self.config.temp_delta_limit_c
                || self
                    .mean_trackers
                    .iter()
                    .any(|t| t.range() > self.config.mean_delta_limit);
            if drifting {
                // Still but sliding (temperature ramp): restart the period
                // from this window so the estimate stays local
                self.start_period(window_start);
                self.temp_tracker.update(window_temp);
                for i in 0..3 {
                    self.mean_trackers[i].update(window_mean[i]);
                    self.period_mean_sum[i] += window_mean[i];
                }
                self.period_windows = 1;
                self.last_still_confidence = confidence;
                self.reset_detectors(false);
                self.window_in_progress = false;
                return;
            }

            if elapsed(timestamp, self.period_start) >= self.config.max_still_duration {
                // Long quiet stretch: harvest it and start over immediately
                self.compute_calibration(timestamp);
                self.reset_detectors(true);
                self.inside_still = false;
            } else {
                // Continue the period: keep long-horizon stats
                self.reset_detectors(false);
            }
        } else {
            if self.inside_still {
                // The current window saw motion, so the period ended where
                // the previous (still) window did
                let still_duration = elapsed(window_start, self.period_start);
                if still_duration >= self.config.min_still_duration {
                    self.compute_calibration(window_start);
                }
                self.inside_still = false;
                self.hook.stillness_changed(SensorKind::Gyro, false, confidence);
            }
            self.reset_detectors(true);
            self.clear_period();
        }

        self.window_in_progress = false;
    }

    fn start_period(&mut self, start: Timestamp) {
        self.period_start = start;
        self.period_mean_sum = [0.0; 3];
        self.period_windows = 0;
        self.last_still_confidence = 0.0;
        self.temp_tracker.reset();
        for t in self.mean_trackers.iter_mut() {
            t.reset();
        }
    }

    fn clear_period(&mut self) {
        self.start_period(0);
    }

    fn reset_detectors(&mut self, reset_stats: bool) {
        self.gyro_still.reset(reset_stats);
        self.accel_still.reset(reset_stats);
        self.mag_still.reset(reset_stats);
    }

    fn full_reset(&mut self) {
        if self.inside_still {
            self.hook.stillness_changed(SensorKind::Gyro, false, 0.0);
        }
        self.reset_detectors(true);
        self.clear_period();
        self.inside_still = false;
        self.window_in_progress = false;
        self.temp_sum = 0.0;
        self.temp_count = 0;
    }

    /// Average the period's window means into a bias candidate and publish
    /// it if it passes the per-axis cap
    fn compute_calibration(&mut self, timestamp: Timestamp) {
        if self.period_windows == 0 {
            return;
        }
        self.hook.fit_attempted(SensorKind::Gyro, timestamp);

        let inv_n = 1.0 / self.period_windows as f32;
        let candidate = [
            self.period_mean_sum[0] * inv_n,
            self.period_mean_sum[1] * inv_n,
            self.period_mean_sum[2] * inv_n,
        ];

        if candidate.iter().any(|c| libm::fabsf(*c) > self.config.max_bias) {
            self.hook.fit_rejected(SensorKind::Gyro, "bias exceeds cap");
            return;
        }

        self.cal.bias = candidate;
        self.cal.cal_time = timestamp;
        self.cal_temperature = self.temp_tracker.mean();
        self.cal_confidence = self.last_still_confidence;
        self.new_available = true;
        self.hook.fit_accepted(SensorKind::Gyro, &candidate, timestamp);
    }

    /// Active bias, in rad/s
    pub fn bias(&self) -> Vec3 {
        self.cal.bias
    }

    /// Active calibration data
    pub fn calibration(&self) -> &ThreeAxisCalData {
        &self.cal
    }

    /// Mean die temperature of the period behind the current bias (°C)
    pub fn temperature(&self) -> f32 {
        self.cal_temperature
    }

    /// Consensus confidence of the window that sealed the current bias
    pub fn confidence(&self) -> f32 {
        self.cal_confidence
    }

    /// Edge-triggered: true once per accepted calibration, then clears
    pub fn new_calibration_available(&mut self) -> bool {
        core::mem::take(&mut self.new_available)
    }

    /// Restore a previously persisted bias (rad/s) and its temperature
    pub fn set_bias(&mut self, bias: Vec3, temp_c: f32, cal_time: Timestamp) -> CalResult<()> {
        let cap = self.config.max_bias;
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
        self.cal_temperature = temp_c;
        Ok(())
    }

    /// Subtract the active bias from a raw sample
    pub fn remove_bias(&self, raw: &Vec3) -> Vec3 {
        self.cal.remove_bias(raw)
    }
}
