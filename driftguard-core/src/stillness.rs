//! Online Stillness Detection
//!
//! ## Overview
//!
//! A reusable one-pass mean/variance estimator that decides whether a sensor
//! was motionless over a bounded time window. Every calibration engine gates
//! on stillness: the accelerometer needs still gravity vectors, the gyroscope
//! needs a still period to read its bias directly, and the gyroscope's
//! tri-sensor consensus reuses the same detector for accel and mag streams.
//!
//! ## Assumed-Mean Accumulation
//!
//! Per-sample the detector accumulates deviations from an *assumed mean*
//! fixed at the window's first sample:
//!
//! ```text
//! d  = v − v₀          Σd, Σd²  accumulated per axis
//! mean = v₀ + Σd/n
//! var  = (Σd² − (Σd)²/n) / (n − 1)
//! ```
//!
//! One pass, no per-sample division, and the catastrophic cancellation of the
//! naive sum-of-squares formula is avoided because deviations from a nearby
//! anchor stay small. A second, long-horizon sum spans windows so callers can
//! read a mean over a whole multi-window still period.
//!
//! ## Window Lifecycle
//!
//! The detector is a two-state machine: **accumulating** until the caller-set
//! window end-time has elapsed and at least 2 samples were seen, then
//! **ready**. [`StillnessDetector::compute`] finalizes mean/variance and the
//! confidence score; [`StillnessDetector::reset`] starts the next window and
//! snapshots the finalized values as the "previous" generation - callers that
//! detect a motion onset need the prior window's statistics, not the
//! contaminated in-progress ones.

use crate::matrix::Vec3;
use crate::time::Timestamp;

/// Stillness detector configuration
#[derive(Debug, Clone, Copy)]
pub struct StillnessConfig {
    /// Center of the per-axis variance acceptance band
    pub var_threshold: f32,
    /// Half-width of the linear confidence ramp around the threshold
    pub confidence_delta: f32,
}

impl StillnessConfig {
    /// Create a config, clamping the ramp half-width to the threshold so the
    /// lower band edge cannot go negative
    pub fn new(var_threshold: f32, confidence_delta: f32) -> Self {
        Self {
            var_threshold: var_threshold.max(0.0),
            confidence_delta: confidence_delta.max(0.0).min(var_threshold.max(0.0)),
        }
    }
}

/// Online stillness detector for one 3-axis sensor stream
#[derive(Debug, Clone, Copy)]
pub struct StillnessDetector {
    config: StillnessConfig,

    // Long-horizon accumulators spanning windows
    total_sum: Vec3,
    total_count: u32,

    // Current window, assumed-mean method
    assumed_mean: Vec3,
    dev_sum: Vec3,
    dev_sum_sq: Vec3,
    win_count: u32,

    window_start: Timestamp,
    window_end: Timestamp,
    ready: bool,

    // Finalized by compute()
    mean: Vec3,
    variance: Vec3,
    confidence: f32,

    // Previous generation, snapshotted by reset()
    prev_mean: Vec3,
    prev_confidence: f32,
}

impl StillnessDetector {
    /// Create a detector with all accumulators cleared
    pub fn new(config: StillnessConfig) -> Self {
        Self {
            config,
            total_sum: [0.0; 3],
            total_count: 0,
            assumed_mean: [0.0; 3],
            dev_sum: [0.0; 3],
            dev_sum_sq: [0.0; 3],
            win_count: 0,
            window_start: 0,
            window_end: 0,
            ready: false,
            mean: [0.0; 3],
            variance: [0.0; 3],
            confidence: 0.0,
            prev_mean: [0.0; 3],
            prev_confidence: 0.0,
        }
    }

    /// Set the time at which the current window completes.
    ///
    /// The owning engine drives window timing; the detector only compares
    /// sample timestamps against this bound.
    pub fn set_window_end(&mut self, end: Timestamp) {
        self.window_end = end;
    }

    /// Timestamp of the first sample in the current window
    pub fn window_start(&self) -> Timestamp {
        self.window_start
    }

    /// True once the window duration elapsed with at least 2 samples
    pub fn window_ready(&self) -> bool {
        self.ready
    }

    /// Fold one sample into the current window
    pub fn update(&mut self, timestamp: Timestamp, v: &Vec3) {
        if self.win_count == 0 {
            self.assumed_mean = *v;
            self.window_start = timestamp;
        }

        for i in 0..3 {
            self.total_sum[i] += v[i];
            let d = v[i] - self.assumed_mean[i];
            self.dev_sum[i] += d;
            self.dev_sum_sq[i] += d * d;
        }
        self.total_count += 1;
        self.win_count += 1;

        if timestamp >= self.window_end && self.win_count >= 2 {
            self.ready = true;
        }
    }

    /// Finalize the current window and return the stillness confidence.
    ///
    /// With fewer than 2 samples there is no variance estimate; the
    /// confidence is 0.0 (never NaN) and the mean falls back to the assumed
    /// mean, i.e. the only sample seen, or zero for an empty window.
    pub fn compute(&mut self) -> f32 {
        if self.win_count < 2 {
            self.mean = self.assumed_mean;
            self.variance = [0.0; 3];
            self.confidence = 0.0;
            return self.confidence;
        }

        let n = self.win_count as f32;
        let mut confidence = 1.0;
        for i in 0..3 {
            self.mean[i] = self.assumed_mean[i] + self.dev_sum[i] / n;
            let var = (self.dev_sum_sq[i] - self.dev_sum[i] * self.dev_sum[i] / n) / (n - 1.0);
            self.variance[i] = var.max(0.0);
            confidence *= self.axis_confidence(self.variance[i]);
        }
        self.confidence = confidence;
        confidence
    }

    /// Per-axis confidence: 1 below the band, 0 above it, linear in between
    fn axis_confidence(&self, variance: f32) -> f32 {
        let upper = self.config.var_threshold + self.config.confidence_delta;
        let lower = self.config.var_threshold - self.config.confidence_delta;

        if variance > upper {
            0.0
        } else if variance < lower {
            1.0
        } else if self.config.confidence_delta > 0.0 {
            (upper - variance) / (2.0 * self.config.confidence_delta)
        } else {
            // Degenerate band: hard threshold
            1.0
        }
    }

    /// Start a new window, snapshotting the finalized statistics as the
    /// previous generation.
    ///
    /// `reset_stats` additionally clears the long-horizon accumulators; pass
    /// `false` to extend a still period across consecutive windows.
    pub fn reset(&mut self, reset_stats: bool) {
        self.prev_mean = self.mean;
        self.prev_confidence = self.confidence;

        self.assumed_mean = [0.0; 3];
        self.dev_sum = [0.0; 3];
        self.dev_sum_sq = [0.0; 3];
        self.win_count = 0;
        self.window_start = 0;
        self.ready = false;

        if reset_stats {
            self.total_sum = [0.0; 3];
            self.total_count = 0;
        }
    }

    /// Mean of the last finalized window
    pub fn mean(&self) -> Vec3 {
        self.mean
    }

    /// Per-axis variance of the last finalized window
    pub fn variance(&self) -> Vec3 {
        self.variance
    }

    /// Confidence of the last finalized window, in [0, 1]
    pub fn confidence(&self) -> f32 {
        self.confidence
    }

    /// Mean snapshotted at the previous reset
    pub fn prev_mean(&self) -> Vec3 {
        self.prev_mean
    }

    /// Confidence snapshotted at the previous reset
    pub fn prev_confidence(&self) -> f32 {
        self.prev_confidence
    }

    /// Samples in the current window
    pub fn window_samples(&self) -> u32 {
        self.win_count
    }

    /// Mean over the long-horizon accumulators (spanning windows since the
    /// last stats reset); zero vector when empty.
    pub fn long_mean(&self) -> Vec3 {
        if self.total_count == 0 {
            return [0.0; 3];
        }
        let inv_n = 1.0 / self.total_count as f32;
        [
            self.total_sum[0] * inv_n,
            self.total_sum[1] * inv_n,
            self.total_sum[2] * inv_n,
        ]
    }

    /// Samples in the long-horizon accumulators
    pub fn long_count(&self) -> u32 {
        self.total_count
    }
}
