//! Over-Temperature Bias Compensation
//!
//! ## Overview
//!
//! Gyroscope (and to a lesser degree accelerometer) bias drifts with die
//! temperature. Stillness-based calibration can only measure the bias at
//! whatever temperature the device happens to be still at; this model fills
//! the gaps by learning bias as a function of temperature and answering
//! "what is the bias *right now*" whenever the temperature moves.
//!
//! ## Model Structure
//!
//! - A fixed-capacity, unordered set of `(offset, temperature, timestamp)`
//!   points, at most one per temperature bin of configurable width. A new
//!   estimate in an occupied bin replaces that bin's point; a new bin evicts
//!   the globally oldest point once the set is full.
//! - A per-axis linear model `offset ≈ slope·temp + intercept`, refit by
//!   age-weighted least squares after every accepted point. The model starts
//!   in an explicit *initial* state and only leaves it when a fit produces
//!   in-bounds parameters.
//! - Bounds-checked indices for the most-recently-updated point and the
//!   nearest-temperature point; the nearest index is recomputed by linear
//!   scan on demand and both are invalidated on eviction.
//!
//! ## Compensation Priority
//!
//! For the current temperature, in order:
//!
//! 1. No stored points: linear model alone (or hold the cached value).
//! 2. Fresh latest point: latest offset plus a model-slope extrapolation for
//!    the temperature delta.
//! 3. Nearest point within one bin width: same extrapolation, with a jump
//!    check against the model (or the cached value) - a stored point that
//!    disagrees sharply with the trend is bypassed in favor of the model.
//! 4. Otherwise: the model if the data is stale, else a slope extrapolation
//!    of the cached value.
//!
//! A periodic staleness sweep evicts points past the age limit (never
//! emptying the set entirely) and refits when anything was removed.

use heapless::Vec;

use crate::constants::physics::{OPERATING_TEMP_MAX_C, OPERATING_TEMP_MIN_C};
use crate::constants::time::{NS_PER_HOUR, NS_PER_MIN};
use crate::errors::{CalError, CalResult};
use crate::matrix::Vec3;
use crate::telemetry::{NoTelemetry, TelemetryHook};
use crate::time::{elapsed, Duration, Timestamp};

/// Fixed capacity of the model point set
pub const OVERTEMP_MAX_POINTS: usize = 20;

/// Age → regression weight lookup, newest first. Points older than the last
/// entry get [`WEIGHT_FLOOR`].
const WEIGHT_TABLE: [(Duration, f32); 4] = [
    (5 * NS_PER_MIN, 100.0),
    (15 * NS_PER_MIN, 25.0),
    (NS_PER_HOUR, 10.0),
    (12 * NS_PER_HOUR, 4.0),
];

/// Weight for points older than every table entry
const WEIGHT_FLOOR: f32 = 1.0;

/// Minimum weighted temperature spread for a solvable regression
const MIN_TEMP_SPREAD: f32 = 1e-4;

/// One stored model point
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct OverTempModelPoint {
    /// Bias estimate at this temperature
    pub offset: Vec3,
    /// Die temperature of the estimate (°C)
    pub temperature: f32,
    /// When the estimate was made
    pub timestamp: Timestamp,
}

/// Over-temperature model configuration
#[derive(Debug, Clone, Copy)]
pub struct OverTempConfig {
    /// Temperature bin width (°C); one stored point per bin
    pub bin_width_c: f32,
    /// Valid die temperature range (°C); estimates outside it are dropped
    pub min_temp_c: f32,
    /// Upper edge of the valid range (°C)
    pub max_temp_c: f32,
    /// Per-axis limit on a new estimate's deviation from the model
    pub outlier_limit: f32,
    /// Consecutive outlier rejections before rejection is suspended
    pub max_outlier_rejections: u32,
    /// Points older than this are swept away
    pub age_limit: Duration,
    /// Window in which the latest point counts as fresh
    pub recent_window: Duration,
    /// Per-axis tolerance for the nearest-point jump check
    pub jump_tolerance: f32,
    /// Absolute bound on an accepted slope (units per °C)
    pub max_slope: f32,
    /// Absolute bound on an accepted intercept
    pub max_intercept: f32,
    /// Minimum interval between staleness sweeps
    pub stale_check_interval: Duration,
    /// Points required before a regression is attempted
    pub min_fit_points: usize,
}

impl Default for OverTempConfig {
    fn default() -> Self {
        Self {
            bin_width_c: 5.0,
            min_temp_c: OPERATING_TEMP_MIN_C,
            max_temp_c: OPERATING_TEMP_MAX_C,
            outlier_limit: 0.03,
            max_outlier_rejections: 3,
            age_limit: 12 * NS_PER_HOUR,
            recent_window: 5 * NS_PER_MIN,
            jump_tolerance: 0.01,
            max_slope: 2e-3,
            max_intercept: 0.25,
            stale_check_interval: NS_PER_MIN,
            min_fit_points: 2,
        }
    }
}

/// Over-temperature compensation model
pub struct OverTempCompensator<H: TelemetryHook = NoTelemetry> {
    config: OverTempConfig,
    points: Vec<OverTempModelPoint, OVERTEMP_MAX_POINTS>,

    slope: Vec3,
    intercept: Vec3,
    /// True until the first accepted fit or restored model
    initial: bool,

    latest_idx: Option<usize>,
    nearest_idx: Option<usize>,
    outlier_rejections: u32,

    // Compensated-offset cache
    comp_offset: Vec3,
    comp_temp: f32,
    comp_time: Timestamp,

    current_temp: f32,
    have_temp: bool,
    last_sweep: Timestamp,

    hook: H,
}

impl OverTempCompensator<NoTelemetry> {
    /// Create a model with no telemetry
    pub fn new(config: OverTempConfig) -> Self {
        Self::with_telemetry(config, NoTelemetry)
    }
}

impl<H: TelemetryHook> OverTempCompensator<H> {
    /// Create a model that reports events to `hook`
    pub fn with_telemetry(config: OverTempConfig, hook: H) -> Self {
        Self {
            config,
            points: Vec::new(),
            slope: [0.0; 3],
            intercept: [0.0; 3],
            initial: true,
            latest_idx: None,
            nearest_idx: None,
            outlier_rejections: 0,
            comp_offset: [0.0; 3],
            comp_temp: 0.0,
            comp_time: 0,
            current_temp: 0.0,
            have_temp: false,
            last_sweep: 0,
            hook,
        }
    }

    /// Ingest a new `(offset, temperature)` estimate from a calibration
    /// engine.
    ///
    /// Out-of-range temperatures, non-finite offsets, and model outliers are
    /// dropped silently - a bad estimate must never make the stored set
    /// worse. Accepted estimates replace their temperature bin's point (or
    /// claim a new bin, evicting the globally oldest point when full) and
    /// trigger a model refit.
    pub fn update(&mut self, timestamp: Timestamp, offset: &Vec3, temp_c: f32) {
        if !temp_c.is_finite() || temp_c < self.config.min_temp_c || temp_c > self.config.max_temp_c
        {
            return;
        }
        if offset.iter().any(|v| !v.is_finite()) {
            return;
        }

        // Outlier rejection against the current model, with a bounded
        // consecutive-rejection count so a genuine regime change cannot be
        // locked out forever
        if !self.initial && self.is_outlier(offset, temp_c) {
            if self.outlier_rejections < self.config.max_outlier_rejections {
                self.outlier_rejections += 1;
                return;
            }
            // Rejection suspended: fall through and accept
        }
        self.outlier_rejections = 0;

        self.store_point(timestamp, offset, temp_c);
        self.refit(timestamp);

        self.current_temp = temp_c;
        self.have_temp = true;
        self.compute_offset(timestamp);
    }

    /// Temperature-only update, decoupled from offset estimates.
    ///
    /// Runs the staleness sweep when due and refreshes the compensated
    /// offset for the new temperature.
    pub fn set_temperature(&mut self, timestamp: Timestamp, temp_c: f32) {
        if !temp_c.is_finite() {
            return;
        }
        self.current_temp = temp_c;
        self.have_temp = true;

        if elapsed(timestamp, self.last_sweep) >= self.config.stale_check_interval {
            self.sweep_stale(timestamp);
        }

        self.compute_offset(timestamp);
    }

    /// Current temperature-compensated offset
    pub fn offset(&self) -> Vec3 {
        self.comp_offset
    }

    /// Temperature the cached offset was computed for
    pub fn offset_temperature(&self) -> f32 {
        self.comp_temp
    }

    /// Per-axis model slope (units per °C); zero while initial
    pub fn slope(&self) -> Vec3 {
        self.slope
    }

    /// Per-axis model intercept; zero while initial
    pub fn intercept(&self) -> Vec3 {
        self.intercept
    }

    /// True until a fit has succeeded or a model was restored
    pub fn is_initial(&self) -> bool {
        self.initial
    }

    /// Number of stored model points
    pub fn point_count(&self) -> usize {
        self.points.len()
    }

    /// Restore previously persisted model parameters
    pub fn set_model(&mut self, slope: Vec3, intercept: Vec3) -> CalResult<()> {
        for i in 0..3 {
            if !slope[i].is_finite() || !intercept[i].is_finite() {
                return Err(CalError::InvalidValue);
            }
            if libm::fabsf(slope[i]) > self.config.max_slope {
                return Err(CalError::OutOfRange {
                    value: slope[i],
                    min: -self.config.max_slope,
                    max: self.config.max_slope,
                });
            }
            if libm::fabsf(intercept[i]) > self.config.max_intercept {
                return Err(CalError::OutOfRange {
                    value: intercept[i],
                    min: -self.config.max_intercept,
                    max: self.config.max_intercept,
                });
            }
        }
        self.slope = slope;
        self.intercept = intercept;
        self.initial = false;
        Ok(())
    }

    /// Bulk-restore the stored point set (host persistence seam)
    pub fn set_model_data(
        &mut self,
        data: &[OverTempModelPoint],
        timestamp: Timestamp,
    ) -> CalResult<()> {
        if data.len() > OVERTEMP_MAX_POINTS {
            return Err(CalError::CapacityExceeded {
                requested: data.len(),
                capacity: OVERTEMP_MAX_POINTS,
            });
        }
        for p in data {
            if !p.temperature.is_finite() || p.offset.iter().any(|v| !v.is_finite()) {
                return Err(CalError::InvalidValue);
            }
            if p.temperature < self.config.min_temp_c || p.temperature > self.config.max_temp_c {
                return Err(CalError::OutOfRange {
                    value: p.temperature,
                    min: self.config.min_temp_c,
                    max: self.config.max_temp_c,
                });
            }
        }

        self.points.clear();
        for p in data {
            // Capacity verified above
            let _ = self.points.push(*p);
        }
        self.nearest_idx = None;
        self.latest_idx = self.find_latest();
        self.refit(timestamp);
        Ok(())
    }

    /// Copy the stored point set into `out`; returns the point count
    pub fn get_model_data(&self, out: &mut [OverTempModelPoint; OVERTEMP_MAX_POINTS]) -> usize {
        for (i, p) in self.points.iter().enumerate() {
            out[i] = *p;
        }
        self.points.len()
    }

    // ===== INTERNALS =====

    fn predict(&self, axis: usize, temp_c: f32) -> f32 {
        self.slope[axis] * temp_c + self.intercept[axis]
    }

    fn is_outlier(&self, offset: &Vec3, temp_c: f32) -> bool {
        (0..3).any(|i| libm::fabsf(offset[i] - self.predict(i, temp_c)) > self.config.outlier_limit)
    }

    /// Replace the matching bin's point, or claim a new slot (evicting the
    /// globally oldest point when full)
    fn store_point(&mut self, timestamp: Timestamp, offset: &Vec3, temp_c: f32) {
        let point = OverTempModelPoint {
            offset: *offset,
            temperature: temp_c,
            timestamp,
        };

        // Newest valid estimate wins within a bin
        for (i, p) in self.points.iter_mut().enumerate() {
            if libm::fabsf(p.temperature - temp_c) < self.config.bin_width_c {
                *p = point;
                self.latest_idx = Some(i);
                self.nearest_idx = None;
                return;
            }
        }

        if !self.points.is_full() {
            let _ = self.points.push(point);
            self.latest_idx = Some(self.points.len() - 1);
            self.nearest_idx = None;
            return;
        }

        // Evict the globally oldest point; overwriting in place keeps the
        // other indices valid
        let mut oldest = 0;
        for (i, p) in self.points.iter().enumerate() {
            if p.timestamp < self.points[oldest].timestamp {
                oldest = i;
            }
        }
        self.hook.point_evicted(self.points[oldest].temperature);
        self.points[oldest] = point;
        self.latest_idx = Some(oldest);
        self.nearest_idx = None;
    }

    fn weight_for_age(age: Duration) -> f32 {
        for (limit, weight) in WEIGHT_TABLE {
            if age < limit {
                return weight;
            }
        }
        WEIGHT_FLOOR
    }

    /// Age-weighted per-axis linear regression over the stored points.
    ///
    /// Standard two-pass mean-corrected form: weighted means first, then
    /// slope from the weighted central moments. Each axis accepts its new
    /// parameters only when both land inside the configured bounds;
    /// a rejected axis keeps its previous values.
    fn refit(&mut self, now: Timestamp) {
        if self.points.len() < self.config.min_fit_points {
            return;
        }

        let mut weight_sum = 0.0;
        let mut temp_mean = 0.0;
        let mut offset_mean = [0.0f32; 3];
        for p in self.points.iter() {
            let w = Self::weight_for_age(elapsed(now, p.timestamp));
            weight_sum += w;
            temp_mean += w * p.temperature;
            for i in 0..3 {
                offset_mean[i] += w * p.offset[i];
            }
        }
        temp_mean /= weight_sum;
        for m in offset_mean.iter_mut() {
            *m /= weight_sum;
        }

        let mut spread = 0.0;
        let mut cross = [0.0f32; 3];
        for p in self.points.iter() {
            let w = Self::weight_for_age(elapsed(now, p.timestamp));
            let dt = p.temperature - temp_mean;
            spread += w * dt * dt;
            for i in 0..3 {
                cross[i] += w * dt * (p.offset[i] - offset_mean[i]);
            }
        }

        if spread < MIN_TEMP_SPREAD {
            // All points in one temperature regime: nothing to regress
            return;
        }

        let mut accepted_any = false;
        for i in 0..3 {
            let slope = cross[i] / spread;
            let intercept = offset_mean[i] - slope * temp_mean;

            if libm::fabsf(slope) <= self.config.max_slope
                && libm::fabsf(intercept) <= self.config.max_intercept
            {
                self.slope[i] = slope;
                self.intercept[i] = intercept;
                accepted_any = true;
            }
        }

        if accepted_any {
            self.initial = false;
        }
        self.hook.model_refit(accepted_any);

        #[cfg(feature = "log")]
        log::debug!(
            "overtemp refit over {} points, accepted: {}",
            self.points.len(),
            accepted_any
        );
    }

    /// Index of the stored point nearest to the current temperature
    fn find_nearest(&self, temp_c: f32) -> Option<usize> {
        let mut best: Option<(usize, f32)> = None;
        for (i, p) in self.points.iter().enumerate() {
            let d = libm::fabsf(p.temperature - temp_c);
            if best.map_or(true, |(_, bd)| d < bd) {
                best = Some((i, d));
            }
        }
        best.map(|(i, _)| i)
    }

    fn find_latest(&self) -> Option<usize> {
        let mut best: Option<usize> = None;
        for (i, p) in self.points.iter().enumerate() {
            if best.map_or(true, |b| p.timestamp > self.points[b].timestamp) {
                best = Some(i);
            }
        }
        best
    }

    /// Evaluate the compensation priority chain for the current temperature
    fn compute_offset(&mut self, now: Timestamp) {
        if !self.have_temp {
            return;
        }
        let temp = self.current_temp;

        // Priority 1: no data at all
        if self.points.is_empty() {
            if !self.initial {
                for i in 0..3 {
                    self.comp_offset[i] = self.predict(i, temp);
                }
                self.comp_temp = temp;
                self.comp_time = now;
            }
            // No model either: hold whatever the cache has
            return;
        }

        // Priority 2: fresh latest point plus slope extrapolation
        if let Some(idx) = self.latest_idx {
            let latest = self.points[idx];
            if elapsed(now, latest.timestamp) < self.config.recent_window {
                for i in 0..3 {
                    self.comp_offset[i] =
                        latest.offset[i] + self.slope[i] * (temp - latest.temperature);
                }
                self.comp_temp = temp;
                self.comp_time = now;
                return;
            }
        }

        // Priority 3: nearest point within one bin width, with jump check
        self.nearest_idx = self.find_nearest(temp);
        if let Some(idx) = self.nearest_idx {
            let nearest = self.points[idx];
            if libm::fabsf(nearest.temperature - temp) < self.config.bin_width_c {
                let mut candidate = [0.0f32; 3];
                for i in 0..3 {
                    candidate[i] = nearest.offset[i] + self.slope[i] * (temp - nearest.temperature);
                }

                let jump = (0..3).any(|i| {
                    let reference = if !self.initial {
                        self.predict(i, temp)
                    } else {
                        self.comp_offset[i]
                    };
                    libm::fabsf(candidate[i] - reference) > self.config.jump_tolerance
                });

                if jump {
                    // Stored point disagrees with the trend: trust the model
                    if !self.initial {
                        for i in 0..3 {
                            self.comp_offset[i] = self.predict(i, temp);
                        }
                        self.comp_temp = temp;
                        self.comp_time = now;
                    }
                    // Initial model: keep the cached value unchanged
                } else {
                    self.comp_offset = candidate;
                    self.comp_temp = temp;
                    self.comp_time = now;
                }
                return;
            }
        }

        // Priority 4: stale data falls back to the model, otherwise
        // extrapolate the cached value
        let latest_age = self
            .latest_idx
            .map(|i| elapsed(now, self.points[i].timestamp))
            .unwrap_or(Duration::MAX);

        if latest_age > self.config.age_limit {
            if !self.initial {
                for i in 0..3 {
                    self.comp_offset[i] = self.predict(i, temp);
                }
                self.comp_temp = temp;
                self.comp_time = now;
            }
        } else {
            for i in 0..3 {
                self.comp_offset[i] += self.slope[i] * (temp - self.comp_temp);
            }
            self.comp_temp = temp;
            self.comp_time = now;
        }
    }

    /// Evict points past the age limit, never emptying the set entirely,
    /// and refit when anything was removed
    fn sweep_stale(&mut self, now: Timestamp) {
        self.last_sweep = now;

        let mut removed = false;
        loop {
            if self.points.len() <= 1 {
                break;
            }
            let mut stale: Option<usize> = None;
            let newest = self.find_latest();
            for (i, p) in self.points.iter().enumerate() {
                if Some(i) != newest && elapsed(now, p.timestamp) > self.config.age_limit {
                    stale = Some(i);
                    break;
                }
            }
            let Some(idx) = stale else { break };
            self.hook.point_evicted(self.points[idx].temperature);
            self.points.swap_remove(idx);
            removed = true;
        }

        if removed {
            // swap_remove reshuffled the storage: rebuild both indices
            self.latest_idx = self.find_latest();
            self.nearest_idx = None;
            self.refit(now);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::time::NS_PER_SEC;

    fn model() -> OverTempCompensator {
        OverTempCompensator::new(OverTempConfig::default())
    }

    #[test]
    fn two_points_recover_flat_model() {
        let mut m = model();
        m.update(0, &[0.0; 3], 10.0);
        assert!(m.is_initial()); // one point cannot regress

        m.update(NS_PER_SEC, &[0.0; 3], 30.0);
        assert!(!m.is_initial());
        assert_eq!(m.point_count(), 2);

        for i in 0..3 {
            assert!(m.slope()[i].abs() < 1e-6);
            assert!(m.intercept()[i].abs() < 1e-6);
        }
    }

    #[test]
    fn sloped_data_recovers_slope() {
        let mut m = model();
        // offset = 1e-4 · temp on x, flat elsewhere
        for (k, temp) in [10.0f32, 20.0, 30.0, 40.0].iter().enumerate() {
            m.update(k as u64 * NS_PER_SEC, &[1e-4 * temp, 0.0, 0.0], *temp);
        }

        assert!(!m.is_initial());
        assert!((m.slope()[0] - 1e-4).abs() < 1e-6, "slope {}", m.slope()[0]);
        assert!(m.intercept()[0].abs() < 1e-5);
    }

    #[test]
    fn outlier_rejected_and_count_unchanged() {
        let mut m = model();
        m.update(0, &[0.0; 3], 10.0);
        m.update(NS_PER_SEC, &[0.0; 3], 30.0);
        assert_eq!(m.point_count(), 2);

        // Violates the 0.03 outlier limit against the flat model
        m.update(2 * NS_PER_SEC, &[1000.0, 0.0, 0.0], 25.0);
        assert_eq!(m.point_count(), 2);
    }

    #[test]
    fn consecutive_rejections_eventually_suspend() {
        let mut m = model();
        m.update(0, &[0.0; 3], 10.0);
        m.update(NS_PER_SEC, &[0.0; 3], 30.0);

        // Three rejections, then rejection suspends and the fourth lands
        for k in 0..4u64 {
            m.update((2 + k) * NS_PER_SEC, &[0.05, 0.0, 0.0], 50.0);
        }
        assert_eq!(m.point_count(), 3);
    }

    #[test]
    fn same_bin_keeps_newest() {
        let mut m = model();
        m.update(100, &[0.001, 0.0, 0.0], 22.0);
        m.update(200, &[0.002, 0.0, 0.0], 23.5); // same 5 °C bin

        assert_eq!(m.point_count(), 1);
        let mut out = [OverTempModelPoint {
            offset: [0.0; 3],
            temperature: 0.0,
            timestamp: 0,
        }; OVERTEMP_MAX_POINTS];
        let n = m.get_model_data(&mut out);
        assert_eq!(n, 1);
        assert_eq!(out[0].timestamp, 200);
        assert_eq!(out[0].offset[0], 0.002);
    }

    #[test]
    fn full_set_evicts_globally_oldest() {
        let mut m = model();
        // 21 distinct bins from -38 °C upward, oldest first
        for k in 0..=OVERTEMP_MAX_POINTS as u64 {
            let temp = -38.0 + (k as f32) * 6.0;
            m.update(k * NS_PER_SEC, &[0.0; 3], temp);
        }

        assert_eq!(m.point_count(), OVERTEMP_MAX_POINTS);
        let mut out = [OverTempModelPoint {
            offset: [0.0; 3],
            temperature: 0.0,
            timestamp: 0,
        }; OVERTEMP_MAX_POINTS];
        let n = m.get_model_data(&mut out);
        // The t=0 point at -38 °C is gone
        assert!(out[..n].iter().all(|p| p.timestamp != 0));
    }

    #[test]
    fn fresh_latest_point_drives_compensation() {
        let mut m = model();
        m.update(0, &[0.004, 0.0, 0.0], 20.0);
        m.update(NS_PER_SEC, &[0.004, 0.0, 0.0], 40.0);

        // Seconds later (well within the freshness window) at a new temp:
        // flat model slope → offset equals the latest point's offset
        m.set_temperature(2 * NS_PER_SEC, 30.0);
        assert!((m.offset()[0] - 0.004).abs() < 1e-6);
        assert_eq!(m.offset_temperature(), 30.0);
    }

    #[test]
    fn jump_to_model_when_nearest_point_disagrees() {
        let mut m = model();
        // Stored history: two on-trend points plus one that sits within the
        // outlier limit but past the jump tolerance
        let points = [
            OverTempModelPoint { offset: [0.0; 3], temperature: 10.0, timestamp: 10 },
            OverTempModelPoint { offset: [0.0; 3], temperature: 30.0, timestamp: 20 },
            OverTempModelPoint { offset: [0.02, 0.0, 0.0], temperature: 50.0, timestamp: 30 },
        ];
        assert!(m.set_model_data(&points, 40).is_ok());
        // Pin the established model to the known flat trend
        assert!(m.set_model([0.0; 3], [0.0; 3]).is_ok());

        // Long after freshness lapsed, query near the disagreeing point
        m.set_temperature(6 * NS_PER_MIN, 49.0);

        // The nearest point's raw extrapolation (0.02) jumps away from the
        // model prediction (0.0) by more than the tolerance, so the model
        // wins
        assert!(m.offset()[0].abs() < 1e-6, "offset {}", m.offset()[0]);
        assert!((m.offset()[0] - 0.02).abs() > 5e-3);
    }

    #[test]
    fn empty_set_uses_restored_model() {
        let mut m = model();
        assert!(m.set_model([1e-4, 0.0, 0.0], [0.01, 0.0, 0.0]).is_ok());

        m.set_temperature(0, 20.0);
        assert!((m.offset()[0] - (1e-4 * 20.0 + 0.01)).abs() < 1e-6);
    }

    #[test]
    fn set_model_validates_bounds() {
        let mut m = model();
        assert!(matches!(
            m.set_model([1.0, 0.0, 0.0], [0.0; 3]),
            Err(CalError::OutOfRange { .. })
        ));
        assert!(matches!(
            m.set_model([f32::NAN, 0.0, 0.0], [0.0; 3]),
            Err(CalError::InvalidValue)
        ));
        assert!(m.is_initial());
    }

    #[test]
    fn stale_sweep_keeps_at_least_one_point() {
        let mut m = model();
        m.update(0, &[0.0; 3], 10.0);
        m.update(NS_PER_SEC, &[0.0; 3], 30.0);

        // Far past the 12 h age limit
        let later = 13 * NS_PER_HOUR;
        m.set_temperature(later, 20.0);

        assert_eq!(m.point_count(), 1);
        let mut out = [OverTempModelPoint {
            offset: [0.0; 3],
            temperature: 0.0,
            timestamp: 0,
        }; OVERTEMP_MAX_POINTS];
        m.get_model_data(&mut out);
        // The newest point survived
        assert_eq!(out[0].timestamp, NS_PER_SEC);
    }

    #[test]
    fn model_data_round_trip() {
        let mut m = model();
        let points = [
            OverTempModelPoint { offset: [0.001, 0.0, 0.0], temperature: 15.0, timestamp: 10 },
            OverTempModelPoint { offset: [0.002, 0.0, 0.0], temperature: 35.0, timestamp: 20 },
        ];
        assert!(m.set_model_data(&points, 30).is_ok());
        assert_eq!(m.point_count(), 2);
        assert!(!m.is_initial());

        let mut out = [OverTempModelPoint {
            offset: [0.0; 3],
            temperature: 0.0,
            timestamp: 0,
        }; OVERTEMP_MAX_POINTS];
        let n = m.get_model_data(&mut out);
        assert_eq!(n, 2);
        assert_eq!(out[..2], points);
    }

    #[test]
    fn set_model_data_rejects_bad_points() {
        let mut m = model();
        let bad_temp = [OverTempModelPoint {
            offset: [0.0; 3],
            temperature: 300.0,
            timestamp: 0,
        }];
        assert!(matches!(
            m.set_model_data(&bad_temp, 0),
            Err(CalError::OutOfRange { .. })
        ));

        let bad_offset = [OverTempModelPoint {
            offset: [f32::NAN, 0.0, 0.0],
            temperature: 20.0,
            timestamp: 0,
        }];
        assert!(matches!(
            m.set_model_data(&bad_offset, 0),
            Err(CalError::InvalidValue)
        ));
    }
}
