//! Spatial Diversity Gate
//!
//! ## Overview
//!
//! A sphere fit is only trustworthy when its input points spread over the
//! sphere. Points clustered on a patch - a phone lying flat on a desk while
//! the magnetometer streams - produce a linear system that is formally
//! solvable but geometrically meaningless. The diversity checker maintains a
//! bounded history of sufficiently-separated sample vectors and answers two
//! questions:
//!
//! 1. **Is the history diverse?** New samples are stored only when they keep
//!    a minimum distance to every stored vector, so the buffer fills only
//!    while the device actually rotates through orientations.
//! 2. **Does a candidate bias make the history spherical?** After removing a
//!    candidate bias, the per-point norms should be tightly grouped around
//!    the local field magnitude. Large norm variance or spread means the
//!    bias is wrong or the environment was magnetically disturbed.
//!
//! Samples farther from a stored vector than the maximum plausible distance
//! (just over the sphere diameter) indicate interference rather than
//! rotation; they are counted as violations and too many of them veto the
//! quality check.
//!
//! Both distance thresholds scale with the square of the local field
//! estimate, so one tuning works across the geomagnetic field range.

use heapless::Vec;

use crate::constants::physics::GEOMAGNETIC_FIELD_NOMINAL_UT;
use crate::matrix::Vec3;

/// Diversity checker tuning
#[derive(Debug, Clone, Copy)]
pub struct DiversityConfig {
    /// Minimum squared point separation, as a fraction of field²
    pub min_distance_fraction: f32,
    /// Maximum plausible squared separation, as a fraction of field².
    /// Two points on a sphere of radius R are at most 2R apart, so values
    /// slightly above 4.0 tolerate noise without admitting interference.
    pub max_distance_fraction: f32,
    /// Points required before a quality verdict is meaningful
    pub min_num_points: usize,
    /// Max-distance violations tolerated before the history is suspect
    pub max_violations: u32,
    /// Acceptance limit for the variance of de-biased point norms
    pub norm_var_limit: f32,
    /// Fail-fast limit for the max−min spread of de-biased point norms
    pub norm_spread_limit: f32,
}

impl Default for DiversityConfig {
    fn default() -> Self {
        Self {
            // ~8.7% of the field magnitude between stored points
            min_distance_fraction: 0.0075,
            // 10% margin over the sphere diameter
            max_distance_fraction: 4.84,
            min_num_points: 8,
            max_violations: 1,
            norm_var_limit: 2.0,
            norm_spread_limit: 10.0,
        }
    }
}

/// Bounded history of spatially-diverse sample vectors
#[derive(Debug, Clone)]
pub struct DiversityChecker<const N: usize> {
    config: DiversityConfig,
    points: Vec<Vec3, N>,
    violation_count: u32,
    min_distance_sq: f32,
    max_distance_sq: f32,
}

impl<const N: usize> DiversityChecker<N> {
    /// Create a checker with thresholds seeded from the nominal
    /// geomagnetic field
    pub fn new(config: DiversityConfig) -> Self {
        let mut checker = Self {
            config,
            points: Vec::new(),
            violation_count: 0,
            min_distance_sq: 0.0,
            max_distance_sq: 0.0,
        };
        checker.local_field_update(GEOMAGNETIC_FIELD_NOMINAL_UT);
        checker
    }

    /// Offer a sample vector to the history.
    ///
    /// The first sample is always accepted. Later samples are stored only if
    /// they keep the minimum distance to every stored vector; a sample beyond
    /// the maximum plausible distance counts as an interference violation
    /// instead. Once full the buffer is append-only until [`Self::reset`].
    pub fn update(&mut self, v: &Vec3) {
        if self.points.is_full() {
            return;
        }

        for p in self.points.iter() {
            let d = [v[0] - p[0], v[1] - p[1], v[2] - p[2]];
            let dist_sq = d[0] * d[0] + d[1] * d[1] + d[2] * d[2];

            if dist_sq < self.min_distance_sq {
                return; // too close to an existing point, not diverse
            }
            if dist_sq > self.max_distance_sq {
                self.violation_count += 1;
                return;
            }
        }

        // Capacity was checked above
        let _ = self.points.push(*v);
    }

    /// Rescale both distance thresholds for a new local field estimate.
    ///
    /// A non-positive field (uninitialized caller state) is coerced to 1 so
    /// the thresholds stay usable.
    pub fn local_field_update(&mut self, field: f32) {
        let field = if field <= 0.0 { 1.0 } else { field };
        let field_sq = field * field;
        self.min_distance_sq = self.config.min_distance_fraction * field_sq;
        self.max_distance_sq = self.config.max_distance_fraction * field_sq;
    }

    /// Check whether `bias` centers the stored history on a sphere.
    ///
    /// Requires the minimum point count and a violation count under the
    /// ceiling. Scans de-biased norms, failing fast when the max−min spread
    /// exceeds its limit; passes only when the norm variance is below the
    /// configured limit.
    pub fn norm_quality(&self, bias: &Vec3) -> bool {
        if self.points.len() < self.config.min_num_points {
            return false;
        }
        if self.violation_count > self.config.max_violations {
            return false;
        }

        let mut sum = 0.0;
        let mut sum_sq = 0.0;
        let mut min_norm = f32::INFINITY;
        let mut max_norm = 0.0f32;

        for p in self.points.iter() {
            let d = [p[0] - bias[0], p[1] - bias[1], p[2] - bias[2]];
            let n = libm::sqrtf(d[0] * d[0] + d[1] * d[1] + d[2] * d[2]);

            min_norm = min_norm.min(n);
            max_norm = max_norm.max(n);
            if max_norm - min_norm > self.config.norm_spread_limit {
                return false;
            }

            sum += n;
            sum_sq += n * n;
        }

        let count = self.points.len() as f32;
        let mean = sum / count;
        let variance = (sum_sq / count - mean * mean).max(0.0);

        variance < self.config.norm_var_limit
    }

    /// Number of stored diverse vectors
    pub fn count(&self) -> usize {
        self.points.len()
    }

    /// True once the history reached its fixed capacity
    pub fn is_full(&self) -> bool {
        self.points.is_full()
    }

    /// Max-distance violations seen since the last reset
    pub fn violations(&self) -> u32 {
        self.violation_count
    }

    /// Clear the history and the violation counter
    pub fn reset(&mut self) {
        self.points.clear();
        self.violation_count = 0;
    }
}
