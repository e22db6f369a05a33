//! Closed-Form Sphere Fit (Kasa Method)
//!
//! ## Overview
//!
//! Online least-squares sphere fit via linear normal equations. Expanding
//! `(x−cx)² + (y−cy)² + (z−cz)² = r²` makes the squared norm
//! `w = x² + y² + z²` linear in four unknowns:
//!
//! ```text
//! w = 2·cx·x + 2·cy·y + 2·cz·z + (r² − ‖c‖²)
//! ```
//!
//! so the fit reduces to one 4×4 solve over running moment sums - no
//! iteration, no stored samples. The accumulator keeps the sums of products
//! up to second moment among (x, y, z) and the norm-squared pseudo-variable
//! `w`, which is everything the normal equations and the covariance gate
//! need.
//!
//! The method is exact for noise-free data on a sphere and is the standard
//! seed for the nonlinear refinement in [`crate::sphere_fit`].
//!
//! ## Degeneracy
//!
//! Samples concentrated on a small patch of the sphere make the normal
//! equations nearly singular. The LU solve rejects the singular case, the
//! caller-supplied radius band rejects the nearly-singular one (absurdly
//! small or large fitted radius), and the engines additionally gate on the
//! eigenvalue spread of [`KasaAccumulator::covariance`].

use crate::matrix::{lu_decompose, lu_solve, Mat3, Mat4, Vec3};

/// Result of a successful sphere fit
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SphereFitResult {
    /// Fitted sphere center (the bias estimate)
    pub center: Vec3,
    /// Fitted sphere radius
    pub radius: f32,
}

/// Running moment sums for the Kasa fit
///
/// Mutated incrementally per accepted sample; consumed (after normalization
/// by the sample count) by [`KasaAccumulator::fit`]. Reset to zero after
/// every fit attempt by the owning engine.
#[derive(Debug, Clone, Copy, Default)]
pub struct KasaAccumulator {
    // First moments
    acc_x: f32,
    acc_y: f32,
    acc_z: f32,
    acc_w: f32,
    // Second moments among x, y, z and against w
    acc_xx: f32,
    acc_xy: f32,
    acc_xz: f32,
    acc_xw: f32,
    acc_yy: f32,
    acc_yz: f32,
    acc_yw: f32,
    acc_zz: f32,
    acc_zw: f32,
    count: u32,
}

impl KasaAccumulator {
    /// Create an empty accumulator
    pub const fn new() -> Self {
        Self {
            acc_x: 0.0,
            acc_y: 0.0,
            acc_z: 0.0,
            acc_w: 0.0,
            acc_xx: 0.0,
            acc_xy: 0.0,
            acc_xz: 0.0,
            acc_xw: 0.0,
            acc_yy: 0.0,
            acc_yz: 0.0,
            acc_yw: 0.0,
            acc_zz: 0.0,
            acc_zw: 0.0,
            count: 0,
        }
    }

    /// Fold one sample into the moment sums
    pub fn update(&mut self, v: &Vec3) {
        let (x, y, z) = (v[0], v[1], v[2]);
        let w = x * x + y * y + z * z;

        self.acc_x += x;
        self.acc_y += y;
        self.acc_z += z;
        self.acc_w += w;

        self.acc_xx += x * x;
        self.acc_xy += x * y;
        self.acc_xz += x * z;
        self.acc_xw += x * w;
        self.acc_yy += y * y;
        self.acc_yz += y * z;
        self.acc_yw += y * w;
        self.acc_zz += z * z;
        self.acc_zw += z * w;

        self.count += 1;
    }

    /// Number of accumulated samples
    pub fn count(&self) -> u32 {
        self.count
    }

    /// Clear all sums and the sample count
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Solve the normal equations and return center/radius.
    ///
    /// Declares success only when the system is non-singular and the fitted
    /// radius lies inside `[min_radius, max_radius]`; anything else returns
    /// `None` and the caller defers to the next accumulation cycle.
    pub fn fit(&self, min_radius: f32, max_radius: f32) -> Option<SphereFitResult> {
        // Four unknowns need at least four samples
        if self.count < 4 {
            return None;
        }
        let inv_n = 1.0 / self.count as f32;

        // Normalized normal equations over the basis (x, y, z, 1)
        let mx = self.acc_x * inv_n;
        let my = self.acc_y * inv_n;
        let mz = self.acc_z * inv_n;

        let mut a: Mat4 = [
            [self.acc_xx * inv_n, self.acc_xy * inv_n, self.acc_xz * inv_n, mx],
            [self.acc_xy * inv_n, self.acc_yy * inv_n, self.acc_yz * inv_n, my],
            [self.acc_xz * inv_n, self.acc_yz * inv_n, self.acc_zz * inv_n, mz],
            [mx, my, mz, 1.0],
        ];
        let b = [
            self.acc_xw * inv_n,
            self.acc_yw * inv_n,
            self.acc_zw * inv_n,
            self.acc_w * inv_n,
        ];

        let mut pivot = [0usize; 4];
        if !lu_decompose(&mut a, &mut pivot) {
            return None;
        }

        let mut beta = [0.0; 4];
        lu_solve(&a, &pivot, &b, &mut beta);

        let center = [beta[0] * 0.5, beta[1] * 0.5, beta[2] * 0.5];
        let radius_sq = beta[3]
            + center[0] * center[0]
            + center[1] * center[1]
            + center[2] * center[2];
        if radius_sq <= 0.0 {
            return None;
        }
        let radius = libm::sqrtf(radius_sq);

        if radius < min_radius || radius > max_radius {
            return None;
        }

        Some(SphereFitResult { center, radius })
    }

    /// Sample covariance of the accumulated vectors: E[vvᵀ] − μμᵀ
    ///
    /// The engines eigendecompose this to verify spatial spread before
    /// trusting a fit. `None` until at least two samples exist.
    pub fn covariance(&self) -> Option<Mat3> {
        if self.count < 2 {
            return None;
        }
        let inv_n = 1.0 / self.count as f32;
        let mean = [self.acc_x * inv_n, self.acc_y * inv_n, self.acc_z * inv_n];

        let mut cov: Mat3 = [[0.0; 3]; 3];
        cov[0][0] = self.acc_xx * inv_n - mean[0] * mean[0];
        cov[0][1] = self.acc_xy * inv_n - mean[0] * mean[1];
        cov[0][2] = self.acc_xz * inv_n - mean[0] * mean[2];
        cov[1][1] = self.acc_yy * inv_n - mean[1] * mean[1];
        cov[1][2] = self.acc_yz * inv_n - mean[1] * mean[2];
        cov[2][2] = self.acc_zz * inv_n - mean[2] * mean[2];
        cov[1][0] = cov[0][1];
        cov[2][0] = cov[0][2];
        cov[2][1] = cov[1][2];

        Some(cov)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 14 exact points on a sphere: the 6 axis caps and 8 cube corners
    fn sphere_points(center: [f32; 3], radius: f32) -> [[f32; 3]; 14] {
        let mut points = [[0.0; 3]; 14];
        let axes: [[f32; 3]; 6] = [
            [1.0, 0.0, 0.0], [-1.0, 0.0, 0.0],
            [0.0, 1.0, 0.0], [0.0, -1.0, 0.0],
            [0.0, 0.0, 1.0], [0.0, 0.0, -1.0],
        ];
        for (i, axis) in axes.iter().enumerate() {
            for k in 0..3 {
                points[i][k] = center[k] + radius * axis[k];
            }
        }
        let d = 1.0 / 3.0f32.sqrt();
        let mut i = 6;
        for sx in [-d, d] {
            for sy in [-d, d] {
                for sz in [-d, d] {
                    points[i] = [
                        center[0] + radius * sx,
                        center[1] + radius * sy,
                        center[2] + radius * sz,
                    ];
                    i += 1;
                }
            }
        }
        points
    }

    #[test]
    fn exact_sphere_recovered() {
        let center = [1.0, -2.0, 0.5];
        let radius = 5.0;

        let mut acc = KasaAccumulator::new();
        for p in sphere_points(center, radius) {
            acc.update(&p);
        }

        let fit = acc.fit(0.1, 100.0).expect("fit should succeed");
        for i in 0..3 {
            assert!((fit.center[i] - center[i]).abs() < 1e-3);
        }
        assert!((fit.radius - radius).abs() < 1e-3);
    }

    #[test]
    fn radius_band_rejects() {
        let mut acc = KasaAccumulator::new();
        for p in sphere_points([0.0, 0.0, 0.0], 5.0) {
            acc.update(&p);
        }

        assert!(acc.fit(6.0, 100.0).is_none()); // too small
        assert!(acc.fit(0.1, 4.0).is_none()); // too large
        assert!(acc.fit(4.0, 6.0).is_some());
    }

    #[test]
    fn degenerate_data_rejected() {
        let mut acc = KasaAccumulator::new();
        // Same point repeated: normal equations are singular
        for _ in 0..10 {
            acc.update(&[1.0, 1.0, 1.0]);
        }
        assert!(acc.fit(0.0, 100.0).is_none());
    }

    #[test]
    fn too_few_samples_rejected() {
        let mut acc = KasaAccumulator::new();
        acc.update(&[1.0, 0.0, 0.0]);
        acc.update(&[0.0, 1.0, 0.0]);
        acc.update(&[0.0, 0.0, 1.0]);
        assert!(acc.fit(0.0, 100.0).is_none());
    }

    #[test]
    fn reset_clears_everything() {
        let mut acc = KasaAccumulator::new();
        for p in sphere_points([0.0; 3], 1.0) {
            acc.update(&p);
        }
        assert_eq!(acc.count(), 14);

        acc.reset();
        assert_eq!(acc.count(), 0);
        assert!(acc.fit(0.0, 100.0).is_none());
        assert!(acc.covariance().is_none());
    }

    #[test]
    fn covariance_of_symmetric_cloud_is_isotropic() {
        let mut acc = KasaAccumulator::new();
        for p in sphere_points([0.0; 3], 3.0) {
            acc.update(&p);
        }

        let cov = acc.covariance().unwrap();
        // Symmetric point set: zero mean, equal diagonal, zero off-diagonal
        assert!((cov[0][0] - cov[1][1]).abs() < 1e-4);
        assert!((cov[1][1] - cov[2][2]).abs() < 1e-4);
        assert!(cov[0][1].abs() < 1e-4);
        assert!(cov[0][2].abs() < 1e-4);
    }
}
