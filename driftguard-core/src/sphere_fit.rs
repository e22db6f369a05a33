//! Nonlinear Sphere-Fit Refinement
//!
//! ## Overview
//!
//! The Kasa fit recovers a bias assuming a perfectly spherical sensor
//! response. Real magnetometers also have per-axis scale error and axis
//! skew (soft-iron distortion), which turn the sphere into an ellipsoid.
//! This module refines a Kasa seed into a full 9-parameter model by
//! minimizing, over a history of sample vectors,
//!
//! ```text
//! residual = ‖M·(x − b)‖ − expected_norm
//! ```
//!
//! with `M` lower-triangular (3 scale + 3 skew parameters) and `b` the bias.
//! The lower-triangular form fixes the rotational ambiguity of a general
//! 3×3 matrix - an orthogonal factor is unobservable from norms alone.
//!
//! ## State Layout
//!
//! ```text
//! state = [m00, m10, m11, m20, m21, m22, bx, by, bz]
//! ```
//!
//! seeded with the identity scale and the Kasa bias. The analytic Jacobian
//! follows from the chain rule through the normalized corrected vector
//! `u = M·(x−b)/‖M·(x−b)‖`:
//!
//! ```text
//! ∂r/∂m_ij = u_i · (x − b)_j          (j ≤ i)
//! ∂r/∂b    = −Mᵀ·u
//! ```
//!
//! A sample whose corrected norm collapses toward zero has an undefined
//! direction; its row is skipped rather than letting a near-zero divisor
//! poison the normal equations.

use crate::lm::{LeastSquares, LevenbergMarquardt, LmConfig};
use crate::matrix::{Mat3, Matrix, Vec3, Vector};

/// Parameter count: 6 lower-triangular scale/skew terms + 3 bias terms
pub const SPHERE_FIT_STATE_DIM: usize = 9;

/// Compile-time bound on the number of fit points
pub const SPHERE_FIT_MAX_POINTS: usize = 32;

/// Corrected norms below this have no usable direction
const MIN_CORRECTED_NORM: f32 = 1e-6;

/// Refinement configuration
#[derive(Debug, Clone, Copy)]
pub struct SphereFitConfig {
    /// Minimum history points for a trustworthy 9-parameter fit
    pub min_points: usize,
    /// Inner solver settings
    pub lm: LmConfig,
}

impl Default for SphereFitConfig {
    fn default() -> Self {
        Self {
            min_points: 14,
            lm: LmConfig::default(),
        }
    }
}

/// Refined scale/skew/bias estimate
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SphereFitEstimate {
    /// Lower-triangular scale/skew matrix
    pub scale: Mat3,
    /// Refined bias
    pub bias: Vec3,
}

/// Sphere-fit refinement engine
///
/// Stateless apart from configuration; each [`SphereFitCal::fit`] call is an
/// independent solve over caller-owned points.
#[derive(Debug, Clone, Copy, Default)]
pub struct SphereFitCal {
    config: SphereFitConfig,
    solver: LevenbergMarquardt,
}

struct SphereProblem<'a> {
    points: &'a [Vec3],
    expected_norm: f32,
}

impl LeastSquares<SPHERE_FIT_STATE_DIM, SPHERE_FIT_MAX_POINTS> for SphereProblem<'_> {
    fn evaluate(
        &self,
        state: &Vector<SPHERE_FIT_STATE_DIM>,
        residuals: &mut Vector<SPHERE_FIT_MAX_POINTS>,
        jacobian: &mut Matrix<SPHERE_FIT_MAX_POINTS, SPHERE_FIT_STATE_DIM>,
    ) -> usize {
        let m = unpack_scale(state);
        let bias = [state[6], state[7], state[8]];

        let mut rows = 0;
        for p in self.points.iter().take(SPHERE_FIT_MAX_POINTS) {
            let d = [p[0] - bias[0], p[1] - bias[1], p[2] - bias[2]];

            // c = M·d with M lower-triangular
            let c = [
                m[0][0] * d[0],
                m[1][0] * d[0] + m[1][1] * d[1],
                m[2][0] * d[0] + m[2][1] * d[1] + m[2][2] * d[2],
            ];
            let n = libm::sqrtf(c[0] * c[0] + c[1] * c[1] + c[2] * c[2]);
            if n < MIN_CORRECTED_NORM {
                continue;
            }
            let u = [c[0] / n, c[1] / n, c[2] / n];

            residuals[rows] = n - self.expected_norm;

            let row = &mut jacobian[rows];
            // Lower-triangular scale/skew partials: ∂r/∂m_ij = u_i·d_j
            row[0] = u[0] * d[0]; // m00
            row[1] = u[1] * d[0]; // m10
            row[2] = u[1] * d[1]; // m11
            row[3] = u[2] * d[0]; // m20
            row[4] = u[2] * d[1]; // m21
            row[5] = u[2] * d[2]; // m22
            // Bias partials: −Mᵀ·u
            row[6] = -(m[0][0] * u[0] + m[1][0] * u[1] + m[2][0] * u[2]);
            row[7] = -(m[1][1] * u[1] + m[2][1] * u[2]);
            row[8] = -(m[2][2] * u[2]);

            rows += 1;
        }

        rows
    }
}

fn unpack_scale(state: &Vector<SPHERE_FIT_STATE_DIM>) -> Mat3 {
    [
        [state[0], 0.0, 0.0],
        [state[1], state[2], 0.0],
        [state[3], state[4], state[5]],
    ]
}

impl SphereFitCal {
    /// Create a refinement engine with the given configuration
    pub fn new(config: SphereFitConfig) -> Self {
        Self {
            config,
            solver: LevenbergMarquardt::new(config.lm),
        }
    }

    /// Refine a scale/skew/bias model over `points`.
    ///
    /// `seed_bias` is the Kasa center; the scale seed is the identity.
    /// Returns `None` unless the solver reaches a convergence status with at
    /// least the configured minimum number of points - a max-iterations or
    /// factorization exit means "no update this cycle", never a partial
    /// result.
    pub fn fit(
        &self,
        points: &[Vec3],
        expected_norm: f32,
        seed_bias: &Vec3,
    ) -> Option<SphereFitEstimate> {
        let count = points.len().min(SPHERE_FIT_MAX_POINTS);
        if count < self.config.min_points {
            return None;
        }
        if expected_norm <= 0.0 || !expected_norm.is_finite() {
            return None;
        }

        let mut state: Vector<SPHERE_FIT_STATE_DIM> = [
            1.0, 0.0, 1.0, 0.0, 0.0, 1.0,
            seed_bias[0], seed_bias[1], seed_bias[2],
        ];

        let problem = SphereProblem {
            points: &points[..count],
            expected_norm,
        };

        let status = self.solver.solve(&problem, &mut state);
        if !status.converged() {
            return None;
        }

        Some(SphereFitEstimate {
            scale: unpack_scale(&state),
            bias: [state[6], state[7], state[8]],
        })
    }

    /// Minimum point count required by this configuration
    pub fn min_points(&self) -> usize {
        self.config.min_points
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::invert;

    /// Generate raw samples such that `m_true·(raw − bias_true)` lands on a
    /// sphere of radius `norm`: raw = m_true⁻¹·(norm·u) + bias_true
    fn synthetic_points(m_true: &Mat3, bias_true: &Vec3, norm: f32) -> [Vec3; 14] {
        let mut m_inv = [[0.0; 3]; 3];
        assert!(invert(m_true, &mut m_inv));

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

        let mut points = [[0.0f32; 3]; 14];
        for (k, u) in dirs.iter().enumerate() {
            let c = [norm * u[0], norm * u[1], norm * u[2]];
            for row in 0..3 {
                points[k][row] = bias_true[row]
                    + m_inv[row][0] * c[0]
                    + m_inv[row][1] * c[1]
                    + m_inv[row][2] * c[2];
            }
        }
        points
    }

    #[test]
    fn recovers_scale_skew_and_bias() {
        let m_true: Mat3 = [
            [1.10, 0.0, 0.0],
            [0.04, 0.92, 0.0],
            [-0.02, 0.03, 1.05],
        ];
        let bias_true = [8.0, -5.0, 2.5];
        let points = synthetic_points(&m_true, &bias_true, 50.0);

        let cal = SphereFitCal::new(SphereFitConfig::default());
        let est = cal
            .fit(&points, 50.0, &[7.0, -4.0, 2.0])
            .expect("fit should converge");

        for i in 0..3 {
            assert!(
                (est.bias[i] - bias_true[i]).abs() < 1e-2,
                "bias[{}] = {}", i, est.bias[i]
            );
            for j in 0..=i {
                assert!(
                    (est.scale[i][j] - m_true[i][j]).abs() < 1e-2,
                    "scale[{}][{}] = {}", i, j, est.scale[i][j]
                );
            }
        }
        // Upper triangle stays exactly zero
        assert_eq!(est.scale[0][1], 0.0);
        assert_eq!(est.scale[0][2], 0.0);
        assert_eq!(est.scale[1][2], 0.0);
    }

    #[test]
    fn pure_bias_case_matches_kasa() {
        let m_identity: Mat3 = [
            [1.0, 0.0, 0.0],
            [0.0, 1.0, 0.0],
            [0.0, 0.0, 1.0],
        ];
        let bias_true = [12.0, -7.0, 3.0];
        let points = synthetic_points(&m_identity, &bias_true, 48.0);

        let cal = SphereFitCal::new(SphereFitConfig::default());
        let est = cal.fit(&points, 48.0, &bias_true).expect("fit");

        for i in 0..3 {
            assert!((est.bias[i] - bias_true[i]).abs() < 1e-3);
            assert!((est.scale[i][i] - 1.0).abs() < 1e-3);
        }
    }

    #[test]
    fn too_few_points_rejected() {
        let points = [[50.0, 0.0, 0.0], [0.0, 50.0, 0.0], [0.0, 0.0, 50.0]];
        let cal = SphereFitCal::new(SphereFitConfig::default());
        assert!(cal.fit(&points, 50.0, &[0.0; 3]).is_none());
    }

    #[test]
    fn invalid_expected_norm_rejected() {
        let points = [[0.0f32; 3]; SPHERE_FIT_MAX_POINTS];
        let cal = SphereFitCal::new(SphereFitConfig::default());
        assert!(cal.fit(&points, 0.0, &[0.0; 3]).is_none());
        assert!(cal.fit(&points, f32::NAN, &[0.0; 3]).is_none());
    }
}
