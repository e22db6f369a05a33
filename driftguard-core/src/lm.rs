//! Generic Levenberg-Marquardt Solver
//!
//! ## Overview
//!
//! Damped Gauss-Newton minimization of a sum of squared residuals over a
//! fixed-size state vector. The caller supplies residuals and an analytic
//! Jacobian through the [`LeastSquares`] trait; the solver owns the damping
//! schedule and termination logic.
//!
//! Each iteration solves the damped normal equations
//!
//! ```text
//! (JᵗJ + u·I)·step = −Jᵗr
//! ```
//!
//! and evaluates the gain ratio of actual versus predicted cost reduction.
//! A productive step is accepted and the damping `u` shrinks (cubic formula,
//! bounded below by ⅓); an unproductive step is discarded and `u` grows by a
//! multiplier that itself doubles on every consecutive rejection. This is the
//! Nielsen damping schedule, which recovers Gauss-Newton convergence near the
//! minimum and gradient-descent robustness far from it.
//!
//! ## Memory
//!
//! All scratch (residuals, Jacobian, normal equations, trial buffers) lives
//! in the stack frame of [`LevenbergMarquardt::solve`] and is bounded by the
//! const dimensions. Nothing persists between calls.

use crate::matrix::{
    self, Matrix, SquareMatrix, Vector,
    add_diagonal, cholesky, normal_equations, solve_cholesky,
};

/// Terminal state of a solve attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolverStatus {
    /// Max-abs gradient fell below the tolerance; state is a stationary point
    GradientConverged,
    /// Step size fell below the relative tolerance; state stopped moving
    StepConverged,
    /// Iteration cap hit without meeting either tolerance
    MaxIterations,
    /// Damped normal equations were not positive definite
    FactorizationFailed,
    /// The problem produced no residual rows
    InvalidProblem,
}

impl SolverStatus {
    /// True for the two statuses that indicate a usable minimum
    pub fn converged(&self) -> bool {
        matches!(self, Self::GradientConverged | Self::StepConverged)
    }
}

/// A nonlinear least-squares problem with `P` parameters and up to `R`
/// residual rows.
///
/// `evaluate` fills `residuals[0..n]` and `jacobian[0..n]` at the given state
/// and returns `n`, the number of valid rows. Rows beyond `n` are never read.
/// Returning fewer rows than on a previous call is allowed (a row whose
/// Jacobian is numerically degenerate may be skipped), returning zero aborts
/// the solve with [`SolverStatus::InvalidProblem`].
pub trait LeastSquares<const P: usize, const R: usize> {
    /// Evaluate residuals and Jacobian at `state`; returns the row count
    fn evaluate(
        &self,
        state: &Vector<P>,
        residuals: &mut Vector<R>,
        jacobian: &mut Matrix<R, P>,
    ) -> usize;
}

/// Solver configuration
#[derive(Debug, Clone, Copy)]
pub struct LmConfig {
    /// Hard iteration cap guaranteeing termination
    pub max_iterations: u32,
    /// Max-abs gradient below which the state counts as stationary
    pub gradient_tolerance: f32,
    /// Relative step-size convergence threshold
    pub step_tolerance: f32,
    /// Initial damping as a fraction of the largest JᵗJ diagonal entry
    pub initial_damping: f32,
}

impl Default for LmConfig {
    fn default() -> Self {
        Self {
            max_iterations: 30,
            gradient_tolerance: 1e-6,
            step_tolerance: 1e-6,
            initial_damping: 1e-3,
        }
    }
}

/// Levenberg-Marquardt solver
///
/// Stateless apart from its configuration; one instance can serve any number
/// of problems and dimensions.
#[derive(Debug, Clone, Copy, Default)]
pub struct LevenbergMarquardt {
    config: LmConfig,
}

impl LevenbergMarquardt {
    /// Create a solver with the given configuration
    pub fn new(config: LmConfig) -> Self {
        Self { config }
    }

    /// Minimize the problem starting from `state`, which is updated in place
    /// to the best state found.
    ///
    /// On a non-converged status the state holds the last accepted iterate,
    /// never a rejected trial step.
    pub fn solve<const P: usize, const R: usize, M: LeastSquares<P, R>>(
        &self,
        problem: &M,
        state: &mut Vector<P>,
    ) -> SolverStatus {
        let cfg = &self.config;

        let mut residuals = [0.0; R];
        let mut jacobian = [[0.0; P]; R];
        let rows = problem.evaluate(state, &mut residuals, &mut jacobian);
        if rows == 0 || rows > R {
            return SolverStatus::InvalidProblem;
        }

        let mut cost = half_sum_squares(&residuals, rows);

        let mut jtj: SquareMatrix<P> = [[0.0; P]; P];
        let mut gradient: Vector<P> = [0.0; P];
        normal_equations(&jacobian, &residuals, rows, &mut jtj, &mut gradient);

        let mut damping = cfg.initial_damping * max_diagonal(&jtj);
        if damping <= 0.0 {
            damping = cfg.initial_damping;
        }
        let mut growth = 2.0f32;

        for _ in 0..cfg.max_iterations {
            if matrix::max_abs(&gradient) < cfg.gradient_tolerance {
                return SolverStatus::GradientConverged;
            }

            let mut damped = jtj;
            add_diagonal(&mut damped, damping);

            let mut factor: SquareMatrix<P> = [[0.0; P]; P];
            if !cholesky(&damped, &mut factor) {
                return SolverStatus::FactorizationFailed;
            }

            let mut step: Vector<P> = [0.0; P];
            solve_cholesky(&factor, &gradient, &mut step);
            for s in step.iter_mut() {
                *s = -*s;
            }

            let step_norm = matrix::norm(&step);
            let state_norm = matrix::norm(state);
            if step_norm <= cfg.step_tolerance * (state_norm + cfg.step_tolerance) {
                return SolverStatus::StepConverged;
            }

            // Tentative step
            let mut trial = *state;
            for i in 0..P {
                trial[i] += step[i];
            }

            let mut trial_residuals = [0.0; R];
            let mut trial_jacobian = [[0.0; P]; R];
            let trial_rows = problem.evaluate(&trial, &mut trial_residuals, &mut trial_jacobian);
            if trial_rows == 0 || trial_rows > R {
                return SolverStatus::InvalidProblem;
            }
            let trial_cost = half_sum_squares(&trial_residuals, trial_rows);

            // Predicted reduction of the damped quadratic model:
            // 0.5·stepᵗ·(u·step − g)
            let mut predicted = 0.0;
            for i in 0..P {
                predicted += step[i] * (damping * step[i] - gradient[i]);
            }
            predicted *= 0.5;

            let actual = cost - trial_cost;
            let gain = if predicted > 0.0 { actual / predicted } else { -1.0 };

            if gain > 0.0 {
                *state = trial;
                cost = trial_cost;
                residuals = trial_residuals;
                jacobian = trial_jacobian;
                normal_equations(&jacobian, &residuals, trial_rows, &mut jtj, &mut gradient);

                let shrink = 1.0 - cube(2.0 * gain - 1.0);
                damping *= shrink.max(1.0 / 3.0);
                growth = 2.0;
            } else {
                damping *= growth;
                growth *= 2.0;
            }
        }

        SolverStatus::MaxIterations
    }
}

#[inline]
fn half_sum_squares<const R: usize>(residuals: &Vector<R>, rows: usize) -> f32 {
    let rows = rows.min(R);
    let mut sum = 0.0;
    for r in residuals.iter().take(rows) {
        sum += r * r;
    }
    0.5 * sum
}

#[inline]
fn max_diagonal<const N: usize>(m: &SquareMatrix<N>) -> f32 {
    let mut max = 0.0f32;
    for i in 0..N {
        max = max.max(m[i][i]);
    }
    max
}

#[inline]
fn cube(x: f32) -> f32 {
    x * x * x
}
