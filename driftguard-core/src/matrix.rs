//! Fixed-Size Linear Algebra Kernel
//!
//! ## Overview
//!
//! Dense matrix and vector operations for the calibration algorithms, built
//! on plain const-generic arrays. Everything here is stack-only: no heap
//! allocation, no hidden iteration counts, no panics in release code.
//!
//! The kernel backs three consumers:
//! - the Levenberg-Marquardt solver ([`crate::lm`]): normal equations,
//!   Cholesky factor/solve, diagonal damping
//! - the closed-form sphere fit ([`crate::kasa`]): 4×4 LU solve
//! - the engine acceptance gates: symmetric eigendecomposition of sample
//!   covariance matrices
//!
//! ## Failure Convention
//!
//! Decompositions return `bool`: `false` means the input was numerically
//! degenerate (non-positive-definite, singular, or not converged) and the
//! output buffers must not be read. Callers treat `false` as "no update this
//! cycle" - degeneracy is an expected runtime condition, not a program error.
//!
//! ## Dimension Convention
//!
//! All dimensions are explicit const generics. Operations that process a
//! caller-bounded subset of rows (the solver's active measurement count) take
//! an explicit `rows` argument clamped to the const bound.

/// Matrix type using const generics
pub type Matrix<const R: usize, const C: usize> = [[f32; C]; R];

/// Square matrix type
pub type SquareMatrix<const N: usize> = Matrix<N, N>;

/// Vector type
pub type Vector<const N: usize> = [f32; N];

/// 3-element vector, the working type of every calibration engine
pub type Vec3 = Vector<3>;

/// 3×3 matrix (scale/skew, covariance)
pub type Mat3 = SquareMatrix<3>;

/// 4×4 matrix (Kasa normal equations)
pub type Mat4 = SquareMatrix<4>;

/// Pivot magnitude below which a Cholesky or LU factorization is declared
/// degenerate. Chosen well above f32 denormals so that a barely-positive
/// pivot cannot poison a back-substitution with huge quotients.
pub const DECOMPOSITION_TOLERANCE: f32 = 1e-9;

/// Maximum cyclic Jacobi sweeps before giving up on eigendecomposition.
/// Symmetric 3×3/4×4 inputs converge in 3-5 sweeps; hitting this bound
/// means the input was not symmetric or contained non-finite values.
const MAX_JACOBI_SWEEPS: usize = 20;

// ===== GENERAL VECTOR HELPERS =====

/// Dot product of two vectors
#[inline]
pub fn dot<const N: usize>(a: &Vector<N>, b: &Vector<N>) -> f32 {
    let mut sum = 0.0;
    for i in 0..N {
        sum += a[i] * b[i];
    }
    sum
}

/// Squared Euclidean norm
#[inline]
pub fn norm_squared<const N: usize>(v: &Vector<N>) -> f32 {
    dot(v, v)
}

/// Euclidean norm
#[inline]
pub fn norm<const N: usize>(v: &Vector<N>) -> f32 {
    libm::sqrtf(norm_squared(v))
}

/// Largest absolute component of a vector
pub fn max_abs<const N: usize>(v: &Vector<N>) -> f32 {
    let mut max = 0.0f32;
    for i in 0..N {
        max = max.max(libm::fabsf(v[i]));
    }
    max
}

/// Element-wise vector addition: out = a + b
pub fn vec_add<const N: usize>(a: &Vector<N>, b: &Vector<N>, out: &mut Vector<N>) {
    for i in 0..N {
        out[i] = a[i] + b[i];
    }
}

/// Element-wise vector subtraction: out = a - b
pub fn vec_sub<const N: usize>(a: &Vector<N>, b: &Vector<N>, out: &mut Vector<N>) {
    for i in 0..N {
        out[i] = a[i] - b[i];
    }
}

/// Scalar multiply: out = s × a
pub fn vec_scale<const N: usize>(a: &Vector<N>, s: f32, out: &mut Vector<N>) {
    for i in 0..N {
        out[i] = a[i] * s;
    }
}

// ===== GENERAL MATRIX OPERATIONS =====

/// Matrix multiplication: result = A × B
///
/// Dimensions: A[R×K] × B[K×C] = result[R×C]
pub fn multiply<const R: usize, const K: usize, const C: usize>(
    a: &Matrix<R, K>,
    b: &Matrix<K, C>,
    result: &mut Matrix<R, C>,
) {
    for i in 0..R {
        for j in 0..C {
            result[i][j] = 0.0;
            for k in 0..K {
                result[i][j] += a[i][k] * b[k][j];
            }
        }
    }
}

/// Matrix transpose: result = Aᵀ
pub fn transpose<const R: usize, const C: usize>(
    a: &Matrix<R, C>,
    result: &mut Matrix<C, R>,
) {
    for i in 0..R {
        for j in 0..C {
            result[j][i] = a[i][j];
        }
    }
}

/// Matrix addition: result = A + B
pub fn add<const R: usize, const C: usize>(
    a: &Matrix<R, C>,
    b: &Matrix<R, C>,
    result: &mut Matrix<R, C>,
) {
    for i in 0..R {
        for j in 0..C {
            result[i][j] = a[i][j] + b[i][j];
        }
    }
}

/// Matrix-vector multiplication: result = A × x
pub fn matvec<const R: usize, const C: usize>(
    matrix: &Matrix<R, C>,
    vector: &Vector<C>,
    result: &mut Vector<R>,
) {
    for i in 0..R {
        result[i] = 0.0;
        for j in 0..C {
            result[i] += matrix[i][j] * vector[j];
        }
    }
}

/// Make matrix symmetric: A = (A + Aᵀ) / 2
///
/// Used on accumulated covariance matrices before eigendecomposition so that
/// floating-point asymmetry cannot stall the Jacobi sweeps.
pub fn make_symmetric<const N: usize>(matrix: &mut SquareMatrix<N>) {
    for i in 0..N {
        for j in i + 1..N {
            let avg = (matrix[i][j] + matrix[j][i]) * 0.5;
            matrix[i][j] = avg;
            matrix[j][i] = avg;
        }
    }
}

/// Add a constant to every diagonal element: A += value × I
///
/// The Levenberg-Marquardt damping step.
pub fn add_diagonal<const N: usize>(matrix: &mut SquareMatrix<N>, value: f32) {
    for i in 0..N {
        matrix[i][i] += value;
    }
}

/// Build the normal equations for the first `rows` rows of a Jacobian.
///
/// Computes `jtj = JᵗJ` and `jtr = Jᵗr` in one pass. `JᵗJ` is symmetric, so
/// only the upper triangle is accumulated and then mirrored.
///
/// `rows` is clamped to the const bound `R`; rows beyond the active count are
/// never read, which lets solvers reuse one fixed buffer for variable-size
/// measurement sets.
pub fn normal_equations<const R: usize, const P: usize>(
    jacobian: &Matrix<R, P>,
    residuals: &Vector<R>,
    rows: usize,
    jtj: &mut SquareMatrix<P>,
    jtr: &mut Vector<P>,
) {
    let rows = rows.min(R);

    for i in 0..P {
        for j in i..P {
            let mut sum = 0.0;
            for k in 0..rows {
                sum += jacobian[k][i] * jacobian[k][j];
            }
            jtj[i][j] = sum;
            jtj[j][i] = sum;
        }

        let mut sum = 0.0;
        for k in 0..rows {
            sum += jacobian[k][i] * residuals[k];
        }
        jtr[i] = sum;
    }
}

// ===== DECOMPOSITIONS =====

/// Cholesky decomposition: A = L × Lᵀ
///
/// Decomposes a symmetric positive definite matrix into its lower triangular
/// factor. Returns `false` when a pivot falls below
/// [`DECOMPOSITION_TOLERANCE`], i.e. the matrix is not positive definite
/// within working precision.
pub fn cholesky<const N: usize>(
    a: &SquareMatrix<N>,
    l: &mut SquareMatrix<N>,
) -> bool {
    for i in 0..N {
        for j in 0..N {
            l[i][j] = 0.0;
        }
    }

    for j in 0..N {
        let mut sum = 0.0;
        for k in 0..j {
            sum += l[j][k] * l[j][k];
        }

        let pivot = a[j][j] - sum;
        if pivot < DECOMPOSITION_TOLERANCE {
            return false;
        }
        l[j][j] = libm::sqrtf(pivot);

        for i in (j + 1)..N {
            let mut sum = 0.0;
            for k in 0..j {
                sum += l[i][k] * l[j][k];
            }
            l[i][j] = (a[i][j] - sum) / l[j][j];
        }
    }

    true
}

/// Solve A×x = b given the Cholesky factor L of A
///
/// Forward substitution through L, then back substitution through Lᵀ.
/// More numerically stable than forming A⁻¹×b.
pub fn solve_cholesky<const N: usize>(
    l: &SquareMatrix<N>,
    b: &Vector<N>,
    x: &mut Vector<N>,
) {
    // Forward substitution: solve L×y = b
    let mut y = [0.0; N];
    for i in 0..N {
        let mut sum = 0.0;
        for j in 0..i {
            sum += l[i][j] * y[j];
        }
        y[i] = (b[i] - sum) / l[i][i];
    }

    // Back substitution: solve Lᵀ×x = y
    for i in (0..N).rev() {
        let mut sum = 0.0;
        for j in (i + 1)..N {
            sum += l[j][i] * x[j];
        }
        x[i] = (y[i] - sum) / l[i][i];
    }
}

/// Matrix inversion using Gauss-Jordan elimination with partial pivoting
///
/// ## Safety Note
///
/// Inversion is numerically unstable and should be avoided when possible.
/// Prefer solving linear systems directly. This implementation is provided
/// for the rare cases where an explicit inverse is needed (e.g. mapping a
/// fitted scale matrix back to sensor space).
///
/// Returns `false` if the matrix is singular
pub fn invert<const N: usize>(
    a: &SquareMatrix<N>,
    inv: &mut SquareMatrix<N>,
) -> bool {
    // Work with a fixed maximum size to keep the augmented buffer on the stack
    const MAX_N: usize = 8;
    if N > MAX_N {
        return false;
    }

    // Augmented matrix [A | I]
    let mut aug: [[f32; MAX_N * 2]; MAX_N] = [[0.0; MAX_N * 2]; MAX_N];

    for i in 0..N {
        for j in 0..N {
            aug[i][j] = a[i][j];
            aug[i][j + N] = if i == j { 1.0 } else { 0.0 };
        }
    }

    for k in 0..N {
        // Partial pivoting
        let mut max_row = k;
        let mut max_val = libm::fabsf(aug[k][k]);

        for i in (k + 1)..N {
            if libm::fabsf(aug[i][k]) > max_val {
                max_val = libm::fabsf(aug[i][k]);
                max_row = i;
            }
        }

        if max_val < DECOMPOSITION_TOLERANCE {
            return false;
        }

        if max_row != k {
            aug.swap(k, max_row);
        }

        let pivot = aug[k][k];
        for j in 0..(N * 2) {
            aug[k][j] /= pivot;
        }

        for i in 0..N {
            if i != k {
                let factor = aug[i][k];
                for j in 0..(N * 2) {
                    aug[i][j] -= factor * aug[k][j];
                }
            }
        }
    }

    for i in 0..N {
        for j in 0..N {
            inv[i][j] = aug[i][j + N];
        }
    }

    true
}

/// LU decomposition with row pivoting (Doolittle form)
///
/// Decomposes in place: on success `a` holds the unit-lower and upper factors
/// packed together, and `pivot` records the row permutation. Returns `false`
/// on a singular pivot.
///
/// Used by the Kasa fit to solve its 4×4 normal equations, where the system
/// is square but not guaranteed positive definite.
pub fn lu_decompose<const N: usize>(
    a: &mut SquareMatrix<N>,
    pivot: &mut [usize; N],
) -> bool {
    for i in 0..N {
        pivot[i] = i;
    }

    for k in 0..N {
        // Partial pivoting
        let mut max_row = k;
        let mut max_val = libm::fabsf(a[k][k]);
        for i in (k + 1)..N {
            if libm::fabsf(a[i][k]) > max_val {
                max_val = libm::fabsf(a[i][k]);
                max_row = i;
            }
        }

        if max_val < DECOMPOSITION_TOLERANCE {
            return false;
        }

        if max_row != k {
            a.swap(k, max_row);
            pivot.swap(k, max_row);
        }

        for i in (k + 1)..N {
            a[i][k] /= a[k][k];
            for j in (k + 1)..N {
                a[i][j] -= a[i][k] * a[k][j];
            }
        }
    }

    true
}

/// Solve A×x = b given the packed LU factors and pivot from [`lu_decompose`]
pub fn lu_solve<const N: usize>(
    lu: &SquareMatrix<N>,
    pivot: &[usize; N],
    b: &Vector<N>,
    x: &mut Vector<N>,
) {
    // Forward substitution with the permuted right-hand side (unit lower factor)
    for i in 0..N {
        let mut sum = b[pivot[i]];
        for j in 0..i {
            sum -= lu[i][j] * x[j];
        }
        x[i] = sum;
    }

    // Back substitution (upper factor)
    for i in (0..N).rev() {
        let mut sum = x[i];
        for j in (i + 1)..N {
            sum -= lu[i][j] * x[j];
        }
        x[i] = sum / lu[i][i];
    }
}

/// Symmetric eigendecomposition via cyclic Jacobi rotations
///
/// On success `eigenvalues` is sorted descending and row `k` of
/// `eigenvectors` is the unit eigenvector for `eigenvalues[k]`.
///
/// Returns `false` when the off-diagonal mass has not annihilated within
/// [`MAX_JACOBI_SWEEPS`] sweeps, which only happens for non-symmetric or
/// non-finite input.
pub fn jacobi_eigen<const N: usize>(
    a: &SquareMatrix<N>,
    eigenvalues: &mut Vector<N>,
    eigenvectors: &mut SquareMatrix<N>,
) -> bool {
    let mut m = *a;

    // Eigenvectors accumulate as rows, starting from identity
    for i in 0..N {
        for j in 0..N {
            eigenvectors[i][j] = if i == j { 1.0 } else { 0.0 };
        }
    }

    // Convergence threshold relative to the matrix magnitude, so inputs
    // spanning wildly different units (g² vs µT²) all terminate; the
    // absolute floor handles the all-zero matrix
    let mut scale = 0.0;
    for i in 0..N {
        for j in 0..N {
            scale += m[i][j] * m[i][j];
        }
    }
    let threshold = (scale * 1e-12).max(DECOMPOSITION_TOLERANCE * DECOMPOSITION_TOLERANCE);

    let mut converged = false;
    for _ in 0..MAX_JACOBI_SWEEPS {
        let mut off_diagonal = 0.0;
        for i in 0..N {
            for j in (i + 1)..N {
                off_diagonal += m[i][j] * m[i][j];
            }
        }
        if off_diagonal < threshold {
            converged = true;
            break;
        }

        for p in 0..N {
            for q in (p + 1)..N {
                let apq = m[p][q];
                if libm::fabsf(apq) < f32::MIN_POSITIVE {
                    continue;
                }

                // Rotation angle annihilating m[p][q]
                let theta = (m[q][q] - m[p][p]) / (2.0 * apq);
                let t = if theta >= 0.0 {
                    1.0 / (theta + libm::sqrtf(theta * theta + 1.0))
                } else {
                    -1.0 / (-theta + libm::sqrtf(theta * theta + 1.0))
                };
                let c = 1.0 / libm::sqrtf(t * t + 1.0);
                let s = t * c;
                let tau = s / (1.0 + c);

                m[p][p] -= t * apq;
                m[q][q] += t * apq;
                m[p][q] = 0.0;
                m[q][p] = 0.0;

                for j in 0..N {
                    if j != p && j != q {
                        let mjp = m[j][p];
                        let mjq = m[j][q];
                        m[j][p] = mjp - s * (mjq + tau * mjp);
                        m[j][q] = mjq + s * (mjp - tau * mjq);
                        m[p][j] = m[j][p];
                        m[q][j] = m[j][q];
                    }
                }

                for j in 0..N {
                    let vpj = eigenvectors[p][j];
                    let vqj = eigenvectors[q][j];
                    eigenvectors[p][j] = vpj - s * (vqj + tau * vpj);
                    eigenvectors[q][j] = vqj + s * (vpj - tau * vqj);
                }
            }
        }
    }

    if !converged {
        // One more check after the final sweep
        let mut off_diagonal = 0.0;
        for i in 0..N {
            for j in (i + 1)..N {
                off_diagonal += m[i][j] * m[i][j];
            }
        }
        if off_diagonal >= threshold {
            return false;
        }
    }

    for i in 0..N {
        eigenvalues[i] = m[i][i];
    }

    // Selection sort descending, permuting eigenvector rows alongside
    for i in 0..N {
        let mut max_idx = i;
        for j in (i + 1)..N {
            if eigenvalues[j] > eigenvalues[max_idx] {
                max_idx = j;
            }
        }
        if max_idx != i {
            eigenvalues.swap(i, max_idx);
            eigenvectors.swap(i, max_idx);
        }
    }

    true
}
