//! Dense Givens-rotation kernel used by the path tracer.
//!
//! The tracer works with the transposed Jacobian `B` (one column per
//! equation, `n x (n-1)`) and an `n x n` orthogonal accumulator `Q`. After
//! [`qr_decompose`], `Q * B_original = B` with `B` upper triangular, and the
//! last row of `Q` spans the null space of the Jacobian: the curve tangent.
//!
//! Nothing here fails. A singular Jacobian shows up as huge or oscillating
//! correction norms, which the tracer treats as rejected steps.

use nalgebra::{DMatrix, DVector};

/// Applies one Givens rotation to rows `row1` and `row2` of `b` (from column
/// `from_col` on) and of `q`, chosen so that `b[(row2, from_col)]` becomes zero.
///
/// `c1` and `c2` are the current entries `b[(row1, from_col)]` and
/// `b[(row2, from_col)]`.
pub fn rotate(
    b: &mut DMatrix<f64>,
    q: &mut DMatrix<f64>,
    c1: f64,
    c2: f64,
    row1: usize,
    row2: usize,
    from_col: usize,
) {
    if c1.abs() + c2.abs() <= f64::MIN_POSITIVE {
        return;
    }

    // Scale by the larger magnitude so the squares cannot overflow.
    let norm = if c2.abs() >= c1.abs() {
        (1.0 + (c1 / c2).powi(2)).sqrt() * c2.abs()
    } else {
        (1.0 + (c2 / c1).powi(2)).sqrt() * c1.abs()
    };
    let s1 = c1 / norm;
    let s2 = c2 / norm;

    for k in 0..q.ncols() {
        let v1 = q[(row1, k)];
        let v2 = q[(row2, k)];
        q[(row1, k)] = s1 * v1 + s2 * v2;
        q[(row2, k)] = -s2 * v1 + s1 * v2;
    }

    for k in from_col..b.ncols() {
        let v1 = b[(row1, k)];
        let v2 = b[(row2, k)];
        b[(row1, k)] = s1 * v1 + s2 * v2;
        b[(row2, k)] = -s2 * v1 + s1 * v2;
    }

    b[(row1, from_col)] = norm;
    b[(row2, from_col)] = 0.0;
}

/// Reduces `b` to upper-triangular form in place, accumulating the rotations
/// into `q` (reset to the identity first).
pub fn qr_decompose(b: &mut DMatrix<f64>, q: &mut DMatrix<f64>) {
    debug_assert_eq!(q.nrows(), b.nrows());
    debug_assert_eq!(q.ncols(), b.nrows());

    q.fill_with_identity();
    for m in 0..b.ncols() {
        for k in (m + 1)..b.nrows() {
            let c1 = b[(m, m)];
            let c2 = b[(k, m)];
            rotate(b, q, c1, c2, m, k, m);
        }
    }
}

/// Copies the last row of `q` into `tangent`.
pub fn tangent_from(q: &DMatrix<f64>, tangent: &mut DVector<f64>) {
    let last = q.nrows() - 1;
    for k in 0..q.ncols() {
        tangent[k] = q[(last, k)];
    }
}

/// One Newton correction against a factored Jacobian.
///
/// On entry `y` holds the residuals `F(u)`. It is overwritten with the
/// solution of `Rᵀ y = F(u)` (forward substitution through the triangular
/// factor), the correction `Qᵀ y` is subtracted from `u`, and the Euclidean
/// norm of that correction is returned.
pub fn back_substitute_and_project(
    q: &DMatrix<f64>,
    b: &DMatrix<f64>,
    u: &mut DVector<f64>,
    y: &mut DVector<f64>,
) -> f64 {
    let cols = b.ncols();
    for k in 0..cols {
        let mut acc = y[k];
        for l in 0..k {
            acc -= b[(l, k)] * y[l];
        }
        y[k] = acc / b[(k, k)];
    }

    let mut dist = 0.0;
    for k in 0..b.nrows() {
        let mut s = 0.0;
        for l in 0..cols {
            s += q[(l, k)] * y[l];
        }
        u[k] -= s;
        dist += s * s;
    }
    dist.sqrt()
}
