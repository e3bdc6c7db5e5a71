//! Dense matrix helpers for the estimator.
//!
//! The filter keeps its state in `ndarray`; factorizations are delegated to
//! `nalgebra`, converting at this boundary.

use nalgebra::{Cholesky, DMatrix};
use ndarray::Array2;

/// Relative pivot magnitude below which a matrix is treated as singular.
pub const SINGULAR_PIVOT_RATIO: f64 = 1e-12;

/// Copies an `ndarray` matrix into a `nalgebra` one.
pub fn to_dmatrix(m: &Array2<f64>) -> DMatrix<f64> {
    DMatrix::from_fn(m.nrows(), m.ncols(), |i, j| m[[i, j]])
}

/// Copies a `nalgebra` matrix back into `ndarray`.
pub fn from_dmatrix(m: &DMatrix<f64>) -> Array2<f64> {
    Array2::from_shape_fn((m.nrows(), m.ncols()), |(i, j)| m[(i, j)])
}

/// Inverts a square matrix through its LU decomposition.
///
/// Returns `None` when the matrix is not square, contains non-finite values,
/// or a pivot of `U` falls below [`SINGULAR_PIVOT_RATIO`] times the largest
/// absolute entry (near-singular).
///
/// # Examples
///
/// ```rust
/// use drift_gym::common::linalg::invert;
/// use ndarray::arr2;
///
/// let m = arr2(&[[4.0, 0.0], [0.0, 0.5]]);
/// let inv = invert(&m).unwrap();
/// assert!((inv[[0, 0]] - 0.25).abs() < 1e-15);
/// assert!((inv[[1, 1]] - 2.0).abs() < 1e-15);
///
/// assert!(invert(&arr2(&[[1.0, 2.0], [2.0, 4.0]])).is_none());
/// ```
pub fn invert(m: &Array2<f64>) -> Option<Array2<f64>> {
    if m.nrows() != m.ncols() || m.iter().any(|v| !v.is_finite()) {
        return None;
    }

    let scale = m.iter().fold(0.0_f64, |acc, v| acc.max(v.abs()));
    if scale == 0.0 {
        return None;
    }
    let tolerance = scale * SINGULAR_PIVOT_RATIO;

    let lu = to_dmatrix(m).lu();
    if lu.u().diagonal().iter().any(|pivot| pivot.abs() <= tolerance) {
        return None;
    }
    lu.try_inverse().map(|inv| from_dmatrix(&inv))
}

/// Returns `(m + mᵀ) / 2`.
pub fn symmetrize(m: &Array2<f64>) -> Array2<f64> {
    (m + &m.t()) * 0.5
}

/// Largest absolute difference between `m` and its transpose.
pub fn asymmetry(m: &Array2<f64>) -> f64 {
    (m - &m.t()).iter().fold(0.0_f64, |acc, v| acc.max(v.abs()))
}

/// Lower-triangular Cholesky factor `L` with `m = L·Lᵀ`.
///
/// Returns `None` if `m` is not square or not strictly positive-definite.
/// Only the lower triangle of `m` is read.
///
/// # Examples
///
/// ```rust
/// use drift_gym::common::linalg::cholesky;
/// use ndarray::arr2;
///
/// let l = cholesky(&arr2(&[[4.0, 2.0], [2.0, 2.0]])).unwrap();
/// assert_eq!(l, arr2(&[[2.0, 0.0], [1.0, 1.0]]));
/// assert!(cholesky(&arr2(&[[1.0, 2.0], [2.0, 1.0]])).is_none());
/// ```
pub fn cholesky(m: &Array2<f64>) -> Option<Array2<f64>> {
    if m.nrows() != m.ncols() {
        return None;
    }
    Cholesky::new(to_dmatrix(m)).map(|factor| from_dmatrix(&factor.l()))
}

/// Checks that `m` is symmetric positive semi-definite up to `tolerance`.
///
/// Semi-definiteness is tested by factoring `m + tolerance·I`, which succeeds
/// for any PSD matrix and fails once an eigenvalue drops below `-tolerance`.
pub fn is_positive_semidefinite(m: &Array2<f64>, tolerance: f64) -> bool {
    let n = m.nrows();
    if n != m.ncols() {
        return false;
    }
    let scale = m.diag().iter().fold(1.0_f64, |acc, v| acc.max(v.abs()));
    if asymmetry(m) > tolerance * scale {
        return false;
    }
    let jittered = symmetrize(m) + Array2::<f64>::eye(n) * (tolerance * scale);
    cholesky(&jittered).is_some()
}
