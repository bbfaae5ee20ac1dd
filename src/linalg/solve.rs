//! General/symmetric/SPD dense solves, spec.md §4.1 `solve_general`/`solve_sym`/`solve_spd`.
//!
//! Grounded on the same `faer` dense-decomposition stance as [`crate::linalg::svd`]:
//! `PartialPivLu` for `dgesv`, `Ldlt` for `dsysv`, `Llt` for `dposv`. The teacher's
//! `linalg::solver::Solver` trait (`analyze`/`factorize`/`solve_in_place`) targeted reusable
//! sparse factorizations that amortize symbolic analysis across many solves of the same
//! structure; ParX's per-point systems are fresh each call (new `A`, new `b`), so the
//! factor-and-solve is collapsed into a single function per system kind instead of a
//! stateful trait.

use faer::{Mat, Side};
use faer::linalg::solvers::{Ldlt, Llt, PartialPivLu, Solve};

use crate::linalg::NumericError;
use crate::linalg::dense::{Matrix, MatrixRef, Vector, VectorRef};

fn col_to_mat(b: VectorRef) -> Mat<crate::E> {
    Mat::from_fn(b.nrows(), 1, |i, _| b[i])
}

fn mat_to_col(x: Matrix) -> Vector {
    faer::Col::from_fn(x.nrows(), |i| x[(i, 0)])
}

/// Solves `A·x = b` for square, unstructured `A` (`dgesv`).
pub fn solve_general(a: MatrixRef, b: VectorRef) -> Result<Vector, NumericError> {
    if a.nrows() != a.ncols() || a.nrows() != b.nrows() {
        return Err(NumericError::DimensionMismatch {
            expected: a.nrows(),
            got: b.nrows(),
        });
    }
    let lu = PartialPivLu::new(a);
    Ok(mat_to_col(lu.solve(col_to_mat(b))))
}

/// Solves `A·x = b` for symmetric `A`, reading only its upper triangle (`dsysv`).
pub fn solve_sym(a: MatrixRef, b: VectorRef) -> Result<Vector, NumericError> {
    if a.nrows() != a.ncols() || a.nrows() != b.nrows() {
        return Err(NumericError::DimensionMismatch {
            expected: a.nrows(),
            got: b.nrows(),
        });
    }
    let ldlt = Ldlt::new(a, Side::Upper).map_err(|_| NumericError::Singular)?;
    Ok(mat_to_col(ldlt.solve(col_to_mat(b))))
}

/// Solves `A·X = B` for symmetric `A`, reading only its upper triangle, for a matrix of
/// right-hand sides at once (spec.md §4.5's three-column distance-solver system).
pub fn solve_sym_mat(a: MatrixRef, b: MatrixRef) -> Result<Matrix, NumericError> {
    if a.nrows() != a.ncols() || a.nrows() != b.nrows() {
        return Err(NumericError::DimensionMismatch {
            expected: a.nrows(),
            got: b.nrows(),
        });
    }
    let ldlt = Ldlt::new(a, Side::Upper).map_err(|_| NumericError::Singular)?;
    Ok(ldlt.solve(b))
}

/// Solves `A·X = B` for symmetric positive-definite `A` (`dposv`).
pub fn solve_spd(a: MatrixRef, b: MatrixRef) -> Result<Matrix, NumericError> {
    if a.nrows() != a.ncols() || a.nrows() != b.nrows() {
        return Err(NumericError::DimensionMismatch {
            expected: a.nrows(),
            got: b.nrows(),
        });
    }
    let llt = Llt::new(a, Side::Upper).map_err(|_| NumericError::Singular)?;
    Ok(llt.solve(b))
}
