//! Dense vector/matrix type aliases and BLAS-shaped kernels, spec.md §4.1.
//!
//! `faer::{Col, Mat}` and their `*Ref`/`*Mut` views already are the "dense owned/viewed
//! vectors and matrices over 64-bit floats" the spec asks for, so `Vector`/`Matrix` here are
//! thin aliases rather than new types — exactly how the teacher's `linalg` module leans on
//! `faer::Mat`/`MatRef`/`MatMut` directly instead of wrapping them.

use faer::{Col, ColMut, ColRef, Mat, MatMut, MatRef, unzip, zip};

use crate::E;

pub type Vector = Col<E>;
pub type VectorRef<'a> = ColRef<'a, E>;
pub type VectorMut<'a> = ColMut<'a, E>;
pub type Matrix = Mat<E>;
pub type MatrixRef<'a> = MatRef<'a, E>;
pub type MatrixMut<'a> = MatMut<'a, E>;

/// Fills `dst` with zeros. Debug-asserts shape compatibility (spec.md §4.1 `zero`).
pub fn zero(mut dst: VectorMut) {
    zip!(dst.rb_mut()).for_each(|unzip!(dst)| *dst = 0.0);
}

/// Copies `src` into `dst`. Debug-asserts equal length (spec.md §4.1 `copy`).
pub fn copy(src: VectorRef, mut dst: VectorMut) {
    debug_assert_eq!(src.nrows(), dst.nrows());
    zip!(dst.rb_mut(), src).for_each(|unzip!(dst, src)| *dst = *src);
}

/// Euclidean norm `‖v‖₂` (spec.md §4.1 `norm2`, defers to `dnrm2`).
pub fn norm2(v: VectorRef) -> E {
    v.norm_l2()
}

/// Inner product of two equal-length vectors (spec.md §4.1 `dot`, `ddot`).
pub fn dot(a: VectorRef, b: VectorRef) -> E {
    debug_assert_eq!(a.nrows(), b.nrows());
    a.transpose() * b
}

/// `A·b` for `A: m×n`, `b: n` (spec.md §4.1 `matvec`, `dgemv` no-trans).
pub fn matvec(a: MatrixRef, b: VectorRef) -> Vector {
    debug_assert_eq!(a.ncols(), b.nrows());
    a * b
}

/// `Aᵀ·b` for `A: m×n`, `b: m` (spec.md §4.1 `mattvec`, `dgemv` trans).
pub fn mattvec(a: MatrixRef, b: VectorRef) -> Vector {
    debug_assert_eq!(a.nrows(), b.nrows());
    a.transpose() * b
}

/// `A·B` for matched dimensions (spec.md §4.1 `matmat`, `dgemm`).
pub fn matmat(a: MatrixRef, b: MatrixRef) -> Matrix {
    debug_assert_eq!(a.ncols(), b.nrows());
    a * b
}

/// `Aᵀ·B` for matched dimensions (spec.md §4.1 `matTmat`).
pub fn mattmat(a: MatrixRef, b: MatrixRef) -> Matrix {
    debug_assert_eq!(a.nrows(), b.nrows());
    a.transpose() * b
}
