//! Reusable scratch workspace, spec.md §4.1 / §5.
//!
//! `distance::step_direction` rebuilds an `n×n` symmetric block and an `n×3` right-hand side
//! every inner iteration, for every point in a point set; `residual::assemble` calls
//! `distance::solve` once per point, and `objective::evaluate` calls `residual::assemble` once
//! per point in a whole scan. [`Workspace`] is allocated once by that outer `objective::evaluate`
//! call, threaded down through `residual::assemble` into `distance::solve`/`step_direction`, and
//! reused — zeroed in place, only reallocated when the block size actually changes — across
//! every iteration of every point instead of each inner iteration building a fresh
//! `Matrix::zeros`.
//!
//! `svd()` doesn't take part: `faer::linalg::solvers::Svd`, the ergonomic dense-SVD entry point
//! `linalg::svd` uses, manages its own scratch internally and has no external-workspace hook to
//! thread this through. `FWORK_MIN`/`IWORK_MIN`/`svd_float_len` below are kept as the float
//! scratch sizing formula `original_source/ParXCL/vecmat.c` uses (`size_svd`), documenting what
//! a from-scratch LAPACK-style SVD would need even though nothing here currently allocates
//! against it.

use crate::linalg::dense::Matrix;

/// Minimum float scratch length the original implementation guaranteed regardless of problem
/// size (`original_source/ParXCL/vecmat.c`, `FWORK_MIN`).
pub const FWORK_MIN: usize = 4096;
/// Minimum integer scratch length, same source (`IWORK_MIN`).
pub const IWORK_MIN: usize = 4096;

/// Float scratch length required by an `m×n` SVD: `max(3·min+max, 5·min−4)`
/// (`original_source/ParXCL/vecmat.c`, `size_svd`).
pub fn svd_float_len(m: usize, n: usize) -> usize {
    let lo = m.min(n);
    let hi = m.max(n);
    (3 * lo + hi).max((5 * lo).saturating_sub(4))
}

/// The distance solver's reusable `n×n` step-direction block and `n×3` right-hand side
/// (spec.md §4.5 step 2). Spec.md §5: single-consumer — `&mut self` borrows make concurrent
/// use a compile error rather than a runtime assertion.
pub struct Workspace {
    h: Matrix,
    rhs: Matrix,
    n: usize,
}

impl Workspace {
    pub fn new() -> Self {
        Self {
            h: Matrix::zeros(0, 0),
            rhs: Matrix::zeros(0, 0),
            n: 0,
        }
    }

    /// Borrows the `n×n` block and `n×3` right-hand side, zeroed for a fresh assembly.
    /// Reallocates only when `n` differs from the last call; otherwise hands back the same
    /// backing storage zeroed in place.
    pub fn block(&mut self, n: usize) -> (&mut Matrix, &mut Matrix) {
        if n != self.n {
            self.h = Matrix::zeros(n, n);
            self.rhs = Matrix::zeros(n, 3);
            self.n = n;
        } else {
            for j in 0..n {
                for i in 0..n {
                    self.h[(i, j)] = 0.0;
                }
            }
            for j in 0..3 {
                for i in 0..n {
                    self.rhs[(i, j)] = 0.0;
                }
            }
        }
        (&mut self.h, &mut self.rhs)
    }
}

impl Default for Workspace {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn svd_len_matches_original_formula() {
        // m=10, n=4: min=4, max=10 -> max(3*4+10, 5*4-4) = max(22, 16) = 22
        assert_eq!(svd_float_len(10, 4), 22);
    }

    #[test]
    fn block_is_zeroed_and_reused_at_a_stable_size() {
        let mut ws = Workspace::new();
        {
            let (h, rhs) = ws.block(3);
            h[(0, 0)] = 7.0;
            rhs[(0, 0)] = 9.0;
        }
        let (h, rhs) = ws.block(3);
        assert_eq!(h[(0, 0)], 0.0);
        assert_eq!(rhs[(0, 0)], 0.0);
        assert_eq!(h.nrows(), 3);
        assert_eq!(rhs.ncols(), 3);
    }

    #[test]
    fn block_reallocates_when_size_changes() {
        let mut ws = Workspace::new();
        ws.block(2);
        let (h, rhs) = ws.block(5);
        assert_eq!(h.nrows(), 5);
        assert_eq!(rhs.nrows(), 5);
    }
}
