//! SVD with a rank cut, spec.md §4.1 `svd`.
//!
//! Decomposes via `faer`'s dense SVD (the teacher's own linear-algebra dependency — never a
//! hand-rolled Golub-Kahan/Jacobi sweep where `faer` already ships a tested one) and applies
//! the spec's rank rule on top: rank is the count of singular values with
//! `|s_i| ≥ τ·|s_0|`, with `τ < 0` meaning "substitute machine epsilon".

use faer::Mat;
use faer::linalg::solvers::{Svd as FaerSvd, SpSolver};

use crate::E;
use crate::linalg::NumericError;
use crate::linalg::dense::{Matrix, MatrixRef};

/// `faer`'s dense SVD always returns owned `U`/`Vᵀ` rather than writing in-place into `A`;
/// the spec's "either may be requested in-place into A or skipped" clause described a
/// LAPACK workspace-reuse optimization that has no idiomatic counterpart in `faer`'s owned
/// API and is not reproduced here — callers that want to skip a side just ignore the
/// corresponding field.
///
/// The decomposition `A ≈ U·diag(s)·Vᵀ`, truncated to `rank` columns/rows are *not*
/// discarded — callers read `rank` and index `u`/`v_t` up to it themselves, since several
/// call sites (residual whitening, distance solver) need the trailing singular vectors too.
pub struct SvdResult {
    pub u: Matrix,
    pub s: Vec<E>,
    pub v_t: Matrix,
    pub rank: usize,
}

/// Computes the SVD of `a` (`m×n`) and the rank implied by tolerance `tau`.
///
/// `tau < 0.0` substitutes machine epsilon, per spec.md §4.1.
pub fn svd(a: MatrixRef, tau: E) -> Result<SvdResult, NumericError> {
    let m = a.nrows();
    let n = a.ncols();
    if m == 0 || n == 0 {
        return Err(NumericError::DimensionMismatch {
            expected: 1,
            got: 0,
        });
    }

    let decomp = FaerSvd::new(a).map_err(|_| NumericError::Singular)?;
    let u: Mat<E> = decomp.U().to_owned();
    let v_t: Mat<E> = decomp.V().transpose().to_owned();
    let s: Vec<E> = (0..m.min(n)).map(|i| decomp.S()[i]).collect();

    let tau = if tau < 0.0 { E::EPSILON } else { tau };
    let s0 = s.first().copied().unwrap_or(0.0).abs();
    let threshold = tau * s0;
    let rank = s.iter().take_while(|&&si| si.abs() >= threshold).count();

    Ok(SvdResult { u, s, v_t, rank })
}
