//! Point-set modification, spec.md §4.9, grounded on `modify_point_set()` in
//! `original_source/ParXCL/modify.c`.
//!
//! Two stages, each rebuilding its own `I − U·Uᵀ` block rather than sharing one (spec.md §9
//! Open Question 1, resolved as intentional — see `DESIGN.md`): [`worst_point`] scans every
//! point's leave-one-out block to find the one whose removal would most reduce the sum of
//! squares, and [`corrected_step`] rebuilds that same point's block to predict the parameter
//! step the outer loop should have taken had the point already been gone.
//!
//! One deliberate deviation from the C source: `modify.c`'s final transport back to parameter
//! space (`MAT(wrkm, 0, i)`) is only added into `dp` for indices `i < rank`, leaving the
//! remaining `n_p − rank` components of the correction computed but discarded — a workspace
//! quirk of the original's rank-deficient path. spec.md §4.9 describes the transport
//! `Δp_correction = V·Σ⁻¹·Uᵀ[g*]·w'` with no such restriction, so [`corrected_step`] applies
//! the full vector across all `n_p` parameters.

use crate::E;
use crate::errors::NumericalError;
use crate::linalg::dense::{Matrix, MatrixRef, Vector, VectorRef, dot, norm2};
use crate::linalg::solve::solve_sym;

/// Builds `I − U[g:g+n_r, :rank]·U[g:g+n_r, :rank]ᵀ`, the symmetric projector a single
/// point's block residual is solved against (`modify.c`'s `wrkm` assembly loop).
fn leave_one_out_block(u: MatrixRef, g: usize, n_r: usize, rank: usize) -> Matrix {
    Matrix::from_fn(n_r, n_r, |i, j| {
        let mut inp = 0.0;
        for v in 0..rank {
            inp += u[(g + i, v)] * u[(g + j, v)];
        }
        let delta = if i == j { 1.0 } else { 0.0 };
        delta - inp
    })
}

#[derive(Debug, Clone, Copy)]
pub struct WorstPoint {
    /// Index of the point (not row) within the stacked residual/Jacobian.
    pub index: usize,
    /// Predicted reduction in the sum of squares were this point removed (`Δσ²`).
    pub dsig: E,
}

/// Scans every point's leave-one-out block `(I − U_gU_gᵀ)·w = r_g` and returns the one that
/// maximizes `r_gᵀ·w` — the point whose removal would reduce the sum of squares the most
/// (`modify.c`'s first loop, tracking `dsig_max`/`index_max`).
pub fn worst_point(r: VectorRef, u: MatrixRef, rank: usize, n_r: usize) -> Option<WorstPoint> {
    if n_r == 0 {
        return None;
    }
    let n_points = r.nrows() / n_r;
    let mut best: Option<WorstPoint> = None;

    for point in 0..n_points {
        let g = point * n_r;
        let block = leave_one_out_block(u, g, n_r, rank);
        let r_block = Vector::from_fn(n_r, |i| r[g + i]);
        let Ok(w) = solve_sym(block.as_ref(), r_block.as_ref()) else {
            continue;
        };
        let dsig = dot(r_block.as_ref(), w.as_ref());
        if best.is_none_or(|b| dsig > b.dsig) {
            best = Some(WorstPoint { index: point, dsig });
        }
    }

    best
}

#[derive(Debug, Clone)]
pub struct CorrectedStep {
    /// `dp`, corrected for the worst point's removal.
    pub dp: Vector,
    /// Residual norm with the worst point's block zeroed out.
    pub res_norm: E,
}

/// Predicts the parameter step the outer loop would have taken had `point` already been
/// removed, and the residual norm without its contribution (`modify.c`'s second half, after
/// `index_max` is known).
///
/// `s`/`v_t` are the Jacobian SVD's singular values and right singular vectors (`Vᵀ`),
/// truncated to `rank` rows already meaningful; `dp` is the uncorrected Gauss-Newton step
/// from spec.md §4.8.b.
pub fn corrected_step(
    r: VectorRef,
    u: MatrixRef,
    s: &[E],
    v_t: MatrixRef,
    rank: usize,
    n_r: usize,
    point: usize,
    dp: VectorRef,
) -> Result<CorrectedStep, NumericalError> {
    let n_p = dp.nrows();
    let g = point * n_r;
    let block = leave_one_out_block(u, g, n_r, rank);

    // Σ·Vᵀ·dp, restricted to the rank-many retained directions.
    let sigma_vt_dp = Vector::from_fn(rank, |i| {
        let row_dot: E = (0..n_p).map(|j| v_t[(i, j)] * dp[j]).sum();
        s[i] * row_dot
    });

    let r_corrected = Vector::from_fn(n_r, |i| {
        let mut acc = r[g + i];
        for v in 0..rank {
            acc += u[(g + i, v)] * sigma_vt_dp[v];
        }
        acc
    });

    let w_prime =
        solve_sym(block.as_ref(), r_corrected.as_ref()).map_err(|_| NumericalError::Modify)?;

    // Σ⁻¹·Uᵀ[g]·w'
    let reduced = Vector::from_fn(rank, |i| {
        let mut acc = 0.0;
        for j in 0..n_r {
            acc += u[(g + j, i)] * w_prime[j];
        }
        acc / s[i]
    });

    // V·reduced, transported back to full parameter space.
    let mut dp_corrected = dp.to_owned();
    for col in 0..n_p {
        let mut acc = 0.0;
        for i in 0..rank {
            acc += v_t[(i, col)] * reduced[i];
        }
        dp_corrected[col] += acc;
    }

    let zeroed = Vector::from_fn(r.nrows(), |i| {
        if i >= g && i < g + n_r { 0.0 } else { r[i] }
    });
    let res_norm = norm2(zeroed.as_ref());

    Ok(CorrectedStep { dp: dp_corrected, res_norm })
}
