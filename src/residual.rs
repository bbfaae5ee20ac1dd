//! Residual assembler, spec.md §4.6.
//!
//! Grounded on `original_source/ParXCL/residual.c`'s `residual()` (scaling, distance solve,
//! auxiliary-row pivot elimination, SVD whitening) and `set_p_scale` (parameter rescaling).
//! The distance-solve and model-call plumbing `residual()` inlines (`eval_model`,
//! `ext_constraints`) is already covered by [`crate::distance`] and [`crate::evaluator`]; what
//! lives here is everything `crate::distance` doesn't do on its own: per-variable scaling,
//! auxiliary elimination, and SVD whitening of the reduced constraint space.
//!
//! One deliberate deviation from the C source's variable naming: its residual-space SVD
//! writes `U·Σ·Vᵀ` and then builds the whitened residual from `Vᵀ` (`c_trans_x`, despite the
//! name) and the whitened Jacobian from `Uᵀ` (`c_trans_l`) — the opposite of spec.md §4.6's
//! prose, which labels both with `U`. The code is authoritative here (this is the resolution
//! to spec.md §9's general direction "follow what the original actually does" for a detail
//! the text doesn't pin down precisely); this module names them `u`/`v_t` to match
//! [`crate::linalg::svd::SvdResult`] and uses `v_t` for the residual, `u` for the Jacobian.

use crate::E;
use crate::datamodel::XSet;
use crate::distance::{self, DistanceOptions};
use crate::errors::{NumericalError, ParxError};
use crate::evaluator::{EvalRequest, ModelEvaluator, evaluate};
use crate::linalg::dense::{Matrix, Vector, VectorRef, matvec, mattmat};
use crate::linalg::svd::svd;
use crate::linalg::vector_ops::{cwise_inverse, cwise_quotient};
use crate::linalg::workspace::Workspace;

#[derive(Debug, Clone)]
pub struct ResidualOptions {
    /// Relative model accuracy used for the per-variable scale `σ_i` (spec.md §4.6 step 2).
    pub tol: E,
    pub distance: DistanceOptions,
}

impl Default for ResidualOptions {
    fn default() -> Self {
        Self {
            tol: 1e-6,
            distance: DistanceOptions::default(),
        }
    }
}

/// The whitened residual/Jacobian for one data point (spec.md §4.6 step 8).
#[derive(Debug, Clone)]
pub struct ResidualResult {
    /// `r_whitened = Vᵀ·δ`, length `n_r = n_c - n_a`.
    pub r: Vector,
    /// `J_p_whitened = diag(-1/s)·(Uᵀ·J_p)`, `n_r × n_p`. `None` unless `want_jp`.
    pub jp: Option<Matrix>,
    /// The full scaling transform `diag(1/s)·Uᵀ`, `n_r × n_r`. `None` unless `want_scale`.
    pub scale: Option<Matrix>,
    pub iterations: usize,
}

/// Re-chooses each parameter's non-dimensionalizing scale from its current physical value and
/// bounds, spec.md §4.6's "Parameter scaling maintained by the assembler" paragraph, grounded
/// on `set_p_scale` in `original_source/ParXCL/residual.c`.
///
/// Unlike the C source, which keeps a single `p` vector permanently in scaled units and
/// rebases it in place, this carries `scale` on the side and leaves `p` in physical units
/// everywhere else in the crate (spec.md §9's "no process-wide statics, explicit solver
/// context" direction) — callers apply the returned per-column ratio to whatever stacked
/// `J_p` they've already built rather than have this type reach into it.
#[derive(Debug, Clone)]
pub struct ParameterScale {
    pub scale: Vector,
}

impl ParameterScale {
    pub fn unit(n_p: usize) -> Self {
        Self {
            scale: Vector::from_fn(n_p, |_| 1.0),
        }
    }

    /// Recomputes `scale` from the physical parameter vector and bounds; returns the
    /// per-parameter ratio `sn/so` so the caller can rescale a stacked `J_p`'s columns
    /// (`J_p[:, i] *= ratio[i]`) to preserve step direction across the scale update.
    pub fn update(&mut self, p: VectorRef, lower: VectorRef, upper: VectorRef) -> Vector {
        let n = self.scale.nrows();
        let mut next = Vector::zeros(n);
        for i in 0..n {
            let l = lower[i];
            let u = upper[i];
            let mut sn = if l == 0.0 || u == 0.0 || l.signum() != u.signum() {
                (u - l).abs()
            } else {
                p[i].max(l).min(u)
            };
            if sn == 0.0 {
                sn = 1.0;
            }
            next[i] = sn;
        }
        let ratio = cwise_quotient(next.as_ref(), self.scale.as_ref());
        self.scale = next;
        ratio
    }
}

/// Applies a per-column ratio (from [`ParameterScale::update`]) to a stacked `J_p`'s columns.
pub fn rescale_columns(jac_p: &mut Matrix, ratio: VectorRef) {
    for j in 0..jac_p.ncols() {
        let r = ratio[j];
        for i in 0..jac_p.nrows() {
            jac_p[(i, j)] *= r;
        }
    }
}

/// Eliminates `n_a` auxiliary rows from `[J_x | J_a | J_p]` by partial pivoting on `J_a`
/// (spec.md §4.6 step 6). Returns the reduced `(J_x, J_p)` with `n_c - n_a` rows; `J_p` is
/// `None` iff the caller didn't supply one.
fn eliminate_aux(
    jx: &Matrix,
    ja: &Matrix,
    jp: Option<&Matrix>,
) -> Result<(Matrix, Option<Matrix>), NumericalError> {
    let n_c = jx.nrows();
    let n_x = jx.ncols();
    let n_a = ja.ncols();
    let n_p = jp.map_or(0, |m| m.ncols());

    let mut jx_rows: Vec<Vec<E>> = (0..n_c).map(|r| (0..n_x).map(|c| jx[(r, c)]).collect()).collect();
    let mut ja_rows: Vec<Vec<E>> = (0..n_c).map(|r| (0..n_a).map(|c| ja[(r, c)]).collect()).collect();
    let mut jp_rows: Option<Vec<Vec<E>>> =
        jp.map(|m| (0..n_c).map(|r| (0..n_p).map(|c| m[(r, c)]).collect()).collect());

    for a in 0..n_a {
        let (pivot_row, pivot_val) = ja_rows
            .iter()
            .enumerate()
            .map(|(i, row)| (i, row[a]))
            .max_by(|(_, v1), (_, v2)| v1.abs().partial_cmp(&v2.abs()).unwrap())
            .ok_or(NumericalError::Singular)?;

        if pivot_val == 0.0 {
            return Err(NumericalError::Singular);
        }

        let facx: Vec<E> = jx_rows[pivot_row].iter().map(|v| v / pivot_val).collect();
        let faca: Vec<E> = ja_rows[pivot_row].iter().map(|v| v / pivot_val).collect();
        let facp: Option<Vec<E>> =
            jp_rows.as_ref().map(|rows| rows[pivot_row].iter().map(|v| v / pivot_val).collect());

        let mut new_jx = Vec::with_capacity(jx_rows.len() - 1);
        let mut new_ja = Vec::with_capacity(ja_rows.len() - 1);
        let mut new_jp: Option<Vec<Vec<E>>> = None;

        for (i, row) in jx_rows.iter().enumerate() {
            if i == pivot_row {
                continue;
            }
            let f = ja_rows[i][a];
            new_jx.push(row.iter().zip(&facx).map(|(v, fv)| v - f * fv).collect());
        }
        for (i, row) in ja_rows.iter().enumerate() {
            if i == pivot_row {
                continue;
            }
            let f = row[a];
            new_ja.push(row.iter().zip(&faca).map(|(v, fv)| v - f * fv).collect());
        }
        if let (Some(rows), Some(facp)) = (&jp_rows, &facp) {
            let mut out = Vec::with_capacity(rows.len() - 1);
            for (i, row) in rows.iter().enumerate() {
                if i == pivot_row {
                    continue;
                }
                let f = ja_rows[i][a];
                out.push(row.iter().zip(facp).map(|(v, fv)| v - f * fv).collect());
            }
            new_jp = Some(out);
        }

        jx_rows = new_jx;
        ja_rows = new_ja;
        jp_rows = new_jp;
    }

    let n_r = jx_rows.len();
    let jx_reduced = Matrix::from_fn(n_r, n_x, |i, j| jx_rows[i][j]);
    let jp_reduced = jp_rows.map(|rows| Matrix::from_fn(n_r, n_p, |i, j| rows[i][j]));
    Ok((jx_reduced, jp_reduced))
}

/// Assembles the whitened residual/Jacobian for one data point, spec.md §4.6.
///
/// Writes the unscaled step into `xs.delta` on success (step 4). `want_jp`/`want_scale` mirror
/// the C source's `jpf`/`sf` flags; `want_r` mirrors `rf`.
pub fn assemble(
    evaluator: &mut impl ModelEvaluator,
    xs: &mut XSet,
    p: VectorRef,
    c: VectorRef,
    f: VectorRef,
    want_r: bool,
    want_jp: bool,
    want_scale: bool,
    options: &ResidualOptions,
    workspace: &mut Workspace,
) -> Result<ResidualResult, ParxError> {
    let n_x = xs.val.nrows();
    let n_a = evaluator.dims().n_a;

    let x_scale = Vector::from_fn(n_x, |i| {
        xs.err[i]
            .abs()
            .max((options.tol * xs.val[i]).abs())
            .max(xs.abserr[i].abs())
    });

    let a_init = Vector::zeros(n_a);
    let dist_result = distance::solve(
        evaluator,
        xs.val.as_ref(),
        x_scale.as_ref(),
        a_init.as_ref(),
        p,
        c,
        f,
        &options.distance,
        workspace,
    )?;

    xs.delta = Vector::from_fn(n_x, |i| x_scale[i] * dist_result.delta[i]);

    let jp_full = if want_jp {
        let x_trial = Vector::from_fn(n_x, |i| xs.val[i] + x_scale[i] * dist_result.delta[i]);
        let p_mask = vec![true; p.nrows()];
        let req = EvalRequest {
            x: x_trial.as_ref(),
            a: dist_result.a.as_ref(),
            p,
            c,
            f,
            want_r: false,
            want_jx: false,
            want_jp: true,
            x_mask: &[],
            p_mask: &p_mask,
        };
        let result = evaluate(evaluator, &req).map_err(|_| NumericalError::ObjFail)?;
        Some(result.jp.expect("requested jp"))
    } else {
        None
    };

    let (jx_reduced, jp_reduced) =
        eliminate_aux(&dist_result.jx, &dist_result.ja, jp_full.as_ref())?;

    let n_r = jx_reduced.nrows();
    let svd_result = svd(jx_reduced.as_ref(), -1.0)?;
    if svd_result.rank < n_r {
        return Err(NumericalError::Singular.into());
    }

    let r = if want_r {
        matvec(svd_result.v_t.as_ref(), dist_result.delta.as_ref())
    } else {
        Vector::zeros(0)
    };

    // 1/s with zero singular values mapped to 0 rather than infinity: route through infinity
    // so a single `cwise_inverse` pass covers both the whitened-Jacobian and scale-transform
    // uses below instead of repeating the zero-guard at each call site.
    let s_safe = Vector::from_fn(svd_result.s.len(), |i| {
        if svd_result.s[i] == 0.0 { E::INFINITY } else { svd_result.s[i] }
    });
    let inv_s = cwise_inverse(s_safe.as_ref());

    let jp = jp_reduced.map(|jp_reduced| {
        let mut whitened = mattmat(svd_result.u.as_ref(), jp_reduced.as_ref());
        for i in 0..whitened.nrows() {
            let f = -inv_s[i];
            for col in 0..whitened.ncols() {
                whitened[(i, col)] *= f;
            }
        }
        whitened
    });

    let scale = want_scale.then(|| Matrix::from_fn(n_r, n_r, |i, j| inv_s[i] * svd_result.u[(j, i)]));

    Ok(ResidualResult {
        r,
        jp,
        scale,
        iterations: dist_result.iterations,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluator::{CompiledModel, ModelDims};
    use faer::{Col, Mat};

    fn line_model() -> CompiledModel {
        // r = y - (p0 + p1*x), x = (x, y)
        CompiledModel {
            dims: ModelDims {
                n_r: 1,
                n_x: 2,
                n_a: 0,
                n_p: 2,
                n_c: 0,
                n_f: 0,
            },
            residual: |x, _a, p, _c, _f| Some(Col::from_fn(1, |_| x[1] - (p[0] + p[1] * x[0]))),
            jac_x: Some(|_x, _a, p, _c, _f, _mask| Some(Mat::from_fn(1, 2, |_, j| if j == 0 { -p[1] } else { 1.0 }))),
            jac_a: Some(|_x, _a, _p, _c, _f| Some(Mat::zeros(1, 0))),
            jac_p: Some(|_x, _a, _p, _c, _f, _mask| Some(Mat::from_fn(1, 2, |_, j| if j == 0 { -1.0 } else { 0.0 }))),
            transpose_x: None,
            inverse_transpose_x: None,
            transpose_p: None,
            inverse_transpose_p: None,
        }
    }

    #[test]
    fn assembles_whitened_residual_for_a_point_on_the_line() {
        let mut model = line_model();
        let mut xs = XSet::new(
            0,
            Col::from_fn(2, |i| if i == 0 { 1.0 } else { 3.0 }),
            Col::from_fn(2, |_| 0.01),
            Col::from_fn(2, |_| 1e-8),
        );
        let p = Col::from_fn(2, |i| if i == 0 { 1.0 } else { 2.0 });
        let empty = Col::<E>::zeros(0);
        let options = ResidualOptions::default();
        let mut workspace = Workspace::new();
        let result = assemble(
            &mut model,
            &mut xs,
            p.as_ref(),
            empty.as_ref(),
            empty.as_ref(),
            true,
            true,
            false,
            &options,
            &mut workspace,
        )
        .unwrap();
        assert_eq!(result.r.nrows(), 1);
        assert!(result.r[0].abs() < 1e-6);
        let jp = result.jp.unwrap();
        assert_eq!(jp.nrows(), 1);
        assert_eq!(jp.ncols(), 2);
    }

    #[test]
    fn parameter_scale_rescales_a_stacked_jacobian() {
        let mut scale = ParameterScale::unit(1);
        let p = Col::from_fn(1, |_| 5.0);
        let lower = Col::from_fn(1, |_| 0.0);
        let upper = Col::from_fn(1, |_| 10.0);
        let ratio = scale.update(p.as_ref(), lower.as_ref(), upper.as_ref());
        assert_eq!(scale.scale[0], 5.0);
        let mut jac = Mat::from_fn(1, 1, |_, _| 2.0);
        rescale_columns(&mut jac, ratio.as_ref());
        assert_eq!(jac[(0, 0)], 10.0);
    }
}
