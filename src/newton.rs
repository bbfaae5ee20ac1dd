//! Newton-Raphson simulation solver, spec.md §4.4.
//!
//! Grounded on `original_source/ParXCL/newton.c`'s `newton_raphson`/`calcjac`/`optstep` and on
//! the teacher's `nlp::gd::GradientDescent`'s "iterate, check status, call hooks" outer-loop
//! shape (`DESIGN.md`'s `nlp::ipm` entry) — simplified here since this solver has no
//! constraints or step-size pluggability, just a fixed Newton step with an optional
//! Brent-polished partial step.

use crate::E;
use crate::errors::{EvaluatorError, NumericalError, ParxError};
use crate::evaluator::{EvalRequest, ModelEvaluator, evaluate};
use crate::linalg::dense::{Matrix, Vector, VectorRef, norm2};
use crate::linalg::solve::solve_general;
use crate::linesearch::brent;

/// Return codes spec.md §4.4 defines, folded into a closed enum rather than the original's
/// raw integers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NewtonStatus {
    /// Genuine solution: `x` and `f` both converged.
    Converged,
    /// Convergent in `x` but `‖f‖` is still above tolerance.
    ConvergedXOnly,
}

#[derive(Debug, Clone)]
pub struct NewtonResult {
    pub xhat: Vector,
    pub status: NewtonStatus,
    pub iterations: usize,
}

#[derive(Debug, Clone)]
pub struct NewtonOptions {
    /// Relative tolerance applied to every stacked unknown, `rel_i`.
    pub rel_tol: E,
    /// Absolute tolerance applied to every stacked unknown, `abs_i`.
    pub abs_tol: E,
    /// Iteration budget; `None` uses the default `500·dim` (spec.md §4.4).
    pub max_iter: Option<usize>,
    /// Relative precision passed to the Brent line search.
    pub line_search_rtol: E,
}

impl Default for NewtonOptions {
    fn default() -> Self {
        Self {
            rel_tol: 1e-8,
            abs_tol: 1e-12,
            max_iter: None,
            line_search_rtol: 1e-6,
        }
    }
}

fn stacked_residual(
    evaluator: &mut impl ModelEvaluator,
    xhat: VectorRef,
    n_x: usize,
    p: VectorRef,
    c: VectorRef,
    f: VectorRef,
    want_j: bool,
) -> Result<(Vector, Option<Matrix>), EvaluatorError> {
    let x = xhat.subrows(0, n_x);
    let a = xhat.subrows(n_x, xhat.nrows() - n_x);
    let req = EvalRequest {
        x,
        a,
        p,
        c,
        f,
        want_r: true,
        want_jx: want_j,
        want_jp: false,
        x_mask: &[],
        p_mask: &[],
    };
    let result = evaluate(evaluator, &req)?;
    let r = result.r.expect("requested residual");
    let jac = match (result.jx, result.ja) {
        (Some(jx), Some(ja)) => {
            let n_r = jx.nrows();
            let n_a = ja.ncols();
            Some(Matrix::from_fn(n_r, n_x + n_a, |i, j| {
                if j < n_x { jx[(i, j)] } else { ja[(i, j - n_x)] }
            }))
        }
        _ => None,
    };
    Ok((r, jac))
}

/// Central-difference Jacobian, step `0.1·(rel_i·|xhat_i|+abs_i)` per column
/// (spec.md §4.4 step 1).
fn central_difference_jacobian(
    evaluator: &mut impl ModelEvaluator,
    xhat: VectorRef,
    n_x: usize,
    p: VectorRef,
    c: VectorRef,
    f: VectorRef,
    options: &NewtonOptions,
) -> Result<Matrix, EvaluatorError> {
    let n = xhat.nrows();
    let (r0, _) = stacked_residual(evaluator, xhat, n_x, p, c, f, false)?;
    let n_r = r0.nrows();
    let mut jac = Matrix::zeros(n_r, n);
    for j in 0..n {
        let delta = 0.1 * (options.rel_tol * xhat[j].abs() + options.abs_tol);
        let mut perturbed = xhat.to_owned();
        perturbed[j] += delta;
        let (rp, _) = stacked_residual(evaluator, perturbed.as_ref(), n_x, p, c, f, false)?;
        for i in 0..n_r {
            jac[(i, j)] = (rp[i] - r0[i]) / delta;
        }
    }
    Ok(jac)
}

/// Solves `f(x̂) = 0` where `x̂` stacks unknown externals and auxiliaries, spec.md §4.4.
///
/// `n_x` splits `xhat` into its leading external block and trailing auxiliary block; `rel`
/// and `abs` are per-variable tolerances aligned with `xhat`.
pub fn solve(
    evaluator: &mut impl ModelEvaluator,
    mut xhat: Vector,
    n_x: usize,
    p: VectorRef,
    c: VectorRef,
    f: VectorRef,
    rel: VectorRef,
    abs: VectorRef,
    options: &NewtonOptions,
) -> Result<NewtonResult, ParxError> {
    let dim = xhat.nrows();
    let max_iter = options.max_iter.unwrap_or(500 * dim.max(1));
    let fbound = 100.0 * (dim as E * E::EPSILON).sqrt();

    let (mut r, mut jac_opt) =
        stacked_residual(evaluator, xhat.as_ref(), n_x, p, c, f, true).map_err(|_| NumericalError::ObjFail)?;

    for iteration in 0..max_iter {
        let jac = match jac_opt.take() {
            Some(j) => j,
            None => central_difference_jacobian(evaluator, xhat.as_ref(), n_x, p, c, f, options)
                .map_err(|_| NumericalError::ObjFail)?,
        };

        let neg_r = Vector::from_fn(r.nrows(), |i| -r[i]);
        let delta = solve_general(jac.as_ref(), neg_r.as_ref())
            .map_err(|_| NumericalError::SingularJacobian)?;

        let converged_x = (0..dim)
            .all(|i| delta[i].abs() < rel[i] * xhat[i].abs() + abs[i]);
        let converged_f = norm2(r.as_ref()) < fbound;

        if converged_x && converged_f {
            return Ok(NewtonResult {
                xhat,
                status: NewtonStatus::Converged,
                iterations: iteration,
            });
        }
        if converged_x {
            return Ok(NewtonResult {
                xhat,
                status: NewtonStatus::ConvergedXOnly,
                iterations: iteration,
            });
        }

        let r0_norm = norm2(r.as_ref());
        let full_step = Vector::from_fn(dim, |i| xhat[i] + delta[i]);
        let (r1, jac1) = match stacked_residual(evaluator, full_step.as_ref(), n_x, p, c, f, true)
        {
            Ok(v) => v,
            Err(_) => (Vector::from_fn(r.nrows(), |_| E::INFINITY), None),
        };
        let r1_norm = norm2(r1.as_ref());

        if r1_norm < r0_norm {
            xhat = full_step;
            r = r1;
            jac_opt = jac1;
            continue;
        }

        // Partial-step line search on alpha in (0,1], minimizing ||f(x+alpha*delta)||.
        let probe = |alpha: E| -> E {
            let trial = Vector::from_fn(dim, |i| xhat[i] + alpha * delta[i]);
            match stacked_residual(evaluator, trial.as_ref(), n_x, p, c, f, false) {
                Ok((rv, _)) => norm2(rv.as_ref()),
                Err(_) => E::INFINITY,
            }
        };

        let f_half = probe(0.5);
        let result = brent(0.0, 1.0, 0.5, f_half, probe, options.line_search_rtol, 1e-12, 25);

        let alpha = result.x;
        if alpha < 100.0 * E::EPSILON || !result.f.is_finite() {
            return Err(NumericalError::NoLowerPoint.into());
        }

        let stepped = Vector::from_fn(dim, |i| xhat[i] + alpha * delta[i]);
        let (r_new, jac_new) =
            stacked_residual(evaluator, stepped.as_ref(), n_x, p, c, f, true)
                .map_err(|_| NumericalError::ObjFail)?;
        xhat = stepped;
        r = r_new;
        jac_opt = jac_new;
    }

    Err(NumericalError::IterationBudgetExhausted.into())
}
