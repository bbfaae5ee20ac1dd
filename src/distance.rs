//! Per-point distance solver, spec.md §4.5.
//!
//! Grounded on `original_source/ParXCL/distance.c` (`dist_step_direction`, `dist_step_size`,
//! `powell`, `constr_linef`) and, for its assemble→factorize→solve shape, the teacher's
//! `lp::mpc::augmented_system::StandardSystem` (`DESIGN.md`). The teacher's system was a
//! primal-dual KKT block reused across many solves of the same sparsity pattern; this one is
//! a small dense symmetric block rebuilt fresh every iteration, so there is no persisted
//! factorization to `resolve()` into — each iteration assembles, solves, and discards.

use crate::E;
use crate::errors::{NumericalError, ParxError};
use crate::evaluator::{EvalRequest, ModelEvaluator, evaluate};
use crate::linalg::dense::{Matrix, Vector, VectorRef, matmat, matvec, mattvec, norm2};
use crate::linalg::solve::solve_sym_mat;
use crate::linalg::vector_ops::{cwise_multiply, is_col_positive};
use crate::linalg::workspace::Workspace;
use crate::linesearch::golden::golden_section;

#[derive(Debug, Clone)]
pub struct DistanceOptions {
    pub rtol: E,
    pub atol: E,
    pub atol_a: E,
    pub max_iter: usize,
    /// Threshold below which a shrinking Powell-penalty step is treated as having crossed a
    /// discontinuity and accepted rather than shrunk further (spec.md §9 Open Question 3).
    pub discontinuity_slope_tol: E,
}

impl Default for DistanceOptions {
    fn default() -> Self {
        Self {
            rtol: 1e-8,
            atol: 1e-10,
            atol_a: 1e-10,
            max_iter: 20,
            discontinuity_slope_tol: 1e-12,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DistanceResult {
    pub delta: Vector,
    pub a: Vector,
    pub lambda: Vector,
    pub iterations: usize,
    /// `∂f/∂x` at the returned `(delta, a)`, scaled by `x_scale` (spec.md §4.6's residual
    /// assembler reuses this rather than re-evaluating the model at the solution).
    pub jx: Matrix,
    /// `∂f/∂a` at the returned `(delta, a)`.
    pub ja: Matrix,
}

struct StepDirection {
    delta_lambda: Vector,
    delta_delta: Vector,
    delta_a: Vector,
    lambda_current: Vector,
}

/// Assembles and solves the `(n_c+n_a)×(n_c+n_a)` symmetric block for the sequential
/// linearized constraint step (spec.md §4.5 step 2).
fn step_direction(
    jx: &Matrix,
    ja: &Matrix,
    c: VectorRef,
    delta: VectorRef,
    lambda: VectorRef,
    workspace: &mut Workspace,
) -> Result<StepDirection, NumericalError> {
    let n_c = jx.nrows();
    let n_a = ja.ncols();
    let n = n_c + n_a;

    let jx_jxt = matmat(jx.as_ref(), jx.as_ref().transpose());

    let (h, rhs) = workspace.block(n);
    for i in 0..n_c {
        for j in 0..n_c {
            h[(i, j)] = jx_jxt[(i, j)];
        }
    }
    for i in 0..n_c {
        for j in 0..n_a {
            h[(i, n_c + j)] = ja[(i, j)];
            h[(n_c + j, i)] = ja[(i, j)];
        }
    }

    let jx_delta = matvec(jx.as_ref(), delta);

    for i in 0..n_c {
        rhs[(i, 0)] = jx_delta[i] - c[i];
        rhs[(i, 1)] = -c[i];
        rhs[(i, 2)] = jx_delta[i];
    }

    let y = solve_sym_mat(h.as_ref(), rhs.as_ref()).map_err(|_| NumericalError::Singular)?;

    let y0_top = Vector::from_fn(n_c, |i| y[(i, 0)]);
    let y1_top = Vector::from_fn(n_c, |i| y[(i, 1)]);
    let y2_top = Vector::from_fn(n_c, |i| y[(i, 2)]);

    let lambda_current = y2_top;
    let delta_lambda = Vector::from_fn(n_c, |i| y0_top[i] - lambda[i]);
    let normal = mattvec(jx.as_ref(), y1_top.as_ref());
    let delta_delta_full = mattvec(jx.as_ref(), y0_top.as_ref());
    let delta_delta = Vector::from_fn(delta.nrows(), |i| delta_delta_full[i] - delta[i]);
    let delta_a = Vector::from_fn(n_a, |i| y[(n_c + i, 0)]);
    let _tangential = Vector::from_fn(delta.nrows(), |i| delta_delta[i] - normal[i]);

    Ok(StepDirection {
        delta_lambda,
        delta_delta,
        delta_a,
        lambda_current,
    })
}

/// Evaluates the constraint residual (the model residual at the trial point) and, when
/// requested, `∂f/∂x`, `∂f/∂a` (spec.md §4.5 step 1).
///
/// `delta` is expressed in non-dimensional (scaled) coordinates; `x_scale` is the
/// per-external `σ_i` spec.md §4.6 computes, so the physical trial point is
/// `x_meas + x_scale⊙delta` and the returned `∂f/∂x` is chain-ruled back into the same
/// scaled coordinates (`∂f/∂x · diag(x_scale)`) so the whole distance iteration stays in one
/// non-dimensional metric (spec.md §4.5's "the norm is in the scaled coordinate system").
fn eval_constraint(
    evaluator: &mut impl ModelEvaluator,
    x_meas: VectorRef,
    x_scale: VectorRef,
    delta: VectorRef,
    a: VectorRef,
    p: VectorRef,
    c_const: VectorRef,
    f: VectorRef,
    want_j: bool,
) -> Result<(Vector, Option<Matrix>, Option<Matrix>), NumericalError> {
    let x_trial = Vector::from_fn(x_meas.nrows(), |i| x_meas[i] + x_scale[i] * delta[i]);
    let x_mask: Vec<bool> = vec![true; x_meas.nrows()];
    let req = EvalRequest {
        x: x_trial.as_ref(),
        a,
        p,
        c: c_const,
        f,
        want_r: true,
        want_jx: want_j,
        want_jp: false,
        x_mask: &x_mask,
        p_mask: &[],
    };
    let result = evaluate(evaluator, &req).map_err(|_| NumericalError::ObjFail)?;
    let jx_scaled = result.jx.map(|jx| {
        let mut scaled = jx;
        for j in 0..x_scale.nrows() {
            for i in 0..scaled.nrows() {
                scaled[(i, j)] *= x_scale[j];
            }
        }
        scaled
    });
    Ok((result.r.expect("requested residual"), jx_scaled, result.ja))
}

fn powell_penalty(c: VectorRef, mu: VectorRef, delta: VectorRef) -> E {
    // mu can be negative at iteration 0 (mu_i = lambda_i, spec.md §4.5 step 6), so the sign
    // must come from mu itself rather than from `mu_i * c_i` collapsed through `.abs()`.
    let c_abs = Vector::from_fn(c.nrows(), |i| c[i].abs());
    let weighted = cwise_multiply(mu, c_abs.as_ref());
    0.5 * norm2(delta).powi(2) + (0..weighted.nrows()).map(|i| weighted[i]).sum::<E>()
}

/// Finds `(δ, a)` minimizing `½‖δ‖²` subject to `f(x_meas+σ⊙δ, a; p) = 0`, where `δ` (and the
/// returned [`DistanceResult::delta`]) is in the non-dimensional coordinates `x_scale = σ`
/// defines (spec.md §4.5). Callers working in physical units pass `x_scale` of all ones.
pub fn solve(
    evaluator: &mut impl ModelEvaluator,
    x_meas: VectorRef,
    x_scale: VectorRef,
    a_init: VectorRef,
    p: VectorRef,
    c_const: VectorRef,
    f: VectorRef,
    options: &DistanceOptions,
    workspace: &mut Workspace,
) -> Result<DistanceResult, ParxError> {
    let n_x = x_meas.nrows();
    let n_a = a_init.nrows();

    let mut delta = Vector::zeros(n_x);
    let mut a = a_init.to_owned();
    let mut lambda = Vector::zeros(evaluator.dims().n_r);

    if options.max_iter == 0 {
        let (c, jx_opt, ja_opt) = eval_constraint(
            evaluator,
            x_meas,
            x_scale,
            delta.as_ref(),
            a.as_ref(),
            p,
            c_const,
            f,
            true,
        )?;
        let jx = jx_opt.ok_or(ParxError::from(NumericalError::Singular))?;
        let ja = ja_opt.unwrap_or_else(|| Matrix::zeros(jx.nrows(), n_a));
        let step = step_direction(&jx, &ja, c.as_ref(), delta.as_ref(), lambda.as_ref(), workspace)?;
        for i in 0..n_x {
            delta[i] += step.delta_delta[i];
        }
        for i in 0..n_a {
            a[i] += step.delta_a[i];
        }
        lambda = step.lambda_current;
        return Ok(DistanceResult {
            delta,
            a,
            lambda,
            iterations: 1,
            jx,
            ja,
        });
    }

    let mut mu: Option<Vector> = None;

    for iteration in 0..options.max_iter {
        let (c, jx_opt, ja_opt) = eval_constraint(
            evaluator,
            x_meas,
            x_scale,
            delta.as_ref(),
            a.as_ref(),
            p,
            c_const,
            f,
            true,
        )?;
        let jx = jx_opt.ok_or(ParxError::from(NumericalError::Singular))?;
        let ja = ja_opt.unwrap_or_else(|| Matrix::zeros(jx.nrows(), n_a));

        let step = step_direction(&jx, &ja, c.as_ref(), delta.as_ref(), lambda.as_ref(), workspace)?;

        // Positive slack on every tolerance margin is exactly the convergence test: margin_i =
        // rtol*|x_i|+atol - |step_i| must be strictly positive in every component.
        let margin_x = Vector::from_fn(n_x, |i| {
            options.rtol * delta[i].abs() + options.atol - step.delta_delta[i].abs()
        });
        let margin_a = Vector::from_fn(n_a, |i| {
            options.rtol * a[i].abs() + options.atol_a - step.delta_a[i].abs()
        });
        let converged = is_col_positive(margin_x.as_ref()) && is_col_positive(margin_a.as_ref());

        if converged {
            return Ok(DistanceResult {
                delta,
                a,
                lambda,
                iterations: iteration,
                jx,
                ja,
            });
        }

        for i in 0..lambda.nrows() {
            lambda[i] += step.delta_lambda[i];
        }

        let new_mu = match &mu {
            None => lambda.clone(),
            Some(prev) => Vector::from_fn(lambda.nrows(), |i| {
                lambda[i]
                    .abs()
                    .max(0.5 * (prev[i].abs() + lambda[i].abs()))
            }),
        };
        mu = Some(new_mu.clone());

        // Step size: minimize P(alpha) = 0.5||delta+alpha*dd||^2 + sum mu_i |c_i(...)|.
        let eval_alpha = |evaluator: &mut dyn ModelEvaluator, alpha: E| -> E {
            let trial_delta = Vector::from_fn(n_x, |i| delta[i] + alpha * step.delta_delta[i]);
            let trial_a = Vector::from_fn(n_a, |i| a[i] + alpha * step.delta_a[i]);
            match eval_constraint(
                evaluator,
                x_meas,
                x_scale,
                trial_delta.as_ref(),
                trial_a.as_ref(),
                p,
                c_const,
                f,
                false,
            ) {
                Ok((c_trial, _, _)) => powell_penalty(c_trial.as_ref(), new_mu.as_ref(), trial_delta.as_ref()),
                Err(_) => E::INFINITY,
            }
        };

        let p0 = powell_penalty(c.as_ref(), new_mu.as_ref(), delta.as_ref());
        let p1 = eval_alpha(evaluator, 1.0);

        let alpha = if p1 - p0 < options.rtol * p0 + E::EPSILON.sqrt() {
            1.0
        } else {
            let dd_norm = norm2(step.delta_delta.as_ref());
            let delta_norm = norm2(delta.as_ref());
            let mut alpha_r = 1.0;
            let mut alpha_m = 0.1 * alpha_r;
            let min_step = options.discontinuity_slope_tol * delta_norm / dd_norm.max(E::EPSILON);

            loop {
                let p_m = eval_alpha(evaluator, alpha_m);
                if p_m <= p0 {
                    break;
                }
                if alpha_m < min_step {
                    break;
                }
                alpha_r = alpha_m;
                alpha_m *= 0.1;
            }

            let f_bx = eval_alpha(evaluator, alpha_m);
            let result = golden_section(
                0.0,
                alpha_m,
                alpha_r,
                f_bx,
                |a| eval_alpha(evaluator, a),
                options.rtol,
                8,
            );
            result.x
        };

        for i in 0..n_x {
            delta[i] += alpha * step.delta_delta[i];
        }
        for i in 0..n_a {
            a[i] += alpha * step.delta_a[i];
        }
    }

    Err(NumericalError::SlowConvergence.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluator::{CompiledModel, ModelDims};
    use faer::{Col, Mat};

    fn plane_model() -> CompiledModel {
        CompiledModel {
            dims: ModelDims {
                n_r: 1,
                n_x: 3,
                n_a: 0,
                n_p: 0,
                n_c: 0,
                n_f: 0,
            },
            residual: |x, _a, _p, _c, _f| Some(Col::from_fn(1, |_| x[0] + x[1] + x[2])),
            jac_x: Some(|_x, _a, _p, _c, _f, _mask| Some(Mat::from_fn(1, 3, |_, _| 1.0))),
            jac_a: Some(|_x, _a, _p, _c, _f| Some(Mat::zeros(1, 0))),
            jac_p: None,
            transpose_x: None,
            inverse_transpose_x: None,
            transpose_p: None,
            inverse_transpose_p: None,
        }
    }

    #[test]
    fn projects_onto_a_linear_manifold() {
        let mut model = plane_model();
        let x_meas = Col::from_fn(3, |_| 1.0);
        let x_scale = Col::from_fn(3, |_| 1.0);
        let empty = Col::<E>::zeros(0);
        let options = DistanceOptions::default();
        let result = solve(
            &mut model,
            x_meas.as_ref(),
            x_scale.as_ref(),
            empty.as_ref(),
            empty.as_ref(),
            empty.as_ref(),
            empty.as_ref(),
            &options,
            &mut Workspace::new(),
        )
        .unwrap();
        let projected = Vector::from_fn(3, |i| x_meas[i] + result.delta[i]);
        assert!((projected[0] + projected[1] + projected[2]).abs() < 1e-8);
        assert!((norm2(result.delta.as_ref()) - (3.0_f64).sqrt()).abs() < 1e-6);
    }

    #[test]
    fn one_shot_mode_performs_a_single_solve() {
        let mut model = plane_model();
        let x_meas = Col::from_fn(3, |_| 1.0);
        let x_scale = Col::from_fn(3, |_| 1.0);
        let empty = Col::<E>::zeros(0);
        let options = DistanceOptions {
            max_iter: 0,
            ..DistanceOptions::default()
        };
        let result = solve(
            &mut model,
            x_meas.as_ref(),
            x_scale.as_ref(),
            empty.as_ref(),
            empty.as_ref(),
            empty.as_ref(),
            empty.as_ref(),
            &options,
            &mut Workspace::new(),
        )
        .unwrap();
        assert_eq!(result.iterations, 1);
    }
}
