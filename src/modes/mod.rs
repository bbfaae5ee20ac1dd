//! MODES parameter extractor, spec.md §4.8, grounded on `modes()` in
//! `original_source/ParXCL/modes.c`.
//!
//! An outer Gauss-Newton-over-SVD loop: evaluate the stacked objective ([`crate::objective`]),
//! take an SVD-based least-squares step, test convergence, and — once converged but not yet
//! proximate under the chosen [`proximity::ProximityCriterion`] — hand the worst point to
//! [`pointset`] and keep going. Step length is chosen by clipping to the parameter box and
//! then a Brent-polished line search, same two-phase shape as [`crate::distance::solve`]'s
//! Powell step but with bound clipping standing in for the penalty weighting.

pub mod pointset;
pub mod proximity;

pub use proximity::ProximityCriterion;

use crate::E;
use crate::Progress;
use crate::Status;
use crate::callback::Callback;
use crate::datamodel::{FAILED, NumBlock, UNSELECTED};
use crate::errors::{NumericalError, ParxError};
use crate::linalg::dense::{Matrix, Vector, VectorRef, mattvec, norm2};
use crate::linalg::svd::svd;
use crate::linesearch::brent;
use crate::objective;
use crate::residual::ResidualOptions;
use crate::terminators::Terminator;

/// Underrelaxation factor applied to the first trial step size when bracketing a line
/// search (`REL_FAC` in `modes.c`).
const REL_FAC: E = 0.20;
/// Below this fraction of a full step, a bound clip is accepted outright rather than
/// line-searched into (`CUTBOUND` in `modes.c`).
const CUTBOUND: E = 0.10;
/// Outer-iteration budget multiplier used when the caller leaves `max_iter` unset
/// (`MAX_IT` in `modes.c`): `max_iter = MAX_IT * round(sqrt(n_p))`.
const MAX_IT: usize = 20;
/// Line-search iteration budget inside one outer step (`LINE_IT` in `modes.c`).
const LINE_IT: usize = 5;
/// Convergence threshold is relaxed by this factor before a point-set modification is
/// attempted, and tightened back afterward (`EQ_SLACK` in `modes.c`).
const EQ_SLACK: E = 1.50;

#[derive(Debug, Clone)]
pub struct ModesOptions {
    /// Convergence precision; internally floored at `sqrt(machine epsilon)`.
    pub prec: E,
    /// Sensitivity factor feeding the SVD rank-cut tolerance (`stol = max(n_p·eps, prec·sens)`).
    pub sens: E,
    /// Outer-iteration budget; `None` defaults to `20·round(sqrt(n_p))`.
    pub max_iter: Option<usize>,
    pub residual: ResidualOptions,
}

impl Default for ModesOptions {
    fn default() -> Self {
        Self {
            prec: 1e-6,
            sens: 1.0,
            max_iter: None,
            residual: ResidualOptions::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModesStatus {
    /// Converged, proximate, and full rank.
    Success,
    /// Converged and proximate, but the Jacobian was rank-deficient at the solution.
    Doubtful,
    /// Stopped early by a [`Terminator`].
    Terminated,
}

#[derive(Debug, Clone)]
pub struct ModesResult {
    pub status: ModesStatus,
    pub rank: usize,
    pub condition: E,
    pub iterations: usize,
    /// Per-parameter confidence limit, spec.md §4.8's `conf_lim`.
    pub confidence: Vector,
    /// Per-parameter redundancy indicator; zero unless that parameter is the worst-determined
    /// one along a direction the SVD dropped (rank-deficient case only).
    pub redundancy: Vector,
    pub terminated: Option<Status>,
}

fn bound_alpha_vec(p: VectorRef, dp: VectorRef, p_low: VectorRef, p_up: VectorRef) -> Vector {
    Vector::from_fn(p.nrows(), |i| {
        let step = dp[i];
        if step == 0.0 {
            return 1.0;
        }
        let p_new = p[i] + step;
        let s = if p_new > p_up[i] {
            ((p_up[i] - p[i]) / step).abs()
        } else if p_new < p_low[i] {
            ((p[i] - p_low[i]) / step).abs()
        } else {
            1.0
        };
        if s < 1.0 { s } else { 1.0 }
    })
}

/// Evaluates the stacked objective at `p + alpha*dp`, returning `(residual norm, slope)`
/// where `slope = (J_pᵀ·r)ᵀ·dp`; `+inf` for both on evaluation failure so callers can keep
/// treating this as a monotone bracketing function.
fn eval_line(
    nb: &mut NumBlock,
    p: VectorRef,
    dp: VectorRef,
    alpha: E,
    want_slope: bool,
    options: &ResidualOptions,
) -> (E, E) {
    let p_trial = Vector::from_fn(p.nrows(), |i| p[i] + alpha * dp[i]);
    match objective::evaluate(nb, p_trial.as_ref(), true, want_slope, false, false, options) {
        Ok(obj) => {
            let r_norm = norm2(obj.r.as_ref());
            let slope = if want_slope {
                let jp = obj.jp.expect("requested jp");
                let grad = mattvec(jp.as_ref(), obj.r.as_ref());
                crate::linalg::dense::dot(grad.as_ref(), dp)
            } else {
                0.0
            };
            (r_norm, slope)
        }
        Err(_) => (E::INFINITY, E::INFINITY),
    }
}

/// Chooses a step size in `(0, 1]`, clipping to the parameter box and then line-searching
/// discontinuities in the objective (`modes.c`'s `check_bounds`/`step_size`).
#[allow(clippy::too_many_arguments)]
fn step_size(
    nb: &mut NumBlock,
    p: VectorRef,
    dp: VectorRef,
    res_norm: E,
    rtol: E,
    min_alpha: E,
    mut bound_alpha: Vector,
    options: &ResidualOptions,
) -> E {
    let cutb = min_alpha.max(CUTBOUND);
    let fl = res_norm;

    let (mut xr, fr, slope) = loop {
        let mut mins = 1.0;
        let mut mini: Option<usize> = None;
        for i in 0..bound_alpha.nrows() {
            if bound_alpha[i] < mins {
                mins = bound_alpha[i];
                mini = Some(i);
            }
        }
        if let Some(mi) = mini {
            bound_alpha[mi] = 1.0;
        }
        let (fr, slope) = eval_line(nb, p, dp, mins, true, options);
        if mins >= 1.0 || slope >= 0.0 || mins > cutb {
            break (mins, fr, slope);
        }
    };

    if fr < fl || slope <= 0.0 {
        return xr;
    }

    let (xm, fm) = loop {
        let xm = REL_FAC * xr;
        if xm < min_alpha {
            return 0.0;
        }
        let (fm, slope_m) = eval_line(nb, p, dp, xm, true, options);
        if fm > fl {
            if slope_m <= 0.0 {
                return xm;
            }
            xr = xm;
            continue;
        }
        break (xm, fm);
    };

    let result = brent(
        0.0,
        xr,
        xm,
        fm,
        |alpha| eval_line(nb, p, dp, alpha, false, options).0,
        rtol,
        min_alpha,
        LINE_IT,
    );
    if !result.converged && result.f > fm { xm } else { result.x }
}

/// Per-parameter confidence limit and redundancy indicator, spec.md §4.8's `conf_lim`.
///
/// `redundancy[i]` is nonzero exactly when parameter `i`'s largest-magnitude right singular
/// vector entry lies in a dropped direction (index `>= rank`), in which case `confidence[i]`
/// reports `|p_i|` instead of the usual sensitivity bound.
pub fn confidence_limits(p: VectorRef, s_val: &[E], v_t: &Matrix, rank: usize, res_norm: E) -> (Vector, Vector) {
    let n_p = p.nrows();
    let mut confidence = Vector::from_fn(n_p, |i| {
        let mut c = 0.0;
        for w in 0..rank {
            let ci = v_t[(w, i)] / s_val[w];
            c += ci * ci;
        }
        (res_norm * c.sqrt()).abs()
    });
    let mut redundancy = Vector::zeros(n_p);

    for i in 0..n_p {
        let mut cm = 0.0;
        let mut im = 0usize;
        for w in 0..s_val.len() {
            let ci = v_t[(w, i)].abs();
            if ci > cm {
                cm = ci;
                im = w;
            }
        }
        if im >= rank {
            confidence[i] = p[i].abs();
            redundancy[i] = cm;
        }
    }

    (confidence, redundancy)
}

/// Runs the MODES outer loop to extract `nb.p`, spec.md §4.8. `p_low`/`p_up` bound the
/// search box; `criterion` selects the proximity test (spec.md §4.9) that decides when the
/// point set stops being modified.
pub fn solve(
    nb: &mut NumBlock,
    p_low: VectorRef,
    p_up: VectorRef,
    criterion: ProximityCriterion,
    options: &ModesOptions,
    callback: &mut impl Callback,
    terminator: &mut impl Terminator,
) -> Result<ModesResult, ParxError> {
    let n_p = nb.p.nrows();
    let mut p = nb.p.clone();

    let rtol = E::EPSILON.sqrt();
    let prec = options.prec.max(rtol);
    let stol = (n_p as E * E::EPSILON).max(prec * options.sens);
    let eq_slack = if criterion == ProximityCriterion::Bestfit { 1.0 } else { EQ_SLACK };
    let max_iter = options
        .max_iter
        .unwrap_or_else(|| MAX_IT * (n_p as E).sqrt().round() as usize);

    let mut prox_state = proximity::ProximityState::default();

    let mut iter = 1usize;
    let mut loc_iter = 1usize;
    let mut conv = false;
    let mut prox = false;

    let mut rank = n_p;
    let mut condition = 0.0;
    let mut last_res_norm = 0.0;
    let mut last_s: Vec<E> = Vec::new();
    let mut last_v_t = Matrix::zeros(0, 0);

    loop {
        if let Some(status) = terminator.terminate() {
            nb.p = p;
            return Ok(ModesResult {
                status: ModesStatus::Terminated,
                rank,
                condition,
                iterations: iter,
                confidence: Vector::zeros(n_p),
                redundancy: Vector::zeros(n_p),
                terminated: Some(status),
            });
        }

        let modify = iter == 1;
        let obj = objective::evaluate(nb, p.as_ref(), true, true, modify, false, &options.residual)?;

        let n_eq = obj.r.nrows();
        if (n_eq as E) < eq_slack * n_p as E {
            return Err(NumericalError::NumEq.into());
        }

        let jp = obj.jp.expect("requested jp");
        let res_norm = norm2(obj.r.as_ref());
        let mut sumsq = res_norm * res_norm;

        let svd_result = svd(jp.as_ref(), stol)?;
        rank = svd_result.rank;
        if rank == 0 {
            return Err(NumericalError::NoDirection.into());
        }
        condition = if rank >= 1 {
            (svd_result.s[0] / svd_result.s[rank - 1]).abs()
        } else {
            0.0
        };

        let qtr = mattvec(svd_result.u.as_ref(), obj.r.as_ref());
        let mut dp = Vector::zeros(n_p);
        for pi in 0..n_p {
            let mut acc = 0.0;
            for i in 0..rank {
                acc -= (svd_result.v_t[(i, pi)] / svd_result.s[i]) * qtr[i];
            }
            dp[pi] = acc;
        }
        let mut dc: E = (0..rank).map(|i| qtr[i] * qtr[i]).sum();

        if loc_iter >= max_iter {
            return Err(NumericalError::SlowConvergence.into());
        }

        let mut bound_dc = prec * sumsq + 10.0 * prec * prec * obj.n_points as E;
        conv = dc < bound_dc;

        let mut npoints = obj.n_points;
        let mut moddir = false;
        let mut res_norm_current = res_norm;

        if conv {
            loc_iter = 1;
            let (is_prox, _report) = proximity::test(
                obj.r.as_ref(),
                &svd_result.s,
                nb.dims.n_r,
                rank,
                criterion,
                &mut prox_state,
            );
            prox = is_prox;

            if !prox {
                let worst = pointset::worst_point(obj.r.as_ref(), svd_result.u.as_ref(), rank, nb.dims.n_r)
                    .ok_or(ParxError::from(NumericalError::Modify))?;
                let correction = pointset::corrected_step(
                    obj.r.as_ref(),
                    svd_result.u.as_ref(),
                    &svd_result.s,
                    svd_result.v_t.as_ref(),
                    rank,
                    nb.dims.n_r,
                    worst.index,
                    dp.as_ref(),
                )?;
                dp = correction.dp;
                dc = worst.dsig;
                res_norm_current = correction.res_norm;
                npoints -= 1;
                moddir = true;

                objective::remove_data_point(nb, obj.ids[worst.index], UNSELECTED)
                    .ok_or(ParxError::from(NumericalError::Modify))?;

                sumsq = res_norm_current * res_norm_current;
                bound_dc = prec * sumsq + prec * prec * npoints as E;
                conv = dc < bound_dc;
            }
        }

        last_res_norm = res_norm_current;
        last_s = svd_result.s.clone();
        last_v_t = svd_result.v_t.clone();

        if conv && prox {
            let progress = Progress {
                nit: iter,
                alpha: 1.0,
                chi2: sumsq,
                residual_norm: res_norm_current,
                rank,
                n_active: npoints,
                n_unselected: nb.group(UNSELECTED).map_or(0, |g| g.count()),
                n_failed: nb.group(FAILED).map_or(0, |g| g.count()),
            };
            callback.call(&progress);
            break;
        }

        let alpha = if !conv {
            let bound_alpha = bound_alpha_vec(p.as_ref(), dp.as_ref(), p_low, p_up);
            step_size(nb, p.as_ref(), dp.as_ref(), res_norm_current, rtol, rtol, bound_alpha, &options.residual)
        } else {
            1.0
        };

        if alpha == 0.0 && !moddir {
            return Err(NumericalError::NoLowerPoint.into());
        }

        let progress = Progress {
            nit: iter,
            alpha,
            chi2: sumsq,
            residual_norm: res_norm_current,
            rank,
            n_active: npoints,
            n_unselected: nb.group(UNSELECTED).map_or(0, |g| g.count()),
            n_failed: nb.group(FAILED).map_or(0, |g| g.count()),
        };
        callback.call(&progress);

        for i in 0..n_p {
            p[i] += alpha * dp[i];
        }

        iter += 1;
        loc_iter += 1;
    }

    nb.p = p.clone();
    let (confidence, redundancy) = confidence_limits(p.as_ref(), &last_s, &last_v_t, rank, last_res_norm);

    // Final reporting pass: refresh every group's `res`, including UNSELECTED/FAILED.
    objective::evaluate(nb, p.as_ref(), true, false, false, true, &options.residual)?;

    let status = if rank < n_p { ModesStatus::Doubtful } else { ModesStatus::Success };

    Ok(ModesResult {
        status,
        rank,
        condition,
        iterations: iter,
        confidence,
        redundancy,
        terminated: None,
    })
}
