//! Simulation orchestrator, spec.md §4.10.
//!
//! Grounded in the teacher's `Solver::solve` outer `for iter in 0..max_iter` loop shape
//! (per-iteration state mutation, `Status` check, hook invocation after each iteration) —
//! generalized here from "one system, one solve" to "one Newton solve per [`XSet`], regrouped
//! on failure." Drives [`crate::newton::solve`] over every point of every group in a
//! [`NumBlock`], demoting any point Newton can't solve to the FAILED group (spec.md §4.10
//! step 5), and checkpoints a [`Terminator`] between groups (spec.md §5's "first checkpoint
//! is between outer iterations").

use crate::E;
use crate::Progress;
use crate::Status;
use crate::callback::Callback;
use crate::datamodel::{ACTIVE, FAILED, NumBlock, XSet};
use crate::errors::ParxError;
use crate::linalg::dense::Vector;
use crate::newton::{self, NewtonOptions, NewtonStatus};
use crate::terminators::Terminator;

#[derive(Debug, Clone)]
pub struct SimulateOptions {
    /// Precision `tol` spec.md §4.10 step 2 derives both tolerance vectors from:
    /// `relerr_i = tol`, `abserr_i = tol·ε`.
    pub tol: E,
    pub newton: NewtonOptions,
}

impl Default for SimulateOptions {
    fn default() -> Self {
        Self {
            tol: 1e-8,
            newton: NewtonOptions::default(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SimulateResult {
    /// Points that converged (`Newton::Converged` or `ConvergedXOnly`).
    pub n_ok: usize,
    /// Points demoted to FAILED this call.
    pub n_failed: usize,
    /// Set iff a [`Terminator`] stopped the run early.
    pub terminated: Option<Status>,
}

/// Solves `f(x̂, a) = 0` for every [`crate::datamodel::XSet`] in every group of `nb`, spec.md
/// §4.10. Groups are visited id-ascending, skipping FAILED itself (there is nothing to
/// resimulate once a point has already been demoted by this same call; re-simulating a
/// previously-FAILED point is the caller's job, via `remove_data_point` back into ACTIVE
/// first).
pub fn solve(
    nb: &mut NumBlock,
    options: &SimulateOptions,
    callback: &mut impl Callback,
    terminator: &mut impl Terminator,
) -> Result<SimulateResult, ParxError> {
    let n_x = nb.dims.n_x;
    let n_a = nb.dims.n_a;
    let abs_aux = options.tol * E::EPSILON;

    let mut n_ok = 0usize;
    let mut n_failed = 0usize;
    let mut nit = 0usize;

    let group_ids: Vec<i32> = nb
        .groups
        .iter()
        .map(|g| g.id)
        .filter(|&id| id != FAILED)
        .collect();

    for gid in group_ids {
        if let Some(status) = terminator.terminate() {
            return Ok(SimulateResult {
                n_ok,
                n_failed,
                terminated: Some(status),
            });
        }

        let p = nb.p.clone();
        let c = nb.c.clone();
        let f = nb.f.clone();
        let evaluator = &mut nb.evaluator;
        let Some(group) = nb.groups.iter_mut().find(|g| g.id == gid) else {
            continue;
        };
        let xsets = std::mem::take(&mut group.xsets);

        let mut kept: Vec<XSet> = Vec::with_capacity(xsets.len());
        let mut demoted: Vec<XSet> = Vec::new();

        for mut xs in xsets {
            nit += 1;

            let x_hat = evaluator.transpose_x(xs.val.as_ref());
            let n_xh = x_hat.nrows();
            let xhat_full = Vector::from_fn(n_xh + n_a, |i| if i < n_xh { x_hat[i] } else { 0.0 });

            let rel = Vector::from_fn(n_xh + n_a, |_| options.tol);
            let abs = Vector::from_fn(n_xh + n_a, |_| abs_aux);

            let result = newton::solve(
                evaluator,
                xhat_full,
                n_xh,
                p.as_ref(),
                c.as_ref(),
                f.as_ref(),
                rel.as_ref(),
                abs.as_ref(),
                &options.newton,
            );

            let progress = Progress {
                nit,
                alpha: 1.0,
                chi2: 0.0,
                residual_norm: 0.0,
                rank: 0,
                n_active: kept.len(),
                n_unselected: 0,
                n_failed: demoted.len(),
            };

            match result {
                Ok(solved) => {
                    let x_hat_new = solved.xhat.as_ref().subrows(0, n_xh).to_owned();
                    let x_phys = evaluator.inverse_transpose_x(x_hat_new.as_ref());
                    xs.delta = Vector::from_fn(n_x, |i| (x_phys[i] - xs.val[i]).abs());
                    xs.val = x_phys;
                    xs.res = match solved.status {
                        NewtonStatus::Converged => 0.0,
                        NewtonStatus::ConvergedXOnly => -1.0,
                    };
                    n_ok += 1;
                    kept.push(xs);
                    callback.call(&progress);
                }
                Err(_) => {
                    xs.res = -1.0;
                    n_failed += 1;
                    demoted.push(xs);
                    callback.call(&progress);
                }
            }
        }

        nb.group_mut(gid).unwrap().xsets = kept;
        if !demoted.is_empty() {
            nb.group_mut_or_create(FAILED).xsets.extend(demoted);
        }
    }

    Ok(SimulateResult {
        n_ok,
        n_failed,
        terminated: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callback::NoOpCallback;
    use crate::datamodel::XGroup;
    use crate::evaluator::{CompiledModel, Evaluator, ModelDims};
    use faer::{Col, Mat};

    /// A terminator that reports interrupted on the first check, for exercising the
    /// early-return path without touching [`crate::terminators::InterruptTerminator`]'s
    /// process-global signal handler.
    struct AlreadyTerminated;

    impl Terminator for AlreadyTerminated {
        fn terminate(&mut self) -> Option<Status> {
            Some(Status::Interrupted)
        }
    }

    fn square_minus_c_model() -> Evaluator {
        Evaluator::Compiled(CompiledModel {
            dims: ModelDims {
                n_r: 1,
                n_x: 1,
                n_a: 0,
                n_p: 0,
                n_c: 1,
                n_f: 0,
            },
            residual: |x, _a, _p, c, _f| Some(Col::from_fn(1, |_| x[0] * x[0] - c[0])),
            jac_x: Some(|x, _a, _p, _c, _f, _mask| Some(Mat::from_fn(1, 1, |_, _| 2.0 * x[0]))),
            jac_a: Some(|_x, _a, _p, _c, _f| Some(Mat::zeros(1, 0))),
            jac_p: None,
            transpose_x: None,
            inverse_transpose_x: None,
            transpose_p: None,
            inverse_transpose_p: None,
        })
    }

    #[test]
    fn solves_every_point_to_the_model_root() {
        let mut nb = NumBlock::new(
            ModelDims {
                n_r: 1,
                n_x: 1,
                n_a: 0,
                n_p: 0,
                n_c: 1,
                n_f: 0,
            },
            square_minus_c_model(),
            Col::zeros(0),
            Col::from_fn(1, |_| 9.0),
            Col::zeros(0),
        );
        nb.groups.push(XGroup {
            id: ACTIVE,
            xsets: vec![XSet::new(
                0,
                Col::from_fn(1, |_| 1.0),
                Col::from_fn(1, |_| 0.01),
                Col::from_fn(1, |_| 1e-10),
            )],
        });

        let mut callback = NoOpCallback {};
        let mut terminator = crate::terminators::MultipleTerminators::new(vec![]);
        let result = solve(&mut nb, &SimulateOptions::default(), &mut callback, &mut terminator).unwrap();

        assert_eq!(result.n_ok, 1);
        assert_eq!(result.n_failed, 0);
        let xs = &nb.group(ACTIVE).unwrap().xsets[0];
        assert!((xs.val[0] - 3.0).abs() < 1e-6);
    }

    #[test]
    fn an_already_terminated_run_reports_no_points_solved() {
        let mut nb = NumBlock::new(
            ModelDims {
                n_r: 1,
                n_x: 1,
                n_a: 0,
                n_p: 0,
                n_c: 1,
                n_f: 0,
            },
            square_minus_c_model(),
            Col::zeros(0),
            Col::from_fn(1, |_| 9.0),
            Col::zeros(0),
        );
        nb.groups.push(XGroup {
            id: ACTIVE,
            xsets: vec![XSet::new(
                0,
                Col::from_fn(1, |_| 1.0),
                Col::from_fn(1, |_| 0.01),
                Col::from_fn(1, |_| 1e-10),
            )],
        });

        let mut callback = NoOpCallback {};
        let mut terminator = AlreadyTerminated;
        let result = solve(&mut nb, &SimulateOptions::default(), &mut callback, &mut terminator).unwrap();
        assert_eq!(result.n_ok, 0);
        assert_eq!(result.terminated, Some(Status::Interrupted));
    }
}
