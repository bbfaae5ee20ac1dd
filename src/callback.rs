//! Per-iteration progress hooks, spec.md §5.
//!
//! Kept verbatim in shape from the teacher's `Callback`/`NoOpCallback`/`ConvergenceOutput`
//! trio, with `SolverState` (primal/dual infeasibility, an LP/IPM-specific report) swapped
//! for [`crate::Progress`] (chi-square, residual norm, rank, point-set sizes — the
//! quantities `modes`, `newton`, and `simulate` all actually produce).

use macros::build_option_enum;

use crate::{Progress, SolverOptions};

/// Hook invoked once per outer iteration for logging, monitoring, or early stopping.
pub trait Callback {
    /// Creates a new callback from solver options.
    fn new(options: &SolverOptions) -> Self
    where
        Self: Sized;

    /// Called at the end of each iteration with the current progress snapshot.
    fn call(&mut self, progress: &Progress);
}

/// A callback that does nothing. Use when no per-iteration output is needed.
pub struct NoOpCallback {}

impl Callback for NoOpCallback {
    fn new(_options: &SolverOptions) -> Self {
        Self {}
    }

    fn call(&mut self, _progress: &Progress) {
        // Do nothing
    }
}

/// Prints chi-square and residual norm to stdout each iteration.
pub struct ConvergenceOutput {}

impl Callback for ConvergenceOutput {
    fn new(_options: &SolverOptions) -> Self {
        Self {}
    }

    fn call(&mut self, progress: &Progress) {
        let txt = format!(
            "| {:4}: | alpha={:<8.2e} | chi2={:<8.2e} | |r|={:<8.2e} | rank={:<3} | active={:<4} unsel={:<4} failed={:<4} |",
            progress.nit,
            progress.alpha,
            progress.chi2,
            progress.residual_norm,
            progress.rank,
            progress.n_active,
            progress.n_unselected,
            progress.n_failed,
        );
        println!("{}", txt);
    }
}

build_option_enum!(
    trait_ = Callback,
    name = "Callbacks",
    variants = (NoOpCallback, ConvergenceOutput),
    new_arguments = (&SolverOptions,),
    doc_header = "An enum representing different callbacks for the extraction/simulation solvers. Each variant corresponds to a specific callback strategy."
);
