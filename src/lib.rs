//! ParX fits parameters of implicit, nonlinear device models to measured data under an
//! errors-in-variables criterion, and simulates such models by solving for unknown
//! externals given parameters.
//!
//! The crate is organized leaf-first, mirroring spec.md §2: numeric primitives
//! ([`linalg`]) and line searches ([`linesearch`]) support the model evaluator contract
//! ([`evaluator`], [`bytecode`]), which in turn supports the Newton-Raphson solver
//! ([`newton`]) and the distance solver ([`distance`]). The residual assembler
//! ([`residual`]) wraps the distance solver for a single measurement; the objective
//! function ([`objective`]) stacks residual assemblies over a point set; the MODES
//! extractor ([`modes`]) drives the outer parameter search; and the simulation
//! orchestrator ([`simulate`]) drives Newton-Raphson over a whole data table.

use std::any::Any;

use dyn_clone::DynClone;
use macros::build_options;

/// Floating-point element type used throughout the solver.
pub type E = f64;
/// Index/size type used throughout the solver.
pub type I = usize;

pub mod ancillary;
pub mod bytecode;
pub mod callback;
pub mod datamodel;
pub mod distance;
pub mod errors;
pub mod evaluator;
pub mod linalg;
pub mod linesearch;
pub mod modes;
pub mod newton;
pub mod objective;
pub mod residual;
pub mod simulate;
pub mod terminators;

#[cfg(test)]
pub mod tests;

/// Marker trait for values that can be stored in the solver [`Options`] registry.
///
/// Mirrors the teacher's `OptionTrait`: any `'static + Sync + Send + Clone` value that
/// also supports being cloned behind a `Box<dyn OptionTrait>` (via [`dyn_clone`]) can be
/// registered as a solver option.
pub trait OptionTrait: Any + Sync + Send + DynClone {}
impl OptionTrait for &'static str {}
impl OptionTrait for String {}
impl OptionTrait for bool {}
impl OptionTrait for usize {}
impl OptionTrait for u8 {}
impl OptionTrait for u16 {}
impl OptionTrait for u32 {}
impl OptionTrait for u64 {}
impl OptionTrait for i8 {}
impl OptionTrait for i16 {}
impl OptionTrait for i32 {}
impl OptionTrait for i64 {}
impl OptionTrait for f32 {}
impl OptionTrait for f64 {}

impl Clone for Box<dyn OptionTrait> {
    fn clone(&self) -> Self {
        dyn_clone::clone_box(&**self)
    }
}

/// Coarse outer-loop termination reason, independent of the specific numerical failure
/// (those are reported via `Err(`[`errors::ParxError`]`)`, spec.md §7).
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default)]
pub enum Status {
    #[default]
    /// The solver is still running.
    InProgress,
    /// Converged and satisfied the requested criterion.
    Success,
    /// The solver stopped due to a time limit.
    TimeLimit,
    /// The solver stopped due to an iteration limit.
    IterationLimit,
    /// The solver was interrupted (e.g. by Ctrl-C).
    Interrupted,
}

/// A snapshot of solver progress, handed to a [`callback::Callback`] once per outer
/// iteration. Shared across [`modes`], [`newton`], and [`simulate`] rather than each
/// defining its own report type, since all three report the same small set of scalars.
#[derive(Debug, Clone, Default)]
pub struct Progress {
    /// Outer iteration counter.
    pub nit: usize,
    /// Step size taken this iteration (`alpha`), or `1.0` for solvers without a line search.
    pub alpha: E,
    /// Sum of squared residuals, `||r||^2`, at the current iterate.
    pub chi2: E,
    /// Euclidean norm of the residual vector, `||r||`.
    pub residual_norm: E,
    /// Rank of the most recent Jacobian SVD, when applicable.
    pub rank: usize,
    /// Number of points in the ACTIVE group, when applicable.
    pub n_active: usize,
    /// Number of points in the UNSELECTED group, when applicable.
    pub n_unselected: usize,
    /// Number of points in the FAILED group, when applicable.
    pub n_failed: usize,
}

build_options!(registry_name = OPTION_REGISTRY);

/// Alias kept around so call sites read `SolverOptions` (as in the teacher) rather than
/// the macro-generated `Options`.
pub type SolverOptions = Options;
