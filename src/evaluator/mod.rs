//! Model evaluator contract, spec.md §4.3.
//!
//! Grounded on the teacher's `nlp::NonlinearProgram` (a struct of function pointers plus a
//! thin accessor layer) generalized from "one objective + one constraint function" to the
//! residual/`∂f/∂x`/`∂f/∂a`/`∂f/∂p` contract spec.md §4.3 describes, and made polymorphic
//! over {compiled, interpreted} via `enum_dispatch` the way the spec's design notes (§9)
//! ask for — declared but unused by the teacher, first put to work here.
//!
//! The FP-exception checking spec.md §4.3/§5 describes (`fetestexcept` around each call,
//! compared against the requested flag set) has no portable safe-Rust equivalent; libcore
//! exposes no cross-platform `fenv.h` binding, and pulling in a raw-`libc` dependency for a
//! handful of flag bits isn't something any example repo in this pack does. [`evaluate`]
//! substitutes the nearest safe-Rust equivalent: it scans every output buffer the evaluator
//! claims to have filled for non-finite values (see `all_finite` below) and reports
//! [`EvaluatorError::FloatingPointException`] if any are found, which catches the same
//! division-by-zero/overflow/invalid cases the original's flag check was guarding against.

pub mod compiled;

use enum_dispatch::enum_dispatch;

use crate::errors::EvaluatorError;
use crate::linalg::dense::{Matrix, MatrixRef, Vector, VectorRef};

fn all_finite(m: MatrixRef) -> bool {
    (0..m.ncols()).all(|j| (0..m.nrows()).all(|i| m[(i, j)].is_finite()))
}

pub use compiled::CompiledModel;

/// Static shape of a model: counts of residuals, externals, auxiliaries, parameters,
/// constants, and flags (spec.md §3 `NumBlock` model-result descriptor).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelDims {
    pub n_r: usize,
    pub n_x: usize,
    pub n_a: usize,
    pub n_p: usize,
    pub n_c: usize,
    pub n_f: usize,
}

/// Which outputs a call into the evaluator should fill, and which columns of `∂f/∂x`,
/// `∂f/∂p` are actually wanted (spec.md §4.3).
pub struct EvalRequest<'a> {
    pub x: VectorRef<'a>,
    pub a: VectorRef<'a>,
    pub p: VectorRef<'a>,
    pub c: VectorRef<'a>,
    pub f: VectorRef<'a>,
    pub want_r: bool,
    pub want_jx: bool,
    pub want_jp: bool,
    pub x_mask: &'a [bool],
    pub p_mask: &'a [bool],
}

/// Outputs actually filled by a call into the evaluator. Fields the request didn't ask for
/// are `None`; a `Some` for a field the request didn't ask for is an
/// [`EvaluatorError::OutputMismatch`] (spec.md §4.3's "caller also verifies that exactly the
/// requested flags are set on return").
///
/// `jx`/`ja` are the one exception: a model is allowed to decline providing an analytic
/// `∂f/∂x`/`∂f/∂a` even when requested (leaving both `None`) so that [`crate::newton`] can
/// fall back to central differences, per spec.md §4.4 step 1.
#[derive(Default)]
pub struct EvalResult {
    pub r: Option<Vector>,
    pub jx: Option<Matrix>,
    pub ja: Option<Matrix>,
    pub jp: Option<Matrix>,
}

impl EvalResult {
    fn check_matches(&self, req: &EvalRequest) -> Result<(), EvaluatorError> {
        if self.r.is_some() != req.want_r {
            return Err(EvaluatorError::OutputMismatch);
        }
        if !req.want_jx && (self.jx.is_some() || self.ja.is_some()) {
            return Err(EvaluatorError::OutputMismatch);
        }
        if self.jp.is_some() != req.want_jp {
            return Err(EvaluatorError::OutputMismatch);
        }
        Ok(())
    }
}

/// Uniform contract by which the core requests residuals and partial Jacobians for a
/// supplied input vector (spec.md §4.3), polymorphic over a compiled function-pointer model
/// and an externally interpreted bytecode model (spec.md §9 "Dynamic dispatch").
#[enum_dispatch]
pub trait ModelEvaluator {
    /// Static dimensions of the model this evaluator serves.
    fn dims(&self) -> ModelDims;

    /// Fills the outputs `req` asks for. Implementations must return exactly the requested
    /// outputs (`Some` iff asked for) or [`EvaluatorError::OutputMismatch`].
    fn evaluate_raw(&mut self, req: &EvalRequest) -> Result<EvalResult, EvaluatorError>;

    /// Forward map from the model's declared externals to the (possibly coarser) view the
    /// core solves in. Identity unless the model declares a transposition (spec.md §4.3).
    fn transpose_x(&self, x: VectorRef) -> Vector {
        x.to_owned()
    }
    /// Inverse of [`Self::transpose_x`].
    fn inverse_transpose_x(&self, x_hat: VectorRef) -> Vector {
        x_hat.to_owned()
    }
    /// Forward map from the model's declared parameters to the core's view.
    fn transpose_p(&self, p: VectorRef) -> Vector {
        p.to_owned()
    }
    /// Inverse of [`Self::transpose_p`].
    fn inverse_transpose_p(&self, p_hat: VectorRef) -> Vector {
        p_hat.to_owned()
    }
}

/// Calls `evaluator.evaluate_raw(req)` and applies the floating-point-exception and
/// output-shape checks spec.md §4.3/§5 requires of every evaluator call.
pub fn evaluate(
    evaluator: &mut impl ModelEvaluator,
    req: &EvalRequest,
) -> Result<EvalResult, EvaluatorError> {
    let result = evaluator.evaluate_raw(req)?;
    result.check_matches(req)?;

    let mut bad = Vec::new();
    if let Some(r) = &result.r {
        if (0..r.nrows()).any(|i| !r[i].is_finite()) {
            bad.push("r");
        }
    }
    if let Some(jx) = &result.jx {
        if !all_finite(jx.as_ref()) {
            bad.push("jx");
        }
    }
    if let Some(ja) = &result.ja {
        if !all_finite(ja.as_ref()) {
            bad.push("ja");
        }
    }
    if let Some(jp) = &result.jp {
        if !all_finite(jp.as_ref()) {
            bad.push("jp");
        }
    }
    if !bad.is_empty() {
        return Err(EvaluatorError::FloatingPointException {
            flags: bad.join(","),
        });
    }

    Ok(result)
}

/// Dispatches between a compiled function-pointer model and an externally interpreted
/// bytecode model (spec.md §9). `enum_dispatch` is declared but unused by the teacher; this
/// is its first consumer in this crate.
#[enum_dispatch(ModelEvaluator)]
pub enum Evaluator {
    Compiled(CompiledModel),
    Bytecode(crate::bytecode::BytecodeEvaluator),
}
