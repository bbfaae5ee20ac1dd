//! Error classes for the solver core, spec.md §7.
//!
//! Grounded on `linalg::solver::LinearSolverError`'s shape (a flat `derive_more::Display +
//! derive_more::Error` enum of failure modes) generalized from "one linear-solver failure
//! mode" to the three error classes spec.md §7 defines: setup, numerical, and evaluator
//! errors. `ParxError` composes with the teacher's existing `problemo::Problem` plumbing
//! via [`problemo::common::IntoCommonProblem`] so call sites elsewhere in the crate can use
//! `?` uniformly whether they return `Result<_, ParxError>` or `Result<_, Problem>`.

use derive_more::{Display, Error};

/// Setup-time errors (spec.md §7 class 1): these abort the current command and leave
/// previously-built state untouched.
#[derive(Debug, Display, Error, PartialEq, Clone)]
pub enum SetupError {
    #[display("unknown identifier '{name}'")]
    UnknownIdentifier { name: String },
    #[display("'{name}' has the wrong type")]
    WrongType { name: String },
    #[display("'{name}' is already declared")]
    DuplicateDeclaration { name: String },
    #[display("illegal assignment to '{name}'")]
    IllegalAssignment { name: String },
    #[display("model definition not found: '{name}'")]
    ModelNotFound { name: String },
    #[display("{0}")]
    Other(String),
}

/// Numerical errors (spec.md §7 class 2): these abort the solver but leave any partial
/// update to `p` and to per-point `res` intact.
#[derive(Debug, Display, Error, PartialEq, Clone, Copy)]
pub enum NumericalError {
    /// Fewer equations remain than the criterion requires (§4.8.a).
    #[display("insufficient data points for the requested criterion")]
    NumEq,
    /// The stacked Jacobian has rank zero (§4.8.b).
    #[display("no direction of descent could be determined (rank-zero Jacobian)")]
    NoDirection,
    /// No step length in `(0, cap]` reduced the objective (§4.8.f).
    #[display("no step length reduced the objective")]
    NoLowerPoint,
    /// The outer iteration budget was exhausted without convergence (§4.8.c).
    #[display("slow convergence: iteration budget exhausted")]
    SlowConvergence,
    /// The objective function failed to evaluate at the requested point (§4.7).
    #[display("objective evaluation failed")]
    ObjFail,
    /// The point-set modifier could not identify or remove a worst point (§4.9).
    #[display("unable to modify the point set")]
    Modify,
    /// A linear system arising in the distance solver or objective was singular.
    #[display("singular linear system")]
    Singular,
    /// The Newton-Raphson solver's Jacobian was singular.
    #[display("singular Jacobian")]
    SingularJacobian,
    /// The Newton-Raphson iteration budget was exhausted.
    #[display("Newton-Raphson iteration budget exhausted")]
    IterationBudgetExhausted,
}

/// Evaluator errors (spec.md §7 class 3): per-call failures, never retried.
#[derive(Debug, Display, Error, PartialEq, Clone)]
pub enum EvaluatorError {
    #[display("model evaluator returned failure")]
    EvaluationFailed,
    #[display("floating point exception raised during evaluation: {flags}")]
    FloatingPointException { flags: String },
    #[display("evaluator returned a different set of filled outputs than requested")]
    OutputMismatch,
    #[display("illegal opcode {opcode} at offset {offset}")]
    IllegalOpcode { opcode: u16, offset: usize },
    #[display("bad bytecode header: {0}")]
    BadHeader(String),
    #[display("unexpected end of bytecode")]
    UnexpectedEof,
    #[display("evaluator stack overflow")]
    StackOverflow,
}

/// The unified error type returned by every fallible operation in this crate.
#[derive(Debug, Display, Error, PartialEq, Clone)]
pub enum ParxError {
    #[display("setup error: {_0}")]
    Setup(SetupError),
    #[display("numerical error: {_0}")]
    Numerical(NumericalError),
    #[display("evaluator error: {_0}")]
    Evaluator(EvaluatorError),
}

impl From<SetupError> for ParxError {
    fn from(e: SetupError) -> Self {
        ParxError::Setup(e)
    }
}

impl From<NumericalError> for ParxError {
    fn from(e: NumericalError) -> Self {
        ParxError::Numerical(e)
    }
}

impl From<EvaluatorError> for ParxError {
    fn from(e: EvaluatorError) -> Self {
        ParxError::Evaluator(e)
    }
}

impl From<crate::linalg::NumericError> for ParxError {
    fn from(e: crate::linalg::NumericError) -> Self {
        match e {
            crate::linalg::NumericError::Singular => {
                ParxError::Numerical(NumericalError::Singular)
            }
            crate::linalg::NumericError::DimensionMismatch { .. } => {
                ParxError::Setup(SetupError::Other(e.to_string()))
            }
        }
    }
}

impl problemo::common::IntoCommonProblem for ParxError {
    fn gloss(self) -> problemo::Problem {
        problemo::Problem::from(self.to_string())
    }
}
