//! Dense linear algebra, spec.md §4.1.
//!
//! The teacher's `linalg` module is built around sparse, potentially large systems
//! (`cholesky.rs`/`lu.rs`, AMD/COLAMD-ordered factorizations via `faer::sparse`). ParX's
//! systems are the opposite shape: every distance-solver and residual-assembler system is
//! small (bounded by the number of parameters/variables in a single model, typically tens)
//! and dense, solved once per point per iteration. The sparse factorization machinery has
//! no counterpart here and was removed in the final trim (see DESIGN.md); what's kept is
//! the *pattern* — a scratch-workspace-driven decomposition step wrapped by a small
//! `derive_more`-based error enum — regrounded on `faer`'s dense decomposition API.

use derive_more::{Display, Error};

pub mod dense;
pub mod solve;
pub mod svd;
pub mod vector_ops;
pub mod workspace;

/// Errors arising from dense linear algebra operations.
#[derive(Debug, Display, Error, PartialEq, Clone, Copy)]
pub enum NumericError {
    /// The system matrix was (numerically) singular.
    #[display("singular matrix")]
    Singular,
    /// Operand dimensions did not match what the operation requires.
    #[display("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },
}
