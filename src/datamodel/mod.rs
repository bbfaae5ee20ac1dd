//! Data model entities, spec.md §3.
//!
//! `ModelTemplate`/`SystemTemplate`/`DataTable` are descriptions; nothing in this module
//! parses or prints them (spec.md §1 scopes the text/JSON/CSV I/O layer out as an external
//! collaborator). `serde` derives are carried anyway on the description types — not the
//! solver-internal `XSet`/`XGroup`/`NumBlock`, which hold `faer` vectors with no serde
//! support in this crate's dependency set — purely for interop with whatever I/O layer a
//! caller bolts on; SPEC_FULL.md's ambient-stack note is what asks for this, not a core
//! operation of its own.

use serde::{Deserialize, Serialize};

use crate::E;
use crate::evaluator::{Evaluator, ModelDims};
use crate::linalg::dense::Vector;

/// Group id for points under active consideration by the extractor (spec.md §3).
pub const ACTIVE: i32 = 1;
/// Group id for points proximity/point-set modification has set aside.
pub const UNSELECTED: i32 = 2;
/// Group id shared by extraction failures and simulation failures (spec.md §3, §4.10).
pub const FAILED: i32 = -1;

/// Per-quantity declaration of how a column participates in extraction/simulation
/// (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StateFlag {
    /// Value to be solved for.
    Unkn,
    /// Measured with known error.
    Meas,
    /// Back-calculated; tolerance given.
    Calc,
    /// Fixed.
    Fact,
    /// Stimulus (input).
    Stim,
    /// Sweep variable.
    Sweep,
    /// Error column (CSV only).
    Err,
}

/// A tagged parameter/constant/flag value (spec.md §3). `Unknown` values are what
/// extraction solves for; `Const`/`Flag` are immutable inputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ParameterValue {
    Unknown { val: E, lower: E, upper: E },
    Measured { val: E, interval: E },
    Calculated { val: E, interval: E },
    Fact(E),
    Const(E),
    Flag(E),
}

impl ParameterValue {
    /// The current numeric value, regardless of variant.
    pub fn value(&self) -> E {
        match self {
            ParameterValue::Unknown { val, .. } => *val,
            ParameterValue::Measured { val, .. } => *val,
            ParameterValue::Calculated { val, .. } => *val,
            ParameterValue::Fact(val) => *val,
            ParameterValue::Const(val) => *val,
            ParameterValue::Flag(val) => *val,
        }
    }

    /// Bounds for extraction, if this value is free to move.
    pub fn bounds(&self) -> Option<(E, E)> {
        match self {
            ParameterValue::Unknown { lower, upper, .. } => Some((*lower, *upper)),
            _ => None,
        }
    }
}

/// Immutable description of a model: identifier, authorship, and the ordered lists of
/// externals, auxiliaries, parameters, constants, flags, and residual labels
/// (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelTemplate {
    pub ident: String,
    pub authors: Vec<String>,
    pub externals: Vec<String>,
    pub auxiliaries: Vec<String>,
    pub parameters: Vec<String>,
    pub constants: Vec<String>,
    pub flags: Vec<String>,
    pub residuals: Vec<String>,
    /// Default value and optional `(lower, upper)` bounds, aligned with `externals`.
    pub external_defaults: Vec<(E, Option<(E, E)>)>,
    /// Default value and optional `(lower, upper)` bounds, aligned with `parameters`.
    pub parameter_defaults: Vec<(E, Option<(E, E)>)>,
}

impl ModelTemplate {
    pub fn dims(&self) -> ModelDims {
        ModelDims {
            n_r: self.residuals.len(),
            n_x: self.externals.len(),
            n_a: self.auxiliaries.len(),
            n_p: self.parameters.len(),
            n_c: self.constants.len(),
            n_f: self.flags.len(),
        }
    }
}

/// Binds a model to a concrete parameter set (spec.md §3). Invariant: `parameters` (and
/// `constants`, `flags`) biject onto the model's declared lists in name and order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemTemplate {
    pub model_ident: String,
    pub parameters: Vec<ParameterValue>,
    pub constants: Vec<ParameterValue>,
    pub flags: Vec<ParameterValue>,
}

/// One row of a [`DataTable`]: a group/curve/row id triple plus value and error lists
/// aligned with the table header.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataRow {
    pub grpid: i32,
    pub crvid: i32,
    pub rowid: i32,
    pub values: Vec<E>,
    pub errors: Vec<E>,
}

/// Header (ordered `(name, StateFlag)` pairs) plus rows (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataTable {
    pub header: Vec<(String, StateFlag)>,
    pub rows: Vec<DataRow>,
}

impl DataTable {
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.header.iter().position(|(n, _)| n == name)
    }
}

/// One measurement point (spec.md §3): measured `x` (transposed into solver space), relative
/// and absolute precisions, the `δ` the distance/Newton solver fills in, and the scalar
/// residual norm left after solving.
#[derive(Debug, Clone)]
pub struct XSet {
    pub id: i32,
    pub val: Vector,
    pub err: Vector,
    pub abserr: Vector,
    pub delta: Vector,
    pub res: E,
}

impl XSet {
    pub fn new(id: i32, val: Vector, err: Vector, abserr: Vector) -> Self {
        let n = val.nrows();
        Self {
            id,
            val,
            err,
            abserr,
            delta: Vector::zeros(n),
            res: 0.0,
        }
    }
}

/// A named group of [`XSet`]s, e.g. ACTIVE/UNSELECTED/FAILED (spec.md §3).
#[derive(Debug, Clone, Default)]
pub struct XGroup {
    pub id: i32,
    pub xsets: Vec<XSet>,
}

impl XGroup {
    pub fn new(id: i32) -> Self {
        Self {
            id,
            xsets: Vec::new(),
        }
    }

    pub fn count(&self) -> usize {
        self.xsets.len()
    }
}

/// The solver-facing materialization of (model, system, data): dimensions, evaluator handle,
/// owned parameter/constant/flag/aux vectors, and the xgroup list (spec.md §3).
///
/// Built at the start of each `simulate`/`extract` command and dropped at the end; templates
/// outlive it (spec.md §3 Lifecycle). No process-wide statics are used anywhere in its
/// construction (spec.md §9).
pub struct NumBlock {
    pub dims: ModelDims,
    pub evaluator: Evaluator,
    pub p: Vector,
    pub c: Vector,
    pub f: Vector,
    pub groups: Vec<XGroup>,
}

impl NumBlock {
    pub fn new(dims: ModelDims, evaluator: Evaluator, p: Vector, c: Vector, f: Vector) -> Self {
        Self {
            dims,
            evaluator,
            p,
            c,
            f,
            groups: Vec::new(),
        }
    }

    /// Borrows the group with the given id, if present.
    pub fn group(&self, id: i32) -> Option<&XGroup> {
        self.groups.iter().find(|g| g.id == id)
    }

    pub fn group_mut(&mut self, id: i32) -> Option<&mut XGroup> {
        self.groups.iter_mut().find(|g| g.id == id)
    }

    /// Borrows (creating if needed) the group with the given id.
    pub fn group_mut_or_create(&mut self, id: i32) -> &mut XGroup {
        if self.groups.iter().position(|g| g.id == id).is_none() {
            self.groups.push(XGroup::new(id));
        }
        self.groups.iter_mut().find(|g| g.id == id).unwrap()
    }

    /// Total xset count across every group (spec.md §3 invariant: equals the row count).
    pub fn total_points(&self) -> usize {
        self.groups.iter().map(|g| g.count()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_invariant_sums_rows() {
        let mut nb = NumBlock::new(
            ModelDims {
                n_r: 1,
                n_x: 1,
                n_a: 0,
                n_p: 1,
                n_c: 0,
                n_f: 0,
            },
            Evaluator::Compiled(crate::evaluator::CompiledModel {
                dims: ModelDims {
                    n_r: 1,
                    n_x: 1,
                    n_a: 0,
                    n_p: 1,
                    n_c: 0,
                    n_f: 0,
                },
                residual: |x, _a, p, _c, _f| Some(Vector::from_fn(1, |_| x[0] - p[0])),
                jac_x: None,
                jac_a: None,
                jac_p: None,
                transpose_x: None,
                inverse_transpose_x: None,
                transpose_p: None,
                inverse_transpose_p: None,
            }),
            Vector::from_fn(1, |_| 1.0),
            Vector::zeros(0),
            Vector::zeros(0),
        );
        let g = nb.group_mut_or_create(ACTIVE);
        g.xsets.push(XSet::new(
            0,
            Vector::from_fn(1, |_| 1.0),
            Vector::from_fn(1, |_| 0.01),
            Vector::from_fn(1, |_| 1e-6),
        ));
        assert_eq!(nb.total_points(), 1);
    }
}
