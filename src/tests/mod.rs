//! End-to-end scenarios, spec.md §8 "End-to-end scenarios": whole-pipeline exercises that
//! wire several modules together the way a caller actually would, as opposed to each
//! module's own `#[cfg(test)]` block (which exercises that module in isolation). Laid out as
//! its own directory, mirroring the teacher's `src/tests/` (netlib/Maros-Mezaros end-to-end
//! LP fixtures) generalized from file-backed MPS fixtures to inline synthetic data, since this
//! crate has no file-format parser of its own to load fixtures through (spec.md §1 scopes
//! that out).

use faer::{Col, Mat};

use crate::E;
use crate::ancillary::sweep::{self, StimulusSpec, SweepScale};
use crate::callback::NoOpCallback;
use crate::datamodel::{ACTIVE, DataRow, DataTable, NumBlock, StateFlag, XSet};
use crate::evaluator::{CompiledModel, Evaluator, ModelDims};
use crate::modes::{self, ModesOptions, ModesStatus, ProximityCriterion};
use crate::simulate::{self, SimulateOptions};
use crate::terminators::MultipleTerminators;

fn no_terminator() -> MultipleTerminators {
    MultipleTerminators::new(vec![])
}

/// `r = y - (p0 + p1*x)`, `x = [x, y]`.
fn linear_model() -> Evaluator {
    Evaluator::Compiled(CompiledModel {
        dims: ModelDims { n_r: 1, n_x: 2, n_a: 0, n_p: 2, n_c: 0, n_f: 0 },
        residual: |x, _a, p, _c, _f| Some(Col::from_fn(1, |_| x[1] - (p[0] + p[1] * x[0]))),
        jac_x: Some(|_x, _a, p, _c, _f, _mask| {
            Some(Mat::from_fn(1, 2, |_, j| if j == 0 { -p[1] } else { 1.0 }))
        }),
        jac_a: Some(|_x, _a, _p, _c, _f| Some(Mat::zeros(1, 0))),
        jac_p: Some(|x, _a, _p, _c, _f, _mask| {
            Some(Mat::from_fn(1, 2, |_, j| if j == 0 { -1.0 } else { -x[0] }))
        }),
        transpose_x: None,
        inverse_transpose_x: None,
        transpose_p: None,
        inverse_transpose_p: None,
    })
}

#[test]
fn scenario_1_linear_fit_recovers_exact_parameters() {
    let mut nb = NumBlock::new(
        ModelDims { n_r: 1, n_x: 2, n_a: 0, n_p: 2, n_c: 0, n_f: 0 },
        linear_model(),
        Col::from_fn(2, |_| 0.5),
        Col::zeros(0),
        Col::zeros(0),
    );
    for (i, &(x, y)) in [(0.0, 1.0), (1.0, 3.0), (2.0, 5.0)].iter().enumerate() {
        nb.group_mut_or_create(ACTIVE).xsets.push(XSet::new(
            i as i32,
            Col::from_fn(2, |j| if j == 0 { x } else { y }),
            Col::from_fn(2, |_| 0.01),
            Col::from_fn(2, |_| 1e-8),
        ));
    }

    let p_low = Col::from_fn(2, |_| -10.0);
    let p_up = Col::from_fn(2, |_| 10.0);
    let result = modes::solve(
        &mut nb,
        p_low.as_ref(),
        p_up.as_ref(),
        ProximityCriterion::Bestfit,
        &ModesOptions::default(),
        &mut NoOpCallback {},
        &mut no_terminator(),
    )
    .unwrap();

    assert_eq!(result.status, ModesStatus::Success);
    assert!((nb.p[0] - 1.0).abs() < 1e-6, "p0 = {}", nb.p[0]);
    assert!((nb.p[1] - 2.0).abs() < 1e-6, "p1 = {}", nb.p[1]);
}

/// `r = i - i_s*(exp(v/vt) - 1)`, `x = [v, i]`.
fn diode_model() -> Evaluator {
    Evaluator::Compiled(CompiledModel {
        dims: ModelDims { n_r: 1, n_x: 2, n_a: 0, n_p: 2, n_c: 0, n_f: 0 },
        residual: |x, _a, p, _c, _f| {
            let (v, i, i_s, vt) = (x[0], x[1], p[0], p[1]);
            Some(Col::from_fn(1, |_| i - i_s * ((v / vt).exp() - 1.0)))
        },
        jac_x: Some(|x, _a, p, _c, _f, _mask| {
            let (v, i_s, vt) = (x[0], p[0], p[1]);
            Some(Mat::from_fn(1, 2, |_, j| {
                if j == 0 { -i_s * (v / vt).exp() / vt } else { 1.0 }
            }))
        }),
        jac_a: Some(|_x, _a, _p, _c, _f| Some(Mat::zeros(1, 0))),
        jac_p: Some(|x, _a, p, _c, _f, _mask| {
            let (v, i_s, vt) = (x[0], p[0], p[1]);
            Some(Mat::from_fn(1, 2, |_, j| {
                if j == 0 {
                    -((v / vt).exp() - 1.0)
                } else {
                    i_s * v * (v / vt).exp() / (vt * vt)
                }
            }))
        }),
        transpose_x: None,
        inverse_transpose_x: None,
        transpose_p: None,
        inverse_transpose_p: None,
    })
}

#[test]
fn scenario_2_diode_fit_recovers_parameters_within_tolerance() {
    const I_S: E = 1e-14;
    const VT: E = 0.0259;

    let mut nb = NumBlock::new(
        ModelDims { n_r: 1, n_x: 2, n_a: 0, n_p: 2, n_c: 0, n_f: 0 },
        diode_model(),
        Col::from_fn(2, |i| if i == 0 { 1e-13 } else { 0.03 }),
        Col::zeros(0),
        Col::zeros(0),
    );
    for n in 0..20 {
        let v = 0.30 + 0.01 * n as E;
        let i = I_S * ((v / VT).exp() - 1.0);
        nb.group_mut_or_create(ACTIVE).xsets.push(XSet::new(
            n,
            Col::from_fn(2, |j| if j == 0 { v } else { i }),
            Col::from_fn(2, |j| if j == 0 { 1e-4 } else { 1e-3 * i.abs() }),
            Col::from_fn(2, |j| if j == 0 { 1e-9 } else { 1e-18 }),
        ));
    }

    let p_low = Col::from_fn(2, |i| if i == 0 { 1e-16 } else { 0.001 });
    let p_up = Col::from_fn(2, |i| if i == 0 { 1e-11 } else { 1.0 });
    let result = modes::solve(
        &mut nb,
        p_low.as_ref(),
        p_up.as_ref(),
        ProximityCriterion::Bestfit,
        &ModesOptions::default(),
        &mut NoOpCallback {},
        &mut no_terminator(),
    )
    .unwrap();

    assert_eq!(result.status, ModesStatus::Success);
    assert!(((nb.p[0] - I_S) / I_S).abs() < 1e-3, "i_s = {}", nb.p[0]);
    assert!(((nb.p[1] - VT) / VT).abs() < 1e-3, "vt = {}", nb.p[1]);
}

/// `r = y - (a+b)*x`, `x = [x, y]`; `a+b` is the only identifiable combination.
fn redundant_model() -> Evaluator {
    Evaluator::Compiled(CompiledModel {
        dims: ModelDims { n_r: 1, n_x: 2, n_a: 0, n_p: 2, n_c: 0, n_f: 0 },
        residual: |x, _a, p, _c, _f| Some(Col::from_fn(1, |_| x[1] - (p[0] + p[1]) * x[0])),
        jac_x: Some(|x, _a, p, _c, _f, _mask| {
            Some(Mat::from_fn(1, 2, |_, j| if j == 0 { -(p[0] + p[1]) } else { 1.0 }))
        }),
        jac_a: Some(|_x, _a, _p, _c, _f| Some(Mat::zeros(1, 0))),
        jac_p: Some(|x, _a, _p, _c, _f, _mask| Some(Mat::from_fn(1, 2, |_, _| -x[0]))),
        transpose_x: None,
        inverse_transpose_x: None,
        transpose_p: None,
        inverse_transpose_p: None,
    })
}

#[test]
fn scenario_3_rank_deficient_model_flags_a_redundant_parameter() {
    let mut nb = NumBlock::new(
        ModelDims { n_r: 1, n_x: 2, n_a: 0, n_p: 2, n_c: 0, n_f: 0 },
        redundant_model(),
        Col::from_fn(2, |_| 1.0),
        Col::zeros(0),
        Col::zeros(0),
    );
    for (i, &x) in [0.0, 1.0, 2.0, 3.0].iter().enumerate() {
        nb.group_mut_or_create(ACTIVE).xsets.push(XSet::new(
            i as i32,
            Col::from_fn(2, |j| if j == 0 { x } else { 2.0 * x }),
            Col::from_fn(2, |_| 0.01),
            Col::from_fn(2, |_| 1e-8),
        ));
    }

    let p_low = Col::from_fn(2, |_| -10.0);
    let p_up = Col::from_fn(2, |_| 10.0);
    let result = modes::solve(
        &mut nb,
        p_low.as_ref(),
        p_up.as_ref(),
        ProximityCriterion::Bestfit,
        &ModesOptions::default(),
        &mut NoOpCallback {},
        &mut no_terminator(),
    )
    .unwrap();

    assert_eq!(result.status, ModesStatus::Doubtful);
    assert_eq!(result.rank, 1);
    let flagged = (0..2).find(|&i| result.redundancy[i] != 0.0);
    assert!(flagged.is_some(), "expected one parameter flagged redundant");
    let i = flagged.unwrap();
    assert!((result.confidence[i] - nb.p[i].abs()).abs() < 1e-9);
}

#[test]
fn scenario_4_simulation_solves_for_the_unknown_external() {
    let mut nb = NumBlock::new(
        ModelDims { n_r: 1, n_x: 1, n_a: 0, n_p: 0, n_c: 1, n_f: 0 },
        Evaluator::Compiled(CompiledModel {
            dims: ModelDims { n_r: 1, n_x: 1, n_a: 0, n_p: 0, n_c: 1, n_f: 0 },
            residual: |x, _a, _p, c, _f| Some(Col::from_fn(1, |_| x[0] * x[0] - c[0])),
            jac_x: Some(|x, _a, _p, _c, _f, _mask| Some(Mat::from_fn(1, 1, |_, _| 2.0 * x[0]))),
            jac_a: Some(|_x, _a, _p, _c, _f| Some(Mat::zeros(1, 0))),
            jac_p: None,
            transpose_x: None,
            inverse_transpose_x: None,
            transpose_p: None,
            inverse_transpose_p: None,
        }),
        Col::zeros(0),
        Col::from_fn(1, |_| 9.0),
        Col::zeros(0),
    );
    nb.group_mut_or_create(ACTIVE).xsets.push(XSet::new(
        0,
        Col::from_fn(1, |_| 1.0),
        Col::from_fn(1, |_| 0.01),
        Col::from_fn(1, |_| 1e-10),
    ));

    let result = simulate::solve(
        &mut nb,
        &SimulateOptions::default(),
        &mut NoOpCallback {},
        &mut no_terminator(),
    )
    .unwrap();

    assert_eq!(result.n_ok, 1);
    assert_eq!(result.n_failed, 0);
    let xs = &nb.group(ACTIVE).unwrap().xsets[0];
    assert!((xs.val[0] - 3.0).abs() < 1e-6);
    assert!(xs.val[0] * xs.val[0] - 9.0 < 1e-12);
}

#[test]
fn scenario_5_stimulus_sweep_expands_to_eleven_rows() {
    let externals = vec!["v".to_string()];
    let stimuli = vec![StimulusSpec {
        name: "v".to_string(),
        lower: 0.0,
        upper: 1.0,
        n_intervals: 10,
        scale: SweepScale::Linear,
        sweep: true,
    }];

    let table = sweep::expand(&externals, &stimuli).unwrap();
    assert_eq!(table.rows.len(), 11);
    for (i, row) in table.rows.iter().enumerate() {
        assert!((row.values[0] - i as E * 0.1).abs() < 1e-9);
    }
}

#[test]
fn scenario_6_data_table_round_trips_through_json() {
    let table = DataTable {
        header: vec![
            ("x".to_string(), StateFlag::Stim),
            ("y".to_string(), StateFlag::Meas),
        ],
        rows: vec![
            DataRow { grpid: 1, crvid: 1, rowid: 0, values: vec![0.0, 1.0], errors: vec![0.0, 0.01] },
            DataRow { grpid: 1, crvid: 1, rowid: 1, values: vec![1.0, 3.0], errors: vec![0.0, 0.01] },
        ],
    };

    let json = serde_json::to_string(&table).unwrap();
    let round_tripped: DataTable = serde_json::from_str(&json).unwrap();

    assert_eq!(round_tripped.header, table.header);
    assert_eq!(round_tripped.rows.len(), table.rows.len());
    for (a, b) in table.rows.iter().zip(round_tripped.rows.iter()) {
        assert_eq!(a.grpid, b.grpid);
        assert_eq!(a.crvid, b.crvid);
        for (va, vb) in a.values.iter().zip(b.values.iter()) {
            assert!((va - vb).abs() < 1e-15);
        }
    }
}
