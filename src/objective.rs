//! Stacked objective function, spec.md §4.7.
//!
//! Grounded on `original_source/ParXCL/objectiv.c`'s `objective()` (per-point residual
//! assembly, ACTIVE/UNSELECTED/FAILED partitioning, failure handling) and
//! `remove_data_point()` (moving a point out of ACTIVE). The C source iterates a linked list
//! via a reverse-index table (`xsindex`) so it can unlink a failing point in place without
//! disturbing the scan; [`crate::datamodel::XGroup`] holds a plain `Vec`, so this takes each
//! group's `xsets` out with `mem::take`, consumes it with `into_iter()`, and rebuilds the
//! kept/demoted halves — the same "don't disturb the rest of the scan" property without a
//! hand-rolled linked list.
//!
//! Failure handling order (objectiv.c lines 158-184, checked in this order):
//! 1. `all == true`: mark `res = -1`, keep the point in place, continue scanning. This takes
//!    priority over `modify` — reporting passes never remove points.
//! 2. `modify == true`: move the point to FAILED, continue scanning the rest of the group.
//! 3. Otherwise: abort the whole call, discarding any partial stacking for this call (the C
//!    source truncates `neq` to the prefix already scanned and returns `FALSE`; since that
//!    prefix is never used by a caller that receives an error, the point is simply not
//!    removed here and the group is left exactly as it was found).

use crate::E;
use crate::datamodel::{ACTIVE, FAILED, NumBlock, UNSELECTED, XSet};
use crate::errors::{NumericalError, ParxError};
use crate::linalg::dense::{Matrix, Vector, VectorRef};
use crate::linalg::workspace::Workspace;
use crate::residual::{self, ResidualOptions};

/// The stacked residual/Jacobian across every ACTIVE data point, plus the ids needed to map
/// stacked rows back to their originating point (spec.md §4.8's outer loop and §4.9's
/// point-set modification both index into this).
#[derive(Debug, Clone)]
pub struct ObjectiveResult {
    /// Stacked whitened residual, `n_r * n_points` long.
    pub r: Vector,
    /// Stacked whitened `J_p`, `(n_r * n_points) × n_p`. `None` unless `want_jp`.
    pub jp: Option<Matrix>,
    /// `xs.id` for each stacked block, in row-block order.
    pub ids: Vec<i32>,
    /// Number of ACTIVE points actually stacked (after any removals this call made).
    pub n_points: usize,
}

/// Evaluates the stacked objective over `nb`'s ACTIVE group (and, if `all`, UNSELECTED/FAILED
/// too, purely to refresh their reported `res`), spec.md §4.7.
///
/// `modify` allows removing a point that fails to assemble a residual at `p` (moving it to
/// FAILED); `all` additionally scans UNSELECTED/FAILED for reporting and makes every failure
/// non-fatal (`res = -1`, point kept in place).
pub fn evaluate(
    nb: &mut NumBlock,
    p: VectorRef,
    want_r: bool,
    want_jp: bool,
    modify: bool,
    all: bool,
    options: &ResidualOptions,
) -> Result<ObjectiveResult, ParxError> {
    let c = nb.c.clone();
    let f = nb.f.clone();
    // Disjoint field borrows: `evaluator` and `groups` are borrowed independently so
    // `residual::assemble` can hold the former mutably while this loop walks the latter.
    let evaluator = &mut nb.evaluator;
    let groups = &mut nb.groups;

    let mut r_blocks: Vec<Vector> = Vec::new();
    let mut jp_blocks: Vec<Matrix> = Vec::new();
    let mut ids: Vec<i32> = Vec::new();
    // Allocated once for this whole scan, reused by every point's distance/residual solve
    // (spec.md §4.1/§5's "managed scratch area ... allocated once per outer call and reused").
    let mut workspace = Workspace::new();

    let scan = if all { [ACTIVE, UNSELECTED, FAILED].as_slice() } else { [ACTIVE].as_slice() };

    for &gid in scan {
        let Some(gi) = groups.iter().position(|g| g.id == gid) else {
            continue;
        };
        let xsets = std::mem::take(&mut groups[gi].xsets);

        let mut kept: Vec<XSet> = Vec::with_capacity(xsets.len());
        let mut demoted: Vec<XSet> = Vec::new();
        let mut aborted = false;

        let mut iter = xsets.into_iter();
        while let Some(mut xs) = iter.next() {
            match residual::assemble(
                evaluator,
                &mut xs,
                p,
                c.as_ref(),
                f.as_ref(),
                want_r,
                want_jp && gid == ACTIVE,
                false,
                options,
                &mut workspace,
            ) {
                Ok(result) => {
                    xs.res = crate::linalg::dense::norm2(result.r.as_ref());
                    if gid == ACTIVE {
                        ids.push(xs.id);
                        r_blocks.push(result.r);
                        if let Some(jp) = result.jp {
                            jp_blocks.push(jp);
                        }
                    }
                    kept.push(xs);
                }
                Err(_) => {
                    xs.res = -1.0;
                    if all || gid != ACTIVE {
                        kept.push(xs);
                    } else if modify {
                        demoted.push(xs);
                    } else {
                        kept.push(xs);
                        aborted = true;
                        break;
                    }
                }
            }
        }

        if aborted {
            // Leave the group exactly as found: the unprocessed tail goes back unchanged,
            // and nothing staged for this call (kept/demoted/ids/blocks so far) is applied.
            kept.extend(iter);
            groups[gi].xsets = kept;
            return Err(NumericalError::ObjFail.into());
        }

        groups[gi].xsets = kept;
        if !demoted.is_empty() {
            match groups.iter().position(|g| g.id == FAILED) {
                Some(fi) => groups[fi].xsets.extend(demoted),
                None => groups.push(crate::datamodel::XGroup { id: FAILED, xsets: demoted }),
            }
        }
    }

    let n_points = r_blocks.len();
    let n_r = r_blocks.first().map_or(0, |r| r.nrows());
    let n_p = jp_blocks.first().map_or(0, |m| m.ncols());

    let r = Vector::from_fn(n_r * n_points, |row| {
        r_blocks[row / n_r][row % n_r]
    });

    let jp = want_jp.then(|| {
        Matrix::from_fn(n_r * n_points, n_p, |row, col| {
            jp_blocks[row / n_r][(row % n_r, col)]
        })
    });

    Ok(ObjectiveResult {
        r,
        jp,
        ids,
        n_points,
    })
}

/// Moves `xs` from ACTIVE to `target` (UNSELECTED or FAILED), spec.md §4.9's point-set
/// modification and §4.7's failure handling, grounded on `remove_data_point()` in
/// `original_source/ParXCL/objectiv.c`.
pub fn remove_data_point(nb: &mut NumBlock, id: i32, target: i32) -> Option<()> {
    let active = nb.group_mut(ACTIVE)?;
    let idx = active.xsets.iter().position(|xs| xs.id == id)?;
    let xs = active.xsets.remove(idx);
    nb.group_mut_or_create(target).xsets.push(xs);
    Some(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluator::{CompiledModel, Evaluator, ModelDims};
    use faer::{Col, Mat};

    fn line_model() -> Evaluator {
        Evaluator::Compiled(CompiledModel {
            dims: ModelDims {
                n_r: 1,
                n_x: 2,
                n_a: 0,
                n_p: 2,
                n_c: 0,
                n_f: 0,
            },
            residual: |x, _a, p, _c, _f| Some(Col::from_fn(1, |_| x[1] - (p[0] + p[1] * x[0]))),
            jac_x: Some(|_x, _a, p, _c, _f, _mask| {
                Some(Mat::from_fn(1, 2, |_, j| if j == 0 { -p[1] } else { 1.0 }))
            }),
            jac_a: Some(|_x, _a, _p, _c, _f| Some(Mat::zeros(1, 0))),
            jac_p: Some(|_x, _a, _p, _c, _f, _mask| {
                Some(Mat::from_fn(1, 2, |_, j| if j == 0 { -1.0 } else { 0.0 }))
            }),
            transpose_x: None,
            inverse_transpose_x: None,
            transpose_p: None,
            inverse_transpose_p: None,
        })
    }

    fn numblock_with_points(points: &[(E, E)]) -> NumBlock {
        let mut nb = NumBlock::new(
            ModelDims {
                n_r: 1,
                n_x: 2,
                n_a: 0,
                n_p: 2,
                n_c: 0,
                n_f: 0,
            },
            line_model(),
            Col::from_fn(2, |_| 1.0),
            Col::zeros(0),
            Col::zeros(0),
        );
        for (i, &(x, y)) in points.iter().enumerate() {
            nb.group_mut_or_create(ACTIVE).xsets.push(XSet::new(
                i as i32,
                Col::from_fn(2, |j| if j == 0 { x } else { y }),
                Col::from_fn(2, |_| 0.01),
                Col::from_fn(2, |_| 1e-8),
            ));
        }
        nb
    }

    #[test]
    fn stacks_residuals_across_active_points() {
        let mut nb = numblock_with_points(&[(1.0, 3.0), (2.0, 5.0), (3.0, 7.0)]);
        let p = Col::from_fn(2, |i| if i == 0 { 1.0 } else { 2.0 });
        let result = evaluate(
            &mut nb,
            p.as_ref(),
            true,
            true,
            false,
            false,
            &ResidualOptions::default(),
        )
        .unwrap();
        assert_eq!(result.n_points, 3);
        assert_eq!(result.ids, vec![0, 1, 2]);
        assert_eq!(result.r.nrows(), 3);
        for i in 0..3 {
            assert!(result.r[i].abs() < 1e-6);
        }
        let jp = result.jp.unwrap();
        assert_eq!(jp.nrows(), 3);
        assert_eq!(jp.ncols(), 2);
    }

    #[test]
    fn remove_data_point_moves_between_groups() {
        let mut nb = numblock_with_points(&[(1.0, 3.0), (2.0, 5.0)]);
        remove_data_point(&mut nb, 0, FAILED).unwrap();
        assert_eq!(nb.group(ACTIVE).unwrap().count(), 1);
        assert_eq!(nb.group(FAILED).unwrap().count(), 1);
        assert_eq!(nb.group(FAILED).unwrap().xsets[0].id, 0);
    }
}
