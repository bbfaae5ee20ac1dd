//! Proximity test, spec.md §4.9, grounded on `proximity()` in
//! `original_source/ParXCL/modify.c`.
//!
//! Five criteria, selected by [`ProximityCriterion`]: MODES (spread of residuals against the
//! standard normal), STRICT (every point's own whitened residual norm under one), CHISQ
//! (chi-square probability against a fixed critical level), CONSIST (monotone-decreasing
//! worst-direction consistency across outer iterations), and BESTFIT (never proximate until
//! the caller's own convergence test alone decides, i.e. always `true` here).

use crate::E;
use crate::ancillary::chisq::chi_square_probability;
use crate::linalg::dense::{VectorRef, norm2};

/// Chi-square probability below which CHISQ gives up (`CHICRIT` in `modify.c`).
const CHI_CRITICAL: E = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProximityCriterion {
    Modes,
    Strict,
    Chisq,
    Consist,
    Bestfit,
}

/// CONSIST's running worst-direction consistency, carried across outer iterations
/// (`*pmc` in `modify.c`). Starts at `+inf` so the first call is always "still improving".
#[derive(Debug, Clone, Copy)]
pub struct ProximityState {
    pub max_consistency: E,
}

impl Default for ProximityState {
    fn default() -> Self {
        Self { max_consistency: E::INFINITY }
    }
}

/// Diagnostics computed alongside the proximity verdict, independent of which criterion is
/// in force — these feed `modes::solve`'s final report regardless of `criterion`.
#[derive(Debug, Clone, Copy)]
pub struct ProximityReport {
    pub degrees_of_freedom: i64,
    pub chi2: E,
    pub spread: E,
    pub probability: E,
    pub condition: E,
    pub consistency: E,
    pub max_consistency: E,
}

/// Tests whether `res` (the stacked whitened residual, `n_r` per point) is close enough to
/// the model under `criterion`. Returns the verdict plus a report of the underlying
/// diagnostics. `s_val` is the Jacobian's singular values, ordered descending, truncated to
/// `rank` by the caller's SVD.
pub fn test(
    res: VectorRef,
    s_val: &[E],
    n_r: usize,
    rank: usize,
    criterion: ProximityCriterion,
    state: &mut ProximityState,
) -> (bool, ProximityReport) {
    let n_points = if n_r == 0 { 0 } else { res.nrows() / n_r };
    let fr = n_points as i64 - rank as i64;

    if fr <= 0 {
        // Too few points to form a meaningful residual distribution: vacuously proximate.
        let report = ProximityReport {
            degrees_of_freedom: fr,
            chi2: 0.0,
            spread: 0.0,
            probability: 1.0,
            condition: 0.0,
            consistency: 0.0,
            max_consistency: state.max_consistency,
        };
        return (true, report);
    }

    let rssq = norm2(res);
    let chi2 = rssq * rssq;
    let variance = chi2 / n_points as E;
    let spread = variance.sqrt();
    let probability = chi_square_probability(chi2, fr as usize);
    let condition = if rank >= 1 { (s_val[0] / s_val[rank - 1]).abs() } else { 0.0 };

    let mut consistency = 1.0;
    for i in 0..rank {
        consistency *= (rssq / s_val[i]).abs();
    }
    if rank >= 1 {
        consistency = consistency.powf(1.0 / rank as E);
    } else {
        consistency = 0.0;
    }

    let max_consistency = if rank >= 1 { (rssq / s_val[0]).abs() } else { 0.0 };

    if criterion != ProximityCriterion::Consist {
        state.max_consistency = max_consistency;
    }

    let ok = match criterion {
        ProximityCriterion::Modes => spread <= 1.0,
        ProximityCriterion::Strict => (0..n_points).all(|point| {
            let mut eps = 0.0;
            for j in 0..n_r {
                let v = res[point * n_r + j];
                eps += v * v;
            }
            eps.sqrt() <= 1.0
        }),
        ProximityCriterion::Chisq => probability >= CHI_CRITICAL,
        ProximityCriterion::Consist => {
            if state.max_consistency >= max_consistency || spread > 1.0 {
                state.max_consistency = max_consistency;
                false
            } else {
                true
            }
        }
        ProximityCriterion::Bestfit => true,
    };

    let report = ProximityReport {
        degrees_of_freedom: fr,
        chi2,
        spread,
        probability,
        condition,
        consistency,
        max_consistency: state.max_consistency,
    };

    (ok, report)
}
