//! Stimulus-sweep expansion, spec.md §2 item 11, grounded on `stim2dat()`/`teststim()`/
//! `makeheader()`/`makedata()` in `original_source/ParXCL/stim2dat.c`.
//!
//! A stimulus sweep turns a handful of `(name, bounds, interval count, scale)` declarations
//! into a [`DataTable`] of every combination, one column varying fastest. The C source picks
//! whichever connected stimulus has the largest interval count as the lone SWEEP column and
//! lays the rest out as STIM columns; spec.md §9's Open Question resolution tightens this to
//! an outright error if the caller marks more than one stimulus as the sweep column
//! explicitly, rather than silently preferring one (see `expand`'s doc comment).

use crate::E;
use crate::datamodel::{DataRow, DataTable, StateFlag};
use crate::errors::SetupError;

/// How a stimulus's `(lower, upper)` bounds are interpolated across its intervals
/// (`SLIN`/`SLOG`/`SLN`/`ALIN`/`ALOG`/`ALN` in `stim2dat.c`, collapsed here to the three
/// shapes that matter once "S" vs "A" — swept vs the other columns — is just which column
/// this stimulus lands in, not a property of the scale itself).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepScale {
    /// Evenly spaced in `value`.
    Linear,
    /// Evenly spaced in `log10(value)`; `lower`/`upper` must be nonzero and same-signed.
    Log,
    /// Evenly spaced in `ln(value)`; `lower`/`upper` must be nonzero and same-signed.
    Ln,
}

/// One stimulus declaration (`STIMULUS` entry in `stim2dat.c`'s input).
#[derive(Debug, Clone)]
pub struct StimulusSpec {
    pub name: String,
    pub lower: E,
    pub upper: E,
    /// Number of intervals; the column gets `n_intervals + 1` distinct values.
    pub n_intervals: usize,
    pub scale: SweepScale,
    /// Explicit request to be *the* SWEEP column. `expand` errors if more than one connected
    /// stimulus sets this (spec.md §9 Open Question: "forbid outright" was chosen over
    /// `stim2dat.c`'s silent largest-`n_intervals`-wins tie-break).
    pub sweep: bool,
}

fn validate(spec: &StimulusSpec) -> Result<(), SetupError> {
    if matches!(spec.scale, SweepScale::Log | SweepScale::Ln) {
        if spec.lower == 0.0 || spec.upper == 0.0 || spec.lower.signum() != spec.upper.signum() {
            return Err(SetupError::Other(format!(
                "stimulus '{}': log/ln scale requires nonzero, same-signed bounds",
                spec.name
            )));
        }
    }
    Ok(())
}

fn unscale(spec: &StimulusSpec, n: usize) -> E {
    match spec.scale {
        SweepScale::Linear => {
            let step = (spec.upper - spec.lower) / spec.n_intervals.max(1) as E;
            spec.lower + n as E * step
        }
        SweepScale::Log => {
            let sign = spec.lower.signum();
            let lo = spec.lower.abs().log10();
            let hi = spec.upper.abs().log10();
            let step = (hi - lo) / spec.n_intervals.max(1) as E;
            sign * 10f64.powf(lo + n as E * step)
        }
        SweepScale::Ln => {
            let sign = spec.lower.signum();
            let lo = spec.lower.abs().ln();
            let hi = spec.upper.abs().ln();
            let step = (hi - lo) / spec.n_intervals.max(1) as E;
            sign * (lo + n as E * step).exp()
        }
    }
}

/// Expands `stimuli` into a [`DataTable`] over `externals` (the model's declared external
/// names, in order), spec.md §4.11/§2 item 11.
///
/// Column layout mirrors `makeheader()`: the SWEEP column first, then every other connected
/// stimulus (STIM), then any model external with no matching stimulus (UNKN, filled with
/// `0.0`/no error — left for the caller to solve via [`crate::simulate`]). A stimulus not
/// named in `externals` is dropped entirely, matching the C source's "unconnected stimuli are
/// ignored" behavior.
///
/// Errors if no stimulus connects to the model, if more than one connected stimulus is
/// explicitly marked `sweep`, or if a Log/Ln-scaled stimulus has invalid bounds.
pub fn expand(externals: &[String], stimuli: &[StimulusSpec]) -> Result<DataTable, SetupError> {
    for spec in stimuli {
        validate(spec)?;
    }

    let connected: Vec<&StimulusSpec> = stimuli
        .iter()
        .filter(|s| externals.iter().any(|e| e == &s.name))
        .collect();

    if connected.is_empty() {
        return Err(SetupError::Other(
            "no stimulus connects to a model external".to_string(),
        ));
    }

    let explicit_sweep: Vec<&StimulusSpec> = connected.iter().filter(|s| s.sweep).copied().collect();
    if explicit_sweep.len() > 1 {
        return Err(SetupError::Other(
            "more than one stimulus marked as the SWEEP column".to_string(),
        ));
    }

    let sweep_spec: &StimulusSpec = if let Some(&s) = explicit_sweep.first() {
        s
    } else {
        connected
            .iter()
            .max_by_key(|s| s.n_intervals)
            .copied()
            .expect("connected is non-empty")
    };

    let mut columns: Vec<&StimulusSpec> = vec![sweep_spec];
    for &s in &connected {
        if std::ptr::eq(s, sweep_spec) {
            continue;
        }
        columns.push(s);
    }

    let unconnected: Vec<&String> = externals
        .iter()
        .filter(|e| !stimuli.iter().any(|s| &s.name == *e))
        .collect();

    let mut header: Vec<(String, StateFlag)> = Vec::with_capacity(columns.len() + unconnected.len());
    header.push((sweep_spec.name.clone(), StateFlag::Sweep));
    for &s in &columns[1..] {
        header.push((s.name.clone(), StateFlag::Stim));
    }
    for &name in &unconnected {
        header.push((name.clone(), StateFlag::Unkn));
    }

    let np: usize = columns.iter().map(|s| s.n_intervals + 1).product();

    let mut rows = Vec::with_capacity(np);
    for row_id in 0..np {
        let mut rep = 1usize;
        let mut values = Vec::with_capacity(header.len());

        for spec in &columns {
            let period = spec.n_intervals + 1;
            let n = (row_id / rep) % period;
            values.push(unscale(spec, n));
            rep *= period;
        }
        for _ in &unconnected {
            values.push(0.0);
        }

        rows.push(DataRow {
            grpid: crate::datamodel::ACTIVE,
            crvid: 0,
            rowid: row_id as i32,
            errors: vec![0.0; values.len()],
            values,
        });
    }

    Ok(DataTable { header, rows })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_linear_sweep_produces_one_row_per_step() {
        let externals = vec!["v".to_string()];
        let stimuli = vec![StimulusSpec {
            name: "v".to_string(),
            lower: 0.0,
            upper: 1.0,
            n_intervals: 10,
            scale: SweepScale::Linear,
            sweep: false,
        }];
        let table = expand(&externals, &stimuli).unwrap();
        assert_eq!(table.header, vec![("v".to_string(), StateFlag::Sweep)]);
        assert_eq!(table.rows.len(), 11);
        for (i, row) in table.rows.iter().enumerate() {
            let expected = i as E * 0.1;
            assert!((row.values[0] - expected).abs() < 1e-9);
        }
    }

    #[test]
    fn unconnected_model_external_becomes_unkn_column() {
        let externals = vec!["v".to_string(), "i".to_string()];
        let stimuli = vec![StimulusSpec {
            name: "v".to_string(),
            lower: 0.0,
            upper: 1.0,
            n_intervals: 1,
            scale: SweepScale::Linear,
            sweep: false,
        }];
        let table = expand(&externals, &stimuli).unwrap();
        assert_eq!(
            table.header,
            vec![
                ("v".to_string(), StateFlag::Sweep),
                ("i".to_string(), StateFlag::Unkn),
            ]
        );
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.rows[0].values[1], 0.0);
    }

    #[test]
    fn two_stimuli_combine_with_first_column_fastest() {
        let externals = vec!["v".to_string(), "t".to_string()];
        let stimuli = vec![
            StimulusSpec {
                name: "v".to_string(),
                lower: 0.0,
                upper: 1.0,
                n_intervals: 1,
                scale: SweepScale::Linear,
                sweep: true,
            },
            StimulusSpec {
                name: "t".to_string(),
                lower: 0.0,
                upper: 10.0,
                n_intervals: 1,
                scale: SweepScale::Linear,
                sweep: false,
            },
        ];
        let table = expand(&externals, &stimuli).unwrap();
        assert_eq!(table.rows.len(), 4);
        // v (SWEEP) varies fastest: rows 0,1 share t=0, rows 2,3 share t=10.
        assert_eq!(table.rows[0].values, vec![0.0, 0.0]);
        assert_eq!(table.rows[1].values, vec![1.0, 0.0]);
        assert_eq!(table.rows[2].values, vec![0.0, 10.0]);
        assert_eq!(table.rows[3].values, vec![1.0, 10.0]);
    }

    #[test]
    fn multiple_explicit_sweep_columns_is_an_error() {
        let externals = vec!["v".to_string(), "t".to_string()];
        let stimuli = vec![
            StimulusSpec {
                name: "v".to_string(),
                lower: 0.0,
                upper: 1.0,
                n_intervals: 1,
                scale: SweepScale::Linear,
                sweep: true,
            },
            StimulusSpec {
                name: "t".to_string(),
                lower: 0.0,
                upper: 10.0,
                n_intervals: 1,
                scale: SweepScale::Linear,
                sweep: true,
            },
        ];
        let err = expand(&externals, &stimuli).unwrap_err();
        assert!(matches!(err, SetupError::Other(_)));
    }

    #[test]
    fn log_scale_with_mismatched_sign_bounds_is_rejected() {
        let externals = vec!["v".to_string()];
        let stimuli = vec![StimulusSpec {
            name: "v".to_string(),
            lower: -1.0,
            upper: 1.0,
            n_intervals: 4,
            scale: SweepScale::Log,
            sweep: false,
        }];
        let err = expand(&externals, &stimuli).unwrap_err();
        assert!(matches!(err, SetupError::Other(_)));
    }

    #[test]
    fn no_connected_stimulus_is_an_error() {
        let externals = vec!["v".to_string()];
        let stimuli = vec![StimulusSpec {
            name: "unrelated".to_string(),
            lower: 0.0,
            upper: 1.0,
            n_intervals: 1,
            scale: SweepScale::Linear,
            sweep: false,
        }];
        let err = expand(&externals, &stimuli).unwrap_err();
        assert!(matches!(err, SetupError::Other(_)));
    }
}
