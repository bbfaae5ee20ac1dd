//! Data-subset selection, grounded on `original_source/ParXCL/subset_data()` in
//! `original_source/ParXCL/subset.c`.
//!
//! The C source resolves an external-column selector's name against the data table header
//! once up front (`-mtype-1` encodes the resolved index); here that resolution is the
//! caller's job via [`crate::datamodel::DataTable::column_index`], so a [`Selector::External`]
//! already carries a resolved column index rather than a name.

use tracing::info;

use crate::E;
use crate::datamodel::{DataRow, DataTable, StateFlag};
use crate::errors::SetupError;

/// One row-selection criterion (one `meastemplate` entry in the C source).
#[derive(Debug, Clone, Copy)]
pub enum Selector {
    /// Keep rows whose `grpid`, rounded bounds, falls in `[lower, upper]`.
    Group { lower: E, upper: E },
    /// Keep rows whose `crvid` falls in `[lower, upper]` (rounded) and is a multiple of
    /// `stride` (`stride == 0` is treated as 1, i.e. no subsampling).
    Curve { lower: E, upper: E, stride: i32 },
    /// Keep rows whose value in `column` falls in `[lower, upper]`, each expanded by
    /// `1e-6 * |bound|` to absorb truncation in how the bound itself was derived.
    External { column: usize, lower: E, upper: E },
}

fn excluded(row: &DataRow, sel: &Selector) -> bool {
    match *sel {
        Selector::Group { lower, upper } => {
            let lo = lower.round() as i32;
            let hi = upper.round() as i32;
            row.grpid < lo || row.grpid > hi
        }
        Selector::Curve { lower, upper, stride } => {
            let lo = lower.round() as i32;
            let hi = upper.round() as i32;
            let stride = if stride == 0 { 1 } else { stride };
            row.crvid < lo || row.crvid > hi || row.crvid % stride != 0
        }
        Selector::External { column, lower, upper } => {
            let lo = lower - 1e-6 * lower.abs();
            let hi = upper + 1e-6 * upper.abs();
            let v = row.values[column];
            v < lo || v > hi
        }
    }
}

/// Selects the rows of `table` surviving every selector in `selectors` (a row is kept only if
/// no selector excludes it), spec.md §2 item 11.
///
/// Errors if an [`Selector::External`] names a column that doesn't exist or is itself an
/// unknown (`StateFlag::Unkn`, i.e. solved-for rather than measured) quantity — mirroring
/// `subset_data`'s `NO_KEY_SERR`/`UNKN_VAR_SERR` checks.
pub fn select(table: &DataTable, selectors: &[Selector]) -> Result<DataTable, SetupError> {
    for sel in selectors {
        if let Selector::External { column, .. } = *sel {
            let (name, flag) = table.header.get(column).ok_or_else(|| SetupError::Other(
                format!("column index {column} out of range"),
            ))?;
            if *flag == StateFlag::Unkn {
                return Err(SetupError::WrongType { name: name.clone() });
            }
        }
    }

    let total = table.rows.len();
    let rows: Vec<DataRow> = table
        .rows
        .iter()
        .filter(|row| !selectors.iter().any(|sel| excluded(row, sel)))
        .cloned()
        .collect();

    if rows.len() != total {
        info!(selected = rows.len(), total, "data points selected");
    }

    Ok(DataTable {
        header: table.header.clone(),
        rows,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datamodel::StateFlag;

    fn table() -> DataTable {
        DataTable {
            header: vec![
                ("x".to_string(), StateFlag::Meas),
                ("y".to_string(), StateFlag::Meas),
            ],
            rows: vec![
                DataRow { grpid: 1, crvid: 1, rowid: 0, values: vec![1.0, 2.0], errors: vec![] },
                DataRow { grpid: 1, crvid: 2, rowid: 1, values: vec![5.0, 2.0], errors: vec![] },
                DataRow { grpid: 2, crvid: 1, rowid: 2, values: vec![1.0, 2.0], errors: vec![] },
            ],
        }
    }

    #[test]
    fn group_selector_keeps_only_matching_group() {
        let t = table();
        let result = select(&t, &[Selector::Group { lower: 1.0, upper: 1.0 }]).unwrap();
        assert_eq!(result.rows.len(), 2);
        assert!(result.rows.iter().all(|r| r.grpid == 1));
    }

    #[test]
    fn curve_selector_applies_stride() {
        let t = table();
        let result = select(&t, &[Selector::Curve { lower: 1.0, upper: 2.0, stride: 2 }]).unwrap();
        // only crvid == 2 survives: crvid=1 fails `% 2 != 0`.
        assert_eq!(result.rows.len(), 1);
        assert_eq!(result.rows[0].crvid, 2);
    }

    #[test]
    fn external_selector_filters_on_column_value() {
        let t = table();
        let result = select(&t, &[Selector::External { column: 0, lower: 0.0, upper: 1.0 }]).unwrap();
        assert_eq!(result.rows.len(), 2);
        assert!(result.rows.iter().all(|r| r.values[0] <= 1.0));
    }

    #[test]
    fn external_selector_on_unknown_column_is_an_error() {
        let mut t = table();
        t.header[0].1 = StateFlag::Unkn;
        let err = select(&t, &[Selector::External { column: 0, lower: 0.0, upper: 1.0 }]).unwrap_err();
        assert!(matches!(err, SetupError::WrongType { .. }));
    }
}
