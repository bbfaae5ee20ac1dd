//! Ancillary routines, spec.md §2 item 11: chi-square probability, stimulus-sweep
//! expansion, and data-subset selection. Each is a small standalone calculation used by the
//! solver core (`chisq` by [`crate::modes`]'s proximity test) or by a caller assembling a
//! [`crate::datamodel::DataTable`] before extraction/simulation (`sweep`, `subset`).

pub mod chisq;
pub mod subset;
pub mod sweep;
