//! Re-exports of the proc-macro crates used to build the solver option registry
//! and to generate parameterized tests.

pub use options::{build_option_enum, build_options, explicit_options, use_option};
pub use testing::{type_parameterized_test, value_parameterized_test};
