//! Differential checking of configuration-language expressions.
//!
//! An expression is parsed, evaluated against a [`runtime::Scope`], and its
//! result compared with an [`Expected`] type, [`ValueMode`], and sensitivity.
//! See [`check`] for the protocol and [`suite`] for YAML regression suites.

pub use crate::check::{
    check_expression, test_case, test_expression, CheckError, Checker, Expected, Expression,
    FailureLog, Reporter, ValueMode,
};
pub use crate::diagnostics::{Diagnostic, Diagnostics};
pub use crate::runtime::{Type, Value};

pub mod check;
pub mod cli;
pub mod diagnostics;
pub mod runtime;
pub mod suite;
pub mod syntax;
