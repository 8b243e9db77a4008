//! Failure records produced by a check.

use std::fmt;

use miette::Diagnostic as MietteDiagnostic;
use thiserror::Error;

use super::ValueMode;
use crate::diagnostics::Diagnostic;
use crate::runtime::Type;

/// One independent reason a check failed.
///
/// A single check may return several of these. They are reported in the order
/// they were found and are never merged.
#[derive(Debug, Clone, PartialEq, Error, MietteDiagnostic)]
pub enum CheckError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Syntax(Diagnostic),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Eval(Diagnostic),

    #[error("panic during expression evaluation: {payload}\n{backtrace}")]
    #[diagnostic(
        code(exprprobe::eval::panic),
        help("this is a defect in the evaluator, not in the expression")
    )]
    Panic { payload: String, backtrace: String },

    #[error("evaluation produced no value")]
    #[diagnostic(code(exprprobe::eval::no_value))]
    NoValue,

    #[error("wrong result type\ngot:  {}\nwant: {}", .got.literal(), .want.literal())]
    #[diagnostic(code(exprprobe::compare::wrong_type))]
    WrongType { got: Type, want: Type },

    #[error("result has wrong mode\ngot:  {got}\nwant: {want}")]
    #[diagnostic(code(exprprobe::compare::wrong_mode))]
    WrongMode { got: ValueMode, want: ValueMode },

    #[error("wrong result sensitivity\ngot:  {got}\nwant: {want}")]
    #[diagnostic(code(exprprobe::compare::wrong_sensitivity))]
    WrongSensitivity { got: bool, want: bool },
}

/// The pipeline stage an error came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CheckPhase {
    Parse,
    Eval,
    Compare,
}

impl CheckPhase {
    pub const fn as_str(self) -> &'static str {
        match self {
            CheckPhase::Parse => "parse",
            CheckPhase::Eval => "eval",
            CheckPhase::Compare => "compare",
        }
    }
}

impl fmt::Display for CheckPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl CheckError {
    pub fn phase(&self) -> CheckPhase {
        match self {
            CheckError::Syntax(_) => CheckPhase::Parse,
            CheckError::Eval(_) | CheckError::Panic { .. } | CheckError::NoValue => {
                CheckPhase::Eval
            }
            CheckError::WrongType { .. }
            | CheckError::WrongMode { .. }
            | CheckError::WrongSensitivity { .. } => CheckPhase::Compare,
        }
    }

    /// True for type, mode, and sensitivity mismatches.
    pub fn is_mismatch(&self) -> bool {
        self.phase() == CheckPhase::Compare
    }

    /// The underlying diagnostic, for parse and evaluation errors.
    pub fn diagnostic(&self) -> Option<&Diagnostic> {
        match self {
            CheckError::Syntax(diag) | CheckError::Eval(diag) => Some(diag),
            _ => None,
        }
    }
}
