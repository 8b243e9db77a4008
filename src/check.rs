//! Checking expression results against expectations.
//!
//! [`Checker::check`] runs one expression through three phases:
//!
//! 1. **Parse.** Any parse diagnostic ends the check and is returned as
//!    [`CheckError::Syntax`].
//! 2. **Evaluate.** The evaluator runs with the wildcard type constraint
//!    inside a panic boundary. A panic becomes a single [`CheckError::Panic`];
//!    evaluation diagnostics end the check as [`CheckError::Eval`]; a missing
//!    value ends it as [`CheckError::NoValue`].
//! 3. **Compare.** Type, mode, and sensitivity are compared independently and
//!    every mismatch is returned.

pub mod checker;
pub mod error;
pub mod expected;
pub mod report;

pub use checker::{check_expression, compare, Checker};
pub use error::{CheckError, CheckPhase};
pub use expected::{Expected, ParseValueModeError, ValueMode};
pub use report::{render_test_case, test_case, test_expression, Expression, FailureLog, Reporter};
