//! The parse, evaluate, compare pipeline.

use std::any::Any;
use std::backtrace::Backtrace;
use std::panic::{self, AssertUnwindSafe};

use tracing::{debug, debug_span, warn};

use super::{CheckError, Expected, ValueMode};
use crate::diagnostics::Pos;
use crate::runtime::{Evaluator, Scope, Type, Value};
use crate::syntax::parse_expression;

/// Checks expressions against expectations using an evaluator.
///
/// The checker holds no state between calls, so one instance can check any
/// number of expressions, from any number of threads if `E` allows it.
#[derive(Debug, Clone, Default)]
pub struct Checker<E: Evaluator = Scope> {
    evaluator: E,
}

impl<E: Evaluator> Checker<E> {
    pub fn new(evaluator: E) -> Self {
        Self { evaluator }
    }

    pub fn evaluator(&self) -> &E {
        &self.evaluator
    }

    /// Parses, evaluates, and compares one expression.
    ///
    /// Parse and evaluation failures end the check early: the returned list
    /// then holds only the errors of that phase. Otherwise the result type,
    /// mode, and sensitivity are all compared and every mismatch is returned.
    /// An empty list means the result matched.
    ///
    /// A panic inside the evaluator is caught and returned as
    /// [`CheckError::Panic`]. Panics anywhere else propagate.
    pub fn check(&self, src: &[u8], expected: &Expected) -> Vec<CheckError> {
        let span = debug_span!("check", expected = %expected);
        let _enter = span.enter();

        let (expr, diags) = parse_expression(src, "", Pos::INITIAL);
        if !diags.is_empty() {
            debug!(phase = "parse", count = diags.len(), "parse failed");
            return diags.into_iter().map(CheckError::Syntax).collect();
        }
        debug!(phase = "parse", expr = %expr.value, "parsed");

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            self.evaluator.eval_expr(&expr, &Type::Dynamic)
        }));
        let (value, diags) = match outcome {
            Ok(outcome) => outcome,
            Err(payload) => {
                let backtrace = Backtrace::force_capture();
                let payload = panic_message(payload.as_ref());
                warn!(phase = "eval", payload = %payload, "evaluator panicked");
                return vec![CheckError::Panic {
                    payload,
                    backtrace: backtrace.to_string(),
                }];
            }
        };
        if !diags.is_empty() {
            debug!(phase = "eval", count = diags.len(), "evaluation failed");
            return diags.into_iter().map(CheckError::Eval).collect();
        }

        let Some(value) = value else {
            debug!(phase = "eval", "evaluator returned no value");
            return vec![CheckError::NoValue];
        };

        let errors = compare(&value, expected);
        debug!(phase = "compare", mismatches = errors.len(), "compared");
        errors
    }
}

/// Compares a result against an expectation. All three facets are checked.
pub fn compare(value: &Value, expected: &Expected) -> Vec<CheckError> {
    let mut errors = Vec::new();

    if value.ty() != &expected.ty {
        errors.push(CheckError::WrongType {
            got: value.ty().clone(),
            want: expected.ty.clone(),
        });
    }

    let mode = ValueMode::derive(value.is_null(), value.is_known());
    if mode != expected.mode {
        errors.push(CheckError::WrongMode {
            got: mode,
            want: expected.mode,
        });
    }

    if value.is_marked() != expected.sensitive {
        errors.push(CheckError::WrongSensitivity {
            got: value.is_marked(),
            want: expected.sensitive,
        });
    }

    errors
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "(non-string panic payload)".to_string()
    }
}

/// Checks `src` against `expected` with an empty [`Scope`].
pub fn check_expression(src: &[u8], expected: &Expected) -> Vec<CheckError> {
    Checker::<Scope>::default().check(src, expected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::Diagnostics;
    use crate::runtime::Mark;
    use crate::syntax::ExprNode;

    #[test]
    fn compare_reports_each_facet() {
        let value = Value::number(1.0);
        assert!(compare(&value, &Expected::specified(Type::Number)).is_empty());

        let errors = compare(&value, &Expected::null(Type::Bool).sensitive());
        assert_eq!(errors.len(), 3);
        assert!(matches!(errors[0], CheckError::WrongType { .. }));
        assert!(matches!(errors[1], CheckError::WrongMode { .. }));
        assert!(matches!(errors[2], CheckError::WrongSensitivity { .. }));
    }

    #[test]
    fn compare_uses_sensitive_mark() {
        let value = Value::string("pw").mark(Mark::Sensitive);
        assert!(compare(&value, &Expected::specified(Type::String).sensitive()).is_empty());
    }

    struct Silent;

    impl Evaluator for Silent {
        fn eval_expr(&self, _: &ExprNode, _: &Type) -> (Option<Value>, Diagnostics) {
            (None, Diagnostics::new())
        }
    }

    #[test]
    fn missing_value_is_one_error() {
        let errors = Checker::new(Silent).check(b"1", &Expected::specified(Type::Bool));
        assert_eq!(errors, vec![CheckError::NoValue]);
    }

    #[test]
    fn panic_payload_extraction() {
        let payload: Box<dyn Any + Send> = Box::new("static message");
        assert_eq!(panic_message(payload.as_ref()), "static message");
        let payload: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(payload.as_ref()), "owned");
        let payload: Box<dyn Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(payload.as_ref()), "(non-string panic payload)");
    }
}
