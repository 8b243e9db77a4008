// tests/property_tests.rs

use exprprobe::runtime::Scope;
use exprprobe::{check_expression, CheckError, Checker, Expected, Type, Value, ValueMode};
use proptest::prelude::*;

/// Arithmetic source over small integers and the variable `x`, paired with
/// whether `x` appears in it.
fn arithmetic() -> impl Strategy<Value = (String, bool)> {
    let leaf = prop_oneof![
        (0u32..100).prop_map(|n| (n.to_string(), false)),
        Just(("x".to_string(), true)),
    ];
    leaf.prop_recursive(4, 16, 2, |inner| {
        (inner.clone(), prop::sample::select(vec!["+", "-", "*"]), inner).prop_map(
            |((lhs, lx), op, (rhs, rx))| (format!("({} {} {})", lhs, op, rhs), lx || rx),
        )
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn prop_error_count_matches_wrong_facets(
        wrong_type in any::<bool>(),
        wrong_mode in any::<bool>(),
        wrong_sensitivity in any::<bool>(),
    ) {
        let ty = if wrong_type { Type::Bool } else { Type::Number };
        let mode = if wrong_mode { ValueMode::Unknown } else { ValueMode::Specified };
        let expected = Expected::new(ty, mode, wrong_sensitivity);

        let errors = check_expression(b"1", &expected);
        let wrong = [wrong_type, wrong_mode, wrong_sensitivity]
            .iter()
            .filter(|w| **w)
            .count();
        prop_assert_eq!(errors.len(), wrong);
        prop_assert!(errors.iter().all(CheckError::is_mismatch));
    }

    #[test]
    fn prop_arbitrary_source_never_escapes_the_checker(src in "\\PC{0,40}") {
        let errors = check_expression(src.as_bytes(), &Expected::specified(Type::Dynamic));
        prop_assert!(
            !errors.iter().any(|e| matches!(e, CheckError::Panic { .. })),
            "evaluation of {:?} panicked: {:?}", src, errors
        );
    }

    #[test]
    fn prop_integer_addition_is_a_specified_number(a in -10_000i64..10_000, b in -10_000i64..10_000) {
        let src = format!("{} + {}", a, b);
        let errors = check_expression(src.as_bytes(), &Expected::specified(Type::Number));
        prop_assert!(errors.is_empty(), "{}: {:?}", src, errors);
    }

    #[test]
    fn prop_unknown_operand_makes_result_unknown((src, has_x) in arithmetic()) {
        let scope = Scope::new().with_variable("x", Value::unknown(Type::Number));
        let mode = if has_x { ValueMode::Unknown } else { ValueMode::Specified };
        let errors = Checker::new(scope).check(src.as_bytes(), &Expected::new(Type::Number, mode, false));
        prop_assert!(errors.is_empty(), "{}: {:?}", src, errors);
    }
}
