//! Evaluation semantics observed through the checker.

use exprprobe::diagnostics::Pos;
use exprprobe::runtime::{Evaluator, Function, Mark, Scope};
use exprprobe::syntax::parse_expression;
use exprprobe::{Checker, Expected, Type, Value};

fn eval(scope: &Scope, src: &str) -> Result<Value, Vec<String>> {
    let (expr, diags) = parse_expression(src.as_bytes(), "", Pos::INITIAL);
    assert!(diags.is_empty(), "{:?}", diags);
    let (value, diags) = scope.eval_expr(&expr, &Type::Dynamic);
    if diags.is_empty() {
        Ok(value.expect("value"))
    } else {
        Err(diags.iter().map(|d| d.summary.clone()).collect())
    }
}

fn passes(scope: Scope, src: &str, expected: Expected) {
    let errors = Checker::new(scope).check(src.as_bytes(), &expected);
    assert!(errors.is_empty(), "{}: {:#?}", src, errors);
}

// ---
// Operators
// ---

#[test]
fn arithmetic_and_comparison() {
    let scope = Scope::new();
    assert_eq!(eval(&scope, "10 - 4 / 2").unwrap().as_number(), Some(8.0));
    assert_eq!(eval(&scope, "-3 * 2").unwrap().as_number(), Some(-6.0));
    assert_eq!(eval(&scope, "2 >= 2").unwrap().as_bool(), Some(true));
    assert_eq!(eval(&scope, "!(1 < 2) || false").unwrap().as_bool(), Some(false));
}

#[test]
fn equality_compares_across_types() {
    let scope = Scope::new();
    assert_eq!(eval(&scope, "1 == \"1\"").unwrap().as_bool(), Some(false));
    assert_eq!(eval(&scope, "[1, 2] == [1, 2]").unwrap().as_bool(), Some(true));
    assert_eq!(eval(&scope, "null != null").unwrap().as_bool(), Some(false));
}

#[test]
fn operator_errors() {
    let scope = Scope::new();
    assert_eq!(eval(&scope, "5 % 0").unwrap_err(), ["Division by zero"]);
    assert_eq!(eval(&scope, "true + 1").unwrap_err(), ["Invalid operand"]);
    assert_eq!(eval(&scope, "1 && true").unwrap_err(), ["Invalid operand"]);
    assert_eq!(
        eval(&scope, "null ? 1 : 2").unwrap_err(),
        ["Null condition"]
    );
    assert_eq!(
        eval(&scope, "true ? [1] : {a = 1}").unwrap_err(),
        ["Inconsistent conditional result types"]
    );
}

// ---
// Unknown values
// ---

#[test]
fn unknowns_flow_through_every_operator_kind() {
    let scope = || {
        Scope::new()
            .with_variable("n", Value::unknown(Type::Number))
            .with_variable("b", Value::unknown(Type::Bool))
            .with_variable("m", Value::unknown(Type::map(Type::String)))
    };
    passes(scope(), "n + 1", Expected::unknown(Type::Number));
    passes(scope(), "n == 1", Expected::unknown(Type::Bool));
    passes(scope(), "b && true", Expected::unknown(Type::Bool));
    passes(scope(), "!b", Expected::unknown(Type::Bool));
    passes(scope(), "b ? 1 : 2", Expected::unknown(Type::Number));
    passes(scope(), "m.key", Expected::unknown(Type::String));
    passes(scope(), "m[\"key\"]", Expected::unknown(Type::String));
    passes(scope(), "\"${n}!\"", Expected::unknown(Type::String));
    passes(scope(), "[for v in m : v]", Expected::unknown(Type::Dynamic));
    passes(scope(), "abs(n)", Expected::unknown(Type::Number));
}

#[test]
fn collection_with_unknown_element_is_specified() {
    let scope = Scope::new().with_variable("n", Value::unknown(Type::Number));
    passes(
        scope,
        "[n, 1]",
        Expected::specified(Type::tuple(vec![Type::Number, Type::Number])),
    );
}

// ---
// Nulls
// ---

#[test]
fn traversing_null_is_an_error() {
    let scope = Scope::new().with_variable("o", Value::null(Type::object([("a", Type::Number)])));
    assert_eq!(
        eval(&scope, "o.a").unwrap_err(),
        ["Attempt to get attribute from null value"]
    );
    assert_eq!(eval(&scope, "o[\"a\"]").unwrap_err(), ["Attempt to index null value"]);
    assert_eq!(
        eval(&scope, "[for x in o : x]").unwrap_err(),
        ["Iteration over null value"]
    );
}

#[test]
fn typed_null_keeps_its_type() {
    let scope = Scope::new().with_variable("s", Value::null(Type::String));
    passes(scope, "s", Expected::null(Type::String));
}

// ---
// Functions
// ---

#[test]
fn builtin_functions() {
    passes(Scope::new(), "max(1, 5, 3)", Expected::specified(Type::Number));
    passes(Scope::new(), "length(\"héllo\")", Expected::specified(Type::Number));
    passes(Scope::new(), "tostring(5)", Expected::specified(Type::String));
    passes(Scope::new(), "tonumber(\"5\")", Expected::specified(Type::Number));
    passes(Scope::new(), "tobool(\"true\")", Expected::specified(Type::Bool));
    passes(
        Scope::new(),
        "tolist([1, 2])",
        Expected::specified(Type::list(Type::Number)),
    );
    passes(
        Scope::new(),
        "tomap({a = 1})",
        Expected::specified(Type::map(Type::Number)),
    );
    let scope = Scope::new();
    assert_eq!(eval(&scope, "length(\"héllo\")").unwrap().as_number(), Some(5.0));
    assert_eq!(eval(&scope, "lower(\"ABC\")").unwrap().as_str(), Some("abc"));
}

#[test]
fn function_call_errors() {
    let scope = Scope::new();
    assert_eq!(eval(&scope, "nope(1)").unwrap_err(), ["Call to unknown function"]);
    assert_eq!(eval(&scope, "abs()").unwrap_err(), ["Not enough function arguments"]);
    assert_eq!(eval(&scope, "abs(1, 2)").unwrap_err(), ["Too many function arguments"]);
    assert_eq!(eval(&scope, "abs(\"x\")").unwrap_err(), ["Invalid function argument"]);
}

fn double(args: &[Value]) -> Result<Value, String> {
    let n = args[0].as_number().ok_or("a number is required")?;
    Ok(Value::number(n * 2.0))
}

#[test]
fn user_functions_receive_unmarked_arguments() {
    let scope = Scope::new()
        .with_function("double", Function::fixed(1, double))
        .with_variable("s", Value::number(4.0).mark(Mark::Sensitive));
    let value = eval(&scope, "double(s)").unwrap();
    assert_eq!(value.as_number(), Some(8.0));
    assert!(value.has_mark(Mark::Sensitive));
}

// ---
// For expressions and structural values
// ---

#[test]
fn for_expression_over_object_with_key() {
    let scope = Scope::new();
    let value = eval(&scope, "[for k, v in {b = 2, a = 1} : \"${k}=${v}\"]").unwrap();
    let items: Vec<_> = value
        .elements()
        .unwrap()
        .iter()
        .map(|v| v.as_str().unwrap().to_string())
        .collect();
    assert_eq!(items, ["a=1", "b=2"]);
}

#[test]
fn for_expression_duplicate_keys_are_errors() {
    let scope = Scope::new();
    assert_eq!(
        eval(&scope, "{for v in [1, 1] : \"k\" => v}").unwrap_err(),
        ["Duplicate object key"]
    );
}

#[test]
fn iteration_variables_shadow_scope_variables() {
    let scope = Scope::new().with_variable("x", Value::string("outer"));
    let value = eval(&scope, "[for x in [1] : x]").unwrap();
    assert_eq!(value.elements().unwrap()[0].as_number(), Some(1.0));
    assert_eq!(eval(&scope, "x").unwrap().as_str(), Some("outer"));
}

#[test]
fn object_keys_may_be_expressions() {
    let scope = Scope::new().with_variable("k", Value::string("dyn"));
    passes(
        scope,
        "{(k) = 1, \"lit\" = true}",
        Expected::specified(Type::object([("dyn", Type::Number), ("lit", Type::Bool)])),
    );
}

#[test]
fn deep_nesting_is_a_diagnostic_not_a_crash() {
    let src = format!("{}1{}", "(".repeat(30), ")".repeat(30));
    let scope = Scope::new().with_max_depth(10);
    assert_eq!(eval(&scope, &src).unwrap_err(), ["Expression too deeply nested"]);
}
