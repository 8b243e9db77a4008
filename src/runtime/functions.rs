//! Function library available to expressions.
//!
//! Every function is a plain Rust function over already-evaluated arguments.
//! The [`FunctionTable`] handles arity checks and mark propagation, so most
//! implementations only deal with unmarked values: marks on any argument are
//! stripped before the call and re-applied to the result. Functions that
//! inspect marks themselves (`sensitive`, `nonsensitive`) opt out with
//! [`Function::with_raw_marks`].

use std::collections::BTreeMap;

use once_cell::sync::Lazy;

use super::convert::convert;
use super::{Mark, Marks, Type, Value};

/// Signature shared by every function implementation.
pub type FunctionImpl = fn(args: &[Value]) -> Result<Value, String>;

#[derive(Debug, Clone, Copy)]
pub struct Function {
    pub min_args: usize,
    /// `None` means variadic.
    pub max_args: Option<usize>,
    pub raw_marks: bool,
    pub imp: FunctionImpl,
}

impl Function {
    /// A function taking exactly `arity` arguments.
    pub const fn fixed(arity: usize, imp: FunctionImpl) -> Self {
        Self {
            min_args: arity,
            max_args: Some(arity),
            raw_marks: false,
            imp,
        }
    }

    /// A function taking at least `min_args` arguments.
    pub const fn variadic(min_args: usize, imp: FunctionImpl) -> Self {
        Self {
            min_args,
            max_args: None,
            raw_marks: false,
            imp,
        }
    }

    /// Passes marked arguments through untouched and skips re-marking.
    pub const fn with_raw_marks(mut self) -> Self {
        self.raw_marks = true;
        self
    }
}

/// Why a call could not produce a value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallError {
    UnknownFunction,
    NotEnoughArguments { expected: usize, got: usize },
    TooManyArguments { expected: usize, got: usize },
    Failed(String),
}

#[derive(Debug, Clone, Default)]
pub struct FunctionTable(BTreeMap<String, Function>);

static BUILTINS: Lazy<FunctionTable> = Lazy::new(|| {
    let mut table = FunctionTable::default();
    table.register("abs", Function::fixed(1, abs));
    table.register("max", Function::variadic(1, max));
    table.register("min", Function::variadic(1, min));
    table.register("length", Function::fixed(1, length));
    table.register("upper", Function::fixed(1, upper));
    table.register("lower", Function::fixed(1, lower));
    table.register("join", Function::fixed(2, join));
    table.register("coalesce", Function::variadic(1, coalesce));
    table.register("tostring", Function::fixed(1, tostring));
    table.register("tonumber", Function::fixed(1, tonumber));
    table.register("tobool", Function::fixed(1, tobool));
    table.register("tolist", Function::fixed(1, tolist));
    table.register("tomap", Function::fixed(1, tomap));
    table.register("sensitive", Function::fixed(1, sensitive).with_raw_marks());
    table.register("nonsensitive", Function::fixed(1, nonsensitive).with_raw_marks());
    table
});

impl FunctionTable {
    /// The built-in function library.
    pub fn builtin() -> Self {
        BUILTINS.clone()
    }

    pub fn register(&mut self, name: impl Into<String>, function: Function) {
        self.0.insert(name.into(), function);
    }

    pub fn get(&self, name: &str) -> Option<&Function> {
        self.0.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Calls the named function with evaluated arguments.
    pub fn call(&self, name: &str, args: Vec<Value>) -> Result<Value, CallError> {
        let function = self.get(name).ok_or(CallError::UnknownFunction)?;
        if args.len() < function.min_args {
            return Err(CallError::NotEnoughArguments {
                expected: function.min_args,
                got: args.len(),
            });
        }
        if let Some(max) = function.max_args {
            if args.len() > max {
                return Err(CallError::TooManyArguments {
                    expected: max,
                    got: args.len(),
                });
            }
        }

        if function.raw_marks {
            return (function.imp)(&args).map_err(CallError::Failed);
        }

        let mut marks = Marks::new();
        let args: Vec<Value> = args
            .into_iter()
            .map(|arg| {
                let (arg, arg_marks) = arg.unmark();
                marks.extend(arg_marks);
                arg
            })
            .collect();
        let result = (function.imp)(&args).map_err(CallError::Failed)?;
        Ok(result.with_marks(&marks))
    }
}

// ============================================================================
// ARGUMENT HELPERS
// ============================================================================

/// Converts an argument to a number. `Ok(None)` means the argument is unknown.
fn number_arg(arg: &Value) -> Result<Option<f64>, String> {
    if arg.is_null() {
        return Err("argument must not be null".into());
    }
    let arg = convert(arg.clone(), &Type::Number)?;
    Ok(arg.as_number())
}

/// Converts an argument to a string. `Ok(None)` means the argument is unknown.
fn string_arg(arg: &Value) -> Result<Option<String>, String> {
    if arg.is_null() {
        return Err("argument must not be null".into());
    }
    let arg = convert(arg.clone(), &Type::String)?;
    Ok(arg.as_str().map(str::to_string))
}

fn first(args: &[Value]) -> Result<&Value, String> {
    args.first().ok_or_else(|| "missing argument".to_string())
}

// ============================================================================
// NUMERIC FUNCTIONS
// ============================================================================

fn abs(args: &[Value]) -> Result<Value, String> {
    Ok(match number_arg(first(args)?)? {
        Some(n) => Value::number(n.abs()),
        None => Value::unknown(Type::Number),
    })
}

fn fold_numbers(args: &[Value], pick: fn(f64, f64) -> f64) -> Result<Value, String> {
    let mut acc: Option<f64> = None;
    let mut unknown = false;
    for arg in args {
        match number_arg(arg)? {
            Some(n) => acc = Some(acc.map_or(n, |a| pick(a, n))),
            None => unknown = true,
        }
    }
    Ok(match (unknown, acc) {
        (false, Some(n)) => Value::number(n),
        _ => Value::unknown(Type::Number),
    })
}

fn max(args: &[Value]) -> Result<Value, String> {
    fold_numbers(args, f64::max)
}

fn min(args: &[Value]) -> Result<Value, String> {
    fold_numbers(args, f64::min)
}

// ============================================================================
// COLLECTION AND STRING FUNCTIONS
// ============================================================================

fn length(args: &[Value]) -> Result<Value, String> {
    let arg = first(args)?;
    if arg.is_null() {
        return Err("argument must not be null".into());
    }
    if !arg.is_known() {
        return match arg.ty() {
            Type::Number | Type::Bool => Err("argument must be a string, a collection type, or a structural type".into()),
            _ => Ok(Value::unknown(Type::Number)),
        };
    }
    match arg.ty() {
        Type::Number | Type::Bool => {
            Err("argument must be a string, a collection type, or a structural type".into())
        }
        _ => arg
            .length()
            .map(|n| Value::number(n as f64))
            .ok_or_else(|| "value has no length".to_string()),
    }
}

fn upper(args: &[Value]) -> Result<Value, String> {
    Ok(match string_arg(first(args)?)? {
        Some(s) => Value::string(s.to_uppercase()),
        None => Value::unknown(Type::String),
    })
}

fn lower(args: &[Value]) -> Result<Value, String> {
    Ok(match string_arg(first(args)?)? {
        Some(s) => Value::string(s.to_lowercase()),
        None => Value::unknown(Type::String),
    })
}

fn join(args: &[Value]) -> Result<Value, String> {
    let [separator, list] = args else {
        return Err("join requires a separator and a list".into());
    };
    let Some(separator) = string_arg(separator)? else {
        return Ok(Value::unknown(Type::String));
    };
    if list.is_null() {
        return Err("list must not be null".into());
    }
    if !list.is_known() {
        return Ok(Value::unknown(Type::String));
    }
    let elements = list
        .elements()
        .ok_or_else(|| "a list of strings is required".to_string())?;
    let mut parts = Vec::with_capacity(elements.len());
    for (i, element) in elements.iter().enumerate() {
        match string_arg(element).map_err(|err| format!("element {}: {}", i, err))? {
            Some(s) => parts.push(s),
            None => return Ok(Value::unknown(Type::String)),
        }
    }
    Ok(Value::string(parts.join(&separator)))
}

/// Returns the first argument that is not null, converted to the type all
/// arguments unify to.
fn coalesce(args: &[Value]) -> Result<Value, String> {
    let types: Vec<Type> = args.iter().map(|a| a.ty().clone()).collect();
    let unified =
        Type::unify(&types).ok_or_else(|| "all arguments must have the same type".to_string())?;
    for arg in args {
        if !arg.is_known() {
            return Ok(Value::unknown(unified));
        }
        if !arg.is_null() {
            return convert(arg.clone(), &unified);
        }
    }
    Err("no non-null arguments".into())
}

// ============================================================================
// CONVERSION FUNCTIONS
// ============================================================================

fn tostring(args: &[Value]) -> Result<Value, String> {
    convert(first(args)?.clone(), &Type::String)
}

fn tonumber(args: &[Value]) -> Result<Value, String> {
    convert(first(args)?.clone(), &Type::Number)
}

fn tobool(args: &[Value]) -> Result<Value, String> {
    convert(first(args)?.clone(), &Type::Bool)
}

fn tolist(args: &[Value]) -> Result<Value, String> {
    convert(first(args)?.clone(), &Type::list(Type::Dynamic))
}

fn tomap(args: &[Value]) -> Result<Value, String> {
    convert(first(args)?.clone(), &Type::map(Type::Dynamic))
}

// ============================================================================
// SENSITIVITY FUNCTIONS
// ============================================================================

fn sensitive(args: &[Value]) -> Result<Value, String> {
    Ok(first(args)?.clone().mark(Mark::Sensitive))
}

fn nonsensitive(args: &[Value]) -> Result<Value, String> {
    let arg = first(args)?;
    if arg.is_known() && !arg.has_mark(Mark::Sensitive) {
        return Err("the given value is not sensitive, so this call is redundant".into());
    }
    let (value, mut marks) = arg.clone().unmark();
    marks.remove(&Mark::Sensitive);
    Ok(value.with_marks(&marks))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(name: &str, args: Vec<Value>) -> Result<Value, CallError> {
        FunctionTable::builtin().call(name, args)
    }

    #[test]
    fn arity_is_checked() {
        assert_eq!(
            call("abs", vec![]).unwrap_err(),
            CallError::NotEnoughArguments {
                expected: 1,
                got: 0
            }
        );
        assert_eq!(
            call("upper", vec![Value::string("a"), Value::string("b")]).unwrap_err(),
            CallError::TooManyArguments {
                expected: 1,
                got: 2
            }
        );
        assert_eq!(
            call("nope", vec![]).unwrap_err(),
            CallError::UnknownFunction
        );
    }

    #[test]
    fn marks_propagate_through_plain_functions() {
        let v = call("upper", vec![Value::string("pw").mark(Mark::Sensitive)]).unwrap();
        assert_eq!(v.as_str(), Some("PW"));
        assert!(v.has_mark(Mark::Sensitive));
    }

    #[test]
    fn unknown_arguments_give_unknown_results() {
        let v = call("max", vec![Value::number(1.0), Value::unknown(Type::Number)]).unwrap();
        assert!(!v.is_known());
        assert_eq!(v.ty(), &Type::Number);

        let v = call("length", vec![Value::unknown(Type::list(Type::String))]).unwrap();
        assert!(!v.is_known());
    }

    #[test]
    fn sensitive_and_nonsensitive_toggle_the_mark() {
        let marked = call("sensitive", vec![Value::number(1.0)]).unwrap();
        assert!(marked.is_marked());
        let unmarked = call("nonsensitive", vec![marked]).unwrap();
        assert!(!unmarked.is_marked());
        assert!(matches!(
            call("nonsensitive", vec![Value::number(1.0)]),
            Err(CallError::Failed(_))
        ));
    }

    #[test]
    fn coalesce_skips_nulls() {
        let v = call(
            "coalesce",
            vec![Value::null(Type::Dynamic), Value::number(2.0)],
        )
        .unwrap();
        assert_eq!(v.as_number(), Some(2.0));
        assert!(call("coalesce", vec![Value::null(Type::Number)]).is_err());
    }

    #[test]
    fn join_and_length() {
        let list = Value::tuple(vec![Value::string("a"), Value::number(1.0)]);
        let v = call("join", vec![Value::string("-"), list.clone()]).unwrap();
        assert_eq!(v.as_str(), Some("a-1"));
        let v = call("length", vec![list]).unwrap();
        assert_eq!(v.as_number(), Some(2.0));
        assert!(call("length", vec![Value::number(3.0)]).is_err());
    }
}
