//! Conversion of values between types.
//!
//! Conversion is what happens when a value meets a type constraint: a
//! function parameter, a `to*` function, or the evaluator's requested result
//! type. Marks always survive conversion, and null or unknown values convert to
//! a null or unknown of the target type.

use std::collections::BTreeMap;

use super::{format_number, Type, Value};

/// Converts `value` so that its type is exactly `want`, or explains why that
/// is impossible. A `Dynamic` target accepts any value unchanged.
pub fn convert(value: Value, want: &Type) -> Result<Value, String> {
    if *want == Type::Dynamic || value.ty() == want {
        return Ok(value);
    }
    let (value, marks) = value.unmark();
    let converted = convert_unmarked(value, want)?;
    Ok(converted.with_marks(&marks))
}

/// Reports whether a value of type `from` could ever convert to `to`.
pub fn can_convert(from: &Type, to: &Type) -> bool {
    if from == to || *from == Type::Dynamic || *to == Type::Dynamic {
        return true;
    }
    match (from, to) {
        (Type::Number | Type::Bool, Type::String) => true,
        (Type::String, Type::Number | Type::Bool) => true,
        (Type::Tuple(etys), Type::List(want) | Type::Set(want)) => {
            etys.iter().all(|ety| can_convert(ety, want))
        }
        (Type::List(ety) | Type::Set(ety), Type::List(want) | Type::Set(want)) => {
            can_convert(ety, want)
        }
        (Type::Object(atys), Type::Map(want)) => atys.values().all(|aty| can_convert(aty, want)),
        (Type::Map(ety), Type::Map(want)) => can_convert(ety, want),
        (Type::Tuple(etys), Type::Tuple(wants)) => {
            etys.len() == wants.len() && etys.iter().zip(wants).all(|(e, w)| can_convert(e, w))
        }
        (Type::List(ety), Type::Tuple(wants)) => wants.iter().all(|w| can_convert(ety, w)),
        (Type::Object(atys), Type::Object(wants)) => wants
            .iter()
            .all(|(name, w)| atys.get(name).is_some_and(|a| can_convert(a, w))),
        (Type::Map(ety), Type::Object(wants)) => wants.values().all(|w| can_convert(ety, w)),
        _ => false,
    }
}

fn convert_unmarked(value: Value, want: &Type) -> Result<Value, String> {
    if value.is_null() {
        return if can_convert(value.ty(), want) {
            Ok(Value::null(want.clone()))
        } else {
            Err(required(want))
        };
    }
    if !value.is_known() {
        return if can_convert(value.ty(), want) {
            Ok(Value::unknown(want.clone()))
        } else {
            Err(required(want))
        };
    }

    match want {
        Type::String => match (value.as_number(), value.as_bool()) {
            (Some(n), _) => Ok(Value::string(format_number(n))),
            (_, Some(b)) => Ok(Value::string(b.to_string())),
            _ => Err(required(want)),
        },
        Type::Number => {
            let s = value.as_str().ok_or_else(|| required(want))?;
            s.trim()
                .parse::<f64>()
                .ok()
                .filter(|n| n.is_finite())
                .map(Value::number)
                .ok_or_else(|| format!("cannot convert {:?} to number", s))
        }
        Type::Bool => match value.as_str() {
            Some("true") => Ok(Value::bool(true)),
            Some("false") => Ok(Value::bool(false)),
            Some(s) => Err(format!("cannot convert {:?} to bool", s)),
            None => Err(required(want)),
        },
        Type::List(ety) | Type::Set(ety) => {
            let elements = value.elements().ok_or_else(|| required(want))?.to_vec();
            let ety = resolve_element_type(ety, elements.iter().map(Value::ty))?;
            let elements = elements
                .into_iter()
                .enumerate()
                .map(|(i, e)| convert(e, &ety).map_err(|err| format!("element {}: {}", i, err)))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(match want {
                Type::Set(_) => Value::set(ety, elements),
                _ => Value::list(ety, elements),
            })
        }
        Type::Map(ety) => {
            let entries = value.attributes().ok_or_else(|| required(want))?.clone();
            let ety = resolve_element_type(ety, entries.values().map(Value::ty))?;
            let entries = entries
                .into_iter()
                .map(|(k, v)| {
                    let v = convert(v, &ety).map_err(|err| format!("element {:?}: {}", k, err))?;
                    Ok((k, v))
                })
                .collect::<Result<BTreeMap<_, _>, String>>()?;
            Ok(Value::map(ety, entries))
        }
        Type::Tuple(wants) => {
            let elements = value.elements().ok_or_else(|| required(want))?;
            if elements.len() != wants.len() {
                return Err(format!("tuple of {} elements is required", wants.len()));
            }
            let elements = elements
                .iter()
                .zip(wants)
                .enumerate()
                .map(|(i, (e, w))| {
                    convert(e.clone(), w).map_err(|err| format!("element {}: {}", i, err))
                })
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Value::tuple(elements))
        }
        Type::Object(wants) => {
            let attributes = value.attributes().ok_or_else(|| required(want))?;
            let mut converted = BTreeMap::new();
            for (name, w) in wants {
                let attr = attributes
                    .get(name)
                    .ok_or_else(|| format!("attribute {:?} is required", name))?;
                let attr = convert(attr.clone(), w)
                    .map_err(|err| format!("attribute {:?}: {}", name, err))?;
                converted.insert(name.clone(), attr);
            }
            Ok(Value::object(converted))
        }
        Type::Dynamic => Ok(value),
    }
}

/// Picks the concrete element type for a collection conversion. A `Dynamic`
/// element constraint is resolved by unifying the actual element types.
fn resolve_element_type<'a>(
    want: &Type,
    actual: impl Iterator<Item = &'a Type>,
) -> Result<Type, String> {
    if *want != Type::Dynamic {
        return Ok(want.clone());
    }
    let actual: Vec<Type> = actual.cloned().collect();
    Type::unify(&actual).ok_or_else(|| "all elements must have the same type".to_string())
}

fn required(want: &Type) -> String {
    match want {
        Type::Number => "a number is required".into(),
        Type::String => "a string is required".into(),
        Type::Bool => "a bool is required".into(),
        other => format!("{} is required", other.friendly_name()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::Mark;

    #[test]
    fn primitives_convert_through_strings() {
        let v = convert(Value::number(5.0), &Type::String).unwrap();
        assert_eq!(v.as_str(), Some("5"));

        let v = convert(Value::string("2.5"), &Type::Number).unwrap();
        assert_eq!(v.as_number(), Some(2.5));

        let v = convert(Value::string("true"), &Type::Bool).unwrap();
        assert_eq!(v.as_bool(), Some(true));

        assert!(convert(Value::number(1.0), &Type::Bool).is_err());
        assert!(convert(Value::string("nope"), &Type::Number).is_err());
    }

    #[test]
    fn tuple_converts_to_list_with_unified_element_type() {
        let tuple = Value::tuple(vec![Value::number(1.0), Value::string("a")]);
        let list = convert(tuple, &Type::list(Type::Dynamic)).unwrap();
        assert_eq!(list.ty(), &Type::list(Type::String));
        assert_eq!(list.elements().unwrap()[0].as_str(), Some("1"));
    }

    #[test]
    fn empty_tuple_converts_to_dynamic_list() {
        let list = convert(Value::tuple(vec![]), &Type::list(Type::Dynamic)).unwrap();
        assert_eq!(list.ty(), &Type::list(Type::Dynamic));
    }

    #[test]
    fn null_and_unknown_are_retyped() {
        let v = convert(Value::null(Type::Dynamic), &Type::Number).unwrap();
        assert!(v.is_null());
        assert_eq!(v.ty(), &Type::Number);

        let v = convert(Value::unknown(Type::Number), &Type::String).unwrap();
        assert!(!v.is_known());
        assert_eq!(v.ty(), &Type::String);

        assert!(convert(Value::unknown(Type::Number), &Type::Bool).is_err());
    }

    #[test]
    fn marks_survive_conversion() {
        let v = Value::number(1.0).mark(Mark::Sensitive);
        let v = convert(v, &Type::String).unwrap();
        assert!(v.has_mark(Mark::Sensitive));
    }

    #[test]
    fn object_conversion_requires_attributes() {
        let obj = Value::object([("a".to_string(), Value::number(1.0))].into());
        let want = Type::object([("a", Type::String), ("b", Type::Number)]);
        let err = convert(obj, &want).unwrap_err();
        assert!(err.contains("\"b\""));
    }
}
