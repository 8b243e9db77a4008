//! Runtime module for the expression language
//!
//! This module provides the runtime value type produced by evaluation. Every
//! value carries its [`Type`], a payload, and a set of [`Mark`]s. A payload may
//! be a null or an unknown placeholder, so the type of a value is always
//! available even when its content is not.
//!
//! Marks live on the outermost value only: collection constructors lift the
//! marks of their elements onto the collection, and traversals copy the
//! collection's marks back onto the element they return.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

pub mod convert;
pub mod eval;
pub mod functions;
pub mod types;

pub use eval::{Evaluator, Scope};
pub use functions::{Function, FunctionTable};
pub use types::Type;

/// An annotation attached to a value that survives through operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Mark {
    Sensitive,
}

pub type Marks = BTreeSet<Mark>;

/// Canonical runtime value.
#[derive(Debug, Clone, PartialEq)]
pub struct Value {
    ty: Type,
    payload: Payload,
    marks: Marks,
}

#[derive(Debug, Clone, PartialEq)]
enum Payload {
    Null,
    Unknown,
    Number(f64),
    String(String),
    Bool(bool),
    /// Elements of a list, set, or tuple. Stored without marks.
    Elements(Vec<Value>),
    /// Entries of a map or object. Stored without marks.
    Attributes(BTreeMap<String, Value>),
}

impl Value {
    pub fn number(n: f64) -> Value {
        Value::plain(Type::Number, Payload::Number(n))
    }

    pub fn string(s: impl Into<String>) -> Value {
        Value::plain(Type::String, Payload::String(s.into()))
    }

    pub fn bool(b: bool) -> Value {
        Value::plain(Type::Bool, Payload::Bool(b))
    }

    /// A known null of the given type.
    pub fn null(ty: Type) -> Value {
        Value::plain(ty, Payload::Null)
    }

    /// A placeholder for a value of the given type that is not yet known.
    pub fn unknown(ty: Type) -> Value {
        Value::plain(ty, Payload::Unknown)
    }

    pub fn tuple(elements: Vec<Value>) -> Value {
        let (elements, marks) = lift_marks(elements);
        let ty = Type::tuple(elements.iter().map(|v| v.ty.clone()).collect());
        Value {
            ty,
            payload: Payload::Elements(elements),
            marks,
        }
    }

    /// A list whose elements must all have type `element_type`.
    pub fn list(element_type: Type, elements: Vec<Value>) -> Value {
        debug_assert!(elements.iter().all(|v| v.ty == element_type));
        let (elements, marks) = lift_marks(elements);
        Value {
            ty: Type::list(element_type),
            payload: Payload::Elements(elements),
            marks,
        }
    }

    /// A set whose elements must all have type `element_type`. Duplicates are
    /// dropped, keeping the first occurrence.
    pub fn set(element_type: Type, elements: Vec<Value>) -> Value {
        debug_assert!(elements.iter().all(|v| v.ty == element_type));
        let (elements, marks) = lift_marks(elements);
        let mut unique: Vec<Value> = Vec::with_capacity(elements.len());
        for element in elements {
            if !unique.iter().any(|seen| seen.equals(&element)) {
                unique.push(element);
            }
        }
        Value {
            ty: Type::set(element_type),
            payload: Payload::Elements(unique),
            marks,
        }
    }

    pub fn object(attributes: BTreeMap<String, Value>) -> Value {
        let (attributes, marks) = lift_attribute_marks(attributes);
        let ty = Type::Object(
            attributes
                .iter()
                .map(|(name, v)| (name.clone(), v.ty.clone()))
                .collect(),
        );
        Value {
            ty,
            payload: Payload::Attributes(attributes),
            marks,
        }
    }

    /// A map whose values must all have type `element_type`.
    pub fn map(element_type: Type, entries: BTreeMap<String, Value>) -> Value {
        debug_assert!(entries.values().all(|v| v.ty == element_type));
        let (entries, marks) = lift_attribute_marks(entries);
        Value {
            ty: Type::map(element_type),
            payload: Payload::Attributes(entries),
            marks,
        }
    }

    /// Converts parsed JSON into a value: arrays become tuples, objects
    /// become objects, and `null` becomes a dynamically-typed null.
    pub fn from_json(json: &serde_json::Value) -> Value {
        match json {
            serde_json::Value::Null => Value::null(Type::Dynamic),
            serde_json::Value::Bool(b) => Value::bool(*b),
            serde_json::Value::Number(n) => Value::number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Value::string(s.clone()),
            serde_json::Value::Array(items) => {
                Value::tuple(items.iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(entries) => Value::object(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), Value::from_json(v)))
                    .collect(),
            ),
        }
    }

    fn plain(ty: Type, payload: Payload) -> Value {
        Value {
            ty,
            payload,
            marks: Marks::new(),
        }
    }

    pub fn ty(&self) -> &Type {
        &self.ty
    }

    pub fn is_null(&self) -> bool {
        matches!(self.payload, Payload::Null)
    }

    /// True unless this value is itself an unknown placeholder. A collection
    /// holding unknown elements is still known.
    pub fn is_known(&self) -> bool {
        !matches!(self.payload, Payload::Unknown)
    }

    /// True if this value is known and not null.
    pub fn is_specified(&self) -> bool {
        self.is_known() && !self.is_null()
    }

    pub fn is_marked(&self) -> bool {
        !self.marks.is_empty()
    }

    pub fn has_mark(&self, mark: Mark) -> bool {
        self.marks.contains(&mark)
    }

    pub fn marks(&self) -> &Marks {
        &self.marks
    }

    pub fn mark(mut self, mark: Mark) -> Value {
        self.marks.insert(mark);
        self
    }

    pub fn with_marks(mut self, marks: &Marks) -> Value {
        self.marks.extend(marks.iter().copied());
        self
    }

    /// Splits this value into its unmarked form and the marks it carried.
    pub fn unmark(mut self) -> (Value, Marks) {
        let marks = std::mem::take(&mut self.marks);
        (self, marks)
    }

    /// Returns a copy of this value with a different type and the same
    /// payload. Used by conversion once the payload is known to fit.
    pub(crate) fn retyped(mut self, ty: Type) -> Value {
        self.ty = ty;
        self
    }

    pub fn as_number(&self) -> Option<f64> {
        match self.payload {
            Payload::Number(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match &self.payload {
            Payload::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self.payload {
            Payload::Bool(b) => Some(b),
            _ => None,
        }
    }

    /// Elements of a known list, set, or tuple.
    pub fn elements(&self) -> Option<&[Value]> {
        match &self.payload {
            Payload::Elements(elements) => Some(elements),
            _ => None,
        }
    }

    /// Entries of a known map or object.
    pub fn attributes(&self) -> Option<&BTreeMap<String, Value>> {
        match &self.payload {
            Payload::Attributes(attributes) => Some(attributes),
            _ => None,
        }
    }

    /// Number of elements or entries of a known collection or structure.
    pub fn length(&self) -> Option<usize> {
        match &self.payload {
            Payload::Elements(elements) => Some(elements.len()),
            Payload::Attributes(attributes) => Some(attributes.len()),
            Payload::String(s) => Some(unicode_segmentation::UnicodeSegmentation::graphemes(
                s.as_str(),
                true,
            )
            .count()),
            _ => None,
        }
    }

    /// Structural equality of content, ignoring marks. Used by the `==`
    /// operator and set deduplication.
    pub fn equals(&self, other: &Value) -> bool {
        match (&self.payload, &other.payload) {
            (Payload::Null, Payload::Null) => true,
            (Payload::Number(a), Payload::Number(b)) => a == b,
            (Payload::String(a), Payload::String(b)) => a == b,
            (Payload::Bool(a), Payload::Bool(b)) => a == b,
            (Payload::Elements(a), Payload::Elements(b)) => {
                self.ty == other.ty
                    && a.len() == b.len()
                    && a.iter().zip(b).all(|(x, y)| x.equals(y))
            }
            (Payload::Attributes(a), Payload::Attributes(b)) => {
                self.ty == other.ty
                    && a.len() == b.len()
                    && a.iter()
                        .zip(b)
                        .all(|((ka, va), (kb, vb))| ka == kb && va.equals(vb))
            }
            _ => false,
        }
    }
}

fn lift_marks(elements: Vec<Value>) -> (Vec<Value>, Marks) {
    let mut marks = Marks::new();
    let elements = elements
        .into_iter()
        .map(|v| {
            let (v, m) = v.unmark();
            marks.extend(m);
            v
        })
        .collect();
    (elements, marks)
}

fn lift_attribute_marks(entries: BTreeMap<String, Value>) -> (BTreeMap<String, Value>, Marks) {
    let mut marks = Marks::new();
    let entries = entries
        .into_iter()
        .map(|(k, v)| {
            let (v, m) = v.unmark();
            marks.extend(m);
            (k, v)
        })
        .collect();
    (entries, marks)
}

/// Formats a number the way the language prints it: integral values without
/// a fractional part.
pub fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.has_mark(Mark::Sensitive) {
            return write!(f, "(sensitive value)");
        }
        match &self.payload {
            Payload::Null => write!(f, "null"),
            Payload::Unknown => write!(f, "(unknown {})", self.ty),
            Payload::Number(n) => write!(f, "{}", format_number(*n)),
            Payload::String(s) => write!(f, "{:?}", s),
            Payload::Bool(b) => write!(f, "{}", b),
            Payload::Elements(elements) => {
                write!(f, "[")?;
                for (i, v) in elements.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", v)?;
                }
                write!(f, "]")
            }
            Payload::Attributes(attributes) => {
                write!(f, "{{")?;
                for (i, (k, v)) in attributes.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{} = {}", k, v)?;
                }
                write!(f, "}}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_and_unknown_keep_their_type() {
        let v = Value::null(Type::Number);
        assert!(v.is_null());
        assert!(v.is_known());
        assert_eq!(v.ty(), &Type::Number);

        let v = Value::unknown(Type::String);
        assert!(!v.is_known());
        assert!(!v.is_null());
        assert_eq!(v.ty(), &Type::String);
    }

    #[test]
    fn tuple_lifts_element_marks() {
        let v = Value::tuple(vec![
            Value::number(1.0),
            Value::string("secret").mark(Mark::Sensitive),
        ]);
        assert!(v.is_marked());
        assert_eq!(v.ty(), &Type::tuple(vec![Type::Number, Type::String]));
        assert!(v.elements().unwrap().iter().all(|e| !e.is_marked()));
    }

    #[test]
    fn collection_with_unknown_element_is_known() {
        let v = Value::tuple(vec![Value::unknown(Type::Number)]);
        assert!(v.is_known());
        assert!(v.is_specified());
    }

    #[test]
    fn set_drops_duplicates() {
        let v = Value::set(
            Type::Number,
            vec![Value::number(1.0), Value::number(2.0), Value::number(1.0)],
        );
        assert_eq!(v.length(), Some(2));
    }

    #[test]
    fn from_json_builds_structural_types() {
        let json: serde_json::Value =
            serde_json::from_str(r#"{"a": [1, "x"], "b": null}"#).unwrap();
        let v = Value::from_json(&json);
        assert_eq!(
            v.ty(),
            &Type::object([
                ("a", Type::tuple(vec![Type::Number, Type::String])),
                ("b", Type::Dynamic),
            ])
        );
    }

    #[test]
    fn display_hides_sensitive_content() {
        assert_eq!(Value::number(3.0).to_string(), "3");
        assert_eq!(Value::number(0.5).to_string(), "0.5");
        assert_eq!(
            Value::string("pw").mark(Mark::Sensitive).to_string(),
            "(sensitive value)"
        );
    }

    #[test]
    fn equals_ignores_marks() {
        let a = Value::number(1.0).mark(Mark::Sensitive);
        assert!(a.equals(&Value::number(1.0)));
        assert!(!a.equals(&Value::string("1")));
    }
}
