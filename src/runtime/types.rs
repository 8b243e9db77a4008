//! The type system for runtime values.
//!
//! Types compare structurally: `list(number)` equals `list(number)` and
//! nothing else. [`Type::Dynamic`] is the wildcard placeholder used where a
//! concrete type is intentionally unconstrained (for example the type of a
//! bare `null` literal, or the element type of an empty list).

use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    Number,
    String,
    Bool,
    List(Box<Type>),
    Set(Box<Type>),
    Map(Box<Type>),
    Tuple(Vec<Type>),
    Object(BTreeMap<String, Type>),
    Dynamic,
}

impl Type {
    pub fn list(element: Type) -> Type {
        Type::List(Box::new(element))
    }

    pub fn set(element: Type) -> Type {
        Type::Set(Box::new(element))
    }

    pub fn map(element: Type) -> Type {
        Type::Map(Box::new(element))
    }

    pub fn tuple(elements: Vec<Type>) -> Type {
        Type::Tuple(elements)
    }

    pub fn object<K, I>(attributes: I) -> Type
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Type)>,
    {
        Type::Object(
            attributes
                .into_iter()
                .map(|(name, ty)| (name.into(), ty))
                .collect(),
        )
    }

    pub fn empty_tuple() -> Type {
        Type::Tuple(Vec::new())
    }

    pub fn empty_object() -> Type {
        Type::Object(BTreeMap::new())
    }

    pub fn is_primitive(&self) -> bool {
        matches!(self, Type::Number | Type::String | Type::Bool)
    }

    /// True for the homogeneous collection kinds (list, set, map).
    pub fn is_collection(&self) -> bool {
        matches!(self, Type::List(_) | Type::Set(_) | Type::Map(_))
    }

    pub fn element_type(&self) -> Option<&Type> {
        match self {
            Type::List(ety) | Type::Set(ety) | Type::Map(ety) => Some(ety),
            _ => None,
        }
    }

    /// True if the wildcard type appears anywhere inside this type.
    pub fn has_dynamic(&self) -> bool {
        match self {
            Type::Dynamic => true,
            Type::List(ety) | Type::Set(ety) | Type::Map(ety) => ety.has_dynamic(),
            Type::Tuple(etys) => etys.iter().any(Type::has_dynamic),
            Type::Object(atys) => atys.values().any(Type::has_dynamic),
            Type::Number | Type::String | Type::Bool => false,
        }
    }

    /// A short human-oriented description, used in evaluator messages.
    pub fn friendly_name(&self) -> String {
        match self {
            Type::Number => "number".into(),
            Type::String => "string".into(),
            Type::Bool => "bool".into(),
            Type::List(ety) => format!("list of {}", ety.friendly_name()),
            Type::Set(ety) => format!("set of {}", ety.friendly_name()),
            Type::Map(ety) => format!("map of {}", ety.friendly_name()),
            Type::Tuple(_) => "tuple".into(),
            Type::Object(_) => "object".into(),
            Type::Dynamic => "dynamic".into(),
        }
    }

    /// Renders this type as a Rust constructor expression, for generated
    /// reproduction tests.
    pub fn literal(&self) -> String {
        match self {
            Type::Number => "Type::Number".into(),
            Type::String => "Type::String".into(),
            Type::Bool => "Type::Bool".into(),
            Type::Dynamic => "Type::Dynamic".into(),
            Type::List(ety) => format!("Type::list({})", ety.literal()),
            Type::Set(ety) => format!("Type::set({})", ety.literal()),
            Type::Map(ety) => format!("Type::map({})", ety.literal()),
            Type::Tuple(etys) => {
                let inner: Vec<_> = etys.iter().map(Type::literal).collect();
                format!("Type::tuple(vec![{}])", inner.join(", "))
            }
            Type::Object(atys) => {
                let inner: Vec<_> = atys
                    .iter()
                    .map(|(name, ty)| format!("({:?}, {})", name, ty.literal()))
                    .collect();
                format!("Type::object([{}])", inner.join(", "))
            }
        }
    }

    /// Finds a single type that every given type can convert to.
    ///
    /// Dynamic entries are ignored. Differing primitive types unify to string.
    /// Returns `None` when no such type exists.
    pub fn unify(types: &[Type]) -> Option<Type> {
        let concrete: Vec<&Type> = types.iter().filter(|ty| **ty != Type::Dynamic).collect();
        let Some(first) = concrete.first() else {
            return Some(Type::Dynamic);
        };
        if concrete.iter().all(|ty| *ty == *first) {
            return Some((*first).clone());
        }
        if concrete.iter().all(|ty| ty.is_primitive()) {
            return Some(Type::String);
        }
        None
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Number => write!(f, "number"),
            Type::String => write!(f, "string"),
            Type::Bool => write!(f, "bool"),
            Type::Dynamic => write!(f, "any"),
            Type::List(ety) => write!(f, "list({})", ety),
            Type::Set(ety) => write!(f, "set({})", ety),
            Type::Map(ety) => write!(f, "map({})", ety),
            Type::Tuple(etys) => {
                write!(f, "tuple([")?;
                for (i, ety) in etys.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", ety)?;
                }
                write!(f, "])")
            }
            Type::Object(atys) => {
                write!(f, "object({{")?;
                for (i, (name, ty)) in atys.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{} = {}", name, ty)?;
                }
                write!(f, "}})")
            }
        }
    }
}
