//! Type constraint syntax: `number`, `list(string)`, `object({name = string})`.
//!
//! Used wherever a type is written down by hand, such as YAML regression
//! suites and CLI flags.

use pest::iterators::Pair;
use pest::Parser;
use thiserror::Error;

use super::parser::{ExpressionParser, Rule};
use crate::runtime::Type;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid type constraint {source_text:?} at offset {offset}: {message}")]
pub struct TypeSyntaxError {
    pub source_text: String,
    pub offset: usize,
    pub message: String,
}

/// Parses a type constraint.
pub fn parse_type(src: &str) -> Result<Type, TypeSyntaxError> {
    let mut pairs = ExpressionParser::parse(Rule::type_expression, src).map_err(|err| {
        let offset = match err.location {
            pest::error::InputLocation::Pos(pos) => pos,
            pest::error::InputLocation::Span((start, _)) => start,
        };
        TypeSyntaxError {
            source_text: src.to_string(),
            offset,
            message: "expected a type such as number, list(string), or object({a = bool})"
                .to_string(),
        }
    })?;
    let root = pairs.next().and_then(|p| p.into_inner().next());
    match root {
        Some(pair) => build_type(pair, src),
        None => Err(malformed(src, 0)),
    }
}

fn build_type(pair: Pair<Rule>, src: &str) -> Result<Type, TypeSyntaxError> {
    let offset = pair.as_span().start();
    match pair.as_rule() {
        Rule::type_expr => {
            let inner = pair.into_inner().next().ok_or_else(|| malformed(src, offset))?;
            build_type(inner, src)
        }
        Rule::primitive_type => Ok(match pair.as_str() {
            "number" => Type::Number,
            "string" => Type::String,
            "bool" => Type::Bool,
            _ => Type::Dynamic,
        }),
        Rule::collection_type => {
            let mut inner = pair.into_inner();
            let kind = inner.next().ok_or_else(|| malformed(src, offset))?;
            let element = inner.next().ok_or_else(|| malformed(src, offset))?;
            let element = build_type(element, src)?;
            Ok(match kind.as_str() {
                "list" => Type::list(element),
                "set" => Type::set(element),
                _ => Type::map(element),
            })
        }
        Rule::tuple_type => {
            let elements = pair
                .into_inner()
                .map(|p| build_type(p, src))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Type::tuple(elements))
        }
        Rule::object_type => {
            let mut attributes = Vec::new();
            for attr in pair.into_inner() {
                let attr_offset = attr.as_span().start();
                let mut parts = attr.into_inner();
                let name = parts.next().ok_or_else(|| malformed(src, attr_offset))?;
                let ty = parts.next().ok_or_else(|| malformed(src, attr_offset))?;
                attributes.push((name.as_str().to_string(), build_type(ty, src)?));
            }
            Ok(Type::object(attributes))
        }
        _ => Err(malformed(src, offset)),
    }
}

fn malformed(src: &str, offset: usize) -> TypeSyntaxError {
    TypeSyntaxError {
        source_text: src.to_string(),
        offset,
        message: "malformed type constraint".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_primitives_and_any() {
        assert_eq!(parse_type("number"), Ok(Type::Number));
        assert_eq!(parse_type(" bool "), Ok(Type::Bool));
        assert_eq!(parse_type("any"), Ok(Type::Dynamic));
    }

    #[test]
    fn parses_nested_structures() {
        assert_eq!(
            parse_type("map(list(string))"),
            Ok(Type::map(Type::list(Type::String)))
        );
        assert_eq!(
            parse_type("tuple([number, set(bool)])"),
            Ok(Type::tuple(vec![Type::Number, Type::set(Type::Bool)]))
        );
        assert_eq!(
            parse_type("object({name = string, age = number})"),
            Ok(Type::object([("name", Type::String), ("age", Type::Number)]))
        );
        assert_eq!(parse_type("tuple([])"), Ok(Type::empty_tuple()));
    }

    #[test]
    fn display_round_trips_through_parser() {
        let ty = Type::object([("a", Type::list(Type::Dynamic))]);
        assert_eq!(parse_type(&ty.to_string()), Ok(ty));
    }

    #[test]
    fn rejects_unknown_names() {
        let err = parse_type("numbr").unwrap_err();
        assert_eq!(err.offset, 0);
        assert!(parse_type("list(number").is_err());
    }
}
