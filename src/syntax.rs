//! Syntax module for the expression language
//!
//! This module provides the Abstract Syntax Tree types for parsed expressions,
//! with a source [`Range`] on every node.

use std::fmt;

use crate::diagnostics::Range;

pub mod parser;
pub mod typeexpr;

pub use parser::parse_expression;
pub use typeexpr::{parse_type, TypeSyntaxError};

/// Wrapper for carrying a source range with any value.
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned<T> {
    pub value: T,
    pub range: Range,
}

/// A parsed expression node.
pub type ExprNode = Spanned<Expr>;

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Literal),
    /// A quoted string, possibly with `${ ... }` interpolations.
    Template(Vec<TemplatePart>),
    Variable(String),
    GetAttr {
        source: Box<ExprNode>,
        name: String,
    },
    Index {
        source: Box<ExprNode>,
        key: Box<ExprNode>,
    },
    Call {
        name: String,
        args: Vec<ExprNode>,
    },
    Tuple(Vec<ExprNode>),
    Object(Vec<ObjectItem>),
    Unary {
        op: UnaryOp,
        operand: Box<ExprNode>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<ExprNode>,
        rhs: Box<ExprNode>,
    },
    Conditional {
        condition: Box<ExprNode>,
        then_result: Box<ExprNode>,
        else_result: Box<ExprNode>,
    },
    For(Box<ForExpr>),
    Parens(Box<ExprNode>),
    /// Placeholder produced when parsing fails.
    Invalid,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Number(f64),
    Bool(bool),
    Null,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TemplatePart {
    Literal(String),
    Interpolation(ExprNode),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ObjectItem {
    pub key: ExprNode,
    pub value: ExprNode,
}

/// `[for k, v in coll : value if cond]` or `{for k, v in coll : key => value if cond}`.
#[derive(Debug, Clone, PartialEq)]
pub struct ForExpr {
    pub key_var: Option<String>,
    pub value_var: String,
    pub collection: ExprNode,
    /// Present only for the object form.
    pub key: Option<ExprNode>,
    pub value: ExprNode,
    pub condition: Option<ExprNode>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Negate,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Or,
    And,
    Equal,
    NotEqual,
    Less,
    LessOrEqual,
    Greater,
    GreaterOrEqual,
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Or => "||",
            BinaryOp::And => "&&",
            BinaryOp::Equal => "==",
            BinaryOp::NotEqual => "!=",
            BinaryOp::Less => "<",
            BinaryOp::LessOrEqual => "<=",
            BinaryOp::Greater => ">",
            BinaryOp::GreaterOrEqual => ">=",
            BinaryOp::Add => "+",
            BinaryOp::Subtract => "-",
            BinaryOp::Multiply => "*",
            BinaryOp::Divide => "/",
            BinaryOp::Modulo => "%",
        }
    }

    pub(crate) fn from_symbol(symbol: &str) -> Option<BinaryOp> {
        Some(match symbol {
            "||" => BinaryOp::Or,
            "&&" => BinaryOp::And,
            "==" => BinaryOp::Equal,
            "!=" => BinaryOp::NotEqual,
            "<" => BinaryOp::Less,
            "<=" => BinaryOp::LessOrEqual,
            ">" => BinaryOp::Greater,
            ">=" => BinaryOp::GreaterOrEqual,
            "+" => BinaryOp::Add,
            "-" => BinaryOp::Subtract,
            "*" => BinaryOp::Multiply,
            "/" => BinaryOp::Divide,
            "%" => BinaryOp::Modulo,
            _ => return None,
        })
    }
}

impl Expr {
    /// Pretty-prints the expression in source syntax.
    pub fn pretty(&self) -> String {
        match self {
            Expr::Literal(Literal::Number(n)) => crate::runtime::format_number(*n),
            Expr::Literal(Literal::Bool(b)) => b.to_string(),
            Expr::Literal(Literal::Null) => "null".into(),
            Expr::Template(parts) => {
                let mut s = String::from("\"");
                for part in parts {
                    match part {
                        TemplatePart::Literal(text) => s.push_str(&escape_template(text)),
                        TemplatePart::Interpolation(expr) => {
                            s.push_str("${");
                            s.push_str(&expr.value.pretty());
                            s.push('}');
                        }
                    }
                }
                s.push('"');
                s
            }
            Expr::Variable(name) => name.clone(),
            Expr::GetAttr { source, name } => format!("{}.{}", source.value.pretty(), name),
            Expr::Index { source, key } => {
                format!("{}[{}]", source.value.pretty(), key.value.pretty())
            }
            Expr::Call { name, args } => format!("{}({})", name, pretty_list(args)),
            Expr::Tuple(items) => format!("[{}]", pretty_list(items)),
            Expr::Object(items) => {
                let inner: Vec<_> = items
                    .iter()
                    .map(|item| format!("{} = {}", item.key.value.pretty(), item.value.value.pretty()))
                    .collect();
                format!("{{{}}}", inner.join(", "))
            }
            Expr::Unary { op, operand } => {
                let symbol = match op {
                    UnaryOp::Negate => "-",
                    UnaryOp::Not => "!",
                };
                format!("{}{}", symbol, operand.value.pretty())
            }
            Expr::Binary { op, lhs, rhs } => format!(
                "{} {} {}",
                lhs.value.pretty(),
                op.symbol(),
                rhs.value.pretty()
            ),
            Expr::Conditional {
                condition,
                then_result,
                else_result,
            } => format!(
                "{} ? {} : {}",
                condition.value.pretty(),
                then_result.value.pretty(),
                else_result.value.pretty()
            ),
            Expr::For(for_expr) => for_expr.pretty(),
            Expr::Parens(inner) => format!("({})", inner.value.pretty()),
            Expr::Invalid => "<invalid>".into(),
        }
    }
}

impl ForExpr {
    fn pretty(&self) -> String {
        let vars = match &self.key_var {
            Some(key_var) => format!("{}, {}", key_var, self.value_var),
            None => self.value_var.clone(),
        };
        let cond = self
            .condition
            .as_ref()
            .map(|c| format!(" if {}", c.value.pretty()))
            .unwrap_or_default();
        match &self.key {
            Some(key) => format!(
                "{{for {} in {} : {} => {}{}}}",
                vars,
                self.collection.value.pretty(),
                key.value.pretty(),
                self.value.value.pretty(),
                cond
            ),
            None => format!(
                "[for {} in {} : {}{}]",
                vars,
                self.collection.value.pretty(),
                self.value.value.pretty(),
                cond
            ),
        }
    }
}

fn pretty_list(items: &[ExprNode]) -> String {
    items
        .iter()
        .map(|e| e.value.pretty())
        .collect::<Vec<_>>()
        .join(", ")
}

fn escape_template(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            '$' if chars.peek() == Some(&'{') => out.push_str("$$"),
            other => out.push(other),
        }
    }
    out
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.pretty())
    }
}
