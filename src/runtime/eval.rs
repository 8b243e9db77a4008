//! Evaluation of parsed expressions against a [`Scope`].
//!
//! ## Unknowns and nulls
//!
//! Evaluation never needs every input to be known. Any operation whose operand
//! is unknown produces an unknown of the operation's result type, so the type
//! of an expression is available even when its value is not. Nulls are known
//! values, and most operations reject them with a diagnostic.
//!
//! ## Error Handling
//!
//! Failures are reported as [`Diagnostics`], never as panics. Sibling
//! subexpressions are all evaluated so that one pass reports every problem.
//! When evaluation fails the evaluator still returns a value: an unknown of
//! the wildcard type.

use std::collections::BTreeMap;

use tracing::trace;

use super::convert::convert;
use super::functions::{CallError, Function, FunctionTable};
use super::{Marks, Type, Value};
use crate::diagnostics::{Diagnostic, Diagnostics, Range};
use crate::syntax::{BinaryOp, Expr, ExprNode, ForExpr, Literal, ObjectItem, TemplatePart, UnaryOp};

/// Default limit on expression nesting during evaluation.
pub const DEFAULT_MAX_DEPTH: usize = 100;

/// Anything that can turn a parsed expression into a value of a requested type.
///
/// Returning `None` means the evaluator produced no value at all, which callers
/// treat as a defect in the evaluator rather than in the expression.
pub trait Evaluator {
    fn eval_expr(&self, expr: &ExprNode, want: &Type) -> (Option<Value>, Diagnostics);
}

/// Variables and functions visible to an expression.
#[derive(Debug, Clone)]
pub struct Scope {
    variables: BTreeMap<String, Value>,
    functions: FunctionTable,
    max_depth: usize,
}

impl Default for Scope {
    fn default() -> Self {
        Self::new()
    }
}

impl Scope {
    /// An empty scope with the built-in function library.
    pub fn new() -> Self {
        Self {
            variables: BTreeMap::new(),
            functions: FunctionTable::builtin(),
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    pub fn with_variable(mut self, name: impl Into<String>, value: Value) -> Self {
        self.variables.insert(name.into(), value);
        self
    }

    pub fn with_function(mut self, name: impl Into<String>, function: Function) -> Self {
        self.functions.register(name, function);
        self
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn variable(&self, name: &str) -> Option<&Value> {
        self.variables.get(name)
    }

    pub fn functions(&self) -> &FunctionTable {
        &self.functions
    }
}

impl Evaluator for Scope {
    fn eval_expr(&self, expr: &ExprNode, want: &Type) -> (Option<Value>, Diagnostics) {
        let mut context = EvaluationContext {
            scope: self,
            locals: Vec::new(),
            depth: 0,
        };
        let value = match context.eval(expr) {
            Ok(value) => value,
            Err(diags) => {
                trace!(count = diags.len(), "evaluation reported diagnostics");
                return (Some(Value::unknown(Type::Dynamic)), diags);
            }
        };
        match convert(value, want) {
            Ok(value) => (Some(value), Diagnostics::new()),
            Err(msg) => (
                Some(Value::unknown(Type::Dynamic)),
                error(
                    "Incorrect value type",
                    format!("Invalid expression value: {}.", msg),
                    &expr.range,
                ),
            ),
        }
    }
}

// ===================================================================================================
// CORE DATA STRUCTURES: Evaluation Context
// ===================================================================================================

type EvalResult = Result<Value, Diagnostics>;

/// State for a single evaluation.
struct EvaluationContext<'a> {
    scope: &'a Scope,
    /// Iteration variables of enclosing `for` expressions, innermost last.
    locals: Vec<(String, Value)>,
    depth: usize,
}

enum ForItem {
    Skipped,
    Unknown,
    Element { key: Option<String>, value: Value },
}

impl EvaluationContext<'_> {
    fn eval(&mut self, node: &ExprNode) -> EvalResult {
        if self.depth >= self.scope.max_depth {
            return Err(error(
                "Expression too deeply nested",
                format!(
                    "Expressions may be nested at most {} levels deep.",
                    self.scope.max_depth
                ),
                &node.range,
            ));
        }
        self.depth += 1;
        let result = self.eval_node(node);
        self.depth -= 1;
        result
    }

    fn eval_node(&mut self, node: &ExprNode) -> EvalResult {
        let range = &node.range;
        match &node.value {
            Expr::Literal(Literal::Number(n)) => Ok(Value::number(*n)),
            Expr::Literal(Literal::Bool(b)) => Ok(Value::bool(*b)),
            Expr::Literal(Literal::Null) => Ok(Value::null(Type::Dynamic)),
            Expr::Template(parts) => self.eval_template(parts),
            Expr::Variable(name) => self.lookup(name, range),
            Expr::GetAttr { source, name } => {
                let source = self.eval(source)?;
                get_attr(source, name, range)
            }
            Expr::Index { source, key } => {
                let (value, key_value) = both(self.eval(source), self.eval(key))?;
                index(value, key_value, &source.range, &key.range)
            }
            Expr::Call { name, args } => self.eval_call(name, args, range),
            Expr::Tuple(items) => Ok(Value::tuple(self.eval_all(items)?)),
            Expr::Object(items) => self.eval_object(items),
            Expr::Unary { op, operand } => {
                let value = self.eval(operand)?;
                unary(*op, value, &operand.range)
            }
            Expr::Binary { .. } => self.eval_binary_chain(node),
            Expr::Conditional {
                condition,
                then_result,
                else_result,
            } => self.eval_conditional(condition, then_result, else_result),
            Expr::For(for_expr) => self.eval_for(for_expr),
            Expr::Parens(inner) => self.eval(inner),
            Expr::Invalid => Err(error(
                "Invalid expression",
                "Cannot evaluate an expression that failed to parse.",
                range,
            )),
        }
    }

    /// Evaluates a left-leaning run of binary operators such as `a + b - c`
    /// as a loop, so only the operands count against the depth limit.
    fn eval_binary_chain(&mut self, node: &ExprNode) -> EvalResult {
        let mut spine = Vec::new();
        let mut leftmost = node;
        while let Expr::Binary { op, lhs, rhs } = &leftmost.value {
            spine.push((*op, lhs.as_ref(), rhs.as_ref(), &leftmost.range));
            leftmost = lhs.as_ref();
        }

        let mut result = self.eval(leftmost);
        for (op, lhs, rhs, range) in spine.into_iter().rev() {
            result = both(result, self.eval(rhs))
                .and_then(|(l, r)| binary(op, l, r, &lhs.range, &rhs.range, range));
        }
        result
    }

    /// Evaluates every node, collecting all diagnostics before failing.
    fn eval_all(&mut self, nodes: &[ExprNode]) -> Result<Vec<Value>, Diagnostics> {
        let mut values = Vec::with_capacity(nodes.len());
        let mut diags = Diagnostics::new();
        for node in nodes {
            match self.eval(node) {
                Ok(value) => values.push(value),
                Err(d) => diags.append(d),
            }
        }
        if diags.is_empty() {
            Ok(values)
        } else {
            Err(diags)
        }
    }

    fn lookup(&self, name: &str, range: &Range) -> EvalResult {
        if let Some((_, value)) = self.locals.iter().rev().find(|(local, _)| local == name) {
            return Ok(value.clone());
        }
        self.scope.variables.get(name).cloned().ok_or_else(|| {
            error(
                "Unknown variable",
                format!("There is no variable named \"{}\".", name),
                range,
            )
        })
    }

    fn eval_template(&mut self, parts: &[TemplatePart]) -> EvalResult {
        // A lone interpolation yields the interpolated value unchanged.
        if let [TemplatePart::Interpolation(inner)] = parts {
            return self.eval(inner);
        }

        let mut text = String::new();
        let mut marks = Marks::new();
        let mut unknown = false;
        let mut diags = Diagnostics::new();
        for part in parts {
            let inner = match part {
                TemplatePart::Literal(literal) => {
                    text.push_str(literal);
                    continue;
                }
                TemplatePart::Interpolation(inner) => inner,
            };
            let value = match self.eval(inner) {
                Ok(value) => value,
                Err(d) => {
                    diags.append(d);
                    continue;
                }
            };
            let (value, value_marks) = value.unmark();
            marks.extend(value_marks);
            if value.is_null() {
                diags.push(
                    Diagnostic::error(
                        "Invalid template interpolation value",
                        "The expression result is null. Cannot include a null value in a string template.",
                    )
                    .with_subject(inner.range.clone()),
                );
                continue;
            }
            match convert(value, &Type::String) {
                Ok(converted) => match converted.as_str() {
                    Some(s) => text.push_str(s),
                    None => unknown = true,
                },
                Err(msg) => diags.push(
                    Diagnostic::error(
                        "Invalid template interpolation value",
                        format!("Cannot include the given value in a string template: {}.", msg),
                    )
                    .with_subject(inner.range.clone()),
                ),
            }
        }

        if !diags.is_empty() {
            return Err(diags);
        }
        let result = if unknown {
            Value::unknown(Type::String)
        } else {
            Value::string(text)
        };
        Ok(result.with_marks(&marks))
    }

    fn eval_call(&mut self, name: &str, args: &[ExprNode], range: &Range) -> EvalResult {
        if self.scope.functions.get(name).is_none() {
            return Err(error(
                "Call to unknown function",
                format!("There is no function named \"{}\".", name),
                range,
            ));
        }
        let values = self.eval_all(args)?;
        self.scope.functions.call(name, values).map_err(|err| {
            let (summary, detail) = match err {
                CallError::UnknownFunction => (
                    "Call to unknown function",
                    format!("There is no function named \"{}\".", name),
                ),
                CallError::NotEnoughArguments { expected, got } => (
                    "Not enough function arguments",
                    format!(
                        "Function \"{}\" expects {} argument(s), but got {}.",
                        name, expected, got
                    ),
                ),
                CallError::TooManyArguments { expected, got } => (
                    "Too many function arguments",
                    format!(
                        "Function \"{}\" expects at most {} argument(s), but got {}.",
                        name, expected, got
                    ),
                ),
                CallError::Failed(msg) => (
                    "Invalid function argument",
                    format!("Invalid value for \"{}\" call: {}.", name, msg),
                ),
            };
            error(summary, detail, range)
        })
    }

    fn eval_object(&mut self, items: &[ObjectItem]) -> EvalResult {
        let mut attributes = BTreeMap::new();
        let mut marks = Marks::new();
        let mut unknown = false;
        let mut diags = Diagnostics::new();
        for item in items {
            let (key, value) = match both(self.eval(&item.key), self.eval(&item.value)) {
                Ok(pair) => pair,
                Err(d) => {
                    diags.append(d);
                    continue;
                }
            };
            let (key, key_marks) = key.unmark();
            let (value, value_marks) = value.unmark();
            marks.extend(key_marks);
            marks.extend(value_marks);
            match string_key(key, &item.key.range, "Key expression in object constructor") {
                Ok(Some(key)) => {
                    attributes.insert(key, value);
                }
                Ok(None) => unknown = true,
                Err(d) => diags.append(d),
            }
        }

        if !diags.is_empty() {
            return Err(diags);
        }
        let result = if unknown {
            Value::unknown(Type::Dynamic)
        } else {
            Value::object(attributes)
        };
        Ok(result.with_marks(&marks))
    }

    fn eval_conditional(
        &mut self,
        condition: &ExprNode,
        then_result: &ExprNode,
        else_result: &ExprNode,
    ) -> EvalResult {
        let cond = self.eval(condition);
        let results = both(self.eval(then_result), self.eval(else_result));
        let (cond, (then_value, else_value)) = both(cond, results)?;

        let (cond, cond_marks) = cond.unmark();
        let unified = Type::unify(&[then_value.ty().clone(), else_value.ty().clone()])
            .ok_or_else(|| {
                error(
                    "Inconsistent conditional result types",
                    format!(
                        "The true and false result expressions must have consistent types. \
                         The 'true' value is {}, but the 'false' value is {}.",
                        then_value.ty().friendly_name(),
                        else_value.ty().friendly_name()
                    ),
                    &then_result.range.to(&else_result.range),
                )
            })?;

        if cond.is_null() {
            return Err(error(
                "Null condition",
                "The condition value is null. Conditions must either be true or false.",
                &condition.range,
            ));
        }
        let cond = convert(cond, &Type::Bool).map_err(|msg| {
            error(
                "Incorrect condition type",
                format!("The condition expression must be of type bool: {}.", msg),
                &condition.range,
            )
        })?;

        let (chosen, chosen_range) = match cond.as_bool() {
            None => return Ok(Value::unknown(unified).with_marks(&cond_marks)),
            Some(true) => (then_value, &then_result.range),
            Some(false) => (else_value, &else_result.range),
        };
        convert(chosen, &unified)
            .map(|value| value.with_marks(&cond_marks))
            .map_err(|msg| {
                error(
                    "Inconsistent conditional result types",
                    format!("The result value cannot be converted to {}: {}.", unified, msg),
                    chosen_range,
                )
            })
    }

    fn eval_for(&mut self, for_expr: &ForExpr) -> EvalResult {
        let collection_range = &for_expr.collection.range;
        let collection = self.eval(&for_expr.collection)?;
        let (collection, mut marks) = collection.unmark();
        if collection.is_null() {
            return Err(error(
                "Iteration over null value",
                "A null value cannot be used as the collection in a 'for' expression.",
                collection_range,
            ));
        }

        let entries: Vec<(Value, Value)> = match collection.ty() {
            Type::List(_) | Type::Tuple(_) | Type::Set(_) => {
                let is_set = matches!(collection.ty(), Type::Set(_));
                match collection.elements() {
                    Some(elements) => elements
                        .iter()
                        .enumerate()
                        .map(|(i, v)| {
                            let key = if is_set {
                                v.clone()
                            } else {
                                Value::number(i as f64)
                            };
                            (key, v.clone())
                        })
                        .collect(),
                    None => return Ok(Value::unknown(Type::Dynamic).with_marks(&marks)),
                }
            }
            Type::Map(_) | Type::Object(_) => match collection.attributes() {
                Some(attributes) => attributes
                    .iter()
                    .map(|(k, v)| (Value::string(k.clone()), v.clone()))
                    .collect(),
                None => return Ok(Value::unknown(Type::Dynamic).with_marks(&marks)),
            },
            Type::Dynamic => return Ok(Value::unknown(Type::Dynamic).with_marks(&marks)),
            ty => {
                return Err(error(
                    "Iteration over non-iterable value",
                    format!(
                        "A value of type {} cannot be used as the collection in a 'for' expression.",
                        ty.friendly_name()
                    ),
                    collection_range,
                ))
            }
        };

        let mut elements = Vec::new();
        let mut attributes = BTreeMap::new();
        let mut unknown = false;
        let mut diags = Diagnostics::new();
        for (key, value) in entries {
            let frame = self.locals.len();
            if let Some(key_var) = &for_expr.key_var {
                self.locals.push((key_var.clone(), key));
            }
            self.locals.push((for_expr.value_var.clone(), value));
            let item = self.eval_for_item(for_expr, &mut marks);
            self.locals.truncate(frame);

            match item {
                Err(d) => diags.append(d),
                Ok(ForItem::Skipped) => {}
                Ok(ForItem::Unknown) => unknown = true,
                Ok(ForItem::Element { key: None, value }) => elements.push(value),
                Ok(ForItem::Element {
                    key: Some(key),
                    value,
                }) => {
                    if attributes.contains_key(&key) {
                        let range = for_expr
                            .key
                            .as_ref()
                            .map_or(collection_range, |k| &k.range);
                        diags.push(
                            Diagnostic::error(
                                "Duplicate object key",
                                format!(
                                    "Two different items produced the key \"{}\" in this 'for' expression.",
                                    key
                                ),
                            )
                            .with_subject(range.clone()),
                        );
                    } else {
                        attributes.insert(key, value);
                    }
                }
            }
        }

        if !diags.is_empty() {
            return Err(diags);
        }
        let result = if unknown {
            Value::unknown(Type::Dynamic)
        } else if for_expr.key.is_some() {
            Value::object(attributes)
        } else {
            Value::tuple(elements)
        };
        Ok(result.with_marks(&marks))
    }

    fn eval_for_item(&mut self, for_expr: &ForExpr, marks: &mut Marks) -> Result<ForItem, Diagnostics> {
        if let Some(condition) = &for_expr.condition {
            let (cond, cond_marks) = self.eval(condition)?.unmark();
            marks.extend(cond_marks);
            if cond.is_null() {
                return Err(error(
                    "Condition is null",
                    "The value of the 'if' clause must not be null.",
                    &condition.range,
                ));
            }
            let cond = convert(cond, &Type::Bool).map_err(|msg| {
                error(
                    "Invalid 'for' condition",
                    format!("The 'if' clause value is invalid: {}.", msg),
                    &condition.range,
                )
            })?;
            match cond.as_bool() {
                None => return Ok(ForItem::Unknown),
                Some(false) => return Ok(ForItem::Skipped),
                Some(true) => {}
            }
        }

        let key = match &for_expr.key {
            None => None,
            Some(key_expr) => {
                let (key, key_marks) = self.eval(key_expr)?.unmark();
                marks.extend(key_marks);
                match string_key(key, &key_expr.range, "Key expression in 'for' expression")? {
                    Some(key) => Some(key),
                    None => return Ok(ForItem::Unknown),
                }
            }
        };
        let value = self.eval(&for_expr.value)?;
        Ok(ForItem::Element { key, value })
    }
}

// ===================================================================================================
// OPERATIONS
// ===================================================================================================

fn error(summary: &str, detail: impl Into<String>, range: &Range) -> Diagnostics {
    Diagnostic::error(summary, detail)
        .with_subject(range.clone())
        .into()
}

/// Combines two results, keeping the diagnostics of both sides.
fn both<A, B>(a: Result<A, Diagnostics>, b: Result<B, Diagnostics>) -> Result<(A, B), Diagnostics> {
    match (a, b) {
        (Ok(a), Ok(b)) => Ok((a, b)),
        (a, b) => {
            let mut diags = Diagnostics::new();
            if let Err(d) = a {
                diags.append(d);
            }
            if let Err(d) = b {
                diags.append(d);
            }
            Err(diags)
        }
    }
}

/// Converts an object key to a string. `Ok(None)` means the key is unknown.
fn string_key(key: Value, range: &Range, what: &str) -> Result<Option<String>, Diagnostics> {
    if key.is_null() {
        return Err(error(
            "Invalid object key",
            format!("{} must not be null.", what),
            range,
        ));
    }
    let key = convert(key, &Type::String).map_err(|msg| {
        error(
            "Incorrect key type",
            format!("Can't use this value as a key: {}.", msg),
            range,
        )
    })?;
    Ok(key.as_str().map(str::to_string))
}

fn operand(value: Value, want: &Type, side: &str, range: &Range) -> EvalResult {
    if value.is_null() {
        return Err(error(
            "Invalid operand",
            format!("Unsuitable value for {} operand: argument must not be null.", side),
            range,
        ));
    }
    convert(value, want).map_err(|msg| {
        error(
            "Invalid operand",
            format!("Unsuitable value for {} operand: {}.", side, msg),
            range,
        )
    })
}

fn unary(op: UnaryOp, value: Value, range: &Range) -> EvalResult {
    let (value, marks) = value.unmark();
    let result = match op {
        UnaryOp::Negate => match operand(value, &Type::Number, "unary", range)?.as_number() {
            Some(n) => Value::number(-n),
            None => Value::unknown(Type::Number),
        },
        UnaryOp::Not => match operand(value, &Type::Bool, "unary", range)?.as_bool() {
            Some(b) => Value::bool(!b),
            None => Value::unknown(Type::Bool),
        },
    };
    Ok(result.with_marks(&marks))
}

fn binary(
    op: BinaryOp,
    lhs: Value,
    rhs: Value,
    lhs_range: &Range,
    rhs_range: &Range,
    range: &Range,
) -> EvalResult {
    let (lhs, mut marks) = lhs.unmark();
    let (rhs, rhs_marks) = rhs.unmark();
    marks.extend(rhs_marks);

    let result = match op {
        BinaryOp::Equal | BinaryOp::NotEqual => {
            if !lhs.is_known() || !rhs.is_known() {
                Value::unknown(Type::Bool)
            } else {
                let equal = lhs.equals(&rhs);
                Value::bool(if op == BinaryOp::Equal { equal } else { !equal })
            }
        }
        BinaryOp::Or | BinaryOp::And => {
            let (l, r) = both(
                operand(lhs, &Type::Bool, "left", lhs_range),
                operand(rhs, &Type::Bool, "right", rhs_range),
            )?;
            match (l.as_bool(), r.as_bool()) {
                (Some(l), Some(r)) if op == BinaryOp::Or => Value::bool(l || r),
                (Some(l), Some(r)) => Value::bool(l && r),
                _ => Value::unknown(Type::Bool),
            }
        }
        BinaryOp::Less | BinaryOp::LessOrEqual | BinaryOp::Greater | BinaryOp::GreaterOrEqual => {
            let (l, r) = both(
                operand(lhs, &Type::Number, "left", lhs_range),
                operand(rhs, &Type::Number, "right", rhs_range),
            )?;
            match (l.as_number(), r.as_number()) {
                (Some(l), Some(r)) => Value::bool(match op {
                    BinaryOp::Less => l < r,
                    BinaryOp::LessOrEqual => l <= r,
                    BinaryOp::Greater => l > r,
                    _ => l >= r,
                }),
                _ => Value::unknown(Type::Bool),
            }
        }
        BinaryOp::Add
        | BinaryOp::Subtract
        | BinaryOp::Multiply
        | BinaryOp::Divide
        | BinaryOp::Modulo => {
            let (l, r) = both(
                operand(lhs, &Type::Number, "left", lhs_range),
                operand(rhs, &Type::Number, "right", rhs_range),
            )?;
            match (l.as_number(), r.as_number()) {
                (Some(l), Some(r)) => Value::number(arithmetic(op, l, r, range)?),
                _ => Value::unknown(Type::Number),
            }
        }
    };
    Ok(result.with_marks(&marks))
}

fn arithmetic(op: BinaryOp, l: f64, r: f64, range: &Range) -> Result<f64, Diagnostics> {
    if matches!(op, BinaryOp::Divide | BinaryOp::Modulo) && r == 0.0 {
        return Err(error("Division by zero", "Cannot divide by zero.", range));
    }
    let n = match op {
        BinaryOp::Add => l + r,
        BinaryOp::Subtract => l - r,
        BinaryOp::Multiply => l * r,
        BinaryOp::Divide => l / r,
        _ => l % r,
    };
    if !n.is_finite() {
        return Err(error(
            "Arithmetic overflow",
            "The result of this operation is too large to represent.",
            range,
        ));
    }
    Ok(n)
}

fn get_attr(source: Value, name: &str, range: &Range) -> EvalResult {
    let (source, marks) = source.unmark();
    if source.is_null() {
        return Err(error(
            "Attempt to get attribute from null value",
            "This value is null, so it does not have any attributes.",
            range,
        ));
    }
    let result = match source.ty() {
        Type::Object(attribute_types) => {
            let Some(attribute_type) = attribute_types.get(name) else {
                return Err(error(
                    "Unsupported attribute",
                    format!("This object does not have an attribute named \"{}\".", name),
                    range,
                ));
            };
            match source.attributes().and_then(|a| a.get(name)) {
                Some(value) => value.clone(),
                None => Value::unknown(attribute_type.clone()),
            }
        }
        Type::Map(element_type) => match source.attributes() {
            None => Value::unknown((**element_type).clone()),
            Some(entries) => entries.get(name).cloned().ok_or_else(|| {
                error(
                    "Missing map element",
                    format!("This map does not have an element with the key \"{}\".", name),
                    range,
                )
            })?,
        },
        Type::Dynamic => Value::unknown(Type::Dynamic),
        ty => {
            return Err(error(
                "Unsupported attribute",
                format!("Can't access attributes on a value of type {}.", ty.friendly_name()),
                range,
            ))
        }
    };
    Ok(result.with_marks(&marks))
}

const NO_SUCH_ELEMENT: &str = "The given key does not identify an element in this collection value.";

/// Converts an index key to a position. `Ok(None)` means the key is unknown.
fn position_key(key: Value, range: &Range) -> Result<Option<usize>, Diagnostics> {
    let key = convert(key, &Type::Number).map_err(|msg| {
        error(
            "Invalid index",
            format!("{} A number is required: {}.", NO_SUCH_ELEMENT, msg),
            range,
        )
    })?;
    match key.as_number() {
        None => Ok(None),
        Some(n) if n >= 0.0 && n.fract() == 0.0 => Ok(Some(n as usize)),
        Some(_) => Err(error("Invalid index", NO_SUCH_ELEMENT, range)),
    }
}

fn index(source: Value, key: Value, source_range: &Range, key_range: &Range) -> EvalResult {
    let (source, mut marks) = source.unmark();
    let (key, key_marks) = key.unmark();
    marks.extend(key_marks);

    if source.is_null() {
        return Err(error(
            "Attempt to index null value",
            "This value is null, so it does not have any indices.",
            source_range,
        ));
    }
    if key.is_null() {
        return Err(error(
            "Invalid index",
            "Can't use a null value as an indexing key.",
            key_range,
        ));
    }

    let result = match source.ty() {
        Type::List(element_type) => match position_key(key, key_range)? {
            None => Value::unknown((**element_type).clone()),
            Some(i) => match source.elements() {
                None => Value::unknown((**element_type).clone()),
                Some(elements) => elements
                    .get(i)
                    .cloned()
                    .ok_or_else(|| error("Invalid index", NO_SUCH_ELEMENT, key_range))?,
            },
        },
        Type::Tuple(element_types) => match position_key(key, key_range)? {
            None => Value::unknown(Type::Dynamic),
            Some(i) => {
                let element_type = element_types
                    .get(i)
                    .ok_or_else(|| error("Invalid index", NO_SUCH_ELEMENT, key_range))?;
                match source.elements().and_then(|e| e.get(i)) {
                    Some(value) => value.clone(),
                    None => Value::unknown(element_type.clone()),
                }
            }
        },
        Type::Map(element_type) => match string_key(key, key_range, "Index key")? {
            None => Value::unknown((**element_type).clone()),
            Some(k) => match source.attributes() {
                None => Value::unknown((**element_type).clone()),
                Some(entries) => entries
                    .get(&k)
                    .cloned()
                    .ok_or_else(|| error("Invalid index", NO_SUCH_ELEMENT, key_range))?,
            },
        },
        Type::Object(attribute_types) => match string_key(key, key_range, "Index key")? {
            None => Value::unknown(Type::Dynamic),
            Some(k) => {
                let attribute_type = attribute_types
                    .get(&k)
                    .ok_or_else(|| error("Invalid index", NO_SUCH_ELEMENT, key_range))?;
                match source.attributes().and_then(|a| a.get(&k)) {
                    Some(value) => value.clone(),
                    None => Value::unknown(attribute_type.clone()),
                }
            }
        },
        Type::Set(_) => {
            return Err(error(
                "Invalid index",
                "Elements of a set are identified only by their value and don't have any \
                 separate index or key to select with, so it is only possible to perform \
                 operations across all elements of the set.",
                source_range,
            ))
        }
        Type::Dynamic => Value::unknown(Type::Dynamic),
        Type::Number | Type::String | Type::Bool => {
            return Err(error(
                "Invalid index",
                "This value does not have any indices.",
                source_range,
            ))
        }
    };
    Ok(result.with_marks(&marks))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::Pos;
    use crate::runtime::Mark;
    use crate::syntax::parse_expression;

    fn eval_with(scope: &Scope, src: &str) -> (Value, Diagnostics) {
        let (expr, diags) = parse_expression(src.as_bytes(), "", Pos::INITIAL);
        assert!(diags.is_empty(), "parse failed: {:?}", diags);
        let (value, diags) = scope.eval_expr(&expr, &Type::Dynamic);
        (value.expect("scope always returns a value"), diags)
    }

    fn eval(src: &str) -> Value {
        let (value, diags) = eval_with(&Scope::new(), src);
        assert!(diags.is_empty(), "unexpected diagnostics: {:?}", diags);
        value
    }

    fn eval_err(src: &str) -> Diagnostics {
        let (value, diags) = eval_with(&Scope::new(), src);
        assert!(!value.is_known());
        assert!(diags.has_errors());
        diags
    }

    #[test]
    fn arithmetic_and_precedence() {
        assert_eq!(eval("1 + 2 * 3").as_number(), Some(7.0));
        assert_eq!(eval("(1 + 2) * 3").as_number(), Some(9.0));
        assert_eq!(eval("7 % 4").as_number(), Some(3.0));
        assert_eq!(eval("\"2\" + 1").as_number(), Some(3.0));
    }

    #[test]
    fn division_by_zero_is_a_diagnostic() {
        let diags = eval_err("1 / 0");
        assert_eq!(diags.iter().next().unwrap().summary, "Division by zero");
    }

    #[test]
    fn sibling_errors_are_all_reported() {
        let diags = eval_err("[a, b]");
        assert_eq!(diags.len(), 2);
    }

    #[test]
    fn unknown_operands_propagate() {
        let scope = Scope::new().with_variable("x", Value::unknown(Type::Number));
        let (value, diags) = eval_with(&scope, "x + 1");
        assert!(diags.is_empty());
        assert!(!value.is_known());
        assert_eq!(value.ty(), &Type::Number);

        let (value, _) = eval_with(&scope, "x > 1 ? \"a\" : \"b\"");
        assert!(!value.is_known());
        assert_eq!(value.ty(), &Type::String);
    }

    #[test]
    fn null_operand_is_rejected() {
        let diags = eval_err("null + 1");
        assert_eq!(diags.iter().next().unwrap().summary, "Invalid operand");
    }

    #[test]
    fn templates_interpolate_and_unwrap() {
        assert_eq!(eval("\"a${1 + 1}b\"").as_str(), Some("a2b"));
        assert_eq!(eval("\"${1}\"").as_number(), Some(1.0));
        let diags = eval_err("\"x${null}\"");
        assert_eq!(
            diags.iter().next().unwrap().summary,
            "Invalid template interpolation value"
        );
    }

    #[test]
    fn traversals() {
        assert_eq!(eval("{a = [1, 2]}.a[1]").as_number(), Some(2.0));
        assert_eq!(eval("{\"k\" = 3}[\"k\"]").as_number(), Some(3.0));
        let diags = eval_err("[1][5]");
        assert_eq!(diags.iter().next().unwrap().summary, "Invalid index");
    }

    #[test]
    fn for_expressions() {
        let v = eval("[for x in [1, 2, 3] : x * 2 if x > 1]");
        let doubled: Vec<_> = v.elements().unwrap().iter().map(|e| e.as_number()).collect();
        assert_eq!(doubled, vec![Some(4.0), Some(6.0)]);

        let v = eval("{for k, v in {a = 1, b = 2} : upper(k) => v}");
        assert_eq!(
            v.ty(),
            &Type::object([("A", Type::Number), ("B", Type::Number)])
        );
    }

    #[test]
    fn sensitive_marks_survive_operations() {
        let v = eval("sensitive(1) + 1");
        assert!(v.has_mark(Mark::Sensitive));
        let v = eval("[sensitive(\"a\"), \"b\"]");
        assert!(v.has_mark(Mark::Sensitive));
    }

    #[test]
    fn depth_limit_is_a_diagnostic() {
        let scope = Scope::new().with_max_depth(3);
        let (_, diags) = eval_with(&scope, "((((1))))");
        assert_eq!(
            diags.iter().next().unwrap().summary,
            "Expression too deeply nested"
        );
    }

    #[test]
    fn long_operator_chain_is_not_nesting() {
        let scope = Scope::new().with_max_depth(5);
        let src = vec!["1"; 500].join(" + ");
        let (value, diags) = eval_with(&scope, &src);
        assert!(diags.is_empty(), "{:?}", diags);
        assert_eq!(value.as_number(), Some(500.0));

        let (value, diags) = eval_with(&scope, "10 - 2 * 3 - 1 + x");
        assert!(!value.is_known());
        let summaries: Vec<_> = diags.iter().map(|d| d.summary.as_str()).collect();
        assert_eq!(summaries, ["Unknown variable"]);
    }

    #[test]
    fn requested_type_mismatch() {
        let (expr, _) = parse_expression(b"\"abc\"", "", Pos::INITIAL);
        let (value, diags) = Scope::new().eval_expr(&expr, &Type::Number);
        assert!(!value.unwrap().is_known());
        assert_eq!(diags.iter().next().unwrap().summary, "Incorrect value type");
    }
}
