//! Expression parser
//!
//! Converts expression source bytes into an [`ExprNode`] tree with source
//! ranges. This parser is purely syntactic: no name resolution or type
//! checking happens here.
//!
//! Failures never abort the caller. A source that cannot be parsed yields an
//! [`Expr::Invalid`] placeholder together with error diagnostics. That
//! includes sources nested too deeply to parse or evaluate safely: brackets,
//! interpolations and conditionals are limited to [`MAX_NESTING`] levels, and
//! the finished tree to [`MAX_DEPTH`] levels.

use pest::error::{Error, ErrorVariant, InputLocation};
use pest::iterators::Pair;
use pest::Parser;
use pest_derive::Parser;
use unicode_segmentation::UnicodeSegmentation;

use crate::diagnostics::{Diagnostic, Diagnostics, Pos, Range};
use crate::syntax::{
    BinaryOp, Expr, ExprNode, ForExpr, Literal, ObjectItem, Spanned, TemplatePart, UnaryOp,
};

#[derive(Parser)]
#[grammar = "syntax/grammar.pest"]
pub(crate) struct ExpressionParser;

/// Limit on brackets, template interpolations and conditionals enclosing any
/// point of the source.
pub const MAX_NESTING: usize = 64;

/// Limit on the depth of the syntax tree. Each operator of a chain such as
/// `a + b + c` and each prefix operator adds one level.
pub const MAX_DEPTH: usize = 1000;

// ============================================================================
// PUBLIC API
// ============================================================================

/// Parse a standalone expression.
///
/// `filename` and `start` only affect the ranges reported on nodes and
/// diagnostics; `start` is the position of the first byte of `src`.
pub fn parse_expression(src: &[u8], filename: &str, start: Pos) -> (ExprNode, Diagnostics) {
    let text = match std::str::from_utf8(src) {
        Ok(text) => text,
        Err(err) => {
            let valid = std::str::from_utf8(&src[..err.valid_up_to()]).unwrap_or_default();
            let at = start.advance(valid);
            let range = Range::new(filename, at, at);
            let diag = Diagnostic::error(
                "Invalid UTF-8",
                format!(
                    "The expression source contains an invalid UTF-8 sequence at byte {}.",
                    err.valid_up_to()
                ),
            )
            .with_subject(range.clone());
            return (invalid(range), diag.into());
        }
    };

    let locator = Locator::new(filename, text, start);

    if is_blank(text) {
        let range = locator.range(0, text.len());
        let diag = Diagnostic::error(
            "Missing expression",
            "Expected the start of an expression, but found the end of the input.",
        )
        .with_subject(range.clone());
        return (invalid(range), diag.into());
    }

    if let Some(offset) = nesting_overflow(text) {
        let diag = Diagnostic::error(
            "Expression too deeply nested",
            format!(
                "Brackets, interpolations and conditionals may be nested at most {} levels deep.",
                MAX_NESTING
            ),
        )
        .with_subject(locator.range(offset, offset + 1));
        return (invalid(locator.range(0, text.len())), diag.into());
    }

    let mut pairs = match ExpressionParser::parse(Rule::expression, text) {
        Ok(pairs) => pairs,
        Err(err) => {
            let diag = convert_parse_error(err, &locator);
            return (invalid(locator.range(0, text.len())), diag.into());
        }
    };

    // The grammar guarantees `expression` wraps exactly one `expr` before EOI.
    let Some(expr) = pairs.next().and_then(|root| root.into_inner().next()) else {
        return (
            invalid(locator.range(0, text.len())),
            Diagnostic::error("Invalid expression", "The parser produced no expression.").into(),
        );
    };

    match build(expr, &locator, 0) {
        Ok(node) => (node, Diagnostics::new()),
        Err(diag) => (invalid(locator.range(0, text.len())), diag.into()),
    }
}

// ============================================================================
// SOURCE LOCATIONS
// ============================================================================

/// Maps byte offsets within the parsed text to full source positions.
///
/// Line starts and grapheme cluster starts are indexed once, so each lookup
/// is two binary searches.
pub(crate) struct Locator<'a> {
    filename: &'a str,
    text: &'a str,
    start: Pos,
    line_starts: Vec<usize>,
    cluster_starts: Vec<usize>,
}

impl<'a> Locator<'a> {
    pub(crate) fn new(filename: &'a str, text: &'a str, start: Pos) -> Self {
        let mut line_starts = vec![0];
        line_starts.extend(text.match_indices('\n').map(|(i, _)| i + 1));
        let cluster_starts = text.grapheme_indices(true).map(|(i, _)| i).collect();
        Self {
            filename,
            text,
            start,
            line_starts,
            cluster_starts,
        }
    }

    pub(crate) fn pos(&self, offset: usize) -> Pos {
        let line_idx = match self.line_starts.binary_search(&offset) {
            Ok(idx) => idx,
            Err(idx) => idx - 1,
        };
        let line_start = self.line_starts[line_idx];
        let base_column = if line_idx == 0 { self.start.column } else { 1 };
        // A cluster cut by `offset` counts, as it would for `Pos::advance`.
        let first = self.cluster_starts.partition_point(|&c| c < line_start);
        let upto = self.cluster_starts.partition_point(|&c| c < offset);
        Pos {
            line: self.start.line + line_idx,
            column: base_column + (upto - first),
            byte: self.start.byte + offset,
        }
    }

    pub(crate) fn range(&self, start: usize, end: usize) -> Range {
        Range::new(self.filename, self.pos(start), self.pos(end))
    }

    fn pair_range(&self, pair: &Pair<Rule>) -> Range {
        let span = pair.as_span();
        self.range(span.start(), span.end())
    }
}

// ============================================================================
// AST BUILDERS
// ============================================================================

type BuildResult = Result<ExprNode, Diagnostic>;

/// Builds the node for `pair`, which will sit `depth` levels below the root.
fn build(pair: Pair<Rule>, loc: &Locator, depth: usize) -> BuildResult {
    let range = loc.pair_range(&pair);
    if depth > MAX_DEPTH {
        return Err(too_complex(&range));
    }

    match pair.as_rule() {
        Rule::expr => build(first_inner(pair), loc, depth),

        Rule::conditional => {
            let mut inner = pair.into_inner();
            let condition_pair = next_pair(&mut inner, &range)?;
            let Some(then_pair) = inner.next() else {
                return build(condition_pair, loc, depth);
            };
            let condition = build(condition_pair, loc, depth + 1)?;
            let then_result = build(then_pair, loc, depth + 1)?;
            let else_result = build(next_pair(&mut inner, &range)?, loc, depth + 1)?;
            Ok(node(
                Expr::Conditional {
                    condition: Box::new(condition),
                    then_result: Box::new(then_result),
                    else_result: Box::new(else_result),
                },
                range,
            ))
        }

        Rule::or_expr
        | Rule::and_expr
        | Rule::eq_expr
        | Rule::cmp_expr
        | Rule::add_expr
        | Rule::mul_expr => build_binary_chain(pair, loc, depth),

        Rule::unary => {
            let mut ops = Vec::new();
            let mut operand = None;
            for inner in pair.into_inner() {
                if inner.as_rule() == Rule::unary_op {
                    let op = if inner.as_str() == "-" {
                        UnaryOp::Negate
                    } else {
                        UnaryOp::Not
                    };
                    ops.push((op, loc.pair_range(&inner)));
                } else {
                    if depth + ops.len() > MAX_DEPTH {
                        return Err(too_complex(&range));
                    }
                    operand = Some(build(inner, loc, depth + ops.len())?);
                }
            }
            let mut result = operand.ok_or_else(|| malformed("unary operand", &range))?;
            for (op, op_range) in ops.into_iter().rev() {
                let range = op_range.to(&result.range);
                result = node(
                    Expr::Unary {
                        op,
                        operand: Box::new(result),
                    },
                    range,
                );
            }
            Ok(result)
        }

        Rule::postfix => {
            let mut inner = pair.into_inner();
            let base = next_pair(&mut inner, &range)?;
            let steps: Vec<_> = inner.collect();
            if depth + steps.len() > MAX_DEPTH {
                return Err(too_complex(&range));
            }
            let mut result = build(base, loc, depth + steps.len())?;
            for (level, step) in (0..steps.len()).rev().zip(steps) {
                let step_range = result.range.to(&loc.pair_range(&step));
                result = match step.as_rule() {
                    Rule::get_attr => Spanned {
                        value: Expr::GetAttr {
                            source: Box::new(result),
                            name: first_inner(step).as_str().to_string(),
                        },
                        range: step_range,
                    },
                    _ => {
                        let key = build(first_inner(step), loc, depth + level + 1)?;
                        Spanned {
                            value: Expr::Index {
                                source: Box::new(result),
                                key: Box::new(key),
                            },
                            range: step_range,
                        }
                    }
                };
            }
            Ok(result)
        }

        Rule::number => {
            let text = pair.as_str();
            let value = text.parse::<f64>().ok().filter(|n| n.is_finite()).ok_or_else(|| {
                Diagnostic::error(
                    "Invalid number literal",
                    format!("The number {} cannot be represented.", text),
                )
                .with_subject(range.clone())
            })?;
            Ok(node(Expr::Literal(Literal::Number(value)), range))
        }

        Rule::keyword_literal => {
            let literal = match pair.as_str() {
                "true" => Literal::Bool(true),
                "false" => Literal::Bool(false),
                _ => Literal::Null,
            };
            Ok(node(Expr::Literal(literal), range))
        }

        Rule::template => {
            let mut parts = Vec::new();
            for part in pair.into_inner() {
                match part.as_rule() {
                    Rule::interpolation => {
                        let expr = build(first_inner(part), loc, depth + 1)?;
                        parts.push(TemplatePart::Interpolation(expr));
                    }
                    _ => {
                        let part_range = loc.pair_range(&part);
                        let text = unescape(part.as_str(), &part_range)?;
                        parts.push(TemplatePart::Literal(text));
                    }
                }
            }
            Ok(node(Expr::Template(parts), range))
        }

        Rule::variable => Ok(node(
            Expr::Variable(first_inner(pair).as_str().to_string()),
            range,
        )),

        Rule::parens => {
            let inner = build(first_inner(pair), loc, depth + 1)?;
            Ok(node(Expr::Parens(Box::new(inner)), range))
        }

        Rule::call => {
            let mut inner = pair.into_inner();
            let name = next_pair(&mut inner, &range)?.as_str().to_string();
            let args = inner
                .map(|arg| build(arg, loc, depth + 1))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(node(Expr::Call { name, args }, range))
        }

        Rule::tuple => {
            let items = pair
                .into_inner()
                .map(|item| build(item, loc, depth + 1))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(node(Expr::Tuple(items), range))
        }

        Rule::object => {
            let mut items = Vec::new();
            for item in pair.into_inner() {
                let item_range = loc.pair_range(&item);
                let mut parts = item.into_inner();
                let key = build_object_key(next_pair(&mut parts, &item_range)?, loc, depth + 1)?;
                let value = build(next_pair(&mut parts, &item_range)?, loc, depth + 1)?;
                items.push(ObjectItem { key, value });
            }
            Ok(node(Expr::Object(items), range))
        }

        Rule::for_tuple | Rule::for_object => build_for(pair, loc, depth),

        rule => Err(malformed(&format!("unsupported rule {:?}", rule), &range)),
    }
}

/// Folds `operand (op operand)*` into a left-associative tree.
fn build_binary_chain(pair: Pair<Rule>, loc: &Locator, depth: usize) -> BuildResult {
    let range = loc.pair_range(&pair);
    let parts: Vec<_> = pair.into_inner().collect();
    let operators = parts.len() / 2;
    if depth + operators > MAX_DEPTH {
        return Err(too_complex(&range));
    }
    let mut inner = parts.into_iter();
    let mut result = build(next_pair(&mut inner, &range)?, loc, depth + operators)?;
    // The first operator is deepest; the last one becomes the root at `depth`.
    for level in (0..operators).rev() {
        let op_pair = next_pair(&mut inner, &range)?;
        let op = BinaryOp::from_symbol(op_pair.as_str())
            .ok_or_else(|| malformed("binary operator", &range))?;
        let rhs = build(next_pair(&mut inner, &range)?, loc, depth + level + 1)?;
        let range = result.range.to(&rhs.range);
        result = node(
            Expr::Binary {
                op,
                lhs: Box::new(result),
                rhs: Box::new(rhs),
            },
            range,
        );
    }
    Ok(result)
}

/// Bare identifiers used as object keys are literal strings, not variables.
fn build_object_key(pair: Pair<Rule>, loc: &Locator, depth: usize) -> BuildResult {
    let key = first_inner(pair);
    if key.as_rule() == Rule::identifier {
        let range = loc.pair_range(&key);
        let name = key.as_str().to_string();
        return Ok(node(
            Expr::Template(vec![TemplatePart::Literal(name)]),
            range,
        ));
    }
    build(key, loc, depth)
}

fn build_for(pair: Pair<Rule>, loc: &Locator, depth: usize) -> BuildResult {
    let range = loc.pair_range(&pair);
    let is_object = pair.as_rule() == Rule::for_object;
    let mut inner = pair.into_inner();

    let intro = next_pair(&mut inner, &range)?;
    let mut names = Vec::new();
    let mut collection = None;
    for part in intro.into_inner() {
        match part.as_rule() {
            Rule::identifier => names.push(part.as_str().to_string()),
            Rule::expr => collection = Some(build(part, loc, depth + 1)?),
            _ => {}
        }
    }
    let collection = collection.ok_or_else(|| malformed("for collection", &range))?;
    let (key_var, value_var) = match names.len() {
        1 => (None, names.remove(0)),
        2 => {
            let value_var = names.remove(1);
            (Some(names.remove(0)), value_var)
        }
        _ => return Err(malformed("for iterator variables", &range)),
    };

    let first = build(next_pair(&mut inner, &range)?, loc, depth + 1)?;
    let (key, value) = if is_object {
        let value = build(next_pair(&mut inner, &range)?, loc, depth + 1)?;
        (Some(first), value)
    } else {
        (None, first)
    };

    let condition = match inner.next() {
        Some(cond) => Some(build(last_inner(cond, &range)?, loc, depth + 1)?),
        None => None,
    };

    Ok(node(
        Expr::For(Box::new(ForExpr {
            key_var,
            value_var,
            collection,
            key,
            value,
            condition,
        })),
        range,
    ))
}

// ============================================================================
// AST CONSTRUCTORS AND UTILITIES
// ============================================================================

fn node(value: Expr, range: Range) -> ExprNode {
    Spanned { value, range }
}

fn invalid(range: Range) -> ExprNode {
    node(Expr::Invalid, range)
}

fn is_blank(text: &str) -> bool {
    text.chars().all(char::is_whitespace)
}

// The grammar guarantees these inner pairs exist; a missing one means the
// grammar and the builder disagree, which is reported rather than unwrapped.
fn first_inner(pair: Pair<Rule>) -> Pair<Rule> {
    let fallback = pair.clone();
    pair.into_inner().next().unwrap_or(fallback)
}

fn last_inner<'i>(pair: Pair<'i, Rule>, range: &Range) -> Result<Pair<'i, Rule>, Diagnostic> {
    pair.into_inner()
        .last()
        .ok_or_else(|| malformed("for condition", range))
}

fn next_pair<'i>(
    inner: &mut impl Iterator<Item = Pair<'i, Rule>>,
    range: &Range,
) -> Result<Pair<'i, Rule>, Diagnostic> {
    inner.next().ok_or_else(|| malformed("expression", range))
}

fn malformed(what: &str, range: &Range) -> Diagnostic {
    Diagnostic::error(
        "Invalid expression",
        format!("Malformed {} in parse tree.", what),
    )
    .with_subject(range.clone())
}

fn too_complex(range: &Range) -> Diagnostic {
    Diagnostic::error(
        "Expression too complex",
        format!(
            "The expression would be more than {} levels deep. Each operator in a chain and each prefix operator adds a level.",
            MAX_DEPTH
        ),
    )
    .with_subject(range.clone())
}

/// Returns the byte offset where brackets, template interpolations and
/// conditionals first nest deeper than [`MAX_NESTING`].
///
/// The grammar descends recursively through these constructs, so this runs
/// before pest sees the text. A conditional counts until the enclosing
/// bracket closes or the next comma. Template text and comments are skipped.
fn nesting_overflow(text: &str) -> Option<usize> {
    enum Frame {
        Open(usize),
        Template,
    }

    let bytes = text.as_bytes();
    let mut stack: Vec<Frame> = Vec::new();
    let mut depth = 0;
    let mut i = 0;
    while i < bytes.len() {
        let next = bytes.get(i + 1).copied();
        if let Some(Frame::Template) = stack.last() {
            match bytes[i] {
                b'\\' => i += 1,
                b'"' => {
                    stack.pop();
                }
                b'$' if next == Some(b'$') => i += 1,
                b'$' if next == Some(b'{') => {
                    stack.push(Frame::Open(depth));
                    depth += 1;
                    i += 1;
                }
                _ => {}
            }
        } else {
            match bytes[i] {
                b'"' => stack.push(Frame::Template),
                b'(' | b'[' | b'{' => {
                    stack.push(Frame::Open(depth));
                    depth += 1;
                }
                b')' | b']' | b'}' => {
                    if let Some(Frame::Open(outer)) = stack.last() {
                        depth = *outer;
                        stack.pop();
                    }
                }
                b'?' => depth += 1,
                // Conditionals in earlier list items or arguments have ended.
                b',' => {
                    depth = match stack.last() {
                        Some(Frame::Open(outer)) => outer + 1,
                        _ => 0,
                    };
                }
                b'#' => i = skip_line(bytes, i),
                b'/' if next == Some(b'/') => i = skip_line(bytes, i),
                b'/' if next == Some(b'*') => {
                    i = match text[i + 2..].find("*/") {
                        Some(end) => i + 2 + end + 1,
                        None => bytes.len(),
                    };
                }
                _ => {}
            }
        }
        if depth > MAX_NESTING {
            return Some(i);
        }
        i += 1;
    }
    None
}

/// Returns the offset of the newline ending the line that contains `i`.
fn skip_line(bytes: &[u8], i: usize) -> usize {
    bytes[i..]
        .iter()
        .position(|&b| b == b'\n')
        .map_or(bytes.len(), |n| i + n)
}

fn unescape(text: &str, range: &Range) -> Result<String, Diagnostic> {
    let mut result = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '\\' => match chars.next() {
                Some('n') => result.push('\n'),
                Some('t') => result.push('\t'),
                Some('r') => result.push('\r'),
                Some('"') => result.push('"'),
                Some('\\') => result.push('\\'),
                Some('u') => {
                    let hex: String = chars.by_ref().take(4).collect();
                    let decoded = u32::from_str_radix(&hex, 16)
                        .ok()
                        .and_then(char::from_u32)
                        .ok_or_else(|| {
                            Diagnostic::error(
                                "Invalid escape sequence",
                                format!("\\u{} is not a valid Unicode character.", hex),
                            )
                            .with_subject(range.clone())
                        })?;
                    result.push(decoded);
                }
                other => {
                    return Err(Diagnostic::error(
                        "Invalid escape sequence",
                        format!(
                            "The escape sequence \\{} is not supported.",
                            other.map(String::from).unwrap_or_default()
                        ),
                    )
                    .with_subject(range.clone()))
                }
            },
            '$' if text_continues_with(&chars, "${") => {
                chars.next();
                chars.next();
                result.push_str("${");
            }
            other => result.push(other),
        }
    }

    Ok(result)
}

fn text_continues_with(chars: &std::iter::Peekable<std::str::Chars>, expected: &str) -> bool {
    let rest: String = chars.clone().take(expected.len()).collect();
    rest == expected
}

// ============================================================================
// ERROR HANDLING
// ============================================================================

fn convert_parse_error(error: Error<Rule>, loc: &Locator) -> Diagnostic {
    let (start, end) = match error.location {
        InputLocation::Pos(pos) => (pos, pos),
        InputLocation::Span((start, end)) => (start, end),
    };
    let found = match loc.text[start..].chars().next() {
        Some(ch) => format!("{:?}", ch),
        None => "the end of the input".to_string(),
    };
    let detail = match &error.variant {
        ErrorVariant::ParsingError { positives, .. } if !positives.is_empty() => {
            let mut labels: Vec<&'static str> = positives.iter().map(rule_label).collect();
            labels.sort_unstable();
            labels.dedup();
            format!("Expected {}, but found {}.", join_alternatives(&labels), found)
        }
        ErrorVariant::CustomError { message } => message.clone(),
        _ => format!("Unexpected {}.", found),
    };
    Diagnostic::error("Invalid expression", detail).with_subject(loc.range(start, end))
}

fn join_alternatives(labels: &[&str]) -> String {
    match labels {
        [] => String::new(),
        [only] => only.to_string(),
        [init @ .., last] => format!("{} or {}", init.join(", "), last),
    }
}

fn rule_label(rule: &Rule) -> &'static str {
    match rule {
        Rule::EOI => "the end of the expression",
        Rule::or_op
        | Rule::and_op
        | Rule::eq_op
        | Rule::cmp_op
        | Rule::add_op
        | Rule::mul_op => "an operator",
        Rule::get_attr | Rule::index => "an attribute or index",
        Rule::identifier => "a name",
        Rule::template_literal | Rule::interpolation => "template content",
        Rule::object_item | Rule::object_key => "an object attribute",
        Rule::for_cond => "an if clause",
        Rule::type_expr
        | Rule::primitive_type
        | Rule::collection_type
        | Rule::tuple_type
        | Rule::object_type => "a type",
        _ => "the start of an expression",
    }
}
