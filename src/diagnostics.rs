//! Structured diagnostics shared by the parser, the evaluator, and the checker.
//!
//! A [`Diagnostic`] is a reportable, non-fatal problem: it carries a severity, a
//! short summary, a longer detail message, and (usually) the source [`Range`] it
//! refers to. Both the syntax and the runtime layers report failures this way
//! instead of returning early with a single error, so callers always see every
//! problem found in one pass.
//!
//! Diagnostics implement [`miette::Diagnostic`] so the CLI can render them
//! with source snippets.

use std::fmt;

use miette::{LabeledSpan, SourceSpan};
use serde::{Deserialize, Serialize};
use unicode_segmentation::UnicodeSegmentation;

/// A position in source text.
///
/// `line` and `column` are 1-based; columns count grapheme clusters, not bytes.
/// `byte` is the 0-based byte offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Pos {
    pub line: usize,
    pub column: usize,
    pub byte: usize,
}

impl Pos {
    /// The canonical starting position of a source buffer.
    pub const INITIAL: Pos = Pos {
        line: 1,
        column: 1,
        byte: 0,
    };

    /// Returns the position reached after consuming `text` from `self`.
    pub fn advance(self, text: &str) -> Pos {
        let mut pos = self;
        for grapheme in text.graphemes(true) {
            pos.byte += grapheme.len();
            if grapheme == "\n" || grapheme == "\r\n" {
                pos.line += 1;
                pos.column = 1;
            } else {
                pos.column += 1;
            }
        }
        pos
    }
}

impl Default for Pos {
    fn default() -> Self {
        Pos::INITIAL
    }
}

/// A half-open span of source text within a named file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Range {
    pub filename: String,
    pub start: Pos,
    pub end: Pos,
}

impl Range {
    pub fn new(filename: impl Into<String>, start: Pos, end: Pos) -> Self {
        Self {
            filename: filename.into(),
            start,
            end,
        }
    }

    /// Returns the smallest range covering both `self` and `other`.
    pub fn to(&self, other: &Range) -> Range {
        let start = if other.start.byte < self.start.byte {
            other.start
        } else {
            self.start
        };
        let end = if other.end.byte > self.end.byte {
            other.end
        } else {
            self.end
        };
        Range::new(self.filename.clone(), start, end)
    }

    /// Converts this range into a miette span over the original buffer.
    pub fn source_span(&self) -> SourceSpan {
        let len = self.end.byte.saturating_sub(self.start.byte);
        SourceSpan::from((self.start.byte, len))
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.start.line == self.end.line {
            write!(
                f,
                "{}:{},{}-{}",
                self.filename, self.start.line, self.start.column, self.end.column
            )
        } else {
            write!(
                f,
                "{}:{},{}-{},{}",
                self.filename, self.start.line, self.start.column, self.end.line, self.end.column
            )
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Severity {
    Error,
    Warning,
}

/// A single reportable problem found while parsing or evaluating.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub summary: String,
    pub detail: String,
    pub subject: Option<Range>,
}

impl Diagnostic {
    /// Creates an error-severity diagnostic with no subject range.
    pub fn error(summary: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            summary: summary.into(),
            detail: detail.into(),
            subject: None,
        }
    }

    pub fn warning(summary: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            ..Self::error(summary, detail)
        }
    }

    pub fn with_subject(mut self, subject: Range) -> Self {
        self.subject = Some(subject);
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.subject {
            Some(range) => write!(f, "[{}] {}: {}", range, self.summary, self.detail),
            None => write!(f, "{}: {}", self.summary, self.detail),
        }
    }
}

impl std::error::Error for Diagnostic {}

impl miette::Diagnostic for Diagnostic {
    fn severity(&self) -> Option<miette::Severity> {
        Some(match self.severity {
            Severity::Error => miette::Severity::Error,
            Severity::Warning => miette::Severity::Warning,
        })
    }

    fn labels(&self) -> Option<Box<dyn Iterator<Item = LabeledSpan> + '_>> {
        let range = self.subject.as_ref()?;
        let label = LabeledSpan::new_with_span(Some(self.summary.clone()), range.source_span());
        Some(Box::new(std::iter::once(label)))
    }
}

/// An ordered collection of diagnostics, in discovery order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Diagnostics(Vec<Diagnostic>);

impl Diagnostics {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn push(&mut self, diag: Diagnostic) {
        self.0.push(diag);
    }

    pub fn append(&mut self, mut other: Diagnostics) {
        self.0.append(&mut other.0);
    }

    /// Returns true if at least one diagnostic has error severity.
    pub fn has_errors(&self) -> bool {
        self.0.iter().any(Diagnostic::is_error)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Diagnostic> {
        self.0.iter()
    }
}

impl From<Diagnostic> for Diagnostics {
    fn from(diag: Diagnostic) -> Self {
        Self(vec![diag])
    }
}

impl FromIterator<Diagnostic> for Diagnostics {
    fn from_iter<I: IntoIterator<Item = Diagnostic>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for Diagnostics {
    type Item = Diagnostic;
    type IntoIter = std::vec::IntoIter<Diagnostic>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a Diagnostics {
    type Item = &'a Diagnostic;
    type IntoIter = std::slice::Iter<'a, Diagnostic>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

#[cfg(test)]
mod tests {
    use miette::Report;

    use super::*;

    #[test]
    fn advance_counts_lines_and_graphemes() {
        let pos = Pos::INITIAL.advance("ab\ncé");
        assert_eq!(pos.line, 2);
        assert_eq!(pos.column, 3);
        assert_eq!(pos.byte, 6);
    }

    #[test]
    fn range_display_single_and_multi_line() {
        let single = Range::new(
            "",
            Pos::INITIAL,
            Pos {
                line: 1,
                column: 4,
                byte: 3,
            },
        );
        assert_eq!(single.to_string(), ":1,1-4");

        let multi = Range::new(
            "test.expr",
            Pos::INITIAL,
            Pos {
                line: 2,
                column: 2,
                byte: 5,
            },
        );
        assert_eq!(multi.to_string(), "test.expr:1,1-2,2");
    }

    #[test]
    fn diagnostic_display_includes_range_when_present() {
        let diag = Diagnostic::error("Unknown variable", "There is no variable named \"x\".");
        assert_eq!(
            diag.to_string(),
            "Unknown variable: There is no variable named \"x\"."
        );

        let diag = diag.with_subject(Range::new(
            "",
            Pos::INITIAL,
            Pos {
                line: 1,
                column: 2,
                byte: 1,
            },
        ));
        assert!(diag.to_string().starts_with("[:1,1-2] Unknown variable"));
    }

    #[test]
    fn warnings_are_not_errors() {
        let mut diags = Diagnostics::new();
        diags.push(Diagnostic::warning("Deprecated", "old syntax"));
        assert!(!diags.has_errors());
        diags.push(Diagnostic::error("Broken", "bad"));
        assert!(diags.has_errors());
        assert_eq!(diags.len(), 2);
    }

    #[test]
    fn renders_as_miette_report() {
        let diag = Diagnostic::error("Division by zero", "Cannot divide by zero.");
        let output = format!("{:?}", Report::new(diag));
        assert!(output.contains("Division by zero"));
    }
}
