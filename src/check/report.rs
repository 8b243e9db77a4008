//! Reporting check results into a test run, and turning failures into
//! reproducible test cases.

use super::{check_expression, CheckError, Expected};

/// A sink for failures that does not stop the caller when told about one.
pub trait Reporter {
    fn error(&mut self, error: &CheckError);

    fn log(&mut self, message: &str);
}

/// A [`Reporter`] that remembers every failure.
#[derive(Debug, Default)]
pub struct FailureLog {
    failures: Vec<String>,
    messages: Vec<String>,
}

impl FailureLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failures(&self) -> &[String] {
        &self.failures
    }

    pub fn messages(&self) -> &[String] {
        &self.messages
    }

    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }

    /// Panics listing every failure, if there were any.
    pub fn assert_clean(&self) {
        if !self.failures.is_empty() {
            panic!(
                "{} failure(s):\n\n{}",
                self.failures.len(),
                self.failures.join("\n\n")
            );
        }
    }
}

impl Reporter for FailureLog {
    fn error(&mut self, error: &CheckError) {
        self.failures.push(error.to_string());
    }

    fn log(&mut self, message: &str) {
        self.messages.push(message.to_string());
    }
}

/// Checks `src` and reports every error to `reporter`.
///
/// Returns true if at least one error was reported, so callers can skip
/// follow-up checks that depend on this one.
pub fn test_case(reporter: &mut dyn Reporter, src: &str, expected: Expected) -> bool {
    reporter.log(&format!("expression: {}", src));
    let errors = check_expression(src.as_bytes(), &expected);
    for error in &errors {
        reporter.error(error);
    }
    !errors.is_empty()
}

/// A generated test expression that knows its own expected result.
pub trait Expression {
    fn source(&self) -> String;

    fn expected_result(&self) -> Expected;
}

/// Checks a generated expression against its own expectation.
pub fn test_expression(expr: &dyn Expression) -> Vec<CheckError> {
    check_expression(expr.source().as_bytes(), &expr.expected_result())
}

/// Renders a `#[test]` function that reproduces a check.
pub fn render_test_case(name: &str, src: &str, expected: &Expected) -> String {
    format!(
        "#[test]\n\
         fn {name}() {{\n\
         \x20   let mut log = FailureLog::new();\n\
         \x20   test_case(\n\
         \x20       &mut log,\n\
         \x20       {src:?},\n\
         \x20       {expected},\n\
         \x20   );\n\
         \x20   log.assert_clean();\n\
         }}\n",
        name = sanitize_ident(name),
        src = src,
        expected = expected.literal(),
    )
}

/// Turns arbitrary text into a valid snake_case function name.
fn sanitize_ident(name: &str) -> String {
    let mut ident: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect();
    if ident.is_empty() || ident.starts_with(|c: char| c.is_ascii_digit()) {
        ident.insert_str(0, "case_");
    }
    ident
}
