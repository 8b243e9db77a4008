//! YAML regression suites.
//!
//! Provides discovery, loading, and execution of hand-written check cases.
//! Each suite file holds a list of cases:
//!
//! ```yaml
//! - name: "unknown arithmetic"
//!   expr: "x + 1"
//!   expect:
//!     type: number
//!     mode: unknown
//!   vars:
//!     x: { unknown: number }
//!     pw: { value: "hunter2", sensitive: true }
//!     nothing: { null_of: "list(string)" }
//!   skip: false   # optional
//!   only: false   # optional
//! ```
//!
//! `type` uses type constraint syntax (`number`, `list(string)`,
//! `object({a = bool})`, `any`). Quote `"null"` when it is used as a mode.
//!
//! # Public API
//!
//! - [`discover_suite_files`] - Find all YAML suite files in a directory tree
//! - [`load_suite`] - Load the cases of one suite file
//! - [`run_case`] - Check a single case
//! - [`run_suites`] - Discover, filter, and run every case under a root

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use miette::Diagnostic;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::check::{CheckError, Checker, Expected, ValueMode};
use crate::runtime::eval::DEFAULT_MAX_DEPTH;
use crate::runtime::{Mark, Scope, Value};
use crate::syntax::parse_type;

// =============================================================================
// CORE TYPES
// =============================================================================

/// A single YAML check case.
#[derive(Debug, Clone, Deserialize)]
pub struct SuiteCase {
    pub name: String,
    pub expr: String,
    pub expect: ExpectSpec,
    #[serde(default)]
    pub vars: BTreeMap<String, VarSpec>,
    #[serde(default)]
    pub skip: bool,
    #[serde(default)]
    pub only: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExpectSpec {
    #[serde(rename = "type")]
    pub ty: String,
    pub mode: ValueMode,
    #[serde(default)]
    pub sensitive: bool,
}

/// A variable binding. Exactly one of `value`, `unknown`, or `null_of` is set.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VarSpec {
    /// A known value, written as plain YAML.
    #[serde(default)]
    pub value: Option<serde_json::Value>,
    /// The type of an unknown value.
    #[serde(default)]
    pub unknown: Option<String>,
    /// The type of a null value.
    #[serde(default)]
    pub null_of: Option<String>,
    #[serde(default)]
    pub sensitive: bool,
}

/// Outcome of running one case.
#[derive(Debug, Clone, PartialEq)]
pub enum CaseResult {
    Pass,
    Fail(Vec<CheckError>),
    Skipped(String),
    /// The case itself is malformed, such as an unparsable type.
    Invalid(String),
}

#[derive(Debug, Clone)]
pub struct CaseReport {
    pub file: String,
    pub name: String,
    pub result: CaseResult,
}

#[derive(Debug, Error, Diagnostic)]
pub enum SuiteError {
    #[error("failed to read {path}")]
    #[diagnostic(code(exprprobe::suite::read))]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse YAML in {path}")]
    #[diagnostic(code(exprprobe::suite::parse), help("a suite file is a YAML list of cases"))]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
}

/// Configuration for suite execution and reporting.
#[derive(Debug, Clone)]
pub struct SuiteConfig {
    pub root: PathBuf,
    /// Case-insensitive substring a case name must contain.
    pub filter: Option<String>,
    pub use_colors: bool,
    pub max_depth: usize,
}

impl Default for SuiteConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("tests/suites"),
            filter: None,
            use_colors: atty::is(atty::Stream::Stdout),
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

#[derive(Debug, Default)]
pub struct SuiteSummary {
    pub reports: Vec<CaseReport>,
    pub load_errors: Vec<SuiteError>,
}

impl SuiteSummary {
    fn count(&self, pred: impl Fn(&CaseResult) -> bool) -> usize {
        self.reports.iter().filter(|r| pred(&r.result)).count()
    }

    pub fn passed(&self) -> usize {
        self.count(|r| matches!(r, CaseResult::Pass))
    }

    pub fn failed(&self) -> usize {
        self.count(|r| matches!(r, CaseResult::Fail(_)))
    }

    pub fn skipped(&self) -> usize {
        self.count(|r| matches!(r, CaseResult::Skipped(_)))
    }

    pub fn invalid(&self) -> usize {
        self.count(|r| matches!(r, CaseResult::Invalid(_)))
    }

    /// True when nothing failed, nothing was invalid, and every file loaded.
    pub fn is_success(&self) -> bool {
        self.failed() == 0 && self.invalid() == 0 && self.load_errors.is_empty()
    }
}

// =============================================================================
// DISCOVERY AND LOADING
// =============================================================================

/// Discovers all YAML files recursively under the given root directory, in a
/// stable order.
pub fn discover_suite_files<P: AsRef<Path>>(root: P) -> Vec<PathBuf> {
    WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| {
            e.file_type().is_file()
                && e.path()
                    .extension()
                    .map(|ext| ext == "yaml" || ext == "yml")
                    .unwrap_or(false)
        })
        .map(|e| e.path().to_path_buf())
        .collect()
}

/// Loads the cases of one suite file.
pub fn load_suite(path: &Path) -> Result<Vec<SuiteCase>, SuiteError> {
    let display = path.display().to_string();
    let content = fs::read_to_string(path).map_err(|source| SuiteError::Read {
        path: display.clone(),
        source,
    })?;
    serde_yaml::from_str(&content).map_err(|source| SuiteError::Parse {
        path: display,
        source,
    })
}

/// Why a case should not run, if it should not.
pub fn skip_reason(case: &SuiteCase, has_only: bool, filter: Option<&str>) -> Option<String> {
    if has_only && !case.only {
        return Some("Not marked 'only' in 'only' mode".to_string());
    }
    if case.skip {
        return Some("Marked 'skip'".to_string());
    }
    if let Some(f) = filter {
        if !case.name.to_lowercase().contains(&f.to_lowercase()) {
            return Some(format!("Filtered out by substring: {}", f));
        }
    }
    None
}

// =============================================================================
// EXECUTION
// =============================================================================

impl VarSpec {
    fn to_value(&self) -> Result<Value, String> {
        let value = match (&self.value, &self.unknown, &self.null_of) {
            (Some(json), None, None) => Value::from_json(json),
            (None, Some(ty), None) => {
                Value::unknown(parse_type(ty).map_err(|e| e.to_string())?)
            }
            (None, None, Some(ty)) => Value::null(parse_type(ty).map_err(|e| e.to_string())?),
            _ => return Err("exactly one of 'value', 'unknown', or 'null_of' is required".into()),
        };
        Ok(if self.sensitive {
            value.mark(Mark::Sensitive)
        } else {
            value
        })
    }
}

impl SuiteCase {
    pub fn expected(&self) -> Result<Expected, String> {
        let ty = parse_type(&self.expect.ty).map_err(|e| e.to_string())?;
        Ok(Expected::new(ty, self.expect.mode, self.expect.sensitive))
    }

    pub fn scope(&self, max_depth: usize) -> Result<Scope, String> {
        let mut scope = Scope::new().with_max_depth(max_depth);
        for (name, var) in &self.vars {
            let value = var
                .to_value()
                .map_err(|e| format!("variable \"{}\": {}", name, e))?;
            scope = scope.with_variable(name.clone(), value);
        }
        Ok(scope)
    }
}

/// Runs one case, ignoring its `skip` and `only` flags.
pub fn run_case(case: &SuiteCase, max_depth: usize) -> CaseResult {
    let expected = match case.expected() {
        Ok(expected) => expected,
        Err(msg) => return CaseResult::Invalid(msg),
    };
    let scope = match case.scope(max_depth) {
        Ok(scope) => scope,
        Err(msg) => return CaseResult::Invalid(msg),
    };
    let errors = Checker::new(scope).check(case.expr.as_bytes(), &expected);
    if errors.is_empty() {
        CaseResult::Pass
    } else {
        CaseResult::Fail(errors)
    }
}

/// Runs every case found under `config.root`.
///
/// If any case is marked `only`, every other case is skipped.
pub fn run_suites(config: &SuiteConfig) -> SuiteSummary {
    let files = discover_suite_files(&config.root);
    info!(root = %config.root.display(), files = files.len(), "discovered suite files");

    let mut summary = SuiteSummary::default();
    let mut all_cases = Vec::new();
    for path in &files {
        match load_suite(path) {
            Ok(cases) => {
                let file = path.display().to_string();
                debug!(file = %file, cases = cases.len(), "loaded suite");
                all_cases.extend(cases.into_iter().map(|case| (file.clone(), case)));
            }
            Err(err) => {
                warn!(error = %err, "skipping unreadable suite file");
                summary.load_errors.push(err);
            }
        }
    }

    let has_only = all_cases.iter().any(|(_, case)| case.only);
    for (file, case) in all_cases {
        let result = match skip_reason(&case, has_only, config.filter.as_deref()) {
            Some(reason) => CaseResult::Skipped(reason),
            None => run_case(&case, config.max_depth),
        };
        debug!(file = %file, name = %case.name, ?result, "ran case");
        summary.reports.push(CaseReport {
            file,
            name: case.name,
            result,
        });
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::Type;

    fn case(yaml: &str) -> SuiteCase {
        let mut cases: Vec<SuiteCase> = serde_yaml::from_str(yaml).unwrap();
        cases.remove(0)
    }

    #[test]
    fn deserializes_case_with_vars() {
        let c = case(
            r#"
- name: unknown plus one
  expr: "x + 1"
  expect: { type: number, mode: unknown }
  vars:
    x: { unknown: number }
"#,
        );
        assert_eq!(c.expected().unwrap(), Expected::unknown(Type::Number));
        assert_eq!(run_case(&c, DEFAULT_MAX_DEPTH), CaseResult::Pass);
    }

    #[test]
    fn sensitive_variable_marks_result() {
        let c = case(
            r#"
- name: secret
  expr: "upper(pw)"
  expect: { type: string, mode: specified, sensitive: true }
  vars:
    pw: { value: "hunter2", sensitive: true }
"#,
        );
        assert_eq!(run_case(&c, DEFAULT_MAX_DEPTH), CaseResult::Pass);
    }

    #[test]
    fn invalid_type_is_reported_as_invalid() {
        let c = case(
            r#"
- name: bad type
  expr: "1"
  expect: { type: "numbr", mode: specified }
"#,
        );
        assert!(matches!(run_case(&c, DEFAULT_MAX_DEPTH), CaseResult::Invalid(_)));
    }

    #[test]
    fn ambiguous_variable_is_invalid() {
        let var = VarSpec {
            value: Some(serde_json::json!(1)),
            unknown: Some("number".into()),
            ..VarSpec::default()
        };
        assert!(var.to_value().is_err());
    }

    #[test]
    fn skip_reason_honours_only_skip_and_filter() {
        let mut c = case(
            r#"
- name: Addition
  expr: "1 + 1"
  expect: { type: number, mode: specified }
"#,
        );
        assert_eq!(skip_reason(&c, false, None), None);
        assert!(skip_reason(&c, true, None).is_some());
        assert_eq!(skip_reason(&c, false, Some("addi")), None);
        assert!(skip_reason(&c, false, Some("mult")).is_some());
        c.skip = true;
        assert_eq!(skip_reason(&c, false, None), Some("Marked 'skip'".to_string()));
    }
}
