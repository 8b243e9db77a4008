// tests/suite_tests.rs

use std::fs;
use std::path::PathBuf;

use exprprobe::suite::{discover_suite_files, run_suites, CaseResult, SuiteConfig, SuiteSummary};

fn config(root: impl Into<PathBuf>) -> SuiteConfig {
    SuiteConfig {
        root: root.into(),
        use_colors: false,
        ..SuiteConfig::default()
    }
}

/// Creates a fresh scratch directory holding the given suite files.
fn scratch(name: &str, files: &[(&str, &str)]) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("exprprobe-{}-{}", name, std::process::id()));
    let _ = fs::remove_dir_all(&dir);
    fs::create_dir_all(&dir).unwrap();
    for (file, content) in files {
        fs::write(dir.join(file), content).unwrap();
    }
    dir
}

fn failures(summary: &SuiteSummary) -> Vec<String> {
    summary
        .reports
        .iter()
        .filter(|r| !matches!(r.result, CaseResult::Pass | CaseResult::Skipped(_)))
        .map(|r| format!("{} [{}]: {:?}", r.name, r.file, r.result))
        .collect()
}

const PASSING: &str = r#"
- name: "addition"
  expr: "1 + 1"
  expect: { type: number, mode: specified }
- name: "unknown"
  expr: "x"
  expect: { type: string, mode: unknown }
  vars:
    x: { unknown: string }
"#;

// ---
// Bundled suites
// ---

#[test]
fn bundled_suites_pass() {
    let summary = run_suites(&config("tests/suites"));
    assert!(summary.is_success(), "{:#?}", failures(&summary));
    assert!(summary.passed() > 0);
    assert_eq!(summary.passed(), summary.reports.len());
}

#[test]
fn discovery_is_sorted_and_yaml_only() {
    let dir = scratch(
        "discover",
        &[("b.yaml", PASSING), ("a.yml", PASSING), ("notes.txt", "not a suite")],
    );
    let files = discover_suite_files(&dir);
    let names: Vec<_> = files
        .iter()
        .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, ["a.yml", "b.yaml"]);
    let _ = fs::remove_dir_all(&dir);
}

// ---
// Failure reporting
// ---

#[test]
fn mismatching_case_fails_with_check_errors() {
    let dir = scratch(
        "mismatch",
        &[(
            "cases.yaml",
            r#"
- name: "wrong type"
  expr: "1"
  expect: { type: bool, mode: specified }
"#,
        )],
    );
    let summary = run_suites(&config(&dir));
    assert!(!summary.is_success());
    assert_eq!(summary.failed(), 1);
    let CaseResult::Fail(errors) = &summary.reports[0].result else {
        panic!("expected a failure");
    };
    assert_eq!(errors.len(), 1);
    assert!(errors[0].to_string().starts_with("wrong result type"));
    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn malformed_yaml_is_a_load_error() {
    let dir = scratch("malformed", &[("bad.yaml", "- name: [unclosed"), ("good.yaml", PASSING)]);
    let summary = run_suites(&config(&dir));
    assert_eq!(summary.load_errors.len(), 1);
    assert_eq!(summary.passed(), 2);
    assert!(!summary.is_success());
    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn bad_variable_type_is_invalid() {
    let dir = scratch(
        "invalid",
        &[(
            "cases.yaml",
            r#"
- name: "bad unknown"
  expr: "x"
  expect: { type: number, mode: unknown }
  vars:
    x: { unknown: numbr }
"#,
        )],
    );
    let summary = run_suites(&config(&dir));
    assert_eq!(summary.invalid(), 1);
    assert!(!summary.is_success());
    let _ = fs::remove_dir_all(&dir);
}

// ---
// Selection
// ---

#[test]
fn only_cases_exclude_the_rest() {
    let dir = scratch(
        "only",
        &[(
            "cases.yaml",
            r#"
- name: "focused"
  expr: "true"
  expect: { type: bool, mode: specified }
  only: true
- name: "broken but ignored"
  expr: "1"
  expect: { type: bool, mode: specified }
"#,
        )],
    );
    let summary = run_suites(&config(&dir));
    assert!(summary.is_success());
    assert_eq!(summary.passed(), 1);
    assert_eq!(summary.skipped(), 1);
    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn filter_is_case_insensitive() {
    let dir = scratch("filter", &[("cases.yaml", PASSING)]);
    let summary = run_suites(&SuiteConfig {
        filter: Some("ADDI".into()),
        ..config(&dir)
    });
    assert_eq!(summary.passed(), 1);
    assert_eq!(summary.skipped(), 1);
    let _ = fs::remove_dir_all(&dir);
}
