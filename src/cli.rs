//! The exprprobe Command-Line Interface.
//!
//! This module is the main entry point for all CLI commands and orchestrates
//! the core library functions.

use std::process;

use clap::Parser;
use miette::Diagnostic;
use thiserror::Error;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use crate::check::{render_test_case, Checker};
use crate::runtime::{Mark, Scope, Value};
use crate::suite::{run_suites, SuiteConfig};
use crate::syntax::parse_type;

pub mod args;
pub mod output;

use args::{Command, ProbeArgs, ScopeArgs};

/// Environment variable holding a `tracing` filter directive.
pub const LOG_ENV: &str = "EXPRPROBE_LOG";

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    #[error("invalid {flag} binding {binding:?}: {reason}")]
    #[diagnostic(
        code(exprprobe::cli::binding),
        help("bindings are written NAME=VALUE, for example --var 'x=[1, 2]'")
    )]
    InvalidBinding {
        flag: &'static str,
        binding: String,
        reason: String,
    },

    #[error("failed to write output")]
    #[diagnostic(code(exprprobe::cli::io))]
    Io(#[from] std::io::Error),
}

/// The main entry point for the CLI.
pub fn run() {
    let args = ProbeArgs::parse();
    init_logging(args.verbose);

    let result = match args.command {
        Command::Check {
            expr,
            expect,
            scope,
        } => handle_check(&expr, &expect.expected(), &scope),
        Command::Suite {
            path,
            filter,
            no_color,
            max_depth,
        } => {
            let config = SuiteConfig {
                root: path,
                filter,
                use_colors: !no_color && SuiteConfig::default().use_colors,
                max_depth,
            };
            handle_suite(&config)
        }
        Command::Repro { expr, name, expect } => {
            print!("{}", render_test_case(&name, &expr, &expect.expected()));
            Ok(true)
        }
    };

    match result {
        Ok(true) => {}
        Ok(false) => process::exit(1),
        Err(e) => {
            eprintln!("{:?}", miette::Report::new(e));
            process::exit(2);
        }
    }
}

/// Installs a stderr subscriber. `-v` flags win over the environment.
fn init_logging(verbose: u8) {
    let filter = match verbose {
        0 => EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn")),
        1 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

/// Handles the `check` subcommand. Returns whether the check passed.
fn handle_check(
    expr: &str,
    expected: &crate::check::Expected,
    scope_args: &ScopeArgs,
) -> Result<bool, CliError> {
    let scope = build_scope(scope_args)?;
    debug!(expr, expected = %expected, "checking expression");
    let errors = Checker::new(scope).check(expr.as_bytes(), expected);
    output::print_check_errors(expr, &errors);
    output::print_check_verdict(&errors, atty::is(atty::Stream::Stdout))?;
    Ok(errors.is_empty())
}

/// Handles the `suite` subcommand. Returns whether every case passed.
fn handle_suite(config: &SuiteConfig) -> Result<bool, CliError> {
    let summary = run_suites(config);
    output::report_suite(&summary, config.use_colors)?;
    Ok(summary.is_success())
}

/// Builds the scope described by `--var`, `--unknown`, and `--sensitive-var`.
pub fn build_scope(args: &ScopeArgs) -> Result<Scope, CliError> {
    let mut scope = Scope::new().with_max_depth(args.max_depth);
    for binding in &args.vars {
        let (name, value) = json_binding("--var", binding)?;
        scope = scope.with_variable(name, value);
    }
    for binding in &args.sensitive_vars {
        let (name, value) = json_binding("--sensitive-var", binding)?;
        scope = scope.with_variable(name, value.mark(Mark::Sensitive));
    }
    for binding in &args.unknowns {
        let (name, ty) = split_binding("--unknown", binding)?;
        let ty = parse_type(ty).map_err(|e| invalid("--unknown", binding, e.to_string()))?;
        scope = scope.with_variable(name, Value::unknown(ty));
    }
    Ok(scope)
}

fn split_binding<'a>(flag: &'static str, binding: &'a str) -> Result<(&'a str, &'a str), CliError> {
    let (name, rest) = binding
        .split_once('=')
        .ok_or_else(|| invalid(flag, binding, "missing '='".to_string()))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(invalid(flag, binding, "missing variable name".to_string()));
    }
    Ok((name, rest))
}

fn json_binding(flag: &'static str, binding: &str) -> Result<(String, Value), CliError> {
    let (name, json) = split_binding(flag, binding)?;
    let json: serde_json::Value =
        serde_json::from_str(json).map_err(|e| invalid(flag, binding, e.to_string()))?;
    Ok((name.to_string(), Value::from_json(&json)))
}

fn invalid(flag: &'static str, binding: &str, reason: String) -> CliError {
    CliError::InvalidBinding {
        flag,
        binding: binding.to_string(),
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::Type;

    fn scope_args(vars: &[&str], unknowns: &[&str], sensitive: &[&str]) -> ScopeArgs {
        ScopeArgs {
            vars: vars.iter().map(|s| s.to_string()).collect(),
            unknowns: unknowns.iter().map(|s| s.to_string()).collect(),
            sensitive_vars: sensitive.iter().map(|s| s.to_string()).collect(),
            max_depth: 10,
        }
    }

    #[test]
    fn builds_scope_from_bindings() {
        let scope = build_scope(&scope_args(&["x=[1, 2]"], &["y=list(string)"], &["pw=\"s\""]))
            .unwrap();
        assert_eq!(
            scope.variable("x").unwrap().ty(),
            &Type::tuple(vec![Type::Number, Type::Number])
        );
        assert!(!scope.variable("y").unwrap().is_known());
        assert!(scope.variable("pw").unwrap().is_marked());
    }

    #[test]
    fn rejects_malformed_bindings() {
        assert!(build_scope(&scope_args(&["x"], &[], &[])).is_err());
        assert!(build_scope(&scope_args(&["=1"], &[], &[])).is_err());
        assert!(build_scope(&scope_args(&["x={"], &[], &[])).is_err());
        assert!(build_scope(&scope_args(&[], &["y=numbr"], &[])).is_err());
    }
}
