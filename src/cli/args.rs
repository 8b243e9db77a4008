//! Defines the command-line arguments and subcommands for the exprprobe CLI.
//!
//! This module uses the `clap` crate with its "derive" feature to create a
//! declarative and type-safe argument parsing structure.

use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand};

use crate::check::{Expected, ValueMode};
use crate::runtime::eval::DEFAULT_MAX_DEPTH;
use crate::runtime::Type;
use crate::syntax::parse_type;

/// The main CLI argument structure.
#[derive(Debug, Parser)]
#[command(
    name = "exprprobe",
    version,
    about = "Checks configuration-language expressions against an expected type, mode, and sensitivity."
)]
pub struct ProbeArgs {
    /// Log more (-v for debug, -vv for trace). Overrides EXPRPROBE_LOG.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// An enumeration of all available CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Check one expression and report every mismatch.
    Check {
        /// The expression source.
        expr: String,
        #[command(flatten)]
        expect: ExpectationArgs,
        #[command(flatten)]
        scope: ScopeArgs,
    },
    /// Discover and run all YAML suites in a directory.
    Suite {
        /// The directory containing suite files.
        #[arg(default_value = "tests/suites")]
        path: PathBuf,
        /// Only run cases whose name contains this substring.
        #[arg(long)]
        filter: Option<String>,
        /// Disable colored output.
        #[arg(long)]
        no_color: bool,
        #[arg(long, default_value_t = DEFAULT_MAX_DEPTH)]
        max_depth: usize,
    },
    /// Print a Rust test function reproducing a check.
    Repro {
        /// The expression source.
        expr: String,
        /// Name of the generated test function.
        #[arg(long, default_value = "reproduce")]
        name: String,
        #[command(flatten)]
        expect: ExpectationArgs,
    },
}

#[derive(Debug, Args)]
pub struct ExpectationArgs {
    /// Expected result type, such as number or list(string).
    #[arg(long = "type", short = 't', value_parser = parse_type_arg, default_value = "any")]
    pub ty: Type,
    /// Expected mode: specified, unknown, or null.
    #[arg(long, short = 'm', default_value = "specified")]
    pub mode: ValueMode,
    /// Expect the result to be marked sensitive.
    #[arg(long)]
    pub sensitive: bool,
}

impl ExpectationArgs {
    pub fn expected(&self) -> Expected {
        Expected::new(self.ty.clone(), self.mode, self.sensitive)
    }
}

#[derive(Debug, Args)]
pub struct ScopeArgs {
    /// Bind a variable to a JSON value.
    #[arg(long = "var", value_name = "NAME=JSON")]
    pub vars: Vec<String>,
    /// Bind a variable to an unknown value of a type.
    #[arg(long = "unknown", value_name = "NAME=TYPE")]
    pub unknowns: Vec<String>,
    /// Bind a variable to a JSON value marked sensitive.
    #[arg(long = "sensitive-var", value_name = "NAME=JSON")]
    pub sensitive_vars: Vec<String>,
    #[arg(long, default_value_t = DEFAULT_MAX_DEPTH)]
    pub max_depth: usize,
}

fn parse_type_arg(s: &str) -> Result<Type, String> {
    parse_type(s).map_err(|e| e.to_string())
}
