//! Handles all user-facing output for the CLI.
//!
//! Check failures are rendered as miette reports on stderr. Suite results
//! are printed as colored status lines followed by a summary.

use std::io::{self, Write};

use miette::{NamedSource, Report};
use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};

use crate::check::CheckError;
use crate::suite::{CaseResult, SuiteSummary};

// ============================================================================
// CHECK OUTPUT
// ============================================================================

/// Prints every check error as a report against the expression source.
pub fn print_check_errors(src: &str, errors: &[CheckError]) {
    for error in errors {
        let report = Report::new(error.clone())
            .with_source_code(NamedSource::new("<expression>", src.to_string()));
        eprintln!("{:?}", report);
    }
}

/// Prints a one-line verdict for a check.
pub fn print_check_verdict(errors: &[CheckError], use_colors: bool) -> io::Result<()> {
    let mut stdout = StandardStream::stdout(color_choice(use_colors));
    if errors.is_empty() {
        status(&mut stdout, "PASS", Color::Green)?;
        writeln!(stdout)
    } else {
        status(&mut stdout, "FAIL", Color::Red)?;
        writeln!(stdout, " {} error(s)", errors.len())
    }
}

// ============================================================================
// SUITE OUTPUT
// ============================================================================

/// Prints suite results with colored output.
pub fn report_suite(summary: &SuiteSummary, use_colors: bool) -> io::Result<()> {
    let mut stdout = StandardStream::stdout(color_choice(use_colors));

    for err in &summary.load_errors {
        eprintln!("{:?}", Report::msg(format!("{}: {}", err, source_text(err))));
    }

    for report in &summary.reports {
        match &report.result {
            CaseResult::Pass => {
                status(&mut stdout, "PASS", Color::Green)?;
                writeln!(stdout, ": {} [{}]", report.name, report.file)?;
            }
            CaseResult::Skipped(reason) => {
                status(&mut stdout, "SKIP", Color::Yellow)?;
                writeln!(stdout, ": {} [{}] ({})", report.name, report.file, reason)?;
            }
            CaseResult::Invalid(msg) => {
                status(&mut stdout, "INVALID", Color::Magenta)?;
                writeln!(stdout, ": {} [{}]", report.name, report.file)?;
                writeln!(stdout, "  {}", msg)?;
            }
            CaseResult::Fail(errors) => {
                status(&mut stdout, "FAIL", Color::Red)?;
                writeln!(stdout, ": {} [{}]", report.name, report.file)?;
                for error in errors {
                    for line in error.to_string().lines() {
                        writeln!(stdout, "  {}", line)?;
                    }
                }
            }
        }
    }

    writeln!(stdout)?;
    write!(stdout, "Suite summary: total {}, ", summary.reports.len())?;
    counted(&mut stdout, "passed", Color::Green, summary.passed())?;
    write!(stdout, ", ")?;
    counted(&mut stdout, "failed", Color::Red, summary.failed())?;
    write!(stdout, ", ")?;
    counted(&mut stdout, "skipped", Color::Yellow, summary.skipped())?;
    write!(stdout, ", ")?;
    counted(&mut stdout, "invalid", Color::Magenta, summary.invalid())?;
    writeln!(stdout)?;

    let failed: Vec<_> = summary
        .reports
        .iter()
        .filter(|r| matches!(r.result, CaseResult::Fail(_) | CaseResult::Invalid(_)))
        .collect();
    if !failed.is_empty() {
        eprintln!("\nFailed cases:");
        for report in failed {
            eprintln!("  - {}", report.name);
        }
    }
    Ok(())
}

// ============================================================================
// PRIVATE HELPERS
// ============================================================================

fn color_choice(use_colors: bool) -> ColorChoice {
    if use_colors {
        ColorChoice::Auto
    } else {
        ColorChoice::Never
    }
}

fn status(out: &mut StandardStream, label: &str, color: Color) -> io::Result<()> {
    out.set_color(ColorSpec::new().set_fg(Some(color)).set_bold(true))?;
    write!(out, "{}", label)?;
    out.reset()
}

fn counted(out: &mut StandardStream, label: &str, color: Color, n: usize) -> io::Result<()> {
    out.set_color(ColorSpec::new().set_fg(Some(color)))?;
    write!(out, "{}", label)?;
    out.reset()?;
    write!(out, " {}", n)
}

fn source_text(err: &dyn std::error::Error) -> String {
    err.source().map(|s| s.to_string()).unwrap_or_default()
}
