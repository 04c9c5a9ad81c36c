//! Output formatting for analysis results.
//!
//! Supports two output formats:
//! - Pretty: colored terminal summary for humans
//! - JSON: the full [`ResultMetadata`] document

use colored::*;
use serde_json::Value;
use std::io::{self, Write};

use crate::analyze::{Level, ResultMetadata, RuleFailure};

/// Serialize the result document.
pub fn render_json(result: &ResultMetadata) -> serde_json::Result<String> {
    serde_json::to_string_pretty(result)
}

pub fn write_json<W: Write>(out: &mut W, result: &ResultMetadata) -> anyhow::Result<()> {
    writeln!(out, "{}", render_json(result)?)?;
    Ok(())
}

pub fn write_pretty<W: Write>(out: &mut W, result: &ResultMetadata) -> io::Result<()> {
    let r = &result.xfi_result;

    writeln!(out)?;
    writeln!(out, "  {} v{}", "x-fidelity".cyan().bold(), r.xfi_version)?;
    writeln!(out)?;
    writeln!(out, "  {}{}", "Repository: ".dimmed(), r.repo_path)?;
    if !r.repo_url.is_empty() {
        writeln!(out, "  {}{}", "Remote:     ".dimmed(), r.repo_url)?;
    }
    writeln!(out, "  {}{}", "Archetype:  ".dimmed(), r.archetype)?;
    writeln!(
        out,
        "  {}{} files in {:.2}s",
        "Analyzed:   ".dimmed(),
        r.file_count,
        r.duration_seconds
    )?;
    writeln!(out)?;

    if !r.issue_details.is_empty() {
        writeln!(out, "  {} ({}):", "Issues".bold(), r.total_issues)?;
        writeln!(out)?;
        for scan in &r.issue_details {
            writeln!(out, "    {}", scan.file_path.blue())?;
            for failure in &scan.errors {
                write_failure(out, failure)?;
            }
            writeln!(out)?;
        }
    }

    write!(out, "  ")?;
    write!(out, "{}  ", format!("{} fatal", r.fatality_count).red().bold())?;
    write!(out, "{}  ", format!("{} error", r.error_count).red())?;
    write!(out, "{}  ", format!("{} warning", r.warning_count).yellow())?;
    writeln!(out, "{}", format!("{} exempt", r.exempt_count).dimmed())?;

    write!(out, "  ")?;
    if result.has_fatalities() {
        writeln!(out, "{}", "✗ FAILED".red())?;
    } else {
        writeln!(out, "{}", "✓ PASSED".green())?;
    }
    writeln!(out)
}

fn write_failure<W: Write>(out: &mut W, failure: &RuleFailure) -> io::Result<()> {
    let tag = match failure.level {
        Level::Fatality => "FATAL ".red().bold(),
        Level::Error => "ERROR ".red(),
        Level::Warning => "WARN  ".yellow(),
        Level::Exempt => "EXEMPT".dimmed(),
    };
    write!(out, "      {} {}", tag, failure.rule_failure)?;
    if let Some(message) = failure.details.get("message").and_then(Value::as_str) {
        write!(out, "  {}", message.dimmed())?;
    }
    writeln!(out)
}
