//! Shared printing helpers for edgesync commands.

use anyhow::{Context, Result};
use edgesync_common::types::TargetStatus;
use edgesync_common::{PlanReport, StepStatus, SyncOutcome, SyncReport};
use serde::Serialize;

/// Indent each line of text with a given prefix.
pub fn indent_lines(text: &str, prefix: &str) -> String {
    let mut out = String::new();
    for (idx, line) in text.lines().enumerate() {
        if idx > 0 {
            out.push('\n');
        }
        out.push_str(prefix);
        out.push_str(line);
    }
    out
}

/// Format a byte count with a binary unit.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["KiB", "MiB", "GiB", "TiB"];
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.1} {}", UNITS[unit])
}

/// Format milliseconds as `850 ms` or `2.4 s`.
pub fn format_ms(ms: u64) -> String {
    if ms < 1000 {
        format!("{ms} ms")
    } else {
        format!("{:.1} s", ms as f64 / 1000.0)
    }
}

pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value).context("failed to serialize report")?;
    println!("{text}");
    Ok(())
}

pub fn print_sync_report(report: &SyncReport) {
    for result in &report.results {
        let remote = &result.target.remote_path;
        match &result.status {
            TargetStatus::Ok(SyncOutcome::Transferred { bytes }) => {
                println!("  uploaded  {remote} ({})", format_bytes(*bytes));
            }
            TargetStatus::Ok(SyncOutcome::Skipped { reason }) => {
                println!("  unchanged {remote} ({reason})");
            }
            TargetStatus::Failed { code, error } => {
                println!("  FAILED    {remote} [{code}] {error}");
            }
            TargetStatus::Aborted => println!("  aborted   {remote}"),
        }
    }
    println!(
        "{} uploaded, {} unchanged, {} failed, {} sent",
        report.transferred(),
        report.skipped(),
        report.failed(),
        format_bytes(report.bytes_sent())
    );
}

pub fn print_plan_report(report: &PlanReport) {
    for step in &report.steps {
        let status = match step.status {
            StepStatus::Completed => "ok",
            StepStatus::Failed => "FAILED",
            StepStatus::Skipped => "skipped",
            StepStatus::Pending => "pending",
        };
        match step.exit_code {
            Some(code) if code != 0 => println!(
                "  {status:<8} {} (exit {code}, {})",
                step.name,
                format_ms(step.duration_ms)
            ),
            Some(_) => println!("  {status:<8} {} ({})", step.name, format_ms(step.duration_ms)),
            None => println!("  {status:<8} {}", step.name),
        }
    }
    if let Some(failed) = report.failed_step() {
        println!("plan `{}` failed at step `{}`", report.plan, failed.name);
        let stderr = failed.stderr.trim();
        if !stderr.is_empty() {
            println!("{}", indent_lines(stderr, "    "));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_indent_lines() {
        assert_eq!(indent_lines("hello\nworld", "  "), "  hello\n  world");
        assert_eq!(indent_lines("", "  "), "");
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(1023), "1023 B");
        assert_eq!(format_bytes(1536), "1.5 KiB");
        assert_eq!(format_bytes(500 * 1024 * 1024), "500.0 MiB");
    }

    #[test]
    fn test_format_ms() {
        assert_eq!(format_ms(850), "850 ms");
        assert_eq!(format_ms(2400), "2.4 s");
    }
}
