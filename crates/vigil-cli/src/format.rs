//! Terminal rendering for run reports.

use colored::Colorize;
use vigil_core::{CheckResult, Report, ReportItem, ScenarioResult, Verdict};

/// Renders the full summary: one line per item, transitions and reasons
/// indented beneath, totals last.
pub fn format_report(report: &Report) -> String {
    let mut lines = vec![format!("{}", "=== vigil report ===".bold())];

    for item in report.items() {
        match item {
            ReportItem::Check(c) => format_check(c, &mut lines),
            ReportItem::Scenario(s) => format_scenario(s, &mut lines),
        }
    }

    let total = report.total();
    let passed = report.passed_count();
    let summary = format!("{passed}/{total} passed");
    lines.push(String::new());
    lines.push(if report.success() {
        format!("{}", summary.green().bold())
    } else {
        format!("{}", summary.red().bold())
    });
    lines.join("\n")
}

fn format_check(check: &CheckResult, lines: &mut Vec<String>) {
    let tag = if check.passed {
        "[PASS]".green()
    } else {
        "[FAIL]".red()
    };
    lines.push(format!("{tag} {}", check.name));
    if let Some(reason) = &check.reason {
        lines.push(format!("       {}", sanitize(reason).dimmed()));
    }
}

fn format_scenario(result: &ScenarioResult, lines: &mut Vec<String>) {
    let tag = match result.verdict {
        Verdict::Passed => "[PASS]".green(),
        Verdict::Failed => "[FAIL]".red(),
        Verdict::Skipped => "[SKIP]".yellow(),
    };
    lines.push(format!(
        "{tag} scenario {} {}",
        result.name,
        format!("({:.1}s)", result.elapsed.as_secs_f64()).dimmed()
    ));
    for t in &result.transitions {
        lines.push(format!("       {t}"));
    }
    if let Some(reason) = &result.reason {
        lines.push(format!("       {}", sanitize(reason).dimmed()));
    }
    if !result.restored {
        lines.push(format!("       {}", "[WARN] restore did not complete".yellow()));
    }
}

/// Strips ANSI escape sequences and other control characters from
/// server-supplied strings before they reach the terminal. Keeps tabs
/// and newlines.
fn sanitize(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(ch) = chars.next() {
        if ch == '\x1b' {
            if let Some('[') = chars.next() {
                // CSI: consume through the final letter
                for c in chars.by_ref() {
                    if c.is_ascii_alphabetic() {
                        break;
                    }
                }
            }
        } else if ch == '\t' || ch == '\n' || !ch.is_control() {
            out.push(ch);
        }
    }
    out
}
