//! Extraction of `Error:` / `Warning:` blocks from engine stderr
//!
//! Terraform prints diagnostics either bare:
//!
//! ```text
//! Error: Invalid reference
//!
//!   on main.tf line 3 ...
//! ```
//!
//! or, in newer releases, inside a box drawn with `╷ │ ╵`. Both layouts are
//! accepted; with `-no-color` there are no ANSI escapes to strip.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

/// A single engine diagnostic
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub summary: String,
    /// Body lines below the summary, trimmed, blank edges removed
    pub detail: String,
}

impl Diagnostic {
    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

struct Pending {
    severity: Severity,
    summary: String,
    lines: Vec<String>,
}

impl Pending {
    fn finish(self) -> Diagnostic {
        let start = self.lines.iter().position(|l| !l.is_empty());
        let end = self.lines.iter().rposition(|l| !l.is_empty());
        let detail = match (start, end) {
            (Some(s), Some(e)) => self.lines[s..=e].join("\n"),
            _ => String::new(),
        };
        Diagnostic {
            severity: self.severity,
            summary: self.summary,
            detail,
        }
    }
}

/// Parse every diagnostic block found in `stderr`
pub fn parse(stderr: &str) -> Vec<Diagnostic> {
    let mut found = Vec::new();
    let mut current: Option<Pending> = None;

    for raw in stderr.lines() {
        let line = raw.trim_end();

        // Box edges close whatever block is open.
        if line.starts_with('╷') || line.starts_with('╵') {
            if let Some(pending) = current.take() {
                found.push(pending.finish());
            }
            continue;
        }

        let body = strip_gutter(line);
        if let Some((severity, summary)) = header(body) {
            if let Some(pending) = current.take() {
                found.push(pending.finish());
            }
            current = Some(Pending {
                severity,
                summary: summary.to_string(),
                lines: Vec::new(),
            });
            continue;
        }

        if let Some(pending) = current.as_mut() {
            pending.lines.push(body.trim().to_string());
        }
    }

    if let Some(pending) = current.take() {
        found.push(pending.finish());
    }
    found
}

/// True when any error-level diagnostic is present
pub fn has_errors(diagnostics: &[Diagnostic]) -> bool {
    diagnostics.iter().any(Diagnostic::is_error)
}

fn strip_gutter(line: &str) -> &str {
    match line.strip_prefix('│') {
        Some(rest) => rest.strip_prefix(' ').unwrap_or(rest),
        None => line,
    }
}

/// Headers start at column 0 once the gutter is gone; indented lines are body text.
fn header(line: &str) -> Option<(Severity, &str)> {
    if let Some(summary) = line.strip_prefix("Error: ") {
        return Some((Severity::Error, summary.trim()));
    }
    line.strip_prefix("Warning: ")
        .map(|summary| (Severity::Warning, summary.trim()))
}
