pub mod console;
pub mod json;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::checks::{Problem, Severity};
use crate::discovery::FileChanges;
use crate::error::Result;
use crate::parser::Rule;

/// A problem found in a file. `rule` is `None` for file-level problems such
/// as a read or parse failure.
#[derive(Debug, Clone, PartialEq)]
pub struct Report {
    pub path: String,
    pub rule: Option<Arc<Rule>>,
    pub problem: Problem,
}

/// Result of a scan, handed to reporters.
#[derive(Debug, Clone, Default)]
pub struct Summary {
    pub file_changes: FileChanges,
    /// No particular order.
    pub reports: Vec<Report>,
}

/// Pass/fail decision for a summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    pub pass: bool,
    pub total_reports: usize,
    pub highest_severity: Option<Severity>,
    pub fail_threshold: Severity,
}

impl Summary {
    pub fn verdict(&self, fail_on: Severity) -> Verdict {
        let highest = self.reports.iter().map(|r| r.problem.severity).max();
        Verdict {
            pass: highest.map_or(true, |h| h < fail_on),
            total_reports: self.reports.len(),
            highest_severity: highest,
            fail_threshold: fail_on,
        }
    }

    /// Reports ordered by path, first line, then severity (highest first).
    pub fn sorted_reports(&self) -> Vec<&Report> {
        let mut sorted: Vec<&Report> = self.reports.iter().collect();
        sorted.sort_by(|a, b| {
            a.path
                .cmp(&b.path)
                .then_with(|| a.problem.lines.first().cmp(&b.problem.lines.first()))
                .then_with(|| b.problem.severity.cmp(&a.problem.severity))
                .then_with(|| a.problem.reporter.cmp(&b.problem.reporter))
                .then_with(|| a.problem.text.cmp(&b.problem.text))
        });
        sorted
    }
}

/// Output format selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Console,
    Json,
}

impl OutputFormat {
    pub fn from_str_lenient(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "console" | "text" => Some(Self::Console),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

/// Render a summary into the specified format.
pub fn render(summary: &Summary, verdict: &Verdict, format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Console => Ok(console::render(summary, verdict)),
        OutputFormat::Json => json::render(summary, verdict),
    }
}

/// Collapse sorted line numbers into ranges: `[2, 3, 4, 7]` -> `2-4,7`.
pub fn format_line_ranges(lines: &[usize]) -> String {
    let mut ranges: Vec<(usize, usize)> = Vec::new();
    for &line in lines {
        match ranges.last_mut() {
            Some((_, last)) if *last + 1 == line => *last = line,
            Some((_, last)) if *last == line => {}
            _ => ranges.push((line, line)),
        }
    }
    ranges
        .iter()
        .map(|&(first, last)| {
            if first == last {
                first.to_string()
            } else {
                format!("{first}-{last}")
            }
        })
        .collect::<Vec<_>>()
        .join(",")
}
