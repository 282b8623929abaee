use serde::Serialize;

use super::{format_line_ranges, Summary, Verdict};
use crate::checks::Severity;
use crate::discovery::FileChanges;
use crate::error::Result;

#[derive(Serialize)]
struct JsonProblem<'a> {
    path: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    rule: Option<&'a str>,
    lines: &'a [usize],
    line_range: String,
    reporter: &'a str,
    severity: Severity,
    text: &'a str,
    fragment: &'a str,
}

#[derive(Serialize)]
struct JsonReport<'a> {
    files: &'a FileChanges,
    reports: Vec<JsonProblem<'a>>,
    verdict: &'a Verdict,
}

/// Render a summary as a JSON report.
pub fn render(summary: &Summary, verdict: &Verdict) -> Result<String> {
    let reports = summary
        .sorted_reports()
        .into_iter()
        .map(|r| JsonProblem {
            path: &r.path,
            rule: r.rule.as_deref().and_then(|rule| rule.name()),
            lines: &r.problem.lines,
            line_range: format_line_ranges(&r.problem.lines),
            reporter: &r.problem.reporter,
            severity: r.problem.severity,
            text: &r.problem.text,
            fragment: &r.problem.fragment,
        })
        .collect();
    let report = JsonReport {
        files: &summary.file_changes,
        reports,
        verdict,
    };
    let json = serde_json::to_string_pretty(&report)?;
    Ok(json)
}
