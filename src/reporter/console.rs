use super::{format_line_ranges, Summary, Verdict};
use crate::checks::Severity;

/// Render reports as plain console output, one block per problem.
pub fn render(summary: &Summary, verdict: &Verdict) -> String {
    let mut output = String::new();

    if summary.reports.is_empty() {
        output.push_str(&format!(
            "\n  No problems found in {} file(s).\n\n",
            summary.file_changes.len()
        ));
        return output;
    }

    output.push_str(&format!(
        "\n  {} problem(s) found in {} file(s):\n\n",
        summary.reports.len(),
        summary.file_changes.len()
    ));

    for report in summary.sorted_reports() {
        let problem = &report.problem;
        let severity_tag = match problem.severity {
            Severity::Fatal => "[FATAL]  ",
            Severity::Bug => "[BUG]    ",
            Severity::Warning => "[WARNING]",
            Severity::Information => "[INFO]   ",
        };

        output.push_str(&format!(
            "  {} {}:{} {}\n",
            severity_tag,
            report.path,
            format_line_ranges(&problem.lines),
            problem.reporter
        ));
        output.push_str(&format!("            {}\n", problem.text));
        if !problem.fragment.is_empty() {
            output.push_str(&format!("            in: {}\n", problem.fragment));
        }
        output.push('\n');
    }

    let status = if verdict.pass { "PASS" } else { "FAIL" };
    output.push_str(&format!(
        "  Result: {} (threshold: {}, highest: {})\n\n",
        status,
        verdict.fail_threshold,
        verdict
            .highest_severity
            .map(|s| s.to_string())
            .unwrap_or_else(|| "none".into()),
    ));

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::FileChanges;
    use crate::reporter::tests::report;

    #[test]
    fn empty_summary() {
        let summary = Summary {
            file_changes: FileChanges::new(["a.yml", "b.yml"]),
            reports: vec![],
        };
        let out = render(&summary, &summary.verdict(Severity::Bug));
        assert!(out.contains("No problems found in 2 file(s)."));
    }

    #[test]
    fn renders_reports_and_verdict() {
        let summary = Summary {
            file_changes: FileChanges::new(["rules.yml"]),
            reports: vec![report("rules.yml", vec![2, 3, 4], "query/series", Severity::Bug)],
        };
        let out = render(&summary, &summary.verdict(Severity::Bug));
        assert!(out.contains("[BUG]     rules.yml:2-4 query/series"));
        assert!(out.contains("query/series says hi"));
        assert!(out.contains("Result: FAIL (threshold: bug, highest: bug)"));
    }
}
