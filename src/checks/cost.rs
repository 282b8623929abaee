use std::fmt;

use tracing::debug;

use super::{Check, Problem, Severity};
use crate::parser::Rule;
use crate::promapi::PrometheusServer;

pub const COST_CHECK_NAME: &str = "query/cost";

/// Runs `count(<expr>)` and reports how many series the rule produces, how
/// long the query took and, when `bytes_per_sample` is set, a memory
/// estimate. Exceeding `max_series` raises the configured severity; any
/// other outcome is informational.
pub struct CostCheck {
    server: PrometheusServer,
    bytes_per_sample: u64,
    max_series: u64,
    severity: Severity,
}

impl CostCheck {
    pub fn new(server: PrometheusServer, bytes_per_sample: u64, max_series: u64, severity: Severity) -> Self {
        Self {
            server,
            bytes_per_sample,
            max_series,
            severity,
        }
    }
}

impl fmt::Display for CostCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", COST_CHECK_NAME, self.server.name)
    }
}

impl Check for CostCheck {
    fn name(&self) -> &'static str {
        COST_CHECK_NAME
    }

    fn check(&self, rule: &Rule) -> Vec<Problem> {
        let Some(expr) = rule.expr() else {
            return Vec::new();
        };
        if expr.syntax_error().is_some() {
            return Vec::new();
        }

        let fragment = expr.value.value.trim();
        let query = format!("count({fragment})");
        debug!(server = %self.server.name, query = %query, "estimating query cost");

        let result = match self.server.api.query(&query) {
            Ok(result) => result,
            Err(err) => {
                return vec![Problem::new(
                    fragment,
                    expr.lines(),
                    COST_CHECK_NAME,
                    format!("query using {} failed with: {}", self.server.name, err),
                    self.severity,
                )]
            }
        };

        let series: u64 = result.series.iter().map(|s| s.value.max(0.0) as u64).sum();
        let mut text = format!(
            "query using {} completed in {:.2}s returning {} result(s)",
            self.server.name,
            result.duration.as_secs_f64(),
            series
        );
        if self.bytes_per_sample > 0 {
            text.push_str(&format!(
                " with {} estimated memory usage",
                humanize_bytes(series.saturating_mul(self.bytes_per_sample))
            ));
        }

        let mut severity = Severity::Information;
        if self.max_series > 0 && series > self.max_series {
            text.push_str(&format!(", maximum allowed series is {}", self.max_series));
            severity = self.severity;
        }

        vec![Problem::new(fragment, expr.lines(), COST_CHECK_NAME, text, severity)]
    }
}

/// Binary-prefixed byte size: `707B`, `4.0KiB`, `7.0MiB`.
pub fn humanize_bytes(bytes: u64) -> String {
    const UNIT: u64 = 1024;
    if bytes < UNIT {
        return format!("{bytes}B");
    }
    let mut div = UNIT;
    let mut exp = 0;
    let mut n = bytes / UNIT;
    while n >= UNIT {
        div *= UNIT;
        exp += 1;
        n /= UNIT;
    }
    let prefix = ['K', 'M', 'G', 'T', 'P', 'E'][exp];
    format!("{:.1}{}iB", bytes as f64 / div as f64, prefix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::checks::testing::{api_error, parse_rule, server, FakePrometheus};
    use crate::promapi::QueryError;
    use pretty_assertions::assert_eq;

    const CONTENT: &str = "- record: foo\n  expr: sum(foo)\n";

    fn run(fake: FakePrometheus, bytes: u64, max: u64, severity: Severity) -> Vec<Problem> {
        let (srv, _) = server("prom", fake.with_duration(Duration::from_millis(510)));
        CostCheck::new(srv, bytes, max, severity).check(&parse_rule(CONTENT))
    }

    #[test]
    fn humanizes_bytes() {
        assert_eq!(humanize_bytes(707), "707B");
        assert_eq!(humanize_bytes(4096), "4.0KiB");
        assert_eq!(humanize_bytes(7 * 1024 * 1024), "7.0MiB");
        assert_eq!(humanize_bytes(1536), "1.5KiB");
    }

    #[test]
    fn reports_single_series_with_memory() {
        let problems = run(
            FakePrometheus::new().with_series("count(sum(foo))", &[1.0]),
            4096,
            0,
            Severity::Bug,
        );
        assert_eq!(
            problems,
            vec![Problem::new(
                "sum(foo)",
                vec![2],
                "query/cost",
                "query using prom completed in 0.51s returning 1 result(s) with 4.0KiB estimated memory usage",
                Severity::Information,
            )]
        );
    }

    #[test]
    fn counts_come_from_sample_values() {
        let problems = run(
            FakePrometheus::new().with_series("count(sum(foo))", &[7.0]),
            101,
            0,
            Severity::Bug,
        );
        assert!(problems[0]
            .text
            .ends_with("returning 7 result(s) with 707B estimated memory usage"));
    }

    #[test]
    fn empty_result_never_overflows() {
        let problems = run(FakePrometheus::new(), 0, 1, Severity::Bug);
        assert_eq!(problems.len(), 1);
        assert_eq!(problems[0].severity, Severity::Information);
        assert!(problems[0].text.ends_with("returning 0 result(s)"));
    }

    #[test]
    fn exceeding_max_series_uses_configured_severity() {
        let problems = run(
            FakePrometheus::new().with_series("count(sum(foo))", &[7.0]),
            1024,
            1,
            Severity::Bug,
        );
        assert_eq!(problems[0].severity, Severity::Bug);
        assert!(problems[0].text.ends_with(
            "returning 7 result(s) with 7.0KiB estimated memory usage, maximum allowed series is 1"
        ));

        let problems = run(
            FakePrometheus::new().with_series("count(sum(foo))", &[7.0]),
            0,
            5,
            Severity::Information,
        );
        assert_eq!(problems[0].severity, Severity::Information);
        assert!(problems[0]
            .text
            .ends_with("returning 7 result(s), maximum allowed series is 5"));
    }

    #[test]
    fn within_limit_stays_informational() {
        let problems = run(
            FakePrometheus::new().with_series("count(sum(foo))", &[3.0]),
            0,
            5,
            Severity::Bug,
        );
        assert_eq!(problems[0].severity, Severity::Information);
    }

    #[test]
    fn query_errors_use_configured_severity() {
        let problems = run(
            FakePrometheus::new().with_error("count(sum(foo))", api_error("bad_data", "unhandled path")),
            4096,
            0,
            Severity::Bug,
        );
        assert_eq!(problems.len(), 1);
        assert_eq!(problems[0].severity, Severity::Bug);
        assert_eq!(
            problems[0].text,
            "query using prom failed with: bad_data: unhandled path"
        );

        let problems = run(
            FakePrometheus::new().with_error("count(sum(foo))", QueryError::Timeout),
            4096,
            0,
            Severity::Warning,
        );
        assert_eq!(problems[0].text, "query using prom failed with: connection timeout");
    }

    #[test]
    fn syntax_errors_are_ignored() {
        let (srv, fake) = server("prom", FakePrometheus::new());
        let rule = parse_rule("- record: foo\n  expr: sum(foo) without(\n");
        assert!(CostCheck::new(srv, 4096, 0, Severity::Bug).check(&rule).is_empty());
        assert!(fake.queries().is_empty());
    }
}
