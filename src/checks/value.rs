use std::fmt;

use super::{Check, Problem, Severity};
use crate::parser::promql::Expr;
use crate::parser::Rule;

pub const VALUE_CHECK_NAME: &str = "promql/value";

/// Catches alert queries that can never change state: no series selectors
/// at all, or a top-level `bool` comparison that returns a sample for every
/// series whether the condition holds or not.
pub struct ValueCheck {
    severity: Severity,
}

impl ValueCheck {
    pub fn new(severity: Severity) -> Self {
        Self { severity }
    }
}

impl fmt::Display for ValueCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{VALUE_CHECK_NAME}")
    }
}

impl Check for ValueCheck {
    fn name(&self) -> &'static str {
        VALUE_CHECK_NAME
    }

    fn check(&self, rule: &Rule) -> Vec<Problem> {
        let Some(alert) = rule.alerting() else {
            return Vec::new();
        };
        let Some(query) = alert.expr.query() else {
            return Vec::new();
        };

        let text = if query.selectors().is_empty() {
            "alert query doesn't use any series selectors, its result is constant so the alert will either always or never fire"
        } else if matches!(
            query.unparen(),
            Expr::Binary {
                return_bool: true,
                ..
            }
        ) {
            "alert query uses a bool comparison, it returns a result for every series so the alert will always fire"
        } else {
            return Vec::new();
        };

        vec![Problem::new(
            alert.expr.value.value.trim(),
            alert.expr.lines(),
            VALUE_CHECK_NAME,
            text,
            self.severity,
        )]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checks::testing::parse_rule;

    fn run(expr: &str) -> Vec<Problem> {
        let rule = parse_rule(&format!("- alert: Foo\n  expr: {expr}\n"));
        ValueCheck::new(Severity::Bug).check(&rule)
    }

    #[test]
    fn flags_constant_queries() {
        let problems = run("vector(1) > 0");
        assert_eq!(problems.len(), 1);
        assert!(problems[0].text.contains("doesn't use any series selectors"));
        assert_eq!(problems[0].fragment, "vector(1) > 0");
        assert_eq!(problems[0].lines, vec![2]);
    }

    #[test]
    fn flags_top_level_bool() {
        let problems = run("(up == bool 0)");
        assert_eq!(problems.len(), 1);
        assert!(problems[0].text.contains("bool comparison"));
    }

    #[test]
    fn nested_bool_is_fine() {
        assert!(run("sum(up == bool 0) > 2").is_empty());
        assert!(run("up == 0").is_empty());
    }

    #[test]
    fn recording_rules_are_skipped() {
        let rule = parse_rule("- record: foo\n  expr: vector(1)\n");
        assert!(ValueCheck::new(Severity::Bug).check(&rule).is_empty());
    }

    #[test]
    fn syntax_errors_are_ignored() {
        let rule = parse_rule("- alert: Foo\n  expr: vector(1) > (\n");
        assert!(rule.expr().unwrap().syntax_error().is_some());
        assert!(ValueCheck::new(Severity::Bug).check(&rule).is_empty());
    }
}
