use std::fmt;

use regex::Regex;

use super::{Check, Problem, Severity};
use crate::parser::Rule;

pub const ANNOTATION_CHECK_NAME: &str = "alerts/annotation";

/// Requires an annotation on alerting rules, optionally with a value
/// matching a pattern. Recording rules are skipped.
pub struct AnnotationCheck {
    key: String,
    value_regex: Option<Regex>,
    required: bool,
    severity: Severity,
}

impl AnnotationCheck {
    pub fn new(key: &str, value_regex: Option<Regex>, required: bool, severity: Severity) -> Self {
        Self {
            key: key.to_string(),
            value_regex,
            required,
            severity,
        }
    }
}

impl fmt::Display for AnnotationCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({}:{})", ANNOTATION_CHECK_NAME, self.key, self.required)
    }
}

impl Check for AnnotationCheck {
    fn name(&self) -> &'static str {
        ANNOTATION_CHECK_NAME
    }

    fn check(&self, rule: &Rule) -> Vec<Problem> {
        let Some(alert) = rule.alerting() else {
            return Vec::new();
        };
        if alert.expr.syntax_error().is_some() {
            return Vec::new();
        }

        let Some(annotation) = alert.annotations.as_ref().and_then(|a| a.get(&self.key)) else {
            if !self.required {
                return Vec::new();
            }
            let lines = alert
                .annotations
                .as_ref()
                .map(|a| a.position().lines())
                .unwrap_or_else(|| rule.lines());
            return vec![Problem::new(
                "",
                lines,
                ANNOTATION_CHECK_NAME,
                format!("{} annotation is required", self.key),
                self.severity,
            )];
        };

        match &self.value_regex {
            Some(re) if !re.is_match(&annotation.value.value) => vec![Problem::new(
                format!("{}: {}", self.key, annotation.value.value),
                annotation.lines(),
                ANNOTATION_CHECK_NAME,
                format!(
                    "{} annotation value must match \"{}\"",
                    self.key,
                    re.as_str()
                ),
                self.severity,
            )],
            _ => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checks::testing::parse_rule;
    use pretty_assertions::assert_eq;

    const ALERT: &str = "- alert: Down
  expr: up == 0
  annotations:
    summary: instance down
    runbook: https://wiki/down
";

    #[test]
    fn missing_required_annotation() {
        let check = AnnotationCheck::new("dashboard", None, true, Severity::Warning);
        let problems = check.check(&parse_rule(ALERT));
        assert_eq!(problems.len(), 1);
        assert_eq!(problems[0].text, "dashboard annotation is required");
        assert_eq!(problems[0].lines, vec![3, 4, 5]);
    }

    #[test]
    fn missing_optional_annotation_is_fine() {
        let check = AnnotationCheck::new("dashboard", None, false, Severity::Warning);
        assert!(check.check(&parse_rule(ALERT)).is_empty());
    }

    #[test]
    fn value_must_match_pattern() {
        let re = Regex::new("^https://runbooks/.+$").unwrap();
        let check = AnnotationCheck::new("runbook", Some(re), false, Severity::Bug);
        let problems = check.check(&parse_rule(ALERT));
        assert_eq!(problems.len(), 1);
        assert_eq!(problems[0].fragment, "runbook: https://wiki/down");
        assert_eq!(problems[0].lines, vec![5]);
        assert_eq!(
            problems[0].text,
            "runbook annotation value must match \"^https://runbooks/.+$\""
        );
        assert_eq!(problems[0].severity, Severity::Bug);
    }

    #[test]
    fn recording_rules_are_skipped() {
        let check = AnnotationCheck::new("summary", None, true, Severity::Warning);
        let rule = parse_rule("- record: foo\n  expr: sum(up)\n");
        assert!(check.check(&rule).is_empty());
    }

    #[test]
    fn alert_without_annotations_block() {
        let check = AnnotationCheck::new("summary", None, true, Severity::Warning);
        let rule = parse_rule("- alert: Down\n  expr: up == 0\n");
        let problems = check.check(&rule);
        assert_eq!(problems[0].lines, vec![1, 2]);
    }

    #[test]
    fn syntax_errors_are_ignored() {
        let check = AnnotationCheck::new("dashboard", None, true, Severity::Warning);
        let rule = parse_rule("- alert: Down\n  expr: up == (\n  annotations:\n    summary: down\n");
        assert!(rule.expr().unwrap().syntax_error().is_some());
        assert!(check.check(&rule).is_empty());
    }
}
