use std::fmt;

use regex::Regex;

use super::{Check, Problem, Severity};
use crate::parser::Rule;

pub const LABEL_CHECK_NAME: &str = "rule/label";

/// Requires a static label on a rule, optionally with a value matching a
/// pattern.
pub struct LabelCheck {
    key: String,
    value_regex: Option<Regex>,
    required: bool,
    severity: Severity,
}

impl LabelCheck {
    pub fn new(key: &str, value_regex: Option<Regex>, required: bool, severity: Severity) -> Self {
        Self {
            key: key.to_string(),
            value_regex,
            required,
            severity,
        }
    }

    fn missing(&self, lines: Vec<usize>) -> Vec<Problem> {
        if !self.required {
            return Vec::new();
        }
        vec![Problem::new(
            "",
            lines,
            LABEL_CHECK_NAME,
            format!("{} label is required", self.key),
            self.severity,
        )]
    }
}

impl fmt::Display for LabelCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({}:{})", LABEL_CHECK_NAME, self.key, self.required)
    }
}

impl Check for LabelCheck {
    fn name(&self) -> &'static str {
        LABEL_CHECK_NAME
    }

    fn check(&self, rule: &Rule) -> Vec<Problem> {
        match rule.expr() {
            Some(expr) if expr.syntax_error().is_none() => {}
            _ => return Vec::new(),
        }

        let Some(labels) = rule.labels() else {
            return self.missing(rule.lines());
        };
        let Some(label) = labels.get(&self.key) else {
            return self.missing(labels.position().lines());
        };

        match &self.value_regex {
            Some(re) if !re.is_match(&label.value.value) => vec![Problem::new(
                format!("{}: {}", self.key, label.value.value),
                label.lines(),
                LABEL_CHECK_NAME,
                format!("{} label value must match \"{}\"", self.key, re.as_str()),
                self.severity,
            )],
            _ => Vec::new(),
        }
    }
}
