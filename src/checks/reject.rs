use std::fmt;

use regex::Regex;

use super::{Check, Problem, Severity};
use crate::parser::{Rule, YamlMap};

pub const REJECT_CHECK_NAME: &str = "rule/reject";

/// Which part of a label or annotation the pattern is matched against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectTarget {
    LabelKeys,
    LabelValues,
    AnnotationKeys,
    AnnotationValues,
}

impl RejectTarget {
    fn describe(self) -> &'static str {
        match self {
            Self::LabelKeys => "label key",
            Self::LabelValues => "label value",
            Self::AnnotationKeys => "annotation key",
            Self::AnnotationValues => "annotation value",
        }
    }

    fn on_keys(self) -> bool {
        matches!(self, Self::LabelKeys | Self::AnnotationKeys)
    }
}

/// Flags labels or annotations whose key or value matches a pattern.
pub struct RejectCheck {
    target: RejectTarget,
    regex: Regex,
    severity: Severity,
}

impl RejectCheck {
    pub fn new(target: RejectTarget, regex: Regex, severity: Severity) -> Self {
        Self {
            target,
            regex,
            severity,
        }
    }

    fn scan(&self, map: &YamlMap) -> Vec<Problem> {
        map.items
            .iter()
            .filter_map(|kv| {
                let node = if self.target.on_keys() {
                    &kv.key
                } else {
                    &kv.value
                };
                if !self.regex.is_match(&node.value) {
                    return None;
                }
                Some(Problem::new(
                    node.value.clone(),
                    kv.lines(),
                    REJECT_CHECK_NAME,
                    format!(
                        "{} {} is not allowed to match \"{}\"",
                        self.target.describe(),
                        node.value,
                        self.regex.as_str()
                    ),
                    self.severity,
                ))
            })
            .collect()
    }
}

impl fmt::Display for RejectCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let side = if self.target.on_keys() { "key" } else { "value" };
        write!(f, "{}({}=~{})", REJECT_CHECK_NAME, side, self.regex.as_str())
    }
}

impl Check for RejectCheck {
    fn name(&self) -> &'static str {
        REJECT_CHECK_NAME
    }

    fn check(&self, rule: &Rule) -> Vec<Problem> {
        match rule.expr() {
            Some(expr) if expr.syntax_error().is_none() => {}
            _ => return Vec::new(),
        }
        let map = match self.target {
            RejectTarget::LabelKeys | RejectTarget::LabelValues => rule.labels(),
            RejectTarget::AnnotationKeys | RejectTarget::AnnotationValues => rule.annotations(),
        };
        map.map(|m| self.scan(m)).unwrap_or_default()
    }
}
