use std::fmt;

use regex::Regex;

use super::{Check, Problem, Severity};
use crate::parser::promql::Expr;
use crate::parser::Rule;

pub const WITHOUT_CHECK_NAME: &str = "promql/without";
pub const BY_CHECK_NAME: &str = "promql/by";

/// Aggregations that select series instead of merging them; labels pass
/// through untouched.
const SELECTING: &[&str] = &["topk", "bottomk", "limitk", "limit_ratio"];

/// Enforces that aggregations keep (or strip) a given label.
///
/// One instance checks one label for one grouping style: the `without`
/// variant only looks at `without(...)` aggregations and the `by` variant at
/// `by(...)` ones, including plain `sum(foo)` which groups by nothing.
pub struct AggregationCheck {
    name_regex: Option<Regex>,
    label: String,
    keep: bool,
    without: bool,
    severity: Severity,
}

impl AggregationCheck {
    pub fn without(name_regex: Option<Regex>, label: &str, keep: bool, severity: Severity) -> Self {
        Self {
            name_regex,
            label: label.to_string(),
            keep,
            without: true,
            severity,
        }
    }

    pub fn by(name_regex: Option<Regex>, label: &str, keep: bool, severity: Severity) -> Self {
        Self {
            name_regex,
            label: label.to_string(),
            keep,
            without: false,
            severity,
        }
    }

    fn pattern(&self) -> &str {
        self.name_regex.as_ref().map(Regex::as_str).unwrap_or("^.+$")
    }

    fn check_node(&self, node: &Expr, out: &mut Vec<(String, String)>) {
        if let Expr::Aggregate {
            op,
            grouping,
            without,
            ..
        } = node
        {
            if !SELECTING.contains(&op.as_str()) {
                // count() and count_values() build new series from scratch.
                if op != "count" && op != "count_values" && *without == self.without {
                    if let Some(text) = self.judge(grouping) {
                        out.push((node.to_string(), text));
                    }
                }
                return;
            }
        }
        for child in node.children() {
            self.check_node(child, out);
        }
    }

    fn judge(&self, grouping: &[String]) -> Option<String> {
        let listed = grouping.iter().any(|g| g == &self.label);
        let label = &self.label;
        let pattern = self.pattern();
        match (self.without, self.keep, listed) {
            (true, true, true) => Some(format!(
                "{label} label is required and should be preserved when aggregating \"{pattern}\" rules, remove {label} from without()"
            )),
            (true, false, false) => Some(format!(
                "{label} label should be removed when aggregating \"{pattern}\" rules, use without({label}, ...)"
            )),
            (false, true, false) => Some(format!(
                "{label} label is required and should be preserved when aggregating \"{pattern}\" rules, use by({label}, ...)"
            )),
            (false, false, true) => Some(format!(
                "{label} label should be removed when aggregating \"{pattern}\" rules, remove {label} from by()"
            )),
            _ => None,
        }
    }
}

impl fmt::Display for AggregationCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({}:{})", self.name(), self.label, self.keep)
    }
}

impl Check for AggregationCheck {
    fn name(&self) -> &'static str {
        if self.without {
            WITHOUT_CHECK_NAME
        } else {
            BY_CHECK_NAME
        }
    }

    fn check(&self, rule: &Rule) -> Vec<Problem> {
        let (Some(expr), Some(name)) = (rule.expr(), rule.name()) else {
            return Vec::new();
        };
        let Some(query) = expr.query() else {
            return Vec::new();
        };
        if let Some(re) = &self.name_regex {
            if !re.is_match(name) {
                return Vec::new();
            }
        }

        let mut found = Vec::new();
        self.check_node(query, &mut found);
        found
            .into_iter()
            .map(|(fragment, text)| {
                Problem::new(fragment, expr.lines(), self.name(), text, self.severity)
            })
            .collect()
    }
}
