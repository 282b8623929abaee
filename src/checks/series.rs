use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use super::{Check, Problem, Severity};
use crate::parser::promql::{MatchOp, VectorSelector};
use crate::parser::{RecordingRule, Rule};
use crate::promapi::PrometheusServer;

pub const SERIES_CHECK_NAME: &str = "query/series";

/// Verifies that every selector in a rule returns something.
///
/// Each selector is sent on its own as `count(<selector>)`. Selectors with an
/// `offset` look at the past and are skipped. With `ignore_recording_rules`
/// set, selectors for series produced by a recording rule anywhere in the
/// scan are skipped too, since the backend may not have evaluated that rule
/// yet.
pub struct SeriesCheck {
    server: PrometheusServer,
    severity: Severity,
    ignore_recording_rules: bool,
    recording_rules: Arc<Vec<RecordingRule>>,
}

impl SeriesCheck {
    pub fn new(
        server: PrometheusServer,
        severity: Severity,
        ignore_recording_rules: bool,
        recording_rules: Arc<Vec<RecordingRule>>,
    ) -> Self {
        Self {
            server,
            severity,
            ignore_recording_rules,
            recording_rules,
        }
    }

    fn is_recorded(&self, selector: &VectorSelector) -> bool {
        if let Some(name) = selector.metric_name() {
            return self
                .recording_rules
                .iter()
                .any(|rr| rr.record.value.value == name);
        }

        let required: Vec<_> = selector
            .matchers
            .iter()
            .filter(|m| m.op == MatchOp::Equal)
            .collect();
        if required.is_empty() {
            return false;
        }
        self.recording_rules.iter().any(|rr| {
            let Some(labels) = &rr.labels else {
                return false;
            };
            required.iter().all(|m| {
                labels
                    .get(&m.name)
                    .is_some_and(|kv| kv.value.value == m.value)
            })
        })
    }

    fn failed(&self, fragment: &str, lines: Vec<usize>, err: impl fmt::Display) -> Problem {
        Problem::new(
            fragment,
            lines,
            SERIES_CHECK_NAME,
            format!("query using {} failed with: {}", self.server.name, err),
            Severity::Bug,
        )
    }
}

impl fmt::Display for SeriesCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", SERIES_CHECK_NAME, self.server.name)
    }
}

impl Check for SeriesCheck {
    fn name(&self) -> &'static str {
        SERIES_CHECK_NAME
    }

    fn check(&self, rule: &Rule) -> Vec<Problem> {
        let Some(expr) = rule.expr() else {
            return Vec::new();
        };
        let Some(query) = expr.query() else {
            return Vec::new();
        };

        let mut problems = Vec::new();
        let mut done = HashSet::new();

        for selector in query.selectors() {
            if selector.offset.is_some() {
                continue;
            }
            let fragment = selector.to_string();
            if !done.insert(fragment.clone()) {
                continue;
            }
            if self.ignore_recording_rules && self.is_recorded(selector) {
                debug!(selector = %fragment, "skipping series produced by a recording rule");
                continue;
            }

            let q = format!("count({fragment})");
            debug!(server = %self.server.name, query = %q, "checking if series exists");
            let found = match self.server.api.query(&q) {
                Ok(result) => !result.series.is_empty(),
                Err(err) => {
                    problems.push(self.failed(&fragment, expr.lines(), err));
                    return problems;
                }
            };
            if found {
                continue;
            }

            // Tell "metric is missing" apart from "labels don't match".
            let bare = selector.bare();
            let mut missing = fragment;
            if bare.metric_name().is_some() && selector.label_matchers().next().is_some() {
                let bare_name = bare.to_string();
                match self.server.api.query(&format!("count({bare_name})")) {
                    Ok(result) if result.series.is_empty() => missing = bare_name,
                    Ok(_) => {}
                    Err(err) => {
                        problems.push(self.failed(&bare_name, expr.lines(), err));
                        return problems;
                    }
                }
            }

            problems.push(Problem::new(
                missing.clone(),
                expr.lines(),
                SERIES_CHECK_NAME,
                format!(
                    "query using {} completed without any results for {}",
                    self.server.name, missing
                ),
                self.severity,
            ));
        }
        problems
    }
}
