//! Rule checks.
//!
//! Every check implements [`Check`]: given a parsed rule it returns zero or
//! more [`Problem`]s. Checks hold all of their state from construction
//! (thresholds, severity, backend target) and never fail; errors from a
//! backend become problems. A rule whose expression does not parse is a no-op
//! for every check.

pub mod aggregation;
pub mod alerts;
pub mod annotation;
pub mod cost;
pub mod label;
pub mod problem;
pub mod rate;
pub mod reject;
pub mod series;
pub mod value;

use std::fmt;

use serde::Serialize;

use crate::parser::Rule;

pub use aggregation::{AggregationCheck, BY_CHECK_NAME, WITHOUT_CHECK_NAME};
pub use alerts::{AlertsCheck, ALERTS_CHECK_NAME};
pub use annotation::{AnnotationCheck, ANNOTATION_CHECK_NAME};
pub use cost::{CostCheck, COST_CHECK_NAME};
pub use label::{LabelCheck, LABEL_CHECK_NAME};
pub use problem::{Problem, Severity};
pub use rate::{RateCheck, RATE_CHECK_NAME};
pub use reject::{RejectCheck, RejectTarget, REJECT_CHECK_NAME};
pub use series::{SeriesCheck, SERIES_CHECK_NAME};
pub use value::{ValueCheck, VALUE_CHECK_NAME};

/// A check runs against a single rule and reports problems.
///
/// `Display` renders the check with its parameters, e.g. `alerts/count(prom)`.
pub trait Check: Send + Sync + fmt::Display {
    /// Stable identifier used by config lists and disable comments.
    fn name(&self) -> &'static str;

    fn check(&self, rule: &Rule) -> Vec<Problem>;
}

/// Catalogue entry, used by `list-checks`.
#[derive(Debug, Clone, Serialize)]
pub struct CheckMetadata {
    pub id: &'static str,
    pub description: &'static str,
    pub default_severity: Severity,
    /// Whether the check queries a Prometheus server.
    pub online: bool,
}

/// Every check the linter knows about.
pub fn catalogue() -> Vec<CheckMetadata> {
    vec![
        CheckMetadata {
            id: WITHOUT_CHECK_NAME,
            description: "Label must be kept or stripped by without() aggregations",
            default_severity: Severity::Warning,
            online: false,
        },
        CheckMetadata {
            id: BY_CHECK_NAME,
            description: "Label must be kept or stripped by by() aggregations",
            default_severity: Severity::Warning,
            online: false,
        },
        CheckMetadata {
            id: RATE_CHECK_NAME,
            description: "Counter functions need a range of at least 2x scrape interval",
            default_severity: Severity::Bug,
            online: true,
        },
        CheckMetadata {
            id: ANNOTATION_CHECK_NAME,
            description: "Alert annotation must be present or match a pattern",
            default_severity: Severity::Warning,
            online: false,
        },
        CheckMetadata {
            id: LABEL_CHECK_NAME,
            description: "Rule label must be present or match a pattern",
            default_severity: Severity::Warning,
            online: false,
        },
        CheckMetadata {
            id: SERIES_CHECK_NAME,
            description: "Every selector must return series",
            default_severity: Severity::Warning,
            online: true,
        },
        CheckMetadata {
            id: COST_CHECK_NAME,
            description: "Reports how many series the query returns and its memory estimate",
            default_severity: Severity::Bug,
            online: true,
        },
        CheckMetadata {
            id: ALERTS_CHECK_NAME,
            description: "Estimates how many alerts the rule would have fired",
            default_severity: Severity::Information,
            online: true,
        },
        CheckMetadata {
            id: VALUE_CHECK_NAME,
            description: "Alert query must be able to both fire and resolve",
            default_severity: Severity::Bug,
            online: false,
        },
        CheckMetadata {
            id: REJECT_CHECK_NAME,
            description: "Label or annotation keys and values must not match a pattern",
            default_severity: Severity::Bug,
            online: false,
        },
    ]
}

pub fn is_known_check(name: &str) -> bool {
    catalogue().iter().any(|c| c.id == name)
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn catalogue_ids_are_unique() {
        let ids: HashSet<&str> = catalogue().iter().map(|c| c.id).collect();
        assert_eq!(ids.len(), catalogue().len());
        assert!(is_known_check("alerts/count"));
        assert!(is_known_check("query/series"));
        assert!(!is_known_check("query/unknown"));
    }
}
