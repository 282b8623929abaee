use std::fmt;
use std::time::Duration;

use super::{Check, Problem, Severity};
use crate::duration::format_duration;
use crate::parser::promql::Expr;
use crate::parser::Rule;

pub const RATE_CHECK_NAME: &str = "promql/rate";

const COUNTER_FUNCTIONS: &[&str] = &["rate", "irate", "increase", "deriv", "delta", "idelta"];

/// Flags counter functions whose range can't hold two scrapes.
///
/// Created once per Prometheus target, it only needs the target's scrape
/// interval and never sends a query.
pub struct RateCheck {
    server: String,
    scrape_interval: Duration,
    severity: Severity,
}

impl RateCheck {
    pub fn new(server: &str, scrape_interval: Duration, severity: Severity) -> Self {
        Self {
            server: server.to_string(),
            scrape_interval,
            severity,
        }
    }
}

impl fmt::Display for RateCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", RATE_CHECK_NAME, self.server)
    }
}

impl Check for RateCheck {
    fn name(&self) -> &'static str {
        RATE_CHECK_NAME
    }

    fn check(&self, rule: &Rule) -> Vec<Problem> {
        let Some(expr) = rule.expr() else {
            return Vec::new();
        };
        let Some(query) = expr.query() else {
            return Vec::new();
        };

        let minimum = self.scrape_interval * 2;
        let mut problems = Vec::new();
        query.walk(&mut |node| {
            let Expr::Call { func, args } = node else {
                return;
            };
            if !COUNTER_FUNCTIONS.contains(&func.as_str()) {
                return;
            }
            let range = match args.first().map(Expr::unparen) {
                Some(Expr::MatrixSelector { range, .. }) => *range,
                Some(Expr::Subquery { range, .. }) => *range,
                _ => return,
            };
            if range < minimum {
                problems.push(Problem::new(
                    node.to_string(),
                    expr.lines(),
                    RATE_CHECK_NAME,
                    format!(
                        "duration for {func}() must be at least 2 x scrape_interval, {} is using {} scrape_interval",
                        self.server,
                        format_duration(self.scrape_interval)
                    ),
                    self.severity,
                ));
            }
        });
        problems
    }
}
