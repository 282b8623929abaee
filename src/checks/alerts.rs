use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::debug;

use super::{Check, Problem, Severity};
use crate::duration::{format_duration, parse_duration};
use crate::parser::Rule;
use crate::promapi::{PrometheusServer, RangeSample};

pub const ALERTS_CHECK_NAME: &str = "alerts/count";

/// Replays an alerting rule over the recent past and reports how many
/// alerts it would have fired.
pub struct AlertsCheck {
    server: PrometheusServer,
    range: Duration,
    step: Duration,
    resolve: Duration,
}

impl AlertsCheck {
    pub fn new(server: PrometheusServer, range: Duration, step: Duration, resolve: Duration) -> Self {
        Self {
            server,
            range,
            step,
            resolve,
        }
    }
}

impl fmt::Display for AlertsCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", ALERTS_CHECK_NAME, self.server.name)
    }
}

impl Check for AlertsCheck {
    fn name(&self) -> &'static str {
        ALERTS_CHECK_NAME
    }

    fn check(&self, rule: &Rule) -> Vec<Problem> {
        let Some(alert) = rule.alerting() else {
            return Vec::new();
        };
        if alert.expr.syntax_error().is_some() {
            return Vec::new();
        }

        let expr = alert.expr.value.value.trim();
        let end = Utc::now();
        let Some(start) = chrono::Duration::from_std(self.range)
            .ok()
            .and_then(|range| end.checked_sub_signed(range))
        else {
            return vec![Problem::new(
                expr,
                alert.expr.lines(),
                ALERTS_CHECK_NAME,
                format!(
                    "query using {} cannot look back {}, the range is too long",
                    self.server.name,
                    format_duration(self.range)
                ),
                Severity::Bug,
            )];
        };
        debug!(
            server = %self.server.name,
            query = %expr,
            range = %format_duration(self.range),
            step = %format_duration(self.step),
            resolve = %format_duration(self.resolve),
            "replaying alert"
        );

        let result = match self.server.api.range_query(expr, start, end, self.step) {
            Ok(result) => result,
            Err(err) => {
                return vec![Problem::new(
                    expr,
                    alert.expr.lines(),
                    ALERTS_CHECK_NAME,
                    format!("query using {} failed with: {}", self.server.name, err),
                    Severity::Bug,
                )]
            }
        };

        // The yaml parser already rejected invalid values.
        let pending = alert
            .for_
            .as_ref()
            .and_then(|kv| parse_duration(&kv.value.value).ok());
        let step = chrono::Duration::from_std(self.step).unwrap_or(chrono::Duration::MAX);
        let alerts: usize = result
            .samples
            .iter()
            .map(|sample| count_alerts(sample, step, pending))
            .sum();

        let mut lines = alert.expr.lines();
        if let Some(kv) = &alert.for_ {
            lines.extend(kv.lines());
        }

        let span = (result.end - result.start).to_std().unwrap_or_default();
        let span = Duration::from_secs(span.as_secs());
        vec![Problem::new(
            expr,
            lines,
            ALERTS_CHECK_NAME,
            format!(
                "query using {} would trigger {} alert(s) in the last {}",
                self.server.name,
                alerts,
                format_duration(span)
            ),
            Severity::Information,
        )]
    }
}

/// Count firing occurrences in one series.
///
/// A value more than one step after the previous one starts a new
/// occurrence. Without a pending duration it fires at once; with one it
/// fires once the occurrence has lasted that long. Deadlines past the last
/// representable timestamp are never reached.
fn count_alerts(sample: &RangeSample, step: chrono::Duration, pending: Option<Duration>) -> usize {
    let pending = pending.map(|p| chrono::Duration::from_std(p).ok());
    let mut alerts = 0;
    let mut firing = false;
    let mut fires_at: Option<DateTime<Utc>> = None;
    let mut last: Option<DateTime<Utc>> = None;

    for value in &sample.values {
        let ts = value.timestamp;
        let is_new = last.map_or(true, |last| {
            last.checked_add_signed(step).is_some_and(|next| ts > next)
        });
        if is_new {
            match pending {
                None => {
                    firing = true;
                    alerts += 1;
                }
                Some(pending) => {
                    firing = false;
                    fires_at = pending.and_then(|p| ts.checked_add_signed(p));
                }
            }
        } else if !firing && fires_at.is_some_and(|at| ts >= at) {
            firing = true;
            alerts += 1;
        }
        last = Some(ts);
    }
    alerts
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    use crate::checks::testing::{api_error, parse_rule, server, FakePrometheus};
    use crate::promapi::{Labels, RangeQueryResult, SamplePair};
    use pretty_assertions::assert_eq;

    fn minute(n: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_600_000_000, 0).unwrap() + chrono::Duration::minutes(n)
    }

    fn series(minutes: &[i64]) -> RangeSample {
        RangeSample {
            labels: Labels::new(),
            values: minutes
                .iter()
                .map(|m| SamplePair {
                    timestamp: minute(*m),
                    value: 1.0,
                })
                .collect(),
        }
    }

    fn result(samples: Vec<RangeSample>) -> RangeQueryResult {
        RangeQueryResult {
            samples,
            start: minute(0),
            end: minute(24 * 60),
            duration: Duration::from_millis(10),
        }
    }

    fn check(fake: FakePrometheus) -> AlertsCheck {
        let (srv, _) = server("prom", fake);
        AlertsCheck::new(
            srv,
            Duration::from_secs(86400),
            Duration::from_secs(60),
            Duration::from_secs(300),
        )
    }

    const ALERT_FOR_5M: &str = "- alert: Foo\n  expr: up == 0\n  for: 5m\n";

    #[test]
    fn pending_alert_fires_after_for_duration() {
        let one = chrono::Duration::minutes(1);
        let five = Some(Duration::from_secs(300));
        assert_eq!(count_alerts(&series(&[0, 1, 2, 3, 4]), one, five), 0);
        assert_eq!(count_alerts(&series(&[0, 1, 2, 3, 4, 5]), one, five), 1);
        assert_eq!(count_alerts(&series(&(0..30).collect::<Vec<_>>()), one, five), 1);
    }

    #[test]
    fn gaps_start_new_occurrences() {
        let one = chrono::Duration::minutes(1);
        let five = Some(Duration::from_secs(300));
        let mut minutes: Vec<i64> = (0..6).collect();
        minutes.extend(10..16);
        assert_eq!(count_alerts(&series(&minutes), one, five), 2);

        // Second run is too short to fire.
        let mut minutes: Vec<i64> = (0..6).collect();
        minutes.extend(10..13);
        assert_eq!(count_alerts(&series(&minutes), one, five), 1);
    }

    #[test]
    fn without_for_every_occurrence_fires() {
        let one = chrono::Duration::minutes(1);
        assert_eq!(count_alerts(&series(&[0, 1, 2, 5, 9, 10]), one, None), 3);
        assert_eq!(count_alerts(&series(&[]), one, None), 0);
    }

    #[test]
    fn oversized_durations_never_panic() {
        let one = chrono::Duration::minutes(1);
        let forever = parse_duration("1000000y").ok();
        assert_eq!(count_alerts(&series(&(0..10).collect::<Vec<_>>()), one, forever), 0);
        assert_eq!(count_alerts(&series(&[0, 1]), chrono::Duration::MAX, None), 1);

        let latest = RangeSample {
            labels: Labels::new(),
            values: vec![
                SamplePair {
                    timestamp: DateTime::<Utc>::MAX_UTC,
                    value: 1.0,
                },
                SamplePair {
                    timestamp: DateTime::<Utc>::MAX_UTC,
                    value: 1.0,
                },
            ],
        };
        assert_eq!(count_alerts(&latest, one, Some(Duration::from_secs(300))), 0);

        let fake = FakePrometheus::new().with_range("up == 0", result(vec![series(&[0, 1])]));
        let problems = check(fake).check(&parse_rule("- alert: Foo\n  expr: up == 0\n  for: 1000000y\n"));
        assert_eq!(
            problems[0].text,
            "query using prom would trigger 0 alert(s) in the last 1d"
        );
    }

    #[test]
    fn range_past_representable_time_is_a_bug() {
        let (srv, fake) = server("prom", FakePrometheus::new());
        let check = AlertsCheck::new(
            srv,
            parse_duration("1000000y").unwrap(),
            Duration::from_secs(60),
            Duration::from_secs(300),
        );
        let problems = check.check(&parse_rule(ALERT_FOR_5M));
        assert_eq!(
            problems,
            vec![Problem::new(
                "up == 0",
                vec![2],
                "alerts/count",
                "query using prom cannot look back 1000000y, the range is too long",
                Severity::Bug,
            )]
        );
        assert!(fake.queries().is_empty());
    }

    #[test]
    fn reports_count_over_covered_range() {
        let fake = FakePrometheus::new().with_range(
            "up == 0",
            result(vec![series(&(0..10).collect::<Vec<_>>()), series(&[20, 21])]),
        );
        let problems = check(fake).check(&parse_rule(ALERT_FOR_5M));
        assert_eq!(
            problems,
            vec![Problem::new(
                "up == 0",
                vec![2, 3],
                "alerts/count",
                "query using prom would trigger 1 alert(s) in the last 1d",
                Severity::Information,
            )]
        );
    }

    #[test]
    fn span_follows_returned_range() {
        let mut truncated = result(vec![series(&[0])]);
        truncated.end = minute(90);
        let fake = FakePrometheus::new().with_range("up == 0", truncated);
        let problems = check(fake).check(&parse_rule("- alert: Foo\n  expr: up == 0\n"));
        assert_eq!(
            problems[0].text,
            "query using prom would trigger 1 alert(s) in the last 1h30m"
        );
        assert_eq!(problems[0].lines, vec![2]);
    }

    #[test]
    fn query_errors_are_bugs() {
        let fake = FakePrometheus::new().with_error("up == 0", api_error("bad_data", "range too long"));
        let problems = check(fake).check(&parse_rule(ALERT_FOR_5M));
        assert_eq!(problems.len(), 1);
        assert_eq!(problems[0].severity, Severity::Bug);
        assert_eq!(
            problems[0].text,
            "query using prom failed with: bad_data: range too long"
        );
        assert_eq!(problems[0].lines, vec![2]);
    }

    #[test]
    fn skips_recording_rules_and_syntax_errors() {
        let (srv, fake) = server("prom", FakePrometheus::new());
        let check = AlertsCheck::new(
            srv,
            Duration::from_secs(3600),
            Duration::from_secs(60),
            Duration::from_secs(300),
        );
        assert!(check
            .check(&parse_rule("- record: foo\n  expr: up == 0\n"))
            .is_empty());
        assert!(check
            .check(&parse_rule("- alert: Foo\n  expr: sum(up) without(\n"))
            .is_empty());
        assert!(fake.queries().is_empty());
    }
}
