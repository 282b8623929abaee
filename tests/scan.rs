use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use pretty_assertions::assert_eq;

use alertlint::checks::{Problem, Severity};
use alertlint::config::Config;
use alertlint::discovery::{find_files, AllLines};
use alertlint::parser::YamlRuleParser;
use alertlint::promapi::{
    Labels, PrometheusApi, PrometheusServer, QueryError, QueryResult, RangeQueryResult,
    RangeSample, Sample, SamplePair,
};
use alertlint::reporter::Summary;
use alertlint::{ScanOptions, Scanner};

#[derive(Default)]
struct Backend {
    series: HashMap<String, Vec<f64>>,
    errors: HashMap<String, QueryError>,
    ranges: HashMap<String, Vec<RangeSample>>,
}

impl PrometheusApi for Backend {
    fn query(&self, expr: &str) -> Result<QueryResult, QueryError> {
        if let Some(err) = self.errors.get(expr) {
            return Err(err.clone());
        }
        let series = self
            .series
            .get(expr)
            .map(|values| {
                values
                    .iter()
                    .map(|value| Sample {
                        labels: Labels::new(),
                        value: *value,
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(QueryResult {
            series,
            duration: Duration::from_millis(500),
        })
    }

    fn range_query(
        &self,
        expr: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        _step: Duration,
    ) -> Result<RangeQueryResult, QueryError> {
        if let Some(err) = self.errors.get(expr) {
            return Err(err.clone());
        }
        Ok(RangeQueryResult {
            samples: self.ranges.get(expr).cloned().unwrap_or_default(),
            start,
            end,
            duration: Duration::from_millis(20),
        })
    }
}

fn write(dir: &Path, name: &str, content: &str) -> String {
    let path = dir.join(name);
    fs::write(&path, content).unwrap();
    path.display().to_string()
}

fn scan(config: &str, backend: Backend, paths: &[String]) -> Summary {
    let config = Config::from_toml(config).unwrap();
    let servers = vec![PrometheusServer::new(
        "prom",
        "http://localhost:9090",
        Arc::new(backend),
    )];
    let options = ScanOptions::default();
    Scanner {
        config: &config,
        servers: &servers,
        parser: &YamlRuleParser,
        finder: &AllLines,
        options: &options,
    }
    .scan(find_files(paths).unwrap())
}

fn problems(summary: &Summary) -> Vec<Problem> {
    summary
        .sorted_reports()
        .into_iter()
        .map(|r| r.problem.clone())
        .collect()
}

#[test]
fn cost_of_a_single_series() {
    let dir = tempfile::tempdir().unwrap();
    let path = write(dir.path(), "rules.yml", "- record: foo\n  expr: sum(foo)\n");
    let mut backend = Backend::default();
    backend.series.insert("count(sum(foo))".into(), vec![1.0]);

    let summary = scan(
        "[[rule]]\n[rule.cost]\nbytes_per_sample = 4096\n",
        backend,
        &[path],
    );
    assert_eq!(
        problems(&summary),
        vec![Problem::new(
            "sum(foo)",
            [2],
            "query/cost",
            "query using prom completed in 0.50s returning 1 result(s) with 4.0KiB estimated memory usage",
            Severity::Information,
        )]
    );
}

#[test]
fn missing_series() {
    let dir = tempfile::tempdir().unwrap();
    let path = write(dir.path(), "rules.yml", "- record: foo\n  expr: sum(notfound)\n");

    let summary = scan("[[rule]]\n[rule.series]\n", Backend::default(), &[path]);
    assert_eq!(
        problems(&summary),
        vec![Problem::new(
            "notfound",
            [2],
            "query/series",
            "query using prom completed without any results for notfound",
            Severity::Warning,
        )]
    );
}

#[test]
fn backend_errors_are_reported_per_check() {
    let dir = tempfile::tempdir().unwrap();
    let path = write(
        dir.path(),
        "rules.yml",
        "- alert: Down\n  expr: up == 0\n  for: 5m\n",
    );
    let mut backend = Backend::default();
    let err = QueryError::Api {
        error_type: "bad_data".into(),
        message: "unhandled path".into(),
    };
    backend.errors.insert("count(up)".into(), err.clone());
    backend.errors.insert("count(up == 0)".into(), err.clone());
    backend.errors.insert("up == 0".into(), err);

    let summary = scan(
        "[[rule]]\n[rule.series]\n[rule.cost]\n[rule.alerts]\n",
        backend,
        &[path],
    );
    let mut found: Vec<(String, Severity, String)> = problems(&summary)
        .into_iter()
        .map(|p| (p.reporter, p.severity, p.text))
        .collect();
    found.sort();
    let text = "query using prom failed with: bad_data: unhandled path".to_string();
    assert_eq!(
        found,
        vec![
            ("alerts/count".into(), Severity::Bug, text.clone()),
            ("query/cost".into(), Severity::Bug, text.clone()),
            ("query/series".into(), Severity::Bug, text),
        ]
    );
}

#[test]
fn alert_history_is_counted() {
    let dir = tempfile::tempdir().unwrap();
    let path = write(
        dir.path(),
        "rules.yml",
        "- alert: Down\n  expr: up == 0\n  for: 5m\n",
    );
    let base = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
    let values = (0..10)
        .chain(30..40)
        .map(|m| SamplePair {
            timestamp: base + chrono::Duration::minutes(m),
            value: 0.0,
        })
        .collect();
    let mut backend = Backend::default();
    backend.ranges.insert(
        "up == 0".into(),
        vec![RangeSample {
            labels: Labels::new(),
            values,
        }],
    );

    let summary = scan("[[rule]]\n[rule.alerts]\nrange = \"1h\"\n", backend, &[path]);
    assert_eq!(
        problems(&summary),
        vec![Problem::new(
            "up == 0",
            [2, 3],
            "alerts/count",
            "query using prom would trigger 2 alert(s) in the last 1h",
            Severity::Information,
        )]
    );
}

#[test]
fn disable_comment_and_parse_failures() {
    let dir = tempfile::tempdir().unwrap();
    let ok = write(
        dir.path(),
        "ok.yml",
        "# alertlint disable query/series\n- record: foo\n  expr: sum(notfound)\n",
    );
    let broken = write(dir.path(), "broken.yml", "- record: [\n");

    let summary = scan(
        "[[rule]]\n[rule.series]\n",
        Backend::default(),
        &[ok, broken.clone()],
    );
    assert_eq!(summary.file_changes.len(), 2);
    assert_eq!(summary.reports.len(), 1);
    assert_eq!(summary.reports[0].path, broken);
    assert_eq!(summary.reports[0].problem.reporter, "alertlint/parse");
    assert_eq!(summary.reports[0].problem.severity, Severity::Fatal);
    assert!(!summary.verdict(Severity::Fatal).pass);
}

#[test]
fn oversized_durations_do_not_abort_the_scan() {
    assert!(Config::from_toml("[[rule]]\n[rule.alerts]\nrange = \"1000000y\"\n").is_err());

    let dir = tempfile::tempdir().unwrap();
    let path = write(
        dir.path(),
        "rules.yml",
        "- alert: Down\n  expr: up == 0\n  for: 1000000y\n",
    );
    let base = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
    let mut backend = Backend::default();
    backend.ranges.insert(
        "up == 0".into(),
        vec![RangeSample {
            labels: Labels::new(),
            values: (0..3)
                .map(|m| SamplePair {
                    timestamp: base + chrono::Duration::minutes(m),
                    value: 0.0,
                })
                .collect(),
        }],
    );

    let summary = scan("[[rule]]\n[rule.alerts]\nrange = \"1h\"\n", backend, &[path]);
    assert_eq!(
        problems(&summary),
        vec![Problem::new(
            "up == 0",
            [2, 3],
            "alerts/count",
            "query using prom would trigger 0 alert(s) in the last 1h",
            Severity::Information,
        )]
    );
}
