//! The scan pipeline.
//!
//! Every file is parsed up front on the calling thread, so the recording
//! rules of the whole scan are known before any check runs. Each
//! (rule, check) pair then becomes a job on a bounded queue drained by a
//! fixed pool of workers, and every problem they return is collected into a
//! [`Summary`].

use std::fs::File;
use std::io::Read;
use std::sync::mpsc::{sync_channel, Receiver};
use std::sync::{Arc, Mutex};
use std::thread;

use tracing::{debug, error, info};

use crate::checks::{Check, Problem, Severity};
use crate::config::Config;
use crate::discovery::{FileChanges, LineFinder, LineResult};
use crate::parser::{RecordingRule, Rule, RuleParser};
use crate::promapi::PrometheusServer;
use crate::reporter::{format_line_ranges, Report, Summary};

/// Reporter id used for file and rule parse failures.
pub const PARSE_REPORTER: &str = "alertlint/parse";

const QUEUE_SIZE: usize = 100;

/// Options for a scan invocation.
#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// Number of concurrent check workers.
    pub workers: usize,
    /// When non-empty, only these checks run.
    pub enabled: Vec<String>,
    pub disabled: Vec<String>,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            workers: 10,
            enabled: Vec::new(),
            disabled: Vec::new(),
        }
    }
}

struct ParsedFile {
    path: String,
    lines: LineResult,
    rules: Vec<Arc<Rule>>,
}

struct ScanJob {
    path: String,
    rule: Arc<Rule>,
    /// `None` for a rule that failed to parse.
    check: Option<Box<dyn Check>>,
}

/// Everything a scan needs besides the files.
pub struct Scanner<'a> {
    pub config: &'a Config,
    pub servers: &'a [PrometheusServer],
    pub parser: &'a dyn RuleParser,
    pub finder: &'a dyn LineFinder,
    pub options: &'a ScanOptions,
}

impl Scanner<'_> {
    pub fn scan(&self, files: FileChanges) -> Summary {
        let mut summary = Summary {
            file_changes: files,
            reports: Vec::new(),
        };

        let mut parsed = Vec::new();
        let mut recording_rules: Vec<RecordingRule> = Vec::new();
        for path in summary.file_changes.paths() {
            match self.parse_file(path) {
                Ok(file) => {
                    recording_rules.extend(file.rules.iter().filter_map(|r| r.recording().cloned()));
                    parsed.push(file);
                }
                Err(report) => summary.reports.push(report),
            }
        }

        let recording_rules = Arc::new(recording_rules);
        let jobs = self.build_jobs(parsed, &recording_rules);
        debug!(jobs = jobs.len(), workers = self.options.workers, "running checks");
        summary.reports.extend(run_jobs(jobs, self.options.workers));
        summary
    }

    fn parse_file(&self, path: &str) -> Result<ParsedFile, Report> {
        let lines = self.finder.find(path).map_err(|err| {
            error!(path = %path, error = %err, "failed to discover line numbers");
            file_problem(path, 1, err.to_string())
        })?;

        let mut file = File::open(path).map_err(|err| {
            error!(path = %path, error = %err, "failed to open file for reading");
            file_problem(path, 1, err.to_string())
        })?;

        let mut content = String::new();
        file.read_to_string(&mut content).map_err(|err| {
            error!(path = %path, error = %err, "failed to read file content");
            file_problem(path, 1, err.to_string())
        })?;

        let rules = self.parser.parse(&content).map_err(|err| {
            error!(path = %path, error = %err, "failed to parse file content");
            file_problem(path, err.line, err.message)
        })?;
        info!(path = %path, rules = rules.len(), "file parsed");

        Ok(ParsedFile {
            path: path.to_string(),
            lines,
            rules: rules.into_iter().map(Arc::new).collect(),
        })
    }

    fn build_jobs(&self, files: Vec<ParsedFile>, recording_rules: &Arc<Vec<RecordingRule>>) -> Vec<ScanJob> {
        let mut enabled = self.config.checks.enabled.clone();
        enabled.extend(self.options.enabled.iter().cloned());
        let mut disabled = self.config.checks.disabled.clone();
        disabled.extend(self.options.disabled.iter().cloned());

        let mut jobs = Vec::new();
        for file in files {
            for rule in file.rules {
                let lines = rule.lines();
                debug!(
                    path = %file.path,
                    kind = rule.kind_name(),
                    name = rule.name().unwrap_or_default(),
                    lines = %format_line_ranges(&lines),
                    "found rule"
                );
                if !file.lines.has_lines(&lines) {
                    debug!(path = %file.path, lines = %format_line_ranges(&lines), "skipping rule");
                    continue;
                }

                if rule.error().is_some() {
                    jobs.push(ScanJob {
                        path: file.path.clone(),
                        rule,
                        check: None,
                    });
                    continue;
                }

                let checks = self.config.checks_for_rule(
                    &file.path,
                    &rule,
                    &enabled,
                    &disabled,
                    self.servers,
                    recording_rules,
                );
                for check in checks {
                    jobs.push(ScanJob {
                        path: file.path.clone(),
                        rule: Arc::clone(&rule),
                        check: Some(check),
                    });
                }
            }
        }
        jobs
    }
}

fn file_problem(path: &str, line: usize, text: String) -> Report {
    Report {
        path: path.to_string(),
        rule: None,
        problem: Problem::new("", [line.max(1)], PARSE_REPORTER, text, Severity::Fatal),
    }
}

/// Fan the jobs out to `workers` threads and gather every report.
fn run_jobs(jobs: Vec<ScanJob>, workers: usize) -> Vec<Report> {
    let (job_tx, job_rx) = sync_channel::<ScanJob>(QUEUE_SIZE);
    let (report_tx, report_rx) = sync_channel::<Report>(QUEUE_SIZE);
    let job_rx = Mutex::new(job_rx);

    thread::scope(|scope| {
        for _ in 0..workers.max(1) {
            let report_tx = report_tx.clone();
            let job_rx = &job_rx;
            scope.spawn(move || {
                while let Some(job) = next_job(job_rx) {
                    for report in run_job(job) {
                        if report_tx.send(report).is_err() {
                            return;
                        }
                    }
                }
            });
        }
        // Workers hold the only senders now; the collector below stops once
        // they have all exited.
        drop(report_tx);

        scope.spawn(move || {
            for job in jobs {
                if job_tx.send(job).is_err() {
                    break;
                }
            }
        });

        report_rx.iter().collect()
    })
}

fn next_job(jobs: &Mutex<Receiver<ScanJob>>) -> Option<ScanJob> {
    let rx = jobs.lock().ok()?;
    rx.recv().ok()
}

fn run_job(job: ScanJob) -> Vec<Report> {
    match &job.check {
        None => {
            let Some(err) = job.rule.error() else {
                return Vec::new();
            };
            vec![Report {
                path: job.path.clone(),
                rule: Some(Arc::clone(&job.rule)),
                problem: Problem::new(
                    err.fragment.clone(),
                    [err.position.first],
                    PARSE_REPORTER,
                    err.message.clone(),
                    Severity::Fatal,
                ),
            }]
        }
        Some(check) => {
            debug!(path = %job.path, check = %check, "running check");
            check
                .check(&job.rule)
                .into_iter()
                .map(|problem| Report {
                    path: job.path.clone(),
                    rule: Some(Arc::clone(&job.rule)),
                    problem,
                })
                .collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;
    use std::time::Duration;

    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    use super::*;
    use crate::checks::testing::{server, FakePrometheus};
    use crate::discovery::{AllLines, StaticLines};
    use crate::parser::YamlRuleParser;

    fn write(dir: &Path, name: &str, content: &str) -> String {
        let path = dir.join(name);
        fs::write(&path, content).unwrap();
        path.display().to_string()
    }

    fn scan_with(
        config: &str,
        servers: &[PrometheusServer],
        finder: &dyn LineFinder,
        options: &ScanOptions,
        paths: Vec<String>,
    ) -> Summary {
        let config = Config::from_toml(config).unwrap();
        Scanner {
            config: &config,
            servers,
            parser: &YamlRuleParser,
            finder,
            options,
        }
        .scan(FileChanges::new(paths))
    }

    fn sorted(summary: &Summary) -> Vec<(String, Vec<usize>, String, Severity)> {
        summary
            .sorted_reports()
            .iter()
            .map(|r| {
                (
                    r.problem.reporter.clone(),
                    r.problem.lines.clone(),
                    r.problem.text.clone(),
                    r.problem.severity,
                )
            })
            .collect()
    }

    #[test]
    fn missing_file_is_fatal() {
        let summary = scan_with(
            "",
            &[],
            &AllLines,
            &ScanOptions::default(),
            vec!["/nonexistent/rules.yml".into()],
        );
        assert_eq!(summary.reports.len(), 1);
        let report = &summary.reports[0];
        assert_eq!(report.problem.reporter, PARSE_REPORTER);
        assert_eq!(report.problem.severity, Severity::Fatal);
        assert_eq!(report.problem.lines, vec![1]);
        assert!(report.rule.is_none());
    }

    #[test]
    fn invalid_yaml_reports_line() {
        let dir = tempdir().unwrap();
        let path = write(dir.path(), "bad.yml", "- record: foo\n  expr: sum(foo)\n   bad: [\n");
        let summary = scan_with("", &[], &AllLines, &ScanOptions::default(), vec![path]);
        assert_eq!(summary.reports.len(), 1);
        assert_eq!(summary.reports[0].problem.severity, Severity::Fatal);
        assert!(summary.reports[0].problem.lines[0] > 1);
    }

    #[test]
    fn rule_errors_become_fatal_reports() {
        let dir = tempdir().unwrap();
        let path = write(
            dir.path(),
            "rules.yml",
            "- record: foo\n  alert: foo\n  expr: sum(foo)\n",
        );
        let summary = scan_with("[[rule]]\n[rule.value]\n", &[], &AllLines, &ScanOptions::default(), vec![path]);
        assert_eq!(
            sorted(&summary),
            vec![(
                PARSE_REPORTER.to_string(),
                vec![2],
                "got both alert and record keys in a single rule".to_string(),
                Severity::Fatal
            )]
        );
        assert!(summary.reports[0].rule.is_some());
    }

    #[test]
    fn runs_every_check_for_every_rule() {
        let dir = tempdir().unwrap();
        let path = write(
            dir.path(),
            "rules.yml",
            "groups:\n- name: g\n  rules:\n  - alert: A\n    expr: vector(1) > 0\n  - alert: B\n    expr: up == bool 0\n  - record: c\n    expr: vector(1)\n",
        );
        let options = ScanOptions {
            workers: 3,
            ..Default::default()
        };
        let summary = scan_with("[[rule]]\n[rule.value]\n", &[], &AllLines, &options, vec![path]);
        let lines: Vec<Vec<usize>> = summary
            .sorted_reports()
            .iter()
            .map(|r| r.problem.lines.clone())
            .collect();
        assert_eq!(lines, vec![vec![5], vec![7]]);
    }

    #[test]
    fn rules_outside_changed_lines_are_skipped() {
        let dir = tempdir().unwrap();
        let content = "- alert: A\n  expr: vector(1) > 0\n- alert: B\n  expr: vector(2) > 0\n";
        let path = write(dir.path(), "rules.yml", content);
        let finder = StaticLines::new().with_lines(path.clone(), [4]);
        let summary = scan_with("[[rule]]\n[rule.value]\n", &[], &finder, &ScanOptions::default(), vec![path]);
        assert_eq!(summary.reports.len(), 1);
        assert_eq!(summary.reports[0].problem.lines, vec![4]);
    }

    #[test]
    fn cli_lists_extend_config_lists() {
        let dir = tempdir().unwrap();
        let path = write(dir.path(), "rules.yml", "- alert: A\n  expr: vector(1) > 0\n");
        let options = ScanOptions {
            disabled: vec!["promql/value".into()],
            ..Default::default()
        };
        let summary = scan_with("[[rule]]\n[rule.value]\n", &[], &AllLines, &options, vec![path]);
        assert!(summary.reports.is_empty());
    }

    #[test]
    fn recording_rules_from_other_files_are_known() {
        let dir = tempdir().unwrap();
        let alerts = write(dir.path(), "alerts.yml", "- alert: A\n  expr: job:up:sum == 0\n");
        let records = write(dir.path(), "records.yml", "- record: job:up:sum\n  expr: sum(up) by (job)\n");
        let (prom, fake) = server(
            "prom",
            FakePrometheus::new()
                .with_series("count(up)", &[3.0])
                .with_duration(Duration::from_millis(5)),
        );
        let summary = scan_with(
            "[[rule]]\n[rule.series]\nignore_recording_rules = true\n",
            &[prom],
            &AllLines,
            &ScanOptions::default(),
            vec![alerts, records],
        );
        assert!(summary.reports.is_empty(), "{:?}", summary.reports);
        assert_eq!(fake.queries(), vec!["count(up)".to_string()]);
    }

    #[test]
    fn many_jobs_with_one_worker() {
        let dir = tempdir().unwrap();
        let mut content = String::new();
        for i in 0..250 {
            content.push_str(&format!("- alert: A{i}\n  expr: vector({i}) > 0\n"));
        }
        let path = write(dir.path(), "rules.yml", &content);
        let options = ScanOptions {
            workers: 1,
            ..Default::default()
        };
        let summary = scan_with("[[rule]]\n[rule.value]\n", &[], &AllLines, &options, vec![path]);
        assert_eq!(summary.reports.len(), 250);
        assert!(!summary.verdict(Severity::Bug).pass);
    }
}
