//! alertlint: a linter for Prometheus alerting and recording rules.
//!
//! Parses rule files, matches every rule against the configured policy and
//! runs the resulting checks, some offline and some against a live
//! Prometheus server.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::path::Path;
//! use alertlint::{config::Config, lint, ScanOptions};
//! use alertlint::checks::Severity;
//!
//! let config = Config::load(Path::new(".alertlint.toml")).unwrap();
//! let summary = lint(&["rules/".to_string()], &config, &ScanOptions::default()).unwrap();
//! let verdict = summary.verdict(Severity::Bug);
//! println!("Pass: {}, Problems: {}", verdict.pass, verdict.total_reports);
//! ```

pub mod checks;
pub mod config;
pub mod discovery;
pub mod duration;
pub mod error;
pub mod parser;
pub mod promapi;
pub mod reporter;
pub mod scan;

use config::Config;
use discovery::{find_files, AllLines};
use error::Result;
use parser::YamlRuleParser;
use reporter::Summary;

pub use scan::{ScanOptions, Scanner};

/// Lint every rule file under `paths`: discover files, parse them and run all
/// configured checks against every line.
pub fn lint(paths: &[String], config: &Config, options: &ScanOptions) -> Result<Summary> {
    let files = find_files(paths)?;
    let servers = config.servers()?;
    let scanner = Scanner {
        config,
        servers: &servers,
        parser: &YamlRuleParser,
        finder: &AllLines,
        options,
    };
    Ok(scanner.scan(files))
}
