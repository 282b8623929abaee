pub mod prometheus;
pub mod rule;
pub mod settings;

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::checks::{catalogue, is_known_check, Check};
use crate::error::{LintError, Result};
use crate::parser::{RecordingRule, Rule};
use crate::promapi::PrometheusServer;

pub use prometheus::PrometheusConfig;
pub use rule::{is_enabled, strict_regex, Match, MatchLabel, ResolveContext, RuleConfig};

/// Global allow / deny lists.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChecksConfig {
    #[serde(default)]
    pub enabled: Vec<String>,
    #[serde(default)]
    pub disabled: Vec<String>,
}

/// Top-level configuration from `.alertlint.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub checks: ChecksConfig,
    #[serde(default)]
    pub prometheus: Vec<PrometheusConfig>,
    #[serde(default)]
    pub rule: Vec<RuleConfig>,
}

impl Config {
    /// Load config from a TOML file. Returns default if file doesn't exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        for name in self.checks.enabled.iter().chain(&self.checks.disabled) {
            validate_check_name(name)?;
        }

        let mut names = HashSet::new();
        for prom in &self.prometheus {
            prom.validate()?;
            if !names.insert(prom.name.as_str()) {
                return Err(LintError::Config(format!(
                    "prometheus name {:?} is used more than once",
                    prom.name
                )));
            }
        }

        for rule in &self.rule {
            rule.validate()?;
            for target in rule.target_names() {
                if !names.contains(target.as_str()) {
                    return Err(LintError::Config(format!(
                        "rule references unknown prometheus {target:?}"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Backend targets, one HTTP client each.
    pub fn servers(&self) -> Result<Vec<PrometheusServer>> {
        self.prometheus.iter().map(PrometheusConfig::server).collect()
    }

    /// Every check that applies to `rule` in `path`, across all rule blocks.
    pub fn checks_for_rule(
        &self,
        path: &str,
        rule: &Rule,
        enabled: &[String],
        disabled: &[String],
        servers: &[PrometheusServer],
        recording_rules: &Arc<Vec<RecordingRule>>,
    ) -> Vec<Box<dyn Check>> {
        let servers: Vec<PrometheusServer> = servers
            .iter()
            .filter(|s| s.is_enabled_for_path(path))
            .cloned()
            .collect();
        let ctx = ResolveContext {
            path,
            enabled,
            disabled,
            servers: &servers,
            recording_rules,
        };
        self.rule
            .iter()
            .flat_map(|block| block.resolve_checks(&ctx, rule))
            .collect()
    }

    /// Render the effective configuration.
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Generate a starter config file.
    pub fn starter_toml() -> &'static str {
        r#"# alertlint configuration

[checks]
# Only run these checks (empty runs everything configured).
# enabled = ["query/series"]
# Never run these checks.
# disabled = ["alerts/count"]

# Backend targets used by query/series, query/cost, alerts/count and promql/rate.
# [[prometheus]]
# name = "prod"
# uri = "https://prometheus.example.com"
# timeout = "30s"
# paths = ["rules/prod/.+"]

[[rule]]
[rule.value]

[[rule.aggregate]]
name = ".+"
keep = ["job"]

[[rule]]
[rule.match]
kind = "alerting"

[[rule.annotation]]
key = "summary"
required = true

[[rule.label]]
key = "severity"
value = "critical|warning|info"
required = true

# [rule.series]
# ignore_recording_rules = true

# [rule.cost]
# bytes_per_sample = 4096
# max_series = 10000

# [rule.alerts]
# range = "1d"
# step = "1m"
# resolve = "5m"
"#
    }
}

fn validate_check_name(name: &str) -> Result<()> {
    if is_known_check(name) {
        return Ok(());
    }
    let suggestion = catalogue()
        .into_iter()
        .map(|c| (levenshtein::levenshtein(name, c.id), c.id))
        .filter(|(distance, _)| *distance <= 3)
        .min_by_key(|(distance, _)| *distance);
    Err(LintError::Config(match suggestion {
        Some((_, id)) => format!("unknown check {name:?}, did you mean {id:?}?"),
        None => format!("unknown check {name:?}"),
    }))
}
