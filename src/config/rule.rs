//! `[[rule]]` blocks: which rules they apply to and the checks they expand
//! into.

use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::settings::{
    AggregateSettings, AlertsSettings, AnnotationSettings, CostSettings, RateSettings,
    RejectSettings, SeriesSettings, TargetFilter, ValueSettings,
};
use crate::checks::{
    AggregationCheck, AlertsCheck, AnnotationCheck, Check, CostCheck, LabelCheck, RateCheck,
    RejectCheck, RejectTarget, SeriesCheck, Severity, ValueCheck, ALERTS_CHECK_NAME,
    ANNOTATION_CHECK_NAME, BY_CHECK_NAME, COST_CHECK_NAME, LABEL_CHECK_NAME, RATE_CHECK_NAME,
    REJECT_CHECK_NAME, SERIES_CHECK_NAME, VALUE_CHECK_NAME, WITHOUT_CHECK_NAME,
};
use crate::duration::{format_duration, parse_duration};
use crate::error::{LintError, Result};
use crate::parser::{RecordingRule, Rule, YamlMap};
use crate::promapi::PrometheusServer;

const DEFAULT_SCRAPE_INTERVAL: Duration = Duration::from_secs(60);
const DEFAULT_ALERTS_RANGE: Duration = Duration::from_secs(24 * 3600);
const DEFAULT_ALERTS_STEP: Duration = Duration::from_secs(60);
const DEFAULT_ALERTS_RESOLVE: Duration = Duration::from_secs(5 * 60);
// `now - range` must stay inside the timestamps chrono can represent.
const MAX_DURATION_SETTING: Duration = Duration::from_secs(10_000 * 365 * 24 * 3600);

/// Compile `pattern` so that it must match the whole input.
pub fn strict_regex(pattern: &str) -> std::result::Result<Regex, regex::Error> {
    Regex::new(&format!("^(?:{pattern})$"))
}

/// An anchored pattern from the config file, compiled once at load time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StrictPattern {
    source: String,
    re: Regex,
}

impl StrictPattern {
    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.re.is_match(text)
    }
}

impl TryFrom<String> for StrictPattern {
    type Error = regex::Error;

    fn try_from(source: String) -> std::result::Result<Self, Self::Error> {
        let re = strict_regex(&source)?;
        Ok(Self { source, re })
    }
}

impl From<StrictPattern> for String {
    fn from(pattern: StrictPattern) -> Self {
        pattern.source
    }
}

impl PartialEq for StrictPattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

/// Key and value patterns, both anchored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MatchLabel {
    pub key: StrictPattern,
    pub value: StrictPattern,
}

impl MatchLabel {
    fn is_matching(&self, map: Option<&YamlMap>) -> bool {
        map.is_some_and(|m| {
            m.items
                .iter()
                .any(|kv| self.key.is_match(&kv.key.value) && self.value.is_match(&kv.value.value))
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Match {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<StrictPattern>,
    /// `alerting` or `recording`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<MatchLabel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotation: Option<MatchLabel>,
}

impl Match {
    fn validate(&self) -> Result<()> {
        match self.kind.as_deref() {
            None | Some("alerting") | Some("recording") => Ok(()),
            Some(other) => Err(LintError::Config(format!(
                "unknown rule kind {other:?}, expected alerting or recording"
            ))),
        }
    }

    fn is_matching(&self, path: &str, rule: &Rule) -> bool {
        if let Some(kind) = &self.kind {
            if kind != rule.kind_name() {
                return false;
            }
        }
        if let Some(pattern) = &self.path {
            if !pattern.is_match(path) {
                return false;
            }
        }
        if let Some(label) = &self.label {
            if !label.is_matching(rule.labels()) {
                return false;
            }
        }
        if let Some(annotation) = &self.annotation {
            if !annotation.is_matching(rule.annotations()) {
                return false;
            }
        }
        true
    }
}

/// A `[[rule]]` block from the config file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleConfig {
    #[serde(default, rename = "match", skip_serializing_if = "Option::is_none")]
    pub match_: Option<Match>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aggregate: Vec<AggregateSettings>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate: Option<RateSettings>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub annotation: Vec<AnnotationSettings>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub label: Vec<AnnotationSettings>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub series: Option<SeriesSettings>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost: Option<CostSettings>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alerts: Option<AlertsSettings>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<ValueSettings>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reject: Vec<RejectSettings>,
}

/// Everything a rule block needs besides the rule itself.
pub struct ResolveContext<'a> {
    pub path: &'a str,
    pub enabled: &'a [String],
    pub disabled: &'a [String],
    /// Targets already filtered to those serving `path`.
    pub servers: &'a [PrometheusServer],
    pub recording_rules: &'a Arc<Vec<RecordingRule>>,
}

impl RuleConfig {
    pub fn validate(&self) -> Result<()> {
        if let Some(m) = &self.match_ {
            m.validate()?;
        }
        for aggr in &self.aggregate {
            if let Some(name) = &aggr.name {
                regex_setting("aggregate.name", name)?;
            }
        }
        if let Some(rate) = &self.rate {
            if let Some(si) = &rate.scrape_interval {
                duration_setting("rate.scrape_interval", si)?;
            }
        }
        for block in self.annotation.iter().chain(&self.label) {
            if block.key.is_empty() {
                return Err(LintError::Config("annotation and label blocks need a key".into()));
            }
            if let Some(value) = &block.value {
                regex_setting("value", value)?;
            }
        }
        if let Some(alerts) = &self.alerts {
            for (name, value) in [
                ("alerts.range", &alerts.range),
                ("alerts.step", &alerts.step),
                ("alerts.resolve", &alerts.resolve),
            ] {
                if let Some(value) = value {
                    duration_setting(name, value)?;
                }
            }
        }
        for reject in &self.reject {
            regex_setting("reject.regex", &reject.regex)?;
            if !reject.targets_anything() {
                return Err(LintError::Config(format!(
                    "reject block for {:?} does not enable any of label_keys, label_values, annotation_keys, annotation_values",
                    reject.regex
                )));
            }
        }
        Ok(())
    }

    /// Names of backend targets pinned by setting blocks.
    pub fn target_names(&self) -> impl Iterator<Item = &String> {
        let rate = self.rate.as_ref().and_then(|s| s.prometheus.as_ref());
        let series = self.series.as_ref().and_then(|s| s.prometheus.as_ref());
        let cost = self.cost.as_ref().and_then(|s| s.prometheus.as_ref());
        let alerts = self.alerts.as_ref().and_then(|s| s.prometheus.as_ref());
        [rate, series, cost, alerts].into_iter().flatten().flatten()
    }

    /// Expand this block into concrete checks for `rule`. Returns nothing when
    /// the block's match criteria reject the rule.
    pub fn resolve_checks(&self, ctx: &ResolveContext<'_>, rule: &Rule) -> Vec<Box<dyn Check>> {
        let mut enabled: Vec<Box<dyn Check>> = Vec::new();

        if let Some(m) = &self.match_ {
            if !m.is_matching(ctx.path, rule) {
                return enabled;
            }
        }

        let allowed = |name: &str| is_enabled(ctx.enabled, ctx.disabled, name, rule);

        for aggr in &self.aggregate {
            let name_regex = aggr.name.as_deref().and_then(|n| strict_regex(n).ok());
            let severity = aggr.severity.unwrap_or(Severity::Warning);
            let labels = aggr
                .keep
                .iter()
                .map(|l| (l, true))
                .chain(aggr.strip.iter().map(|l| (l, false)));
            for (label, keep) in labels {
                if allowed(WITHOUT_CHECK_NAME) {
                    enabled.push(Box::new(AggregationCheck::without(
                        name_regex.clone(),
                        label,
                        keep,
                        severity,
                    )));
                }
                if allowed(BY_CHECK_NAME) {
                    enabled.push(Box::new(AggregationCheck::by(
                        name_regex.clone(),
                        label,
                        keep,
                        severity,
                    )));
                }
            }
        }

        if let Some(rate) = &self.rate {
            if allowed(RATE_CHECK_NAME) {
                let scrape_interval = rate
                    .scrape_interval
                    .as_deref()
                    .and_then(|s| parse_duration(s).ok())
                    .unwrap_or(DEFAULT_SCRAPE_INTERVAL);
                let severity = rate.severity.unwrap_or(Severity::Bug);
                for server in targets(ctx.servers, rate) {
                    enabled.push(Box::new(RateCheck::new(&server.name, scrape_interval, severity)));
                }
            }
        }

        if let Some(cost) = &self.cost {
            if allowed(COST_CHECK_NAME) {
                let severity = cost.severity.unwrap_or(Severity::Bug);
                for server in targets(ctx.servers, cost) {
                    enabled.push(Box::new(CostCheck::new(
                        server.clone(),
                        cost.bytes_per_sample,
                        cost.max_series,
                        severity,
                    )));
                }
            }
        }

        if !self.annotation.is_empty() && allowed(ANNOTATION_CHECK_NAME) {
            for ann in &self.annotation {
                let value = ann.value.as_deref().and_then(|v| strict_regex(v).ok());
                let severity = ann.severity.unwrap_or(Severity::Warning);
                enabled.push(Box::new(AnnotationCheck::new(&ann.key, value, ann.required, severity)));
            }
        }

        if !self.label.is_empty() && allowed(LABEL_CHECK_NAME) {
            for lab in &self.label {
                let value = lab.value.as_deref().and_then(|v| strict_regex(v).ok());
                let severity = lab.severity.unwrap_or(Severity::Warning);
                enabled.push(Box::new(LabelCheck::new(&lab.key, value, lab.required, severity)));
            }
        }

        if let Some(series) = &self.series {
            if allowed(SERIES_CHECK_NAME) {
                let severity = series.severity.unwrap_or(Severity::Warning);
                for server in targets(ctx.servers, series) {
                    enabled.push(Box::new(SeriesCheck::new(
                        server.clone(),
                        severity,
                        series.ignore_recording_rules,
                        Arc::clone(ctx.recording_rules),
                    )));
                }
            }
        }

        if let Some(alerts) = &self.alerts {
            if allowed(ALERTS_CHECK_NAME) {
                let duration = |value: &Option<String>, default| {
                    value
                        .as_deref()
                        .and_then(|v| parse_duration(v).ok())
                        .unwrap_or(default)
                };
                let range = duration(&alerts.range, DEFAULT_ALERTS_RANGE);
                let step = duration(&alerts.step, DEFAULT_ALERTS_STEP);
                let resolve = duration(&alerts.resolve, DEFAULT_ALERTS_RESOLVE);
                for server in targets(ctx.servers, alerts) {
                    enabled.push(Box::new(AlertsCheck::new(server.clone(), range, step, resolve)));
                }
            }
        }

        if let Some(value) = &self.value {
            if allowed(VALUE_CHECK_NAME) {
                enabled.push(Box::new(ValueCheck::new(value.severity.unwrap_or(Severity::Bug))));
            }
        }

        if !self.reject.is_empty() && allowed(REJECT_CHECK_NAME) {
            for reject in &self.reject {
                let Ok(re) = strict_regex(&reject.regex) else {
                    continue;
                };
                let severity = reject.severity.unwrap_or(Severity::Bug);
                let flags = [
                    (reject.label_keys, RejectTarget::LabelKeys),
                    (reject.label_values, RejectTarget::LabelValues),
                    (reject.annotation_keys, RejectTarget::AnnotationKeys),
                    (reject.annotation_values, RejectTarget::AnnotationValues),
                ];
                for (on, target) in flags {
                    if on {
                        enabled.push(Box::new(RejectCheck::new(target, re.clone(), severity)));
                    }
                }
            }
        }

        enabled
    }
}

fn targets<'a>(
    servers: &'a [PrometheusServer],
    settings: &'a impl TargetFilter,
) -> impl Iterator<Item = &'a PrometheusServer> {
    servers.iter().filter(|s| settings.uses_target(&s.name))
}

fn regex_setting(name: &str, pattern: &str) -> Result<()> {
    strict_regex(pattern)
        .map(|_| ())
        .map_err(|e| LintError::Config(format!("{name} {pattern:?}: {e}")))
}

fn duration_setting(name: &str, value: &str) -> Result<()> {
    let parsed = parse_duration(value).map_err(|e| LintError::Config(format!("{name}: {e}")))?;
    if parsed > MAX_DURATION_SETTING {
        return Err(LintError::Config(format!(
            "{name}: {value:?} is longer than the {} limit",
            format_duration(MAX_DURATION_SETTING)
        )));
    }
    Ok(())
}

/// Whether check `name` may run for `rule`.
///
/// A `disable <name>` comment on the rule always wins, then the disabled
/// list. A non-empty enabled list works as an allow-list.
pub fn is_enabled(enabled: &[String], disabled: &[String], name: &str, rule: &Rule) -> bool {
    let normalized = name.split_whitespace().collect::<Vec<_>>().join(" ");
    if rule.has_comment(&format!("disable {normalized}")) {
        debug!(check = name, "check disabled by comment");
        return false;
    }
    if disabled.iter().any(|c| c == name) {
        return false;
    }
    enabled.is_empty() || enabled.iter().any(|c| c == name)
}
