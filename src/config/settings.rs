//! Per-check setting blocks of a `[[rule]]`.

use serde::{Deserialize, Serialize};

use crate::checks::Severity;

/// `[[rule.aggregate]]`: labels that `by()` / `without()` must keep or strip.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AggregateSettings {
    /// Only rules whose alert or record name matches.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keep: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub strip: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RateSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scrape_interval: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prometheus: Option<Vec<String>>,
}

/// Shared by `[[rule.annotation]]` and `[[rule.label]]`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AnnotationSettings {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SeriesSettings {
    #[serde(default)]
    pub ignore_recording_rules: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prometheus: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CostSettings {
    #[serde(default)]
    pub bytes_per_sample: u64,
    #[serde(default)]
    pub max_series: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prometheus: Option<Vec<String>>,
}

/// `[rule.alerts]`. Results are always informational, so there is no
/// severity here.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AlertsSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolve: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prometheus: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ValueSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RejectSettings {
    pub regex: String,
    #[serde(default)]
    pub label_keys: bool,
    #[serde(default)]
    pub label_values: bool,
    #[serde(default)]
    pub annotation_keys: bool,
    #[serde(default)]
    pub annotation_values: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
}

impl RejectSettings {
    pub fn targets_anything(&self) -> bool {
        self.label_keys || self.label_values || self.annotation_keys || self.annotation_values
    }
}

/// Blocks that query a backend may pin themselves to named targets.
pub trait TargetFilter {
    fn prometheus(&self) -> Option<&[String]>;

    fn uses_target(&self, name: &str) -> bool {
        self.prometheus()
            .map_or(true, |names| names.iter().any(|n| n == name))
    }
}

macro_rules! target_filter {
    ($($ty:ty),*) => {
        $(impl TargetFilter for $ty {
            fn prometheus(&self) -> Option<&[String]> {
                self.prometheus.as_deref()
            }
        })*
    };
}

target_filter!(RateSettings, SeriesSettings, CostSettings, AlertsSettings);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_filter_defaults_to_every_target() {
        let series = SeriesSettings::default();
        assert!(series.uses_target("prom"));

        let cost = CostSettings {
            prometheus: Some(vec!["prom".into()]),
            ..Default::default()
        };
        assert!(cost.uses_target("prom"));
        assert!(!cost.uses_target("other"));
    }

    #[test]
    fn severity_accepts_aliases() {
        let value: ValueSettings = toml::from_str("severity = \"info\"").unwrap();
        assert_eq!(value.severity, Some(Severity::Information));
        assert!(toml::from_str::<ValueSettings>("severity = \"loud\"").is_err());
    }

    #[test]
    fn unknown_fields_are_rejected() {
        assert!(toml::from_str::<SeriesSettings>("ignore_rr = true").is_err());
    }
}
