use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::rule::strict_regex;
use crate::duration::parse_duration;
use crate::error::{LintError, Result};
use crate::promapi::{PrometheusClient, PrometheusServer};

fn default_timeout() -> String {
    "2m".to_string()
}

/// `[[prometheus]]`: a named backend target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PrometheusConfig {
    pub name: String,
    pub uri: String,
    #[serde(default = "default_timeout")]
    pub timeout: String,
    /// Files this target applies to. Each entry is anchored.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub paths: Vec<String>,
}

impl PrometheusConfig {
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(LintError::Config("prometheus name cannot be empty".into()));
        }
        let uri = url::Url::parse(&self.uri).map_err(|e| {
            LintError::Config(format!("prometheus {:?} has invalid uri {:?}: {}", self.name, self.uri, e))
        })?;
        if !matches!(uri.scheme(), "http" | "https") {
            return Err(LintError::Config(format!(
                "prometheus {:?} uri must use http or https, got {:?}",
                self.name,
                uri.scheme()
            )));
        }
        parse_duration(&self.timeout)
            .map_err(|e| LintError::Config(format!("prometheus {:?} timeout: {}", self.name, e)))?;
        for path in &self.paths {
            strict_regex(path).map_err(|e| {
                LintError::Config(format!("prometheus {:?} path {:?}: {}", self.name, path, e))
            })?;
        }
        Ok(())
    }

    pub fn is_enabled_for_path(&self, path: &str) -> bool {
        self.paths.is_empty()
            || self
                .paths
                .iter()
                .filter_map(|p| strict_regex(p).ok())
                .any(|re| re.is_match(path))
    }

    /// Build the target handed to checks, backed by an HTTP client.
    pub fn server(&self) -> Result<PrometheusServer> {
        let timeout = parse_duration(&self.timeout)
            .map_err(|e| LintError::Config(format!("prometheus {:?} timeout: {}", self.name, e)))?;
        let client = PrometheusClient::new(&self.uri, timeout)
            .map_err(|e| LintError::Config(format!("prometheus {:?}: {}", self.name, e)))?;
        let paths = self
            .paths
            .iter()
            .map(|p| strict_regex(p))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| LintError::Config(format!("prometheus {:?}: {}", self.name, e)))?;
        Ok(PrometheusServer::new(&self.name, &self.uri, Arc::new(client)).with_paths(paths))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prom(paths: &[&str]) -> PrometheusConfig {
        PrometheusConfig {
            name: "prom".into(),
            uri: "http://localhost:9090".into(),
            timeout: "30s".into(),
            paths: paths.iter().map(|p| p.to_string()).collect(),
        }
    }

    #[test]
    fn empty_paths_match_everything() {
        assert!(prom(&[]).is_enabled_for_path("rules/foo.yml"));
    }

    #[test]
    fn paths_are_anchored() {
        let p = prom(&["rules/.+"]);
        assert!(p.is_enabled_for_path("rules/foo.yml"));
        assert!(!p.is_enabled_for_path("other/rules/foo.yml"));
    }

    #[test]
    fn validation() {
        assert!(prom(&[]).validate().is_ok());

        let mut bad = prom(&[]);
        bad.timeout = "soon".into();
        assert!(bad.validate().is_err());

        let mut bad = prom(&[]);
        bad.uri = "localhost:9090/api".into();
        assert!(bad.validate().is_err());

        assert!(prom(&["(unclosed"]).validate().is_err());
    }

    #[test]
    fn builds_server_with_anchored_paths() {
        let server = prom(&["rules/.+"]).server().unwrap();
        assert_eq!(server.name, "prom");
        assert!(server.is_enabled_for_path("rules/a.yml"));
        assert!(!server.is_enabled_for_path("xrules/a.yml"));
    }

    #[test]
    fn timeout_defaults() {
        let p: PrometheusConfig =
            toml::from_str("name = \"prom\"\nuri = \"http://localhost:9090\"\n").unwrap();
        assert_eq!(p.timeout, "2m");
        assert!(p.paths.is_empty());
    }
}
