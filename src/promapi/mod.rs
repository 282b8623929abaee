//! Prometheus HTTP API access used by the online checks.

pub mod client;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use regex::Regex;
use thiserror::Error;

pub use client::PrometheusClient;

pub type Labels = BTreeMap<String, String>;

/// One element of an instant vector.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub labels: Labels,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult {
    pub series: Vec<Sample>,
    /// Wall time the request took.
    pub duration: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplePair {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

/// One series of a range query, values in timestamp order.
#[derive(Debug, Clone, PartialEq)]
pub struct RangeSample {
    pub labels: Labels,
    pub values: Vec<SamplePair>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RangeQueryResult {
    pub samples: Vec<RangeSample>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub duration: Duration,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    /// Error reported by Prometheus itself, e.g. `bad_data`.
    #[error("{error_type}: {message}")]
    Api { error_type: String, message: String },

    #[error("connection timeout")]
    Timeout,

    #[error("{0}")]
    Connection(String),

    #[error("server responded with HTTP {0}")]
    Status(u16),

    #[error("failed to decode response: {0}")]
    Decode(String),
}

/// Query capability of a metrics backend.
pub trait PrometheusApi: Send + Sync {
    fn query(&self, expr: &str) -> Result<QueryResult, QueryError>;

    fn range_query(
        &self,
        expr: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        step: Duration,
    ) -> Result<RangeQueryResult, QueryError>;
}

/// A named backend target with its path filter, as handed to checks.
#[derive(Clone)]
pub struct PrometheusServer {
    pub name: String,
    pub uri: String,
    /// Anchored path patterns; empty matches every file.
    pub paths: Vec<Regex>,
    pub api: Arc<dyn PrometheusApi>,
}

impl PrometheusServer {
    pub fn new(name: impl Into<String>, uri: impl Into<String>, api: Arc<dyn PrometheusApi>) -> Self {
        Self {
            name: name.into(),
            uri: uri.into(),
            paths: Vec::new(),
            api,
        }
    }

    pub fn with_paths(mut self, paths: Vec<Regex>) -> Self {
        self.paths = paths;
        self
    }

    pub fn is_enabled_for_path(&self, path: &str) -> bool {
        self.paths.is_empty() || self.paths.iter().any(|re| re.is_match(path))
    }
}

impl fmt::Debug for PrometheusServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrometheusServer")
            .field("name", &self.name)
            .field("uri", &self.uri)
            .field("paths", &self.paths.iter().map(Regex::as_str).collect::<Vec<_>>())
            .finish()
    }
}
