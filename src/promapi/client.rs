use std::time::{Duration, Instant};

use chrono::{DateTime, TimeZone, Utc};
use reqwest::blocking::Client;
use serde::Deserialize;
use tracing::debug;

use super::{
    Labels, PrometheusApi, QueryError, QueryResult, RangeQueryResult, RangeSample, Sample,
    SamplePair,
};

/// Blocking HTTP client for one Prometheus server.
#[derive(Debug, Clone)]
pub struct PrometheusClient {
    uri: String,
    http: Client,
}

#[derive(Deserialize)]
struct ApiResponse {
    status: String,
    #[serde(default)]
    data: Option<ApiData>,
    #[serde(default, rename = "errorType")]
    error_type: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize)]
#[serde(tag = "resultType", content = "result", rename_all = "lowercase")]
enum ApiData {
    Vector(Vec<VectorItem>),
    Matrix(Vec<MatrixItem>),
    Scalar((f64, String)),
    String((f64, String)),
}

#[derive(Deserialize)]
struct VectorItem {
    #[serde(default)]
    metric: Labels,
    value: (f64, String),
}

#[derive(Deserialize)]
struct MatrixItem {
    #[serde(default)]
    metric: Labels,
    values: Vec<(f64, String)>,
}

impl PrometheusClient {
    pub fn new(uri: &str, timeout: Duration) -> Result<Self, QueryError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| QueryError::Connection(e.to_string()))?;
        Ok(Self {
            uri: uri.trim_end_matches('/').to_string(),
            http,
        })
    }

    fn post(&self, endpoint: &str, form: &[(&str, String)]) -> Result<(ApiData, Duration), QueryError> {
        let url = format!("{}{}", self.uri, endpoint);
        debug!(url = %url, "querying prometheus");

        let started = Instant::now();
        let response = self.http.post(&url).form(form).send().map_err(transport_error)?;
        let status = response.status();
        let body = response.text().map_err(transport_error)?;
        let elapsed = started.elapsed();

        let parsed: ApiResponse = match serde_json::from_str(&body) {
            Ok(parsed) => parsed,
            Err(_) if !status.is_success() => return Err(QueryError::Status(status.as_u16())),
            Err(e) => return Err(QueryError::Decode(e.to_string())),
        };

        if parsed.status != "success" {
            return Err(QueryError::Api {
                error_type: parsed.error_type.unwrap_or_else(|| "unknown".into()),
                message: parsed.error.unwrap_or_default(),
            });
        }
        let data = parsed
            .data
            .ok_or_else(|| QueryError::Decode("response has no data".into()))?;
        Ok((data, elapsed))
    }
}

impl PrometheusApi for PrometheusClient {
    fn query(&self, expr: &str) -> Result<QueryResult, QueryError> {
        let (data, duration) = self.post("/api/v1/query", &[("query", expr.to_string())])?;
        let series = match data {
            ApiData::Vector(items) => items
                .into_iter()
                .map(|item| {
                    Ok(Sample {
                        labels: item.metric,
                        value: parse_value(&item.value.1)?,
                    })
                })
                .collect::<Result<Vec<_>, QueryError>>()?,
            ApiData::Scalar((_, v)) => vec![Sample {
                labels: Labels::new(),
                value: parse_value(&v)?,
            }],
            ApiData::Matrix(_) | ApiData::String(_) => {
                return Err(QueryError::Decode("unexpected result type for instant query".into()))
            }
        };
        Ok(QueryResult { series, duration })
    }

    fn range_query(
        &self,
        expr: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        step: Duration,
    ) -> Result<RangeQueryResult, QueryError> {
        let form = [
            ("query", expr.to_string()),
            ("start", format_timestamp(start)),
            ("end", format_timestamp(end)),
            ("step", format!("{}", step.as_secs_f64())),
        ];
        let (data, duration) = self.post("/api/v1/query_range", &form)?;
        let items = match data {
            ApiData::Matrix(items) => items,
            _ => return Err(QueryError::Decode("unexpected result type for range query".into())),
        };

        let mut samples = Vec::with_capacity(items.len());
        for item in items {
            let mut values = Vec::with_capacity(item.values.len());
            for (ts, v) in item.values {
                values.push(SamplePair {
                    timestamp: parse_timestamp(ts)?,
                    value: parse_value(&v)?,
                });
            }
            values.sort_by_key(|p| p.timestamp);
            samples.push(RangeSample {
                labels: item.metric,
                values,
            });
        }

        Ok(RangeQueryResult {
            samples,
            start,
            end,
            duration,
        })
    }
}

fn transport_error(err: reqwest::Error) -> QueryError {
    if err.is_timeout() {
        QueryError::Timeout
    } else {
        QueryError::Connection(err.to_string())
    }
}

fn parse_value(raw: &str) -> Result<f64, QueryError> {
    raw.parse()
        .map_err(|_| QueryError::Decode(format!("invalid sample value {raw:?}")))
}

fn parse_timestamp(ts: f64) -> Result<DateTime<Utc>, QueryError> {
    Utc.timestamp_millis_opt((ts * 1000.0).round() as i64)
        .single()
        .ok_or_else(|| QueryError::Decode(format!("invalid timestamp {ts}")))
}

fn format_timestamp(ts: DateTime<Utc>) -> String {
    format!("{:.3}", ts.timestamp_millis() as f64 / 1000.0)
}
