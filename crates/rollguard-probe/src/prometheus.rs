//! Prometheus metrics backend (`/api/v1/query_range`).

use anyhow::{Context, bail};
use http::Method;
use serde::{Deserialize, Serialize};
use tracing::debug;

use rollguard_core::Sample;

use crate::backend::{BoxFuture, MetricsBackend, TimeRange};
use crate::client::{self, HttpTarget};

/// Queries a Prometheus server over its HTTP API.
#[derive(Debug, Clone)]
pub struct PrometheusBackend {
    target: HttpTarget,
}

impl PrometheusBackend {
    /// `url` is the server base, e.g. `http://127.0.0.1:9090`.
    pub fn new(url: &str) -> anyhow::Result<Self> {
        Ok(Self {
            target: HttpTarget::parse(url)?,
        })
    }

    async fn query_range(&self, query: &str, range: TimeRange) -> anyhow::Result<Vec<Sample>> {
        let params = RangeQuery {
            query,
            start: range.start,
            end: range.end,
            step: ((range.end - range.start) / 30).max(1),
        };
        let qs = serde_urlencoded::to_string(&params).context("encode query")?;
        let path = format!("{}?{qs}", self.target.path("/api/v1/query_range"));

        let (status, body) = client::send(&self.target, Method::GET, &path, None).await?;
        if !status.is_success() {
            bail!("prometheus returned {status}");
        }
        let samples = decode_matrix(&body)?;
        debug!(points = samples.len(), "prometheus query answered");
        Ok(samples)
    }
}

impl MetricsBackend for PrometheusBackend {
    fn query<'a>(
        &'a self,
        query: &'a str,
        range: TimeRange,
    ) -> BoxFuture<'a, anyhow::Result<Vec<Sample>>> {
        Box::pin(self.query_range(query, range))
    }
}

#[derive(Serialize)]
struct RangeQuery<'a> {
    query: &'a str,
    start: u64,
    end: u64,
    step: u64,
}

#[derive(Deserialize)]
struct ApiResponse {
    status: String,
    #[serde(default)]
    data: Option<MatrixData>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize)]
struct MatrixData {
    #[serde(rename = "resultType")]
    result_type: String,
    result: Vec<Series>,
}

#[derive(Deserialize)]
struct Series {
    #[serde(default)]
    values: Vec<(f64, String)>,
}

/// Decode a range-query response into the points of its first series.
///
/// Values Prometheus cannot compute (`"NaN"`) are kept as NaN and later
/// classified as unknown.
pub fn decode_matrix(body: &[u8]) -> anyhow::Result<Vec<Sample>> {
    let resp: ApiResponse = serde_json::from_slice(body).context("decode prometheus response")?;
    if resp.status != "success" {
        bail!(
            "prometheus query failed: {}",
            resp.error.unwrap_or_else(|| resp.status.clone())
        );
    }
    let data = resp.data.context("prometheus response has no data")?;
    if data.result_type != "matrix" {
        bail!("expected a matrix result, got {}", data.result_type);
    }
    let Some(series) = data.result.into_iter().next() else {
        return Ok(Vec::new());
    };
    series
        .values
        .into_iter()
        .map(|(ts, raw)| {
            let value = raw
                .parse::<f64>()
                .with_context(|| format!("bad sample value {raw:?}"))?;
            Ok(Sample {
                value,
                timestamp: ts as u64,
            })
        })
        .collect()
}
