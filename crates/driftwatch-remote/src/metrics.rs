//! HTTP client for the metrics aggregator, plus the no-sources stand-in.
//!
//! The aggregator fronts whatever analytics sources an account has connected
//! (pageview APIs, application-database row counts) and returns one delta
//! per metric per source for a window. Zero connected sources is a valid
//! state, not an error.

use std::{convert::Infallible, time::Duration};

use driftwatch_core::{
  external::MetricsProvider,
  metric::{MetricDelta, MetricWindow},
  page::Page,
};

use crate::{Error, Result};

const METRICS_TIMEOUT_SECS: u64 = 30;

/// Client for an aggregator exposing `GET /metrics?url=..&from=..&to=..`.
#[derive(Clone)]
pub struct HttpMetrics {
  http:     reqwest::Client,
  base_url: String,
}

impl HttpMetrics {
  pub fn new(base_url: String) -> Result<Self> {
    let http = reqwest::Client::builder()
      .timeout(Duration::from_secs(METRICS_TIMEOUT_SECS))
      .build()?;
    Ok(Self {
      http,
      base_url: base_url.trim_end_matches('/').to_string(),
    })
  }
}

impl MetricsProvider for HttpMetrics {
  type Error = Error;

  async fn deltas(&self, page: &Page, window: MetricWindow) -> Result<Vec<MetricDelta>> {
    let endpoint = format!("{}/metrics", self.base_url);
    let resp = self
      .http
      .get(&endpoint)
      .query(&[
        ("url", page.url.as_str()),
        ("from", &window.start.to_rfc3339()),
        ("to", &window.end.to_rfc3339()),
      ])
      .send()
      .await?;

    let status = resp.status();
    if !status.is_success() {
      let body = resp.text().await.unwrap_or_default();
      return Err(Error::Server { status: status.as_u16(), body });
    }

    Ok(resp.json().await?)
  }
}

/// Provider for accounts with no connected sources: always empty, never
/// fails. Checkpoints computed against it land in the lowest confidence
/// band.
#[derive(Clone, Copy, Default)]
pub struct NoMetrics;

impl MetricsProvider for NoMetrics {
  type Error = Infallible;

  async fn deltas(
    &self,
    _page: &Page,
    _window: MetricWindow,
  ) -> Result<Vec<MetricDelta>, Infallible> {
    Ok(Vec::new())
  }
}
