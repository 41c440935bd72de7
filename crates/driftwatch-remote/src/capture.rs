//! HTTP client for the external screenshot-capture service.
//!
//! Capture itself is a black box: given a URL and viewport width it returns
//! PNG bytes. Transient failures are surfaced to the caller, which treats
//! them as per-page scan errors.

use std::time::Duration;

use driftwatch_core::external::ScreenCapture;

use crate::{Error, Result};

const CAPTURE_TIMEOUT_SECS: u64 = 60;

/// Client for a capture service exposing `GET /capture?url=..&width=..`.
#[derive(Clone)]
pub struct HttpCapture {
  http:     reqwest::Client,
  base_url: String,
}

impl HttpCapture {
  pub fn new(base_url: String) -> Result<Self> {
    let http = reqwest::Client::builder()
      .timeout(Duration::from_secs(CAPTURE_TIMEOUT_SECS))
      .build()?;
    Ok(Self {
      http,
      base_url: base_url.trim_end_matches('/').to_string(),
    })
  }
}

impl ScreenCapture for HttpCapture {
  type Error = Error;

  async fn capture(&self, url: &str, viewport_width: u32) -> Result<Vec<u8>> {
    let endpoint = format!("{}/capture", self.base_url);
    let resp = self
      .http
      .get(&endpoint)
      .query(&[("url", url), ("width", &viewport_width.to_string())])
      .send()
      .await?;

    let status = resp.status();
    if !status.is_success() {
      let body = resp.text().await.unwrap_or_default();
      return Err(Error::Server { status: status.as_u16(), body });
    }

    Ok(resp.bytes().await?.to_vec())
  }
}
