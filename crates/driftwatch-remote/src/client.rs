//! [`ModelClient`] — a thin chat-completions client for a vision-capable
//! model, speaking the common `/v1/chat/completions` wire shape.

use std::time::Duration;

use base64::Engine as _;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{Error, Result};

/// Shared retry budget for every model operation: transport failures,
/// server errors, and malformed output all draw from the same three
/// attempts before the caller's fallback takes over.
pub const MAX_ATTEMPTS: u32 = 3;

/// Exponential backoff before retry `attempt` (1-based).
pub fn backoff(attempt: u32) -> Duration {
  Duration::from_millis(500 * 2u64.pow(attempt.saturating_sub(1)))
}

const REQUEST_TIMEOUT_SECS: u64 = 120;

// ─── Configuration ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
  /// Like `https://api.example.com` (no trailing slash).
  pub base_url: String,
  pub api_key:  String,
  pub model:    String,
}

// ─── Wire types ──────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct ChatRequest<'a> {
  model:           &'a str,
  messages:        Vec<ChatMessage>,
  response_format: ResponseFormat,
}

#[derive(Serialize)]
struct ChatMessage {
  role:    &'static str,
  content: Vec<ContentPart>,
}

#[derive(Serialize)]
struct ResponseFormat {
  #[serde(rename = "type")]
  kind: &'static str,
}

/// One part of a multi-modal user message.
#[derive(Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
  Text { text: String },
  ImageUrl { image_url: ImageUrl },
}

#[derive(Clone, Serialize)]
pub struct ImageUrl {
  pub url: String,
}

/// Wrap raw PNG bytes as an inline data-URL image part.
pub fn image_part(png_bytes: &[u8]) -> ContentPart {
  let encoded = base64::engine::general_purpose::STANDARD.encode(png_bytes);
  ContentPart::ImageUrl {
    image_url: ImageUrl {
      url: format!("data:image/png;base64,{encoded}"),
    },
  }
}

pub fn text_part(text: impl Into<String>) -> ContentPart {
  ContentPart::Text { text: text.into() }
}

#[derive(Deserialize)]
struct ChatResponse {
  choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
  message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
  content: Option<String>,
}

// ─── Client ──────────────────────────────────────────────────────────────────

/// Client for the vision model behind diff detection, reconciliation, and
/// outcome assessment. Cloning is cheap; the inner `reqwest::Client` is
/// reference-counted.
#[derive(Clone)]
pub struct ModelClient {
  http:   reqwest::Client,
  config: ModelConfig,
}

impl ModelClient {
  pub fn new(mut config: ModelConfig) -> Result<Self> {
    config.base_url = config.base_url.trim_end_matches('/').to_string();
    let http = reqwest::Client::builder()
      .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
      .build()?;
    Ok(Self { http, config })
  }

  /// One request/response round trip in JSON mode. No retries here — each
  /// operation owns its loop so semantic validation failures draw from the
  /// same budget as transport errors.
  pub(crate) async fn complete_json_once(
    &self,
    parts: Vec<ContentPart>,
  ) -> Result<serde_json::Value> {
    let request = ChatRequest {
      model:           &self.config.model,
      messages:        vec![ChatMessage { role: "user", content: parts }],
      response_format: ResponseFormat { kind: "json_object" },
    };

    let url = format!("{}/v1/chat/completions", self.config.base_url);
    debug!(url = %url, model = %self.config.model, "model call");

    let resp = self
      .http
      .post(&url)
      .bearer_auth(&self.config.api_key)
      .json(&request)
      .send()
      .await?;

    let status = resp.status();
    if !status.is_success() {
      let body = resp.text().await.unwrap_or_default();
      return Err(Error::Server { status: status.as_u16(), body });
    }

    let chat: ChatResponse = resp.json().await?;
    let content = chat
      .choices
      .into_iter()
      .next()
      .and_then(|c| c.message.content)
      .ok_or_else(|| Error::Malformed("response carried no content".into()))?;

    Ok(serde_json::from_str(&content)?)
  }
}
