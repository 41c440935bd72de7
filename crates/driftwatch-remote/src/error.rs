//! Error type for `driftwatch-remote`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("HTTP request failed: {0}")]
  Http(#[from] reqwest::Error),

  #[error("server returned {status}: {body}")]
  Server { status: u16, body: String },

  #[error("JSON parse error: {0}")]
  Json(#[from] serde_json::Error),

  /// Schema-valid JSON carrying out-of-contract content (unknown enum value,
  /// out-of-range index, causal phrasing). Retried like a transient failure.
  #[error("malformed model output: {0}")]
  Malformed(String),

  #[error("model call failed after {attempts} attempts: {last}")]
  Exhausted { attempts: u32, last: String },

  #[error("image decode/encode error: {0}")]
  Image(#[from] image::ImageError),

  #[error("core error: {0}")]
  Core(#[from] driftwatch_core::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
