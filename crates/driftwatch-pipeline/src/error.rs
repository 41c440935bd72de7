//! Error type for `driftwatch-pipeline`.
//!
//! Collaborator errors arrive through generic associated types, so they are
//! boxed at the seam; the variant records which collaborator failed.

use thiserror::Error;
use uuid::Uuid;

type Source = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum Error {
  #[error("store error: {0}")]
  Store(#[source] Source),

  #[error("capture error: {0}")]
  Capture(#[source] Source),

  #[error("diff detection error: {0}")]
  Detect(#[source] Source),

  #[error("metrics error: {0}")]
  Metrics(#[source] Source),

  #[error("io error: {0}")]
  Io(#[from] std::io::Error),

  #[error("account not found: {0}")]
  AccountNotFound(Uuid),

  #[error("page not found: {0}")]
  PageNotFound(Uuid),

  #[error("page {0} has no current baseline image on disk")]
  MissingBaselineImage(Uuid),
}

impl Error {
  pub fn store<E: std::error::Error + Send + Sync + 'static>(e: E) -> Self {
    Self::Store(Box::new(e))
  }

  pub fn capture<E: std::error::Error + Send + Sync + 'static>(e: E) -> Self {
    Self::Capture(Box::new(e))
  }

  pub fn detect<E: std::error::Error + Send + Sync + 'static>(e: E) -> Self {
    Self::Detect(Box::new(e))
  }

  pub fn metrics<E: std::error::Error + Send + Sync + 'static>(e: E) -> Self {
    Self::Metrics(Box::new(e))
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
