//! Traits for external collaborators consumed by the pipeline: screenshot
//! capture, metric sources, and notification dispatch.

use std::future::Future;

use crate::{
  metric::{MetricDelta, MetricWindow},
  page::Page,
};

/// Standard desktop capture width, in CSS pixels.
pub const DESKTOP_VIEWPORT: u32 = 1440;
/// Standard mobile capture width.
pub const MOBILE_VIEWPORT: u32 = 390;

// ─── Screenshot capture ──────────────────────────────────────────────────────

/// Black-box page capture: given a URL and viewport width, return image
/// bytes. Transient failures are expected and handled by the caller.
pub trait ScreenCapture: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  fn capture(
    &self,
    url: &str,
    viewport_width: u32,
  ) -> impl Future<Output = Result<Vec<u8>, Self::Error>> + Send;
}

// ─── Metrics ─────────────────────────────────────────────────────────────────

/// Aggregated view over whatever analytics sources the account has
/// connected. Zero connected sources is valid and yields no deltas; each
/// returned delta names its source.
pub trait MetricsProvider: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  fn deltas(
    &self,
    page: &Page,
    window: MetricWindow,
  ) -> impl Future<Output = Result<Vec<MetricDelta>, Self::Error>> + Send;
}

// ─── Notification ────────────────────────────────────────────────────────────

/// Fire-and-forget notification dispatch. Callers log failures and move on;
/// a notification must never block or fail the pipeline.
pub trait Notifier: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  fn send(
    &self,
    email: &str,
    subject: &str,
    body: &str,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send;
}
