//! Notification dispatch: summary emails after a scan that found changes.
//!
//! Dispatch is fire-and-forget. A notifier failure is logged and swallowed;
//! it never fails or delays the pipeline.

use std::convert::Infallible;

use driftwatch_core::{external::Notifier, page::Page};
use tracing::{info, warn};

/// Send the post-scan summary, logging (not propagating) any failure.
pub async fn notify_scan<N: Notifier>(
  notifier: &N,
  email: &str,
  page: &Page,
  changes_found: usize,
) {
  let subject = format!("{changes_found} change(s) detected on {}", page.url);
  let body = format!(
    "Driftwatch detected {changes_found} change(s) on {} during its latest \
     scan. Each change will be assessed against your connected metrics at \
     the 7, 14, 30, 60, and 90 day marks.",
    page.url
  );

  if let Err(e) = notifier.send(email, &subject, &body).await {
    warn!(email, page = %page.url, error = %e, "notification failed");
  }
}

/// Notifier that logs instead of sending — the default wiring until an
/// email provider is configured.
#[derive(Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
  type Error = Infallible;

  async fn send(
    &self,
    email: &str,
    subject: &str,
    _body: &str,
  ) -> Result<(), Infallible> {
    info!(email, subject, "notification (log only)");
    Ok(())
  }
}
