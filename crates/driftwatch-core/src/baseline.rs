//! Baselines and the staleness policy.
//!
//! A baseline is the last captured page state considered authoritative for
//! diffing. At most one baseline is current per page; a stale baseline forces
//! a full re-establishment instead of a diff.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A baseline older than this is no longer trusted as a diff reference.
pub const BASELINE_MAX_AGE_DAYS: i64 = 14;

// ─── Capture reference ───────────────────────────────────────────────────────

/// A screenshot stored on disk; no binary data lives in the database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureRef {
  /// Path relative to the configured capture directory.
  pub path:         String,
  /// SHA-256 hex digest of the image bytes; used for dedup and revert
  /// comparison.
  pub content_hash: String,
}

// ─── Baseline ────────────────────────────────────────────────────────────────

/// The current authoritative captured state of a page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Baseline {
  pub baseline_id: Uuid,
  pub page_id:     Uuid,
  pub captured_at: DateTime<Utc>,
  pub desktop:     CaptureRef,
  pub mobile:      Option<CaptureRef>,
}

/// Input to [`crate::store::ChangeStore::set_baseline`]. Replaces whatever
/// baseline is currently marked current for the page.
#[derive(Debug, Clone)]
pub struct NewBaseline {
  pub page_id: Uuid,
  pub desktop: CaptureRef,
  pub mobile:  Option<CaptureRef>,
}

// ─── Staleness policy ────────────────────────────────────────────────────────

/// Whether a page's baseline can be used as the prior side of a diff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BaselineFreshness {
  Usable,
  /// Missing or too old — the caller must run the full capture-and-establish
  /// flow instead of a diff.
  Stale,
}

/// Pure staleness decision over (baseline timestamp, now, threshold).
/// A missing baseline is always stale.
pub fn freshness(
  captured_at: Option<DateTime<Utc>>,
  now: DateTime<Utc>,
  max_age: Duration,
) -> BaselineFreshness {
  match captured_at {
    Some(at) if now - at <= max_age => BaselineFreshness::Usable,
    _ => BaselineFreshness::Stale,
  }
}

/// [`freshness`] with the standard 14-day threshold.
pub fn freshness_now(
  captured_at: Option<DateTime<Utc>>,
  now: DateTime<Utc>,
) -> BaselineFreshness {
  freshness(captured_at, now, Duration::days(BASELINE_MAX_AGE_DAYS))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn missing_baseline_is_stale() {
    assert_eq!(freshness_now(None, Utc::now()), BaselineFreshness::Stale);
  }

  #[test]
  fn recent_baseline_is_usable() {
    let now = Utc::now();
    let at = now - Duration::days(3);
    assert_eq!(freshness_now(Some(at), now), BaselineFreshness::Usable);
  }

  #[test]
  fn baseline_on_the_threshold_is_usable() {
    let now = Utc::now();
    let at = now - Duration::days(BASELINE_MAX_AGE_DAYS);
    assert_eq!(freshness_now(Some(at), now), BaselineFreshness::Usable);
  }

  #[test]
  fn twenty_day_old_baseline_is_stale() {
    let now = Utc::now();
    let at = now - Duration::days(20);
    assert_eq!(freshness_now(Some(at), now), BaselineFreshness::Stale);
  }
}
