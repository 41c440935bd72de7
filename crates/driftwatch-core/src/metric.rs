//! Metric deltas pulled from connected analytics sources.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The before/after movement of one metric over an assessment window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricDelta {
  pub name:           String,
  /// Which connected source produced this delta, e.g. `"plausible"`.
  pub source:         String,
  pub before:         f64,
  pub after:          f64,
  pub change_percent: f64,
}

/// The time window a set of deltas was computed over.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MetricWindow {
  pub start: DateTime<Utc>,
  pub end:   DateTime<Utc>,
}
