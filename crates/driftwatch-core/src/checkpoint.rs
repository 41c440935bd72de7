//! Checkpoints — time-delayed outcome verdicts attached to detected changes.
//!
//! A checkpoint is computed once per (change, horizon) pair and is immutable
//! after that. Horizons are fixed elapsed-time markers from the change's
//! `first_detected_at`.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Error, Result, metric::MetricDelta};

// ─── Horizon ─────────────────────────────────────────────────────────────────

/// Fixed assessment horizons, in days from first detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub enum Horizon {
  D7,
  D14,
  D30,
  D60,
  D90,
}

impl Horizon {
  pub const ALL: [Horizon; 5] =
    [Horizon::D7, Horizon::D14, Horizon::D30, Horizon::D60, Horizon::D90];

  pub fn days(self) -> i64 {
    match self {
      Self::D7 => 7,
      Self::D14 => 14,
      Self::D30 => 30,
      Self::D60 => 60,
      Self::D90 => 90,
    }
  }

  /// The last horizon; once computed, the change's metric window is closed.
  pub fn is_final(self) -> bool { matches!(self, Self::D90) }
}

impl TryFrom<i64> for Horizon {
  type Error = Error;

  fn try_from(days: i64) -> Result<Self> {
    match days {
      7 => Ok(Self::D7),
      14 => Ok(Self::D14),
      30 => Ok(Self::D30),
      60 => Ok(Self::D60),
      90 => Ok(Self::D90),
      other => Err(Error::UnknownDiscriminant {
        kind:  "horizon",
        value: other.to_string(),
      }),
    }
  }
}

impl From<Horizon> for i64 {
  fn from(h: Horizon) -> i64 { h.days() }
}

/// The horizons elapsed as of `now` but not yet computed, in ascending order.
pub fn due_horizons(
  first_detected_at: DateTime<Utc>,
  now: DateTime<Utc>,
  computed: &[Horizon],
) -> Vec<Horizon> {
  Horizon::ALL
    .into_iter()
    .filter(|h| now - first_detected_at >= Duration::days(h.days()))
    .filter(|h| !computed.contains(h))
    .collect()
}

// ─── Assessment ──────────────────────────────────────────────────────────────

/// The verdict attached to one horizon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Assessment {
  Improved,
  Regressed,
  Neutral,
  Inconclusive,
}

impl Assessment {
  pub fn discriminant(&self) -> &'static str {
    match self {
      Self::Improved => "improved",
      Self::Regressed => "regressed",
      Self::Neutral => "neutral",
      Self::Inconclusive => "inconclusive",
    }
  }

  pub fn from_discriminant(s: &str) -> Result<Self> {
    match s {
      "improved" => Ok(Self::Improved),
      "regressed" => Ok(Self::Regressed),
      "neutral" => Ok(Self::Neutral),
      "inconclusive" => Ok(Self::Inconclusive),
      other => Err(Error::UnknownDiscriminant {
        kind:  "assessment",
        value: other.to_string(),
      }),
    }
  }
}

/// A verdict with its calibrated confidence and supporting reasoning.
///
/// Confidence bands are fixed by design, not learned:
/// 0.8–1.0 multiple agreeing metrics with adequate sample size; 0.5–0.79 a
/// single clear metric; 0.2–0.49 conflicting metrics or a short horizon;
/// below 0.2 near-absence of data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Verdict {
  pub assessment: Assessment,
  pub confidence: f64,
  pub reasoning:  String,
}

impl Verdict {
  /// Reject confidence values outside [0, 1] instead of silently clamping —
  /// an out-of-range value means the producer is broken.
  pub fn checked(assessment: Assessment, confidence: f64, reasoning: String) -> Result<Self> {
    if !(0.0..=1.0).contains(&confidence) {
      return Err(Error::ConfidenceOutOfRange(confidence));
    }
    Ok(Self { assessment, confidence, reasoning })
  }
}

// ─── Deterministic fallback ──────────────────────────────────────────────────

/// Below this absolute percentage change a lone metric reads as noise.
const FALLBACK_NEUTRAL_BAND_PCT: f64 = 2.0;

/// Rule-based verdict used when the assessment model is unavailable or keeps
/// returning malformed output: sign and magnitude of the single largest
/// metric delta. Confidence sits in the conflicting/short-horizon band at
/// best, since a single uncorroborated metric is all it ever consults.
pub fn fallback_verdict(deltas: &[MetricDelta], horizon: Horizon) -> Verdict {
  let Some(largest) = deltas
    .iter()
    .max_by(|a, b| {
      a.change_percent
        .abs()
        .total_cmp(&b.change_percent.abs())
    })
  else {
    return Verdict {
      assessment: Assessment::Inconclusive,
      confidence: 0.1,
      reasoning:  format!(
        "No metric data was available for the {}-day window.",
        horizon.days()
      ),
    };
  };

  let (assessment, direction) = if largest.change_percent.abs() < FALLBACK_NEUTRAL_BAND_PCT {
    (Assessment::Neutral, "held steady")
  } else if largest.change_percent > 0.0 {
    (Assessment::Improved, "rose")
  } else {
    (Assessment::Regressed, "fell")
  };

  Verdict {
    assessment,
    confidence: 0.35,
    reasoning: format!(
      "Rule-based assessment: {} ({}) {} by {:.1}% over the {}-day window; \
       the change coincided with this movement.",
      largest.name,
      largest.source,
      direction,
      largest.change_percent.abs(),
      horizon.days()
    ),
  }
}

// ─── Checkpoint ──────────────────────────────────────────────────────────────

/// One assessment of one change at one horizon. Immutable once written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
  pub checkpoint_id: Uuid,
  pub change_id:     Uuid,
  pub horizon:       Horizon,
  pub assessment:    Assessment,
  pub confidence:    f64,
  pub reasoning:     String,
  /// Names of the metric sources consulted, e.g. `["plausible", "app_db"]`.
  pub data_sources:  Vec<String>,
  pub computed_at:   DateTime<Utc>,
}

/// Input to [`crate::store::ChangeStore::record_checkpoint`].
#[derive(Debug, Clone)]
pub struct NewCheckpoint {
  pub change_id:    Uuid,
  pub horizon:      Horizon,
  pub verdict:      Verdict,
  pub data_sources: Vec<String>,
}

// ─── Feedback ────────────────────────────────────────────────────────────────

/// Owner feedback on a checkpoint's accuracy. Used only as calibration
/// context for later assessments, never as an instruction to flip a verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedbackVerdict {
  Accurate,
  Inaccurate,
}

impl FeedbackVerdict {
  pub fn discriminant(&self) -> &'static str {
    match self {
      Self::Accurate => "accurate",
      Self::Inaccurate => "inaccurate",
    }
  }

  pub fn from_discriminant(s: &str) -> Result<Self> {
    match s {
      "accurate" => Ok(Self::Accurate),
      "inaccurate" => Ok(Self::Inaccurate),
      other => Err(Error::UnknownDiscriminant {
        kind:  "feedback verdict",
        value: other.to_string(),
      }),
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointFeedback {
  pub feedback_id:   Uuid,
  pub checkpoint_id: Uuid,
  pub verdict:       FeedbackVerdict,
  pub note:          Option<String>,
  pub recorded_at:   DateTime<Utc>,
}

/// Input to [`crate::store::ChangeStore::record_feedback`].
#[derive(Debug, Clone)]
pub struct NewFeedback {
  pub checkpoint_id: Uuid,
  pub verdict:       FeedbackVerdict,
  pub note:          Option<String>,
}

#[cfg(test)]
mod tests {
  use super::*;

  fn delta(name: &str, change_percent: f64) -> MetricDelta {
    MetricDelta {
      name:           name.into(),
      source:         "test".into(),
      before:         100.0,
      after:          100.0 * (1.0 + change_percent / 100.0),
      change_percent,
    }
  }

  #[test]
  fn due_horizons_in_order_and_uncomputed_only() {
    let first = Utc::now() - Duration::days(35);
    let due = due_horizons(first, Utc::now(), &[Horizon::D7]);
    assert_eq!(due, vec![Horizon::D14, Horizon::D30]);
  }

  #[test]
  fn nothing_due_before_first_horizon() {
    let first = Utc::now() - Duration::days(3);
    assert!(due_horizons(first, Utc::now(), &[]).is_empty());
  }

  #[test]
  fn fallback_without_data_is_inconclusive_low_band() {
    let v = fallback_verdict(&[], Horizon::D7);
    assert_eq!(v.assessment, Assessment::Inconclusive);
    assert!(v.confidence < 0.2);
  }

  #[test]
  fn fallback_follows_sign_of_largest_delta() {
    let v = fallback_verdict(
      &[delta("pageviews", 3.0), delta("signups", -12.0)],
      Horizon::D14,
    );
    assert_eq!(v.assessment, Assessment::Regressed);
    assert!((0.2..0.5).contains(&v.confidence));
  }

  #[test]
  fn fallback_small_delta_is_neutral() {
    let v = fallback_verdict(&[delta("pageviews", 0.4)], Horizon::D30);
    assert_eq!(v.assessment, Assessment::Neutral);
  }

  #[test]
  fn out_of_range_confidence_is_rejected() {
    assert!(Verdict::checked(Assessment::Neutral, 1.3, String::new()).is_err());
    assert!(Verdict::checked(Assessment::Neutral, -0.1, String::new()).is_err());
  }
}
