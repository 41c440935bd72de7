//! Detected changes — the central entity of the pipeline.
//!
//! A change is created when the diff detector reports something new, mutated
//! by every scan that matches it again, and never physically deleted. Its
//! lifecycle is an explicit status enum with a forward-only transition graph;
//! "is this change still active" is asked by checkpoint scheduling,
//! reconciliation, and the read API alike.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Error, Result};

// ─── Scope & magnitude ───────────────────────────────────────────────────────

/// How much of the page a single detected change covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeScope {
  /// One isolated edit (a headline, a button label).
  Element,
  /// A cluster of related edits in one region.
  Section,
  /// A broad redesign recorded as a single record.
  Page,
}

/// Classification of a batch of detections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Magnitude {
  /// 1–4 related edits, recorded individually.
  Incremental,
  /// 5+ edits or a clear redesign, consolidated into aggregates.
  Overhaul,
}

// ─── Status ──────────────────────────────────────────────────────────────────

/// The lifecycle status of a detected change.
///
/// ```text
/// (none) --detected--> watching --> validated   (metric window closed, improved)
///                         |    --> regressed    (metric window closed, hurt)
///                         |    --> reverted     (page returned to prior state)  [terminal]
///                         --consolidated------> superseded                      [terminal]
/// ```
///
/// Transitions are forward-only; `superseded` and `reverted` are terminal.
/// The store enforces this with status-guarded conditional updates so a
/// replayed workflow step can never resurrect a closed record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ChangeStatus {
  /// Still awaiting enough time and data for a verdict.
  Watching,
  /// The metric window closed and the change was associated with improvement.
  Validated,
  /// The metric window closed and the change was associated with regression.
  Regressed,
  /// The page content returned to the prior state. Terminal.
  Reverted,
  /// Folded into an aggregate record by reconciliation. Terminal.
  Superseded {
    /// The aggregate change this record was folded into.
    by: Uuid,
  },
}

impl ChangeStatus {
  pub fn is_watching(&self) -> bool { matches!(self, Self::Watching) }

  /// Terminal statuses accept no further transitions and no new checkpoints.
  pub fn is_terminal(&self) -> bool {
    matches!(self, Self::Reverted | Self::Superseded { .. })
  }

  /// The discriminant string stored in the `status` column.
  pub fn discriminant(&self) -> &'static str {
    match self {
      Self::Watching => "watching",
      Self::Validated => "validated",
      Self::Regressed => "regressed",
      Self::Reverted => "reverted",
      Self::Superseded { .. } => "superseded",
    }
  }

  /// Rebuild from the `status` and `superseded_by` columns.
  pub fn from_parts(discriminant: &str, superseded_by: Option<Uuid>) -> Result<Self> {
    match (discriminant, superseded_by) {
      ("watching", _) => Ok(Self::Watching),
      ("validated", _) => Ok(Self::Validated),
      ("regressed", _) => Ok(Self::Regressed),
      ("reverted", _) => Ok(Self::Reverted),
      ("superseded", Some(by)) => Ok(Self::Superseded { by }),
      (other, _) => Err(Error::UnknownDiscriminant {
        kind:  "change status",
        value: other.to_string(),
      }),
    }
  }
}

/// The two ways a `watching` change closes when its metric window ends.
/// Input to [`crate::store::ChangeStore::settle_change`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
  Validated,
  Regressed,
}

impl Settlement {
  pub fn into_status(self) -> ChangeStatus {
    match self {
      Self::Validated => ChangeStatus::Validated,
      Self::Regressed => ChangeStatus::Regressed,
    }
  }
}

// ─── DetectedChange ──────────────────────────────────────────────────────────

/// One detected difference between two captured states of a page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectedChange {
  pub change_id:         Uuid,
  pub page_id:           Uuid,
  /// Human-readable label for the affected element or region.
  pub element:           String,
  pub scope:             ChangeScope,
  pub before:            String,
  pub after:             String,
  pub description:       Option<String>,
  pub magnitude:         Magnitude,
  /// Owner-supplied guess at what the change was meant to achieve; fed to
  /// the assessment engine as context.
  pub hypothesis:        Option<String>,
  /// When the change was first observed. For aggregates this is propagated
  /// backward from the earliest constituent, not the reconciliation time.
  pub first_detected_at: DateTime<Utc>,
  pub last_seen_at:      DateTime<Utc>,
  pub status:            ChangeStatus,
}

/// Input to [`crate::store::ChangeStore::record_change`]. New records always
/// start in `watching`; `first_detected_at` may only be supplied when an
/// aggregate inherits the age of the records it superseded.
#[derive(Debug, Clone)]
pub struct NewChange {
  pub page_id:           Uuid,
  pub element:           String,
  pub scope:             ChangeScope,
  pub before:            String,
  pub after:             String,
  pub description:       Option<String>,
  pub magnitude:         Magnitude,
  pub first_detected_at: Option<DateTime<Utc>>,
}

impl NewChange {
  pub fn new(
    page_id: Uuid,
    element: impl Into<String>,
    scope: ChangeScope,
    before: impl Into<String>,
    after: impl Into<String>,
  ) -> Self {
    Self {
      page_id,
      element: element.into(),
      scope,
      before: before.into(),
      after: after.into(),
      description: None,
      magnitude: Magnitude::Incremental,
      first_detected_at: None,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn terminal_statuses() {
    assert!(ChangeStatus::Reverted.is_terminal());
    assert!(ChangeStatus::Superseded { by: Uuid::new_v4() }.is_terminal());
    assert!(!ChangeStatus::Watching.is_terminal());
    assert!(!ChangeStatus::Validated.is_terminal());
    assert!(!ChangeStatus::Regressed.is_terminal());
  }

  #[test]
  fn status_discriminant_roundtrip() {
    let by = Uuid::new_v4();
    let cases = [
      ChangeStatus::Watching,
      ChangeStatus::Validated,
      ChangeStatus::Regressed,
      ChangeStatus::Reverted,
      ChangeStatus::Superseded { by },
    ];
    for status in cases {
      let rebuilt = ChangeStatus::from_parts(
        status.discriminant(),
        match &status {
          ChangeStatus::Superseded { by } => Some(*by),
          _ => None,
        },
      )
      .unwrap();
      assert_eq!(rebuilt, status);
    }
  }

  #[test]
  fn superseded_without_reference_is_rejected() {
    assert!(ChangeStatus::from_parts("superseded", None).is_err());
  }
}
