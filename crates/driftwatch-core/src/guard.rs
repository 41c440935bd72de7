//! The candidate matcher / hallucination guard.
//!
//! The diff detector may claim that a proposed change matches an existing
//! record by ID. Those IDs come out of a generative model and are untrusted:
//! the model can invent IDs that were never in the candidate list it was
//! shown. Acceptance is therefore pure set membership against the candidate
//! set the caller actually sent — never a confidence threshold.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::change::DetectedChange;

/// At most this many `watching` changes are offered to the model for
/// match-claiming. Oldest first, so long-lived records stay matchable.
pub const MAX_CANDIDATES: usize = 50;

// ─── Claims ──────────────────────────────────────────────────────────────────

/// A model's claim that a proposed change matches an existing record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchClaim {
  pub matched_change_id: Uuid,
  /// The model's stated confidence in the match. Stored for observability;
  /// never consulted by the guard.
  pub confidence:        f64,
  pub rationale:         String,
}

// ─── Candidate set ───────────────────────────────────────────────────────────

/// The authoritative set of change IDs offered to a model call. This is the
/// ground truth every claimed reference is validated against.
#[derive(Debug, Clone, Default)]
pub struct CandidateSet {
  ids: HashSet<Uuid>,
}

impl CandidateSet {
  pub fn from_changes(changes: &[DetectedChange]) -> Self {
    Self {
      ids: changes.iter().map(|c| c.change_id).collect(),
    }
  }

  pub fn contains(&self, id: Uuid) -> bool { self.ids.contains(&id) }

  pub fn is_empty(&self) -> bool { self.ids.is_empty() }
}

// ─── Decision ────────────────────────────────────────────────────────────────

/// The guard's deterministic decision on a match claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchDecision {
  /// The claimed ID is in the candidate set; update that record in place.
  Accepted(Uuid),
  /// The claimed ID was never offered to the model; record a new change.
  Rejected { claimed: Uuid },
}

/// Accept a claim iff its ID is a member of `candidates`. Any ID outside the
/// set is rejected regardless of the model's stated confidence.
pub fn validate_match(claim: &MatchClaim, candidates: &CandidateSet) -> MatchDecision {
  if candidates.contains(claim.matched_change_id) {
    MatchDecision::Accepted(claim.matched_change_id)
  } else {
    MatchDecision::Rejected { claimed: claim.matched_change_id }
  }
}

#[cfg(test)]
mod tests {
  use chrono::Utc;

  use super::*;
  use crate::change::{ChangeScope, ChangeStatus, Magnitude};

  fn watching_change(page_id: Uuid) -> DetectedChange {
    DetectedChange {
      change_id:         Uuid::new_v4(),
      page_id,
      element:           "hero headline".into(),
      scope:             ChangeScope::Element,
      before:            "Ship faster".into(),
      after:             "Ship twice as fast".into(),
      description:       None,
      magnitude:         Magnitude::Incremental,
      hypothesis:        None,
      first_detected_at: Utc::now(),
      last_seen_at:      Utc::now(),
      status:            ChangeStatus::Watching,
    }
  }

  fn claim(id: Uuid, confidence: f64) -> MatchClaim {
    MatchClaim {
      matched_change_id: id,
      confidence,
      rationale: "same element, same region".into(),
    }
  }

  #[test]
  fn member_id_is_accepted() {
    let page = Uuid::new_v4();
    let changes = vec![watching_change(page), watching_change(page)];
    let set = CandidateSet::from_changes(&changes);

    let decision = validate_match(&claim(changes[1].change_id, 0.4), &set);
    assert_eq!(decision, MatchDecision::Accepted(changes[1].change_id));
  }

  #[test]
  fn invented_id_is_rejected_even_at_full_confidence() {
    let page = Uuid::new_v4();
    let set = CandidateSet::from_changes(&[watching_change(page)]);

    let invented = Uuid::new_v4();
    let decision = validate_match(&claim(invented, 1.0), &set);
    assert_eq!(decision, MatchDecision::Rejected { claimed: invented });
  }

  #[test]
  fn empty_candidate_set_rejects_everything() {
    let set = CandidateSet::default();
    let id = Uuid::new_v4();
    assert_eq!(
      validate_match(&claim(id, 0.99), &set),
      MatchDecision::Rejected { claimed: id }
    );
  }
}
