//! Model seams: the visual diff detector, the reconciliation engine, and the
//! outcome assessor.
//!
//! These traits are implemented by `driftwatch-remote` against a real vision
//! model and by in-memory fakes in pipeline tests. Everything a model returns
//! is treated as untrusted input — implementations must parse strictly, and
//! callers re-validate every claimed record reference through
//! [`crate::guard`] before writing.

use std::future::Future;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
  change::{ChangeScope, DetectedChange, Magnitude},
  checkpoint::{CheckpointFeedback, Horizon, Verdict},
  guard::MatchClaim,
  metric::MetricDelta,
};

// ─── Diff input ──────────────────────────────────────────────────────────────

/// Prior and current captures of one viewport.
#[derive(Debug, Clone)]
pub struct CapturePair {
  pub prior:   Vec<u8>,
  pub current: Vec<u8>,
}

/// A `watching` change as offered to the model for match-claiming.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateSummary {
  pub id:      Uuid,
  pub element: String,
  pub before:  String,
  pub after:   String,
}

impl From<&DetectedChange> for CandidateSummary {
  fn from(c: &DetectedChange) -> Self {
    Self {
      id:      c.change_id,
      element: c.element.clone(),
      before:  c.before.clone(),
      after:   c.after.clone(),
    }
  }
}

/// Everything the diff detector needs for one comparison.
#[derive(Debug, Clone)]
pub struct DiffInput {
  pub page_url:   String,
  pub desktop:    CapturePair,
  pub mobile:     Option<CapturePair>,
  /// Bounded candidate list; the guard's ground truth is built from exactly
  /// these entries.
  pub candidates: Vec<CandidateSummary>,
}

// ─── Diff output ─────────────────────────────────────────────────────────────

/// One change proposed by the diff detector. `claimed_match` is the model's
/// untrusted assertion that this is a re-observation of an existing record.
#[derive(Debug, Clone)]
pub struct ProposedChange {
  pub element:       String,
  pub scope:         ChangeScope,
  pub before:        String,
  pub after:         String,
  pub description:   Option<String>,
  pub claimed_match: Option<MatchClaim>,
}

/// Detects changes between two captured page states.
pub trait ChangeDetector: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  fn detect(
    &self,
    input: DiffInput,
  ) -> impl Future<Output = Result<Vec<ProposedChange>, Self::Error>> + Send;
}

// ─── Reconciliation ──────────────────────────────────────────────────────────

/// A `page`-scope aggregate record proposed to summarise a redesign.
#[derive(Debug, Clone)]
pub struct AggregateProposal {
  pub element:     String,
  pub before:      String,
  pub after:       String,
  pub description: Option<String>,
}

/// Folds one existing record into one proposed aggregate. The old ID comes
/// out of the model and must be re-validated against the candidate set.
#[derive(Debug, Clone)]
pub struct SupersessionInstruction {
  pub old_change_id:   Uuid,
  /// Index into [`ReconcilePlan::aggregates`].
  pub aggregate_index: usize,
}

/// The reconciliation engine's classification of a scan's combined change
/// set.
#[derive(Debug, Clone)]
pub struct ReconcilePlan {
  pub magnitude:     Magnitude,
  /// Non-empty only for [`Magnitude::Overhaul`]; at most two aggregates.
  pub aggregates:    Vec<AggregateProposal>,
  pub supersessions: Vec<SupersessionInstruction>,
}

/// Classifies fresh detections against the page's `watching` records and, on
/// an overhaul, proposes consolidation.
pub trait Reconciler: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  fn reconcile(
    &self,
    page_url: &str,
    fresh: &[ProposedChange],
    watching: &[CandidateSummary],
  ) -> impl Future<Output = Result<ReconcilePlan, Self::Error>> + Send;
}

// ─── Assessment ──────────────────────────────────────────────────────────────

/// Everything the assessment engine consults for one due horizon.
#[derive(Debug, Clone)]
pub struct AssessmentInput {
  pub element:         String,
  pub before:          String,
  pub after:           String,
  pub horizon:         Horizon,
  pub deltas:          Vec<MetricDelta>,
  /// Reasoning text of all prior checkpoints for the same change, oldest
  /// first — lets the model see the trend across horizons.
  pub prior_reasoning: Vec<String>,
  pub hypothesis:      Option<String>,
  /// Owner feedback on earlier checkpoints for the same page. Calibration
  /// context only; never an instruction to flip a verdict.
  pub feedback:        Vec<CheckpointFeedback>,
}

/// Produces a calibrated, correlational verdict for one (change, horizon).
pub trait OutcomeAssessor: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  fn assess(
    &self,
    input: &AssessmentInput,
  ) -> impl Future<Output = Result<Verdict, Self::Error>> + Send;
}
