//! The checkpoint sweep: for every non-terminal change, compute the verdicts
//! whose horizons have elapsed.
//!
//! Each (change, horizon) is computed at most once — the store's uniqueness
//! constraint makes a replayed write a no-op — and a checkpoint is always
//! written for a due horizon: if the assessment model is down or keeps
//! producing malformed output, the deterministic fallback rule supplies the
//! verdict instead.

use chrono::{DateTime, Duration, Utc};
use driftwatch_core::{
  change::{DetectedChange, Settlement},
  checkpoint::{
    Assessment, Checkpoint, Horizon, NewCheckpoint, due_horizons,
    fallback_verdict,
  },
  detect::{AssessmentInput, OutcomeAssessor},
  external::MetricsProvider,
  metric::{MetricDelta, MetricWindow},
  page::Page,
  store::ChangeStore,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{Error, Result};

// ─── Environment ─────────────────────────────────────────────────────────────

/// Collaborators threaded through one checkpoint sweep.
pub struct AssessEnv<S, M, A> {
  pub store:    S,
  pub metrics:  M,
  pub assessor: A,
}

/// Aggregate result of one sweep.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CheckpointReport {
  pub changes_considered:  usize,
  pub checkpoints_written: usize,
  pub errors:              Vec<ChangeError>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeError {
  pub change_id: Uuid,
  pub message:   String,
}

// ─── Sweep ───────────────────────────────────────────────────────────────────

/// Compute every due checkpoint across all non-terminal changes.
///
/// The work-list fetch is shared setup; everything after it is isolated per
/// change, so one change's metrics outage never stalls the rest.
pub async fn run_checkpoint_sweep<S, M, A>(
  env: &AssessEnv<S, M, A>,
  now: DateTime<Utc>,
) -> Result<CheckpointReport>
where
  S: ChangeStore,
  M: MetricsProvider,
  A: OutcomeAssessor,
{
  let changes = env.store.assessable_changes().await.map_err(Error::store)?;

  let mut report = CheckpointReport {
    changes_considered: changes.len(),
    ..Default::default()
  };

  for change in &changes {
    match assess_change(env, change, now).await {
      Ok(written) => report.checkpoints_written += written,
      Err(e) => {
        warn!(change = %change.change_id, error = %e, "checkpoint assessment failed");
        report.errors.push(ChangeError {
          change_id: change.change_id,
          message:   e.to_string(),
        });
      }
    }
  }

  info!(
    considered = report.changes_considered,
    written = report.checkpoints_written,
    errors = report.errors.len(),
    "checkpoint sweep finished"
  );
  Ok(report)
}

async fn assess_change<S, M, A>(
  env: &AssessEnv<S, M, A>,
  change: &DetectedChange,
  now: DateTime<Utc>,
) -> Result<usize>
where
  S: ChangeStore,
  M: MetricsProvider,
  A: OutcomeAssessor,
{
  let existing = env
    .store
    .checkpoints_for(change.change_id)
    .await
    .map_err(Error::store)?;
  let computed: Vec<Horizon> = existing.iter().map(|c| c.horizon).collect();

  let due = due_horizons(change.first_detected_at, now, &computed);
  if due.is_empty() {
    return Ok(0);
  }

  let page = env
    .store
    .get_page(change.page_id)
    .await
    .map_err(Error::store)?
    .ok_or(Error::PageNotFound(change.page_id))?;

  let feedback = env
    .store
    .feedback_for_page(page.page_id)
    .await
    .map_err(Error::store)?;

  // Reasoning accumulates across horizons within this sweep too, so the
  // 14-day verdict sees the 7-day one computed moments earlier.
  let mut prior_reasoning: Vec<String> =
    existing.iter().map(|c| c.reasoning.clone()).collect();

  let mut written = 0;
  for horizon in due {
    let checkpoint =
      compute_checkpoint(env, change, &page, horizon, &prior_reasoning, &feedback)
        .await?;
    if let Some(checkpoint) = checkpoint {
      prior_reasoning.push(checkpoint.reasoning.clone());
      if horizon.is_final() {
        settle_on_final(env, change, checkpoint.assessment).await?;
      }
      written += 1;
    }
  }
  Ok(written)
}

async fn compute_checkpoint<S, M, A>(
  env: &AssessEnv<S, M, A>,
  change: &DetectedChange,
  page: &Page,
  horizon: Horizon,
  prior_reasoning: &[String],
  feedback: &[driftwatch_core::checkpoint::CheckpointFeedback],
) -> Result<Option<Checkpoint>>
where
  S: ChangeStore,
  M: MetricsProvider,
  A: OutcomeAssessor,
{
  let window = MetricWindow {
    start: change.first_detected_at,
    end:   change.first_detected_at + Duration::days(horizon.days()),
  };

  // A metrics outage is not a verdict of "no data": skip this change for
  // now and let the next sweep retry with real numbers.
  let deltas: Vec<MetricDelta> = env
    .metrics
    .deltas(page, window)
    .await
    .map_err(Error::metrics)?;

  let input = AssessmentInput {
    element:         change.element.clone(),
    before:          change.before.clone(),
    after:           change.after.clone(),
    horizon,
    deltas:          deltas.clone(),
    prior_reasoning: prior_reasoning.to_vec(),
    hypothesis:      change.hypothesis.clone(),
    feedback:        feedback.to_vec(),
  };

  let verdict = match env.assessor.assess(&input).await {
    Ok(verdict) => verdict,
    Err(e) => {
      warn!(
        change = %change.change_id,
        horizon = horizon.days(),
        error = %e,
        "assessor unavailable, writing deterministic fallback"
      );
      fallback_verdict(&deltas, horizon)
    }
  };

  let mut data_sources: Vec<String> =
    deltas.iter().map(|d| d.source.clone()).collect();
  data_sources.sort();
  data_sources.dedup();

  env
    .store
    .record_checkpoint(NewCheckpoint {
      change_id: change.change_id,
      horizon,
      verdict,
      data_sources,
    })
    .await
    .map_err(Error::store)
}

/// After the final horizon the metric window is closed: an improved verdict
/// validates the change, a regressed one closes it as regressed. Neutral and
/// inconclusive verdicts leave the record as-is. The transition is guarded
/// on `watching`, so a replay or an already-settled record is a no-op.
async fn settle_on_final<S, M, A>(
  env: &AssessEnv<S, M, A>,
  change: &DetectedChange,
  assessment: Assessment,
) -> Result<()>
where
  S: ChangeStore,
{
  let settlement = match assessment {
    Assessment::Improved => Settlement::Validated,
    Assessment::Regressed => Settlement::Regressed,
    Assessment::Neutral | Assessment::Inconclusive => return Ok(()),
  };

  let applied = env
    .store
    .settle_change(change.change_id, settlement)
    .await
    .map_err(Error::store)?;
  if applied {
    info!(change = %change.change_id, ?settlement, "change settled at final horizon");
  }
  Ok(())
}
