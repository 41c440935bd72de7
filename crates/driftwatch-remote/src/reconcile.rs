//! The reconciliation proposer — classifies a scan's combined change set as
//! incremental or an overhaul and, for overhauls, proposes the aggregate
//! records and supersession instructions.
//!
//! Output here is advisory: the pipeline re-validates every referenced ID
//! against the real candidate set and falls back to per-change upserts if
//! this call fails outright.

use driftwatch_core::{
  change::Magnitude,
  detect::{
    AggregateProposal, CandidateSummary, ProposedChange, ReconcilePlan,
    Reconciler, SupersessionInstruction,
  },
};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::{
  Error, ModelClient, Result,
  client::{MAX_ATTEMPTS, backoff, text_part},
};

/// An overhaul is summarised by at most this many aggregates.
pub const MAX_AGGREGATES: usize = 2;

// ─── Wire types ──────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct FreshChange<'a> {
  element: &'a str,
  before:  &'a str,
  after:   &'a str,
}

#[derive(Deserialize)]
struct WireReconcile {
  magnitude:     String,
  #[serde(default)]
  aggregates:    Vec<WireAggregate>,
  #[serde(default)]
  supersessions: Vec<WireSupersession>,
}

#[derive(Deserialize)]
struct WireAggregate {
  element:     String,
  before:      String,
  after:       String,
  #[serde(default)]
  description: Option<String>,
}

#[derive(Deserialize)]
struct WireSupersession {
  old_change_id:   String,
  aggregate_index: usize,
}

fn into_plan(wire: WireReconcile) -> Result<ReconcilePlan> {
  let magnitude = match wire.magnitude.as_str() {
    "incremental" => Magnitude::Incremental,
    "overhaul" => Magnitude::Overhaul,
    other => return Err(Error::Malformed(format!("unknown magnitude {other:?}"))),
  };

  if magnitude == Magnitude::Incremental {
    // Aggregates only accompany an overhaul; drop anything extraneous.
    return Ok(ReconcilePlan {
      magnitude,
      aggregates:    Vec::new(),
      supersessions: Vec::new(),
    });
  }

  if wire.aggregates.is_empty() || wire.aggregates.len() > MAX_AGGREGATES {
    return Err(Error::Malformed(format!(
      "overhaul must carry 1-{MAX_AGGREGATES} aggregates, got {}",
      wire.aggregates.len()
    )));
  }

  let aggregates: Vec<AggregateProposal> = wire
    .aggregates
    .into_iter()
    .map(|a| AggregateProposal {
      element:     a.element,
      before:      a.before,
      after:       a.after,
      description: a.description,
    })
    .collect();

  let mut supersessions = Vec::new();
  for s in wire.supersessions {
    if s.aggregate_index >= aggregates.len() {
      return Err(Error::Malformed(format!(
        "supersession references aggregate {} of {}",
        s.aggregate_index,
        aggregates.len()
      )));
    }
    // An unparseable ID cannot match a real record; skip it and let the
    // guard's containment check handle anything else invented.
    match Uuid::parse_str(&s.old_change_id) {
      Ok(id) => supersessions.push(SupersessionInstruction {
        old_change_id:   id,
        aggregate_index: s.aggregate_index,
      }),
      Err(_) => {
        warn!(claimed = %s.old_change_id, "dropping supersession with unparseable id");
      }
    }
  }

  Ok(ReconcilePlan { magnitude, aggregates, supersessions })
}

// ─── Prompt ──────────────────────────────────────────────────────────────────

fn reconcile_prompt(
  page_url: &str,
  fresh: &[ProposedChange],
  watching: &[CandidateSummary],
) -> Result<String> {
  let fresh_json = serde_json::to_string_pretty(
    &fresh
      .iter()
      .map(|c| FreshChange {
        element: &c.element,
        before:  &c.before,
        after:   &c.after,
      })
      .collect::<Vec<_>>(),
  )?;
  let watching_json = serde_json::to_string_pretty(watching)?;

  Ok(format!(
    "The page {page_url} is being monitored for visual changes.\n\n\
     Changes already tracked (each has an id):\n{watching_json}\n\n\
     Changes detected in the latest scan:\n{fresh_json}\n\n\
     Classify the combined set. If it amounts to 1-4 related edits, respond \
     {{\"magnitude\": \"incremental\"}}. If it is 5 or more edits, or \
     clearly a redesign, respond with magnitude \"overhaul\" plus 1-2 \
     aggregate records that summarise the redesign and, for each tracked \
     change the redesign absorbs, a supersession entry. Ids in \
     old_change_id must come from the tracked list above.\n\n\
     JSON shape: {{\"magnitude\": \"incremental\"|\"overhaul\", \
     \"aggregates\": [{{\"element\": string, \"before\": string, \"after\": \
     string, \"description\": string?}}], \"supersessions\": \
     [{{\"old_change_id\": string, \"aggregate_index\": number}}]}}.",
  ))
}

// ─── Reconciler impl ─────────────────────────────────────────────────────────

impl Reconciler for ModelClient {
  type Error = Error;

  async fn reconcile(
    &self,
    page_url: &str,
    fresh: &[ProposedChange],
    watching: &[CandidateSummary],
  ) -> Result<ReconcilePlan> {
    let prompt = reconcile_prompt(page_url, fresh, watching)?;

    let mut last = String::new();
    for attempt in 1..=MAX_ATTEMPTS {
      let outcome = async {
        let value = self.complete_json_once(vec![text_part(&prompt)]).await?;
        let wire: WireReconcile = serde_json::from_value(value)?;
        into_plan(wire)
      }
      .await;

      match outcome {
        Ok(plan) => return Ok(plan),
        Err(e) => {
          warn!(attempt, error = %e, url = page_url, "reconcile call failed");
          last = e.to_string();
          if attempt < MAX_ATTEMPTS {
            tokio::time::sleep(backoff(attempt)).await;
          }
        }
      }
    }

    Err(Error::Exhausted { attempts: MAX_ATTEMPTS, last })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn incremental_plan_drops_stray_aggregates() {
    let wire: WireReconcile = serde_json::from_value(serde_json::json!({
      "magnitude": "incremental",
      "aggregates": [{"element": "x", "before": "a", "after": "b"}]
    }))
    .unwrap();

    let plan = into_plan(wire).unwrap();
    assert_eq!(plan.magnitude, Magnitude::Incremental);
    assert!(plan.aggregates.is_empty());
  }

  #[test]
  fn overhaul_with_out_of_range_index_is_malformed() {
    let wire: WireReconcile = serde_json::from_value(serde_json::json!({
      "magnitude": "overhaul",
      "aggregates": [{"element": "redesign", "before": "old", "after": "new"}],
      "supersessions": [{"old_change_id": Uuid::new_v4().to_string(), "aggregate_index": 3}]
    }))
    .unwrap();

    assert!(matches!(into_plan(wire), Err(Error::Malformed(_))));
  }

  #[test]
  fn overhaul_with_too_many_aggregates_is_malformed() {
    let wire: WireReconcile = serde_json::from_value(serde_json::json!({
      "magnitude": "overhaul",
      "aggregates": [
        {"element": "a", "before": "1", "after": "2"},
        {"element": "b", "before": "1", "after": "2"},
        {"element": "c", "before": "1", "after": "2"}
      ]
    }))
    .unwrap();

    assert!(matches!(into_plan(wire), Err(Error::Malformed(_))));
  }

  #[test]
  fn unparseable_supersession_id_is_skipped() {
    let wire: WireReconcile = serde_json::from_value(serde_json::json!({
      "magnitude": "overhaul",
      "aggregates": [{"element": "redesign", "before": "old", "after": "new"}],
      "supersessions": [
        {"old_change_id": "garbage", "aggregate_index": 0},
        {"old_change_id": Uuid::new_v4().to_string(), "aggregate_index": 0}
      ]
    }))
    .unwrap();

    let plan = into_plan(wire).unwrap();
    assert_eq!(plan.supersessions.len(), 1);
  }
}
