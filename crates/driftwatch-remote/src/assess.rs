//! The checkpoint assessor — turns metric deltas, prior checkpoint history,
//! and owner context into a calibrated verdict for one horizon.
//!
//! The verdict must read as correlation, never causation: page metrics
//! cannot establish what caused what, so causal phrasing in the output is
//! treated as malformed and burns a retry like any other contract breach.
//! When the budget is exhausted the pipeline writes the deterministic
//! fallback verdict instead — a checkpoint is never left uncomputed.

use driftwatch_core::{
  checkpoint::{Assessment, Verdict},
  detect::{AssessmentInput, OutcomeAssessor},
};
use serde::Deserialize;
use tracing::warn;

use crate::{
  Error, ModelClient, Result,
  client::{MAX_ATTEMPTS, backoff, text_part},
};

// ─── Output validation ───────────────────────────────────────────────────────

const CAUSAL_PHRASES: &[&str] = &[
  "caused",
  "causing",
  "because of the change",
  "led to",
  "leads to",
  "resulted in",
  "results in",
  "drove",
  "due to the change",
];

/// Whether reasoning text asserts causation. Checked case-insensitively
/// against a fixed phrase list; correlational wording ("associated with",
/// "coincided with") passes.
pub fn contains_causal_language(reasoning: &str) -> bool {
  let lower = reasoning.to_lowercase();
  CAUSAL_PHRASES.iter().any(|p| lower.contains(p))
}

#[derive(Deserialize)]
struct WireVerdict {
  assessment: String,
  confidence: f64,
  reasoning:  String,
}

fn into_verdict(wire: WireVerdict) -> Result<Verdict> {
  let assessment = Assessment::from_discriminant(&wire.assessment)
    .map_err(|_| Error::Malformed(format!("unknown assessment {:?}", wire.assessment)))?;

  if contains_causal_language(&wire.reasoning) {
    return Err(Error::Malformed("reasoning asserts causation".into()));
  }

  Verdict::checked(assessment, wire.confidence, wire.reasoning)
    .map_err(|e| Error::Malformed(e.to_string()))
}

// ─── Prompt ──────────────────────────────────────────────────────────────────

fn assess_prompt(input: &AssessmentInput) -> Result<String> {
  let deltas = serde_json::to_string_pretty(&input.deltas)?;

  let prior = if input.prior_reasoning.is_empty() {
    "None — this is the first checkpoint for this change.".to_string()
  } else {
    input
      .prior_reasoning
      .iter()
      .enumerate()
      .map(|(i, r)| format!("{}. {r}", i + 1))
      .collect::<Vec<_>>()
      .join("\n")
  };

  let hypothesis = input
    .hypothesis
    .as_deref()
    .unwrap_or("None supplied.");

  let feedback = if input.feedback.is_empty() {
    "None.".to_string()
  } else {
    input
      .feedback
      .iter()
      .map(|f| {
        format!(
          "- marked {} {}",
          f.verdict.discriminant(),
          f.note.as_deref().unwrap_or("(no note)")
        )
      })
      .collect::<Vec<_>>()
      .join("\n")
  };

  Ok(format!(
    "A page change is being assessed {days} days after it was first seen.\n\n\
     Element: {element}\nBefore: {before}\nAfter: {after}\n\n\
     Metric movement over the window:\n{deltas}\n\n\
     Earlier checkpoint reasoning for this change (oldest first):\n{prior}\n\n\
     Owner's hypothesis for the change: {hypothesis}\n\n\
     Owner feedback on earlier assessments for this page (calibration \
     context only — do not flip a verdict just because an owner disagreed):\n\
     {feedback}\n\n\
     Classify the outcome as improved, regressed, neutral, or inconclusive. \
     Confidence bands: 0.8-1.0 only with multiple agreeing metrics and \
     adequate sample size; 0.5-0.79 a single clear metric; 0.2-0.49 \
     conflicting metrics or a short horizon; below 0.2 near-absence of \
     data.\n\n\
     Metrics cannot establish causation, so the reasoning must use \
     correlational language only (\"associated with\", \"coincided with\"), \
     never \"caused\" or \"led to\".\n\n\
     Respond with JSON: {{\"assessment\": \
     \"improved\"|\"regressed\"|\"neutral\"|\"inconclusive\", \
     \"confidence\": number, \"reasoning\": string}}.",
    days = input.horizon.days(),
    element = input.element,
    before = input.before,
    after = input.after,
  ))
}

// ─── Assessor impl ───────────────────────────────────────────────────────────

impl OutcomeAssessor for ModelClient {
  type Error = Error;

  async fn assess(&self, input: &AssessmentInput) -> Result<Verdict> {
    let prompt = assess_prompt(input)?;

    let mut last = String::new();
    for attempt in 1..=MAX_ATTEMPTS {
      let outcome = async {
        let value = self.complete_json_once(vec![text_part(prompt.clone())]).await?;
        let wire: WireVerdict = serde_json::from_value(value)?;
        into_verdict(wire)
      }
      .await;

      match outcome {
        Ok(verdict) => return Ok(verdict),
        Err(e) => {
          warn!(attempt, error = %e, element = %input.element, "assessment call failed");
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
  fn causal_phrasing_is_detected() {
    assert!(contains_causal_language(
      "The new headline caused a 12% lift in signups."
    ));
    assert!(contains_causal_language("This change led to more churn."));
    assert!(!contains_causal_language(
      "The change coincided with a 12% rise in signups and is associated \
       with improved conversion."
    ));
  }

  #[test]
  fn causal_reasoning_is_malformed() {
    let wire = WireVerdict {
      assessment: "improved".into(),
      confidence: 0.7,
      reasoning:  "The redesign drove signups up 20%.".into(),
    };
    assert!(matches!(into_verdict(wire), Err(Error::Malformed(_))));
  }

  #[test]
  fn out_of_range_confidence_is_malformed() {
    let wire = WireVerdict {
      assessment: "neutral".into(),
      confidence: 1.4,
      reasoning:  "Metrics were flat over the window.".into(),
    };
    assert!(matches!(into_verdict(wire), Err(Error::Malformed(_))));
  }

  #[test]
  fn clean_verdict_passes() {
    let wire = WireVerdict {
      assessment: "improved".into(),
      confidence: 0.85,
      reasoning:  "Signups and pageviews both rose and the movement \
                   coincided with the change."
        .into(),
    };
    let verdict = into_verdict(wire).unwrap();
    assert_eq!(verdict.assessment, Assessment::Improved);
  }
}
