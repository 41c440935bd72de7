//! The visual diff detector — compares two captured page states and proposes
//! structured changes, with optional match claims against the candidate set.

use std::io::Cursor;

use driftwatch_core::{
  change::ChangeScope,
  detect::{ChangeDetector, DiffInput, ProposedChange},
  guard::MatchClaim,
};
use image::ImageFormat;
use serde::Deserialize;
use tracing::warn;
use uuid::Uuid;

use crate::{
  Error, ModelClient, Result,
  client::{ContentPart, MAX_ATTEMPTS, backoff, image_part, text_part},
};

/// Captures taller than this are downscaled before submission; vision models
/// cap the pixel budget per image and long marketing pages blow past it.
pub const MAX_IMAGE_HEIGHT: u32 = 2000;

// ─── Image preparation ───────────────────────────────────────────────────────

/// Downscale a capture to at most [`MAX_IMAGE_HEIGHT`] pixels tall,
/// preserving aspect ratio. Images already under the cap pass through
/// untouched.
pub fn downscale(png_bytes: &[u8]) -> Result<Vec<u8>> {
  let img = image::load_from_memory(png_bytes)?;
  if img.height() <= MAX_IMAGE_HEIGHT {
    return Ok(png_bytes.to_vec());
  }

  let scale = MAX_IMAGE_HEIGHT as f64 / img.height() as f64;
  let width = (img.width() as f64 * scale).round().max(1.0) as u32;
  let resized = img.resize_exact(
    width,
    MAX_IMAGE_HEIGHT,
    image::imageops::FilterType::Triangle,
  );

  let mut out = Cursor::new(Vec::new());
  resized.write_to(&mut out, ImageFormat::Png)?;
  Ok(out.into_inner())
}

// ─── Wire types ──────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct WireDiff {
  #[serde(default)]
  changes: Vec<WireChange>,
}

#[derive(Deserialize)]
struct WireChange {
  element:           String,
  scope:             String,
  before:            String,
  after:             String,
  #[serde(default)]
  description:       Option<String>,
  #[serde(default)]
  matched_change_id: Option<String>,
  #[serde(default)]
  match_confidence:  Option<f64>,
  #[serde(default)]
  match_rationale:   Option<String>,
}

fn parse_scope(s: &str) -> Result<ChangeScope> {
  match s {
    "element" => Ok(ChangeScope::Element),
    "section" => Ok(ChangeScope::Section),
    "page" => Ok(ChangeScope::Page),
    other => Err(Error::Malformed(format!("unknown scope {other:?}"))),
  }
}

fn into_proposed(wire: WireChange) -> Result<ProposedChange> {
  let scope = parse_scope(&wire.scope)?;

  // A claim with an unparseable ID cannot possibly reference a candidate;
  // treat it as no claim at all, which routes the change to a new record —
  // the same outcome the guard produces for an invented UUID.
  let claimed_match = match wire.matched_change_id.as_deref() {
    None => None,
    Some(raw) => match Uuid::parse_str(raw) {
      Ok(id) => Some(MatchClaim {
        matched_change_id: id,
        confidence:        wire.match_confidence.unwrap_or(0.0),
        rationale:         wire.match_rationale.unwrap_or_default(),
      }),
      Err(_) => {
        warn!(claimed = raw, "dropping match claim with unparseable id");
        None
      }
    },
  };

  Ok(ProposedChange {
    element: wire.element,
    scope,
    before: wire.before,
    after: wire.after,
    description: wire.description,
    claimed_match,
  })
}

// ─── Prompt ──────────────────────────────────────────────────────────────────

fn diff_prompt(input: &DiffInput) -> Result<String> {
  let candidates = serde_json::to_string_pretty(&input.candidates)?;
  let image_legend = if input.mobile.is_some() {
    "Four screenshots follow: desktop before, desktop after, mobile before, mobile after."
  } else {
    "Two screenshots follow: desktop before, desktop after."
  };

  Ok(format!(
    "You are comparing two captured states of the page {url}.\n\
     {legend}\n\n\
     Report substantive content and layout changes only. Ignore capture \
     artifacts: loading skeletons, compression noise, cookie or promo \
     banners that come and go, and rendering jitter.\n\n\
     Aggregation: 1-3 isolated edits are separate \"element\" changes; a \
     cluster of related edits in one region is one \"section\" change; a \
     broad redesign is a single \"page\" change.\n\n\
     These changes are already being tracked for this page:\n{candidates}\n\n\
     If a difference you see is the same change as one of those entries, set \
     matched_change_id to that entry's id (ids must come from this list), \
     with match_confidence in [0,1] and a short match_rationale. Otherwise \
     omit those fields.\n\n\
     Respond with JSON: {{\"changes\": [{{\"element\": string, \"scope\": \
     \"element\"|\"section\"|\"page\", \"before\": string, \"after\": string, \
     \"description\": string?, \"matched_change_id\": string?, \
     \"match_confidence\": number?, \"match_rationale\": string?}}]}}. \
     Return {{\"changes\": []}} if nothing substantive changed.",
    url = input.page_url,
    legend = image_legend,
    candidates = candidates,
  ))
}

fn build_parts(input: &DiffInput) -> Result<Vec<ContentPart>> {
  let mut parts = vec![text_part(diff_prompt(input)?)];
  parts.push(image_part(&downscale(&input.desktop.prior)?));
  parts.push(image_part(&downscale(&input.desktop.current)?));
  if let Some(mobile) = &input.mobile {
    parts.push(image_part(&downscale(&mobile.prior)?));
    parts.push(image_part(&downscale(&mobile.current)?));
  }
  Ok(parts)
}

// ─── Detector impl ───────────────────────────────────────────────────────────

impl ChangeDetector for ModelClient {
  type Error = Error;

  async fn detect(&self, input: DiffInput) -> Result<Vec<ProposedChange>> {
    let parts = build_parts(&input)?;

    let mut last = String::new();
    for attempt in 1..=MAX_ATTEMPTS {
      let outcome = async {
        let value = self.complete_json_once(parts.clone()).await?;
        let wire: WireDiff = serde_json::from_value(value)?;
        wire.changes.into_iter().map(into_proposed).collect()
      }
      .await;

      match outcome {
        Ok(changes) => return Ok(changes),
        Err(e) => {
          warn!(attempt, error = %e, url = %input.page_url, "diff call failed");
          last = e.to_string();
          if attempt < MAX_ATTEMPTS {
            tokio::time::sleep(backoff(attempt)).await;
          }
        }
      }
    }

    // A page owner sees this as a failed scan; detections are never
    // silently discarded.
    Err(Error::Exhausted { attempts: MAX_ATTEMPTS, last })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn wire_change_with_valid_claim() {
    let id = Uuid::new_v4();
    let wire: WireChange = serde_json::from_value(serde_json::json!({
      "element": "hero headline",
      "scope": "element",
      "before": "Ship faster",
      "after": "Ship twice as fast",
      "matched_change_id": id.to_string(),
      "match_confidence": 0.9,
      "match_rationale": "same headline slot"
    }))
    .unwrap();

    let proposed = into_proposed(wire).unwrap();
    assert_eq!(proposed.scope, ChangeScope::Element);
    assert_eq!(proposed.claimed_match.unwrap().matched_change_id, id);
  }

  #[test]
  fn unparseable_claim_id_becomes_no_claim() {
    let wire: WireChange = serde_json::from_value(serde_json::json!({
      "element": "cta",
      "scope": "element",
      "before": "a",
      "after": "b",
      "matched_change_id": "not-a-uuid"
    }))
    .unwrap();

    let proposed = into_proposed(wire).unwrap();
    assert!(proposed.claimed_match.is_none());
  }

  #[test]
  fn unknown_scope_is_malformed() {
    let wire: WireChange = serde_json::from_value(serde_json::json!({
      "element": "cta",
      "scope": "pixel",
      "before": "a",
      "after": "b"
    }))
    .unwrap();

    assert!(matches!(into_proposed(wire), Err(Error::Malformed(_))));
  }
}
