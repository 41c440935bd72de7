//! The shared detection core: staleness check → establish or diff →
//! hallucination guard → reconciliation → notification.
//!
//! Per-page work is wrapped so one page's failure never aborts its
//! siblings. Every write below is either a status-guarded conditional
//! update or protected by a uniqueness constraint, so the surrounding
//! workflow runtime may replay any of it.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use driftwatch_core::{
  baseline::{Baseline, BaselineFreshness, CaptureRef, NewBaseline, freshness_now},
  change::{ChangeScope, DetectedChange, Magnitude, NewChange},
  detect::{
    CandidateSummary, CapturePair, ChangeDetector, DiffInput, ProposedChange,
    ReconcilePlan, Reconciler,
  },
  external::{DESKTOP_VIEWPORT, MOBILE_VIEWPORT, Notifier, ScreenCapture},
  guard::{CandidateSet, MAX_CANDIDATES, MatchDecision, validate_match},
  page::{Account, Page},
  scan::{ScanKind, TriggerKind},
  store::{ChangeRefresh, ChangeStore},
};
use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};
use tokio::fs;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{Error, Result, notify::notify_scan};

// ─── Environment ─────────────────────────────────────────────────────────────

/// Collaborators threaded through one scan run.
pub struct ScanEnv<S, C, D, R, N> {
  pub store:       S,
  pub capture:     C,
  pub detector:    D,
  pub reconciler:  R,
  pub notifier:    N,
  /// Root directory for capture images; baselines store paths relative to
  /// it.
  pub capture_dir: PathBuf,
}

// ─── Reports ─────────────────────────────────────────────────────────────────

/// How one page's scan ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanOutcome {
  /// A scan for this (page, trigger, day) already exists; nothing ran.
  AlreadyRan,
  /// Stale or missing baseline: a fresh baseline was established, no diff.
  Established,
  Diffed { changes_found: usize },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageError {
  pub page_id: Uuid,
  pub message: String,
}

/// Aggregate result of a batch of per-page scans.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchReport {
  pub scanned: usize,
  pub changed: usize,
  pub errors:  Vec<PageError>,
}

// ─── Entry point ─────────────────────────────────────────────────────────────

/// Run the detection pipeline for one page.
///
/// Duplicate runs for the same (page, trigger, day) short-circuit to
/// [`ScanOutcome::AlreadyRan`]. On failure the scan run is marked failed and
/// the error propagates to the caller, which records it against this page
/// only.
pub async fn run_page_scan<S, C, D, R, N>(
  env: &ScanEnv<S, C, D, R, N>,
  account: &Account,
  page: &Page,
  trigger: TriggerKind,
  now: DateTime<Utc>,
) -> Result<ScanOutcome>
where
  S: ChangeStore,
  C: ScreenCapture,
  D: ChangeDetector,
  R: Reconciler,
  N: Notifier,
{
  let baseline = env
    .store
    .current_baseline(page.page_id)
    .await
    .map_err(Error::store)?;

  // Stale or missing baseline forces the full establish path, regardless of
  // anything else.
  let freshness = freshness_now(baseline.as_ref().map(|b| b.captured_at), now);
  let (kind, diff_baseline) = match (freshness, baseline) {
    (BaselineFreshness::Usable, Some(b)) => (ScanKind::Diff, Some(b)),
    _ => (ScanKind::Establish, None),
  };

  let Some(scan) = env
    .store
    .begin_scan(page.page_id, trigger, kind, now.date_naive())
    .await
    .map_err(Error::store)?
  else {
    info!(page = %page.url, ?trigger, "scan already ran today");
    return Ok(ScanOutcome::AlreadyRan);
  };

  let outcome = match diff_baseline {
    None => establish_baseline(env, page)
      .await
      .map(|()| ScanOutcome::Established),
    Some(baseline) => diff_against_baseline(env, page, &baseline, now)
      .await
      .map(|changes_found| ScanOutcome::Diffed { changes_found }),
  };

  match outcome {
    Ok(outcome) => {
      let found = match &outcome {
        ScanOutcome::Diffed { changes_found } => *changes_found,
        _ => 0,
      };
      env
        .store
        .complete_scan(scan.scan_id, found as i64)
        .await
        .map_err(Error::store)?;
      env
        .store
        .touch_page_scanned(page.page_id, now)
        .await
        .map_err(Error::store)?;
      if found > 0 {
        notify_scan(&env.notifier, &account.email, page, found).await;
      }
      Ok(outcome)
    }
    Err(e) => {
      if let Err(mark) = env.store.fail_scan(scan.scan_id, e.to_string()).await {
        warn!(page = %page.url, error = %mark, "failed to mark scan failed");
      }
      Err(e)
    }
  }
}

/// Scan a batch of pages sequentially, isolating each page's failure.
pub(crate) async fn scan_pages_isolated<S, C, D, R, N>(
  env: &ScanEnv<S, C, D, R, N>,
  account: &Account,
  pages: &[Page],
  trigger: TriggerKind,
  now: DateTime<Utc>,
) -> BatchReport
where
  S: ChangeStore,
  C: ScreenCapture,
  D: ChangeDetector,
  R: Reconciler,
  N: Notifier,
{
  let mut report = BatchReport::default();
  for page in pages {
    match run_page_scan(env, account, page, trigger, now).await {
      Ok(ScanOutcome::AlreadyRan) => {}
      Ok(ScanOutcome::Established) => report.scanned += 1,
      Ok(ScanOutcome::Diffed { changes_found }) => {
        report.scanned += 1;
        if changes_found > 0 {
          report.changed += 1;
        }
      }
      Err(e) => {
        warn!(page = %page.url, error = %e, "page scan failed");
        report.errors.push(PageError {
          page_id: page.page_id,
          message: e.to_string(),
        });
      }
    }
  }
  report
}

// ─── Capture handling ────────────────────────────────────────────────────────

/// Desktop capture, plus mobile when enabled. The two are issued
/// concurrently and joined; a mobile failure degrades the scan to
/// desktop-only rather than failing it.
async fn capture_views<C: ScreenCapture>(
  capture: &C,
  page: &Page,
) -> Result<(Vec<u8>, Option<Vec<u8>>)> {
  if !page.mobile_enabled {
    let desktop = capture
      .capture(&page.url, DESKTOP_VIEWPORT)
      .await
      .map_err(Error::capture)?;
    return Ok((desktop, None));
  }

  let (desktop, mobile) = tokio::join!(
    capture.capture(&page.url, DESKTOP_VIEWPORT),
    capture.capture(&page.url, MOBILE_VIEWPORT),
  );

  let desktop = desktop.map_err(Error::capture)?;
  let mobile = match mobile {
    Ok(bytes) => Some(bytes),
    Err(e) => {
      warn!(page = %page.url, error = %e, "mobile capture failed, continuing desktop-only");
      None
    }
  };
  Ok((desktop, mobile))
}

async fn save_capture<S, C, D, R, N>(
  env: &ScanEnv<S, C, D, R, N>,
  page: &Page,
  label: &str,
  bytes: &[u8],
) -> Result<CaptureRef> {
  let dir = page.page_id.hyphenated().to_string();
  let relative = format!("{dir}/{}-{label}.png", Utc::now().timestamp_millis());

  fs::create_dir_all(env.capture_dir.join(&dir)).await?;
  fs::write(env.capture_dir.join(&relative), bytes).await?;

  Ok(CaptureRef {
    path:         relative,
    content_hash: hex::encode(Sha256::digest(bytes)),
  })
}

async fn load_capture<S, C, D, R, N>(
  env: &ScanEnv<S, C, D, R, N>,
  page: &Page,
  capture: &CaptureRef,
) -> Result<Vec<u8>> {
  fs::read(env.capture_dir.join(&capture.path))
    .await
    .map_err(|e| {
      if e.kind() == std::io::ErrorKind::NotFound {
        Error::MissingBaselineImage(page.page_id)
      } else {
        Error::Io(e)
      }
    })
}

async fn store_baseline<S, C, D, R, N>(
  env: &ScanEnv<S, C, D, R, N>,
  page: &Page,
  desktop: &[u8],
  mobile: Option<&[u8]>,
) -> Result<()>
where
  S: ChangeStore,
{
  let desktop_ref = save_capture(env, page, "desktop", desktop).await?;
  let mobile_ref = match mobile {
    Some(bytes) => Some(save_capture(env, page, "mobile", bytes).await?),
    None => None,
  };

  env
    .store
    .set_baseline(NewBaseline {
      page_id: page.page_id,
      desktop: desktop_ref,
      mobile:  mobile_ref,
    })
    .await
    .map_err(Error::store)?;
  Ok(())
}

// ─── Establish path ──────────────────────────────────────────────────────────

async fn establish_baseline<S, C, D, R, N>(
  env: &ScanEnv<S, C, D, R, N>,
  page: &Page,
) -> Result<()>
where
  S: ChangeStore,
  C: ScreenCapture,
{
  let (desktop, mobile) = capture_views(&env.capture, page).await?;
  store_baseline(env, page, &desktop, mobile.as_deref()).await?;
  info!(page = %page.url, "baseline established");
  Ok(())
}

// ─── Diff path ───────────────────────────────────────────────────────────────

async fn diff_against_baseline<S, C, D, R, N>(
  env: &ScanEnv<S, C, D, R, N>,
  page: &Page,
  baseline: &Baseline,
  now: DateTime<Utc>,
) -> Result<usize>
where
  S: ChangeStore,
  C: ScreenCapture,
  D: ChangeDetector,
  R: Reconciler,
{
  let (current_desktop, current_mobile) = capture_views(&env.capture, page).await?;

  let prior_desktop = load_capture(env, page, &baseline.desktop).await?;
  let mobile_pair = match (&baseline.mobile, &current_mobile) {
    (Some(prior_ref), Some(current)) => Some(CapturePair {
      prior:   load_capture(env, page, prior_ref).await?,
      current: current.clone(),
    }),
    _ => None,
  };

  // Bounded candidate list, oldest first; the guard's ground truth is built
  // from exactly the records the model is shown.
  let watching: Vec<DetectedChange> = env
    .store
    .watching_changes(page.page_id)
    .await
    .map_err(Error::store)?
    .into_iter()
    .take(MAX_CANDIDATES)
    .collect();
  let candidates: Vec<CandidateSummary> =
    watching.iter().map(CandidateSummary::from).collect();

  let proposals = env
    .detector
    .detect(DiffInput {
      page_url:   page.url.clone(),
      desktop:    CapturePair {
        prior:   prior_desktop,
        current: current_desktop.clone(),
      },
      mobile:     mobile_pair,
      candidates: candidates.clone(),
    })
    .await
    .map_err(Error::detect)?;

  let changes_found =
    apply_detections(env, page, proposals, &watching, &candidates, now).await?;

  // The current capture becomes the next scan's baseline.
  store_baseline(env, page, &current_desktop, current_mobile.as_deref()).await?;

  Ok(changes_found)
}

// ─── Recording detections ────────────────────────────────────────────────────

async fn apply_detections<S, C, D, R, N>(
  env: &ScanEnv<S, C, D, R, N>,
  page: &Page,
  proposals: Vec<ProposedChange>,
  watching: &[DetectedChange],
  candidates: &[CandidateSummary],
  now: DateTime<Utc>,
) -> Result<usize>
where
  S: ChangeStore,
  R: Reconciler,
{
  if proposals.is_empty() {
    return Ok(0);
  }

  let candidate_set = CandidateSet::from_changes(watching);

  // Reconciliation only runs when fresh detections land on top of records
  // already being watched.
  if !watching.is_empty() {
    match env
      .reconciler
      .reconcile(&page.url, &proposals, candidates)
      .await
    {
      Ok(plan) if plan.magnitude == Magnitude::Overhaul && !plan.aggregates.is_empty() => {
        return apply_overhaul(env, page, plan, &candidate_set).await;
      }
      Ok(_) => {}
      // Non-fatal: a failed or malformed reconciliation falls back to the
      // per-change path rather than losing this scan's detections.
      Err(e) => {
        warn!(page = %page.url, error = %e, "reconciliation failed, using per-change path");
      }
    }
  }

  let mut count = 0;
  for proposal in proposals {
    upsert_detection(env, page, proposal, &candidate_set, now).await?;
    count += 1;
  }
  Ok(count)
}

/// Record one detection: refresh the matched record if the guard accepts the
/// claim, otherwise create a new `watching` record.
async fn upsert_detection<S, C, D, R, N>(
  env: &ScanEnv<S, C, D, R, N>,
  page: &Page,
  proposal: ProposedChange,
  candidate_set: &CandidateSet,
  now: DateTime<Utc>,
) -> Result<()>
where
  S: ChangeStore,
{
  if let Some(claim) = &proposal.claimed_match {
    match validate_match(claim, candidate_set) {
      MatchDecision::Accepted(change_id) => {
        let applied = env
          .store
          .refresh_change(ChangeRefresh {
            change_id,
            after: proposal.after.clone(),
            description: proposal.description.clone(),
            match_note: Some(claim.rationale.clone()),
            last_seen_at: now,
          })
          .await
          .map_err(Error::store)?;
        if applied {
          return Ok(());
        }
        // The record left `watching` between candidate selection and this
        // write (e.g. a replayed supersession). The detection still stands,
        // so it falls through to a fresh record.
        warn!(%change_id, "matched change no longer watching, recording anew");
      }
      MatchDecision::Rejected { claimed } => {
        warn!(
          %claimed,
          confidence = claim.confidence,
          "rejected match claim outside candidate set"
        );
      }
    }
  }

  let mut change = NewChange::new(
    page.page_id,
    proposal.element,
    proposal.scope,
    proposal.before,
    proposal.after,
  );
  change.description = proposal.description;
  env
    .store
    .record_change(change)
    .await
    .map_err(Error::store)?;
  Ok(())
}

/// Apply an overhaul plan: one aggregate record per proposal, each
/// superseding the `watching` records the reconciler folded into it — after
/// the same containment check every model-claimed reference goes through.
async fn apply_overhaul<S, C, D, R, N>(
  env: &ScanEnv<S, C, D, R, N>,
  page: &Page,
  plan: ReconcilePlan,
  candidate_set: &CandidateSet,
) -> Result<usize>
where
  S: ChangeStore,
{
  let mut folded: Vec<Vec<Uuid>> = vec![Vec::new(); plan.aggregates.len()];
  for instruction in &plan.supersessions {
    if !candidate_set.contains(instruction.old_change_id) {
      warn!(
        claimed = %instruction.old_change_id,
        "rejected supersession target outside candidate set"
      );
      continue;
    }
    folded[instruction.aggregate_index].push(instruction.old_change_id);
  }

  let mut count = 0;
  for (proposal, old_ids) in plan.aggregates.into_iter().zip(folded) {
    let mut aggregate = NewChange::new(
      page.page_id,
      proposal.element,
      ChangeScope::Page,
      proposal.before,
      proposal.after,
    );
    aggregate.description = proposal.description;
    aggregate.magnitude = Magnitude::Overhaul;

    let (change, superseded) = env
      .store
      .supersede_changes(aggregate, &old_ids)
      .await
      .map_err(Error::store)?;
    info!(
      aggregate = %change.change_id,
      folded = superseded.len(),
      page = %page.url,
      "overhaul consolidated"
    );
    count += 1;
  }
  Ok(count)
}
