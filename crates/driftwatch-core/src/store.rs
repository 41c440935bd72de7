//! The `ChangeStore` trait — the durable state machine behind the pipeline.
//!
//! The trait is implemented by storage backends (e.g.
//! `driftwatch-store-sqlite`). Higher layers (`driftwatch-pipeline`,
//! `driftwatch-api`) depend on this abstraction, not on any concrete backend.
//!
//! Every write the at-least-once workflow runtime can replay is expressed so
//! a replay is harmless: status transitions are conditional updates guarded
//! by the expected current status (the `bool` returns report whether the
//! guard held), and inserts that must happen at most once (scan-per-day,
//! checkpoint-per-horizon) are protected by uniqueness constraints and
//! surface a duplicate as a `None` no-op rather than an error.

use std::future::Future;

use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use crate::{
  baseline::{Baseline, NewBaseline},
  change::{DetectedChange, NewChange, Settlement},
  checkpoint::{Checkpoint, CheckpointFeedback, NewCheckpoint, NewFeedback},
  page::{Account, NewAccount, NewPage, Page},
  scan::{ScanKind, ScanRun, TriggerKind},
};

// ─── Refresh input ───────────────────────────────────────────────────────────

/// Input to [`ChangeStore::refresh_change`] — the in-place update applied
/// when the guard accepts a match claim.
#[derive(Debug, Clone)]
pub struct ChangeRefresh {
  pub change_id:    Uuid,
  pub after:        String,
  pub description:  Option<String>,
  /// The accepted claim's rationale, kept for observability.
  pub match_note:   Option<String>,
  pub last_seen_at: DateTime<Utc>,
}

// ─── Trait ───────────────────────────────────────────────────────────────────

/// Abstraction over a Driftwatch storage backend.
///
/// All methods return `Send` futures so the trait can be used in
/// multi-threaded async runtimes (tokio with `axum`).
pub trait ChangeStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  // ── Accounts ──────────────────────────────────────────────────────────

  fn add_account(
    &self,
    input: NewAccount,
  ) -> impl Future<Output = Result<Account, Self::Error>> + Send;

  fn get_account(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<Option<Account>, Self::Error>> + Send;

  fn list_accounts(
    &self,
  ) -> impl Future<Output = Result<Vec<Account>, Self::Error>> + Send;

  // ── Pages ─────────────────────────────────────────────────────────────

  fn add_page(
    &self,
    input: NewPage,
  ) -> impl Future<Output = Result<Page, Self::Error>> + Send;

  fn get_page(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<Option<Page>, Self::Error>> + Send;

  /// Active pages for an account, oldest first — the order quota caps are
  /// applied in.
  fn list_active_pages(
    &self,
    account_id: Uuid,
  ) -> impl Future<Output = Result<Vec<Page>, Self::Error>> + Send;

  fn touch_page_scanned(
    &self,
    page_id: Uuid,
    at: DateTime<Utc>,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send;

  // ── Baselines ─────────────────────────────────────────────────────────

  /// Install a new current baseline, demoting any previous one. At most one
  /// baseline is current per page at a time.
  fn set_baseline(
    &self,
    input: NewBaseline,
  ) -> impl Future<Output = Result<Baseline, Self::Error>> + Send;

  fn current_baseline(
    &self,
    page_id: Uuid,
  ) -> impl Future<Output = Result<Option<Baseline>, Self::Error>> + Send;

  // ── Scan runs ─────────────────────────────────────────────────────────

  /// Create a scan run for (page, trigger, day). Returns `None` if one
  /// already exists for that key — the duplicate is a success-equivalent
  /// no-op, which is what makes scheduling retry-safe.
  fn begin_scan(
    &self,
    page_id: Uuid,
    trigger: TriggerKind,
    kind: ScanKind,
    day: NaiveDate,
  ) -> impl Future<Output = Result<Option<ScanRun>, Self::Error>> + Send;

  fn complete_scan(
    &self,
    scan_id: Uuid,
    changes_found: i64,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send;

  fn fail_scan(
    &self,
    scan_id: Uuid,
    error: String,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send;

  /// Scan history for a page, newest first.
  fn scans_for_page(
    &self,
    page_id: Uuid,
  ) -> impl Future<Output = Result<Vec<ScanRun>, Self::Error>> + Send;

  // ── Detected changes ──────────────────────────────────────────────────

  /// Record a new change in `watching` status.
  fn record_change(
    &self,
    input: NewChange,
  ) -> impl Future<Output = Result<DetectedChange, Self::Error>> + Send;

  fn get_change(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<Option<DetectedChange>, Self::Error>> + Send;

  /// All changes for a page, newest first.
  fn changes_for_page(
    &self,
    page_id: Uuid,
  ) -> impl Future<Output = Result<Vec<DetectedChange>, Self::Error>> + Send;

  /// Changes currently in `watching` for a page, oldest first — the pool
  /// the candidate set is drawn from.
  fn watching_changes(
    &self,
    page_id: Uuid,
  ) -> impl Future<Output = Result<Vec<DetectedChange>, Self::Error>> + Send;

  /// Update a matched change in place. Applies only while the record is
  /// still `watching`; returns whether the guard held.
  fn refresh_change(
    &self,
    refresh: ChangeRefresh,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send;

  /// Record `aggregate` and move every ID in `old_ids` that is still
  /// `watching` to `superseded` pointing at it, in one transaction. The
  /// aggregate's `first_detected_at` becomes the minimum over the records
  /// actually folded in (or the supplied/current time if none were).
  /// Returns the aggregate and the IDs actually superseded.
  fn supersede_changes(
    &self,
    aggregate: NewChange,
    old_ids: &[Uuid],
  ) -> impl Future<Output = Result<(DetectedChange, Vec<Uuid>), Self::Error>> + Send;

  /// Attach or replace the owner's hypothesis for what a change was meant
  /// to achieve. Guarded on `watching` — a hypothesis only informs
  /// checkpoints that have not been computed yet.
  fn set_hypothesis(
    &self,
    change_id: Uuid,
    hypothesis: String,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send;

  /// Close a change as validated or regressed. Guarded on `watching`.
  fn settle_change(
    &self,
    change_id: Uuid,
    settlement: Settlement,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send;

  /// Mark a change reverted. Guarded on `watching`; only ever invoked by an
  /// explicit caller action, never by the pipeline itself.
  fn mark_reverted(
    &self,
    change_id: Uuid,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send;

  /// All changes in a non-terminal status, across pages — the checkpoint
  /// sweep's work list.
  fn assessable_changes(
    &self,
  ) -> impl Future<Output = Result<Vec<DetectedChange>, Self::Error>> + Send;

  // ── Checkpoints ───────────────────────────────────────────────────────

  /// Write a checkpoint. Returns `None` if one already exists for this
  /// (change, horizon) — checkpoints are never recomputed.
  fn record_checkpoint(
    &self,
    input: NewCheckpoint,
  ) -> impl Future<Output = Result<Option<Checkpoint>, Self::Error>> + Send;

  fn get_checkpoint(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<Option<Checkpoint>, Self::Error>> + Send;

  /// Checkpoints for a change, ascending by horizon.
  fn checkpoints_for(
    &self,
    change_id: Uuid,
  ) -> impl Future<Output = Result<Vec<Checkpoint>, Self::Error>> + Send;

  // ── Feedback ──────────────────────────────────────────────────────────

  fn record_feedback(
    &self,
    input: NewFeedback,
  ) -> impl Future<Output = Result<CheckpointFeedback, Self::Error>> + Send;

  /// All feedback left on checkpoints of changes belonging to `page_id` —
  /// calibration context for later assessments on the same page.
  fn feedback_for_page(
    &self,
    page_id: Uuid,
  ) -> impl Future<Output = Result<Vec<CheckpointFeedback>, Self::Error>> + Send;
}
