//! Scenario tests for the orchestration pipeline: fakes for the external
//! collaborators, the real SQLite store underneath.

use std::{
  collections::VecDeque,
  path::PathBuf,
  sync::Mutex,
  time::Duration as StdDuration,
};

use chrono::{DateTime, Duration, Utc};
use driftwatch_core::{
  change::{ChangeScope, ChangeStatus, Magnitude, NewChange},
  checkpoint::{Assessment, Horizon, Verdict},
  detect::{
    AggregateProposal, AssessmentInput, CandidateSummary, ChangeDetector,
    DiffInput, OutcomeAssessor, ProposedChange, ReconcilePlan, Reconciler,
    SupersessionInstruction,
  },
  external::{MetricsProvider, ScreenCapture},
  guard::MatchClaim,
  metric::{MetricDelta, MetricWindow},
  page::{Account, NewAccount, NewPage, Page},
  scan::TriggerKind,
  store::ChangeStore,
  tier::Tier,
};
use driftwatch_store_sqlite::SqliteStore;
use thiserror::Error;
use uuid::Uuid;

use crate::{
  Steps,
  checkpoints::{AssessEnv, run_checkpoint_sweep},
  deploy::{DeployEvent, handle_deploy},
  notify::LogNotifier,
  scan::{ScanEnv, ScanOutcome, run_page_scan, scan_pages_isolated},
  scheduled::run_scheduled_sweep,
};

#[derive(Debug, Error)]
#[error("{0}")]
struct FakeError(String);

// ─── Fakes ───────────────────────────────────────────────────────────────────

/// Capture that returns fixed bytes for any URL, failing for URLs listed in
/// `fail_for`. The fakes never decode images, so the bytes are arbitrary.
struct FakeCapture {
  fail_for: Vec<String>,
}

impl FakeCapture {
  fn ok() -> Self { Self { fail_for: Vec::new() } }
}

impl ScreenCapture for FakeCapture {
  type Error = FakeError;

  async fn capture(&self, url: &str, viewport_width: u32) -> Result<Vec<u8>, FakeError> {
    if self.fail_for.iter().any(|f| f == url) {
      return Err(FakeError(format!("capture refused for {url}")));
    }
    Ok(format!("capture:{url}@{viewport_width}").into_bytes())
  }
}

/// Detector that pops a scripted result per diff call. An exhausted script
/// reports no changes.
struct FakeDetector {
  script: Mutex<VecDeque<Result<Vec<ProposedChange>, String>>>,
}

impl FakeDetector {
  fn quiet() -> Self {
    Self { script: Mutex::new(VecDeque::new()) }
  }

  fn returning(results: Vec<Result<Vec<ProposedChange>, String>>) -> Self {
    Self { script: Mutex::new(results.into()) }
  }
}

impl ChangeDetector for FakeDetector {
  type Error = FakeError;

  async fn detect(&self, _input: DiffInput) -> Result<Vec<ProposedChange>, FakeError> {
    match self.script.lock().unwrap().pop_front() {
      Some(Ok(changes)) => Ok(changes),
      Some(Err(message)) => Err(FakeError(message)),
      None => Ok(Vec::new()),
    }
  }
}

/// Reconciler with one scripted plan; `None` means the call fails.
struct FakeReconciler {
  plan: Option<ReconcilePlan>,
}

impl FakeReconciler {
  fn incremental() -> Self {
    Self {
      plan: Some(ReconcilePlan {
        magnitude:     Magnitude::Incremental,
        aggregates:    Vec::new(),
        supersessions: Vec::new(),
      }),
    }
  }

  fn failing() -> Self { Self { plan: None } }
}

impl Reconciler for FakeReconciler {
  type Error = FakeError;

  async fn reconcile(
    &self,
    _page_url: &str,
    _fresh: &[ProposedChange],
    _watching: &[CandidateSummary],
  ) -> Result<ReconcilePlan, FakeError> {
    self
      .plan
      .clone()
      .ok_or_else(|| FakeError("reconciler unavailable".into()))
  }
}

struct FakeMetrics {
  deltas: Vec<MetricDelta>,
}

impl MetricsProvider for FakeMetrics {
  type Error = FakeError;

  async fn deltas(
    &self,
    _page: &Page,
    _window: MetricWindow,
  ) -> Result<Vec<MetricDelta>, FakeError> {
    Ok(self.deltas.clone())
  }
}

/// Assessor returning a fixed verdict, or failing every call.
struct FakeAssessor {
  verdict: Option<Verdict>,
}

impl OutcomeAssessor for FakeAssessor {
  type Error = FakeError;

  async fn assess(&self, _input: &AssessmentInput) -> Result<Verdict, FakeError> {
    self
      .verdict
      .clone()
      .ok_or_else(|| FakeError("assessor exhausted its retry budget".into()))
  }
}

// ─── Fixtures ────────────────────────────────────────────────────────────────

fn capture_dir() -> PathBuf {
  std::env::temp_dir().join(format!("driftwatch-test-{}", Uuid::new_v4()))
}

async fn store_with_page(tier: Tier) -> (SqliteStore, Account, Page) {
  let store = SqliteStore::open_in_memory().await.unwrap();
  let account = store
    .add_account(NewAccount { email: "owner@example.com".into(), tier })
    .await
    .unwrap();
  let page = store
    .add_page(NewPage::new(account.account_id, "https://example.com/pricing"))
    .await
    .unwrap();
  (store, account, page)
}

fn env_with(
  store: SqliteStore,
  detector: FakeDetector,
  reconciler: FakeReconciler,
) -> ScanEnv<SqliteStore, FakeCapture, FakeDetector, FakeReconciler, LogNotifier> {
  ScanEnv {
    store,
    capture: FakeCapture::ok(),
    detector,
    reconciler,
    notifier: LogNotifier,
    capture_dir: capture_dir(),
  }
}

fn proposal(element: &str, claim: Option<MatchClaim>) -> ProposedChange {
  ProposedChange {
    element:       element.into(),
    scope:         ChangeScope::Element,
    before:        "old copy".into(),
    after:         "new copy".into(),
    description:   None,
    claimed_match: claim,
  }
}

/// Establish a baseline for `page` so the next scan takes the diff path.
async fn establish<S, C, D, R, N>(
  env: &ScanEnv<S, C, D, R, N>,
  account: &Account,
  page: &Page,
  now: DateTime<Utc>,
) where
  S: ChangeStore,
  C: ScreenCapture,
  D: ChangeDetector,
  R: Reconciler,
  N: driftwatch_core::external::Notifier,
{
  let outcome = run_page_scan(env, account, page, TriggerKind::Manual, now)
    .await
    .unwrap();
  assert_eq!(outcome, ScanOutcome::Established);
}

// ─── Scan scenarios ──────────────────────────────────────────────────────────

#[tokio::test]
async fn incremental_path_records_two_watching_changes() {
  let (store, account, page) = store_with_page(Tier::Pro).await;
  let env = env_with(
    store.clone(),
    FakeDetector::returning(vec![Ok(vec![
      proposal("hero headline", None),
      proposal("cta button", None),
    ])]),
    FakeReconciler::incremental(),
  );

  let now = Utc::now();
  establish(&env, &account, &page, now).await;

  let outcome =
    run_page_scan(&env, &account, &page, TriggerKind::Scheduled, now + Duration::days(1))
      .await
      .unwrap();
  assert_eq!(outcome, ScanOutcome::Diffed { changes_found: 2 });

  let watching = store.watching_changes(page.page_id).await.unwrap();
  assert_eq!(watching.len(), 2);
  assert!(watching.iter().all(|c| c.magnitude == Magnitude::Incremental));
  assert!(watching.iter().all(|c| c.scope == ChangeScope::Element));
}

#[tokio::test]
async fn stale_baseline_forces_establish_path() {
  let (store, account, page) = store_with_page(Tier::Pro).await;
  let env = env_with(
    store.clone(),
    // If the diff path ran, this would report a change.
    FakeDetector::returning(vec![Ok(vec![proposal("anything", None)])]),
    FakeReconciler::incremental(),
  );

  let now = Utc::now();
  establish(&env, &account, &page, now).await;

  // Twenty days later the baseline is past the 14-day threshold: the scan
  // must re-establish, never diff, regardless of detector availability.
  let outcome = run_page_scan(
    &env,
    &account,
    &page,
    TriggerKind::Scheduled,
    now + Duration::days(20),
  )
  .await
  .unwrap();
  assert_eq!(outcome, ScanOutcome::Established);
  assert!(store.watching_changes(page.page_id).await.unwrap().is_empty());
}

#[tokio::test]
async fn accepted_match_refreshes_in_place() {
  let (store, account, page) = store_with_page(Tier::Pro).await;

  let existing = store
    .record_change(NewChange::new(
      page.page_id,
      "hero headline",
      ChangeScope::Element,
      "Ship faster",
      "Ship twice as fast",
    ))
    .await
    .unwrap();

  let claim = MatchClaim {
    matched_change_id: existing.change_id,
    confidence:        0.8,
    rationale:         "same headline slot".into(),
  };
  let env = env_with(
    store.clone(),
    FakeDetector::returning(vec![Ok(vec![proposal("hero headline", Some(claim))])]),
    FakeReconciler::incremental(),
  );

  let now = Utc::now();
  establish(&env, &account, &page, now).await;
  run_page_scan(&env, &account, &page, TriggerKind::Scheduled, now + Duration::days(1))
    .await
    .unwrap();

  let watching = store.watching_changes(page.page_id).await.unwrap();
  assert_eq!(watching.len(), 1, "no duplicate record for a matched change");
  assert_eq!(watching[0].change_id, existing.change_id);
  assert_eq!(watching[0].after, "new copy");
}

#[tokio::test]
async fn invented_match_id_creates_new_record() {
  let (store, account, page) = store_with_page(Tier::Pro).await;

  let existing = store
    .record_change(NewChange::new(
      page.page_id,
      "hero headline",
      ChangeScope::Element,
      "Ship faster",
      "Ship twice as fast",
    ))
    .await
    .unwrap();

  // The model invents an ID that was never in the candidate set; confidence
  // is irrelevant.
  let claim = MatchClaim {
    matched_change_id: Uuid::new_v4(),
    confidence:        1.0,
    rationale:         "definitely the same".into(),
  };
  let env = env_with(
    store.clone(),
    FakeDetector::returning(vec![Ok(vec![proposal("cta button", Some(claim))])]),
    FakeReconciler::incremental(),
  );

  let now = Utc::now();
  establish(&env, &account, &page, now).await;
  run_page_scan(&env, &account, &page, TriggerKind::Scheduled, now + Duration::days(1))
    .await
    .unwrap();

  let watching = store.watching_changes(page.page_id).await.unwrap();
  assert_eq!(watching.len(), 2);
  let untouched = watching
    .iter()
    .find(|c| c.change_id == existing.change_id)
    .unwrap();
  assert_eq!(untouched.after, "Ship twice as fast");
}

#[tokio::test]
async fn overhaul_consolidates_into_aggregates() {
  let (store, account, page) = store_with_page(Tier::Pro).await;

  let mut old_ids = Vec::new();
  let oldest_at = Utc::now() - Duration::days(6);
  for i in 0..6 {
    let mut change = NewChange::new(
      page.page_id,
      format!("section {i}"),
      ChangeScope::Section,
      "old",
      "new",
    );
    if i == 0 {
      change.first_detected_at = Some(oldest_at);
    }
    old_ids.push(store.record_change(change).await.unwrap().change_id);
  }

  let plan = ReconcilePlan {
    magnitude:     Magnitude::Overhaul,
    aggregates:    vec![
      AggregateProposal {
        element:     "above-the-fold redesign".into(),
        before:      "previous hero and nav".into(),
        after:       "new hero and nav".into(),
        description: None,
      },
      AggregateProposal {
        element:     "lower-page redesign".into(),
        before:      "previous sections".into(),
        after:       "new sections".into(),
        description: None,
      },
    ],
    supersessions: old_ids
      .iter()
      .enumerate()
      .map(|(i, id)| SupersessionInstruction {
        old_change_id:   *id,
        aggregate_index: usize::from(i >= 3),
      })
      .collect(),
  };

  let env = env_with(
    store.clone(),
    FakeDetector::returning(vec![Ok(
      (0..6).map(|i| proposal(&format!("area {i}"), None)).collect(),
    )]),
    FakeReconciler { plan: Some(plan) },
  );

  let now = Utc::now();
  establish(&env, &account, &page, now).await;
  run_page_scan(&env, &account, &page, TriggerKind::Scheduled, now + Duration::days(1))
    .await
    .unwrap();

  let watching = store.watching_changes(page.page_id).await.unwrap();
  assert_eq!(watching.len(), 2, "at most two aggregates survive");
  assert!(watching.iter().all(|c| c.scope == ChangeScope::Page));
  assert!(watching.iter().all(|c| c.magnitude == Magnitude::Overhaul));

  // The first aggregate inherits the earliest constituent's age.
  let first_agg = watching
    .iter()
    .find(|c| c.element == "above-the-fold redesign")
    .unwrap();
  assert_eq!(first_agg.first_detected_at.timestamp(), oldest_at.timestamp());

  let agg_ids: Vec<Uuid> = watching.iter().map(|c| c.change_id).collect();
  for id in &old_ids {
    let c = store.get_change(*id).await.unwrap().unwrap();
    match c.status {
      ChangeStatus::Superseded { by } => assert!(agg_ids.contains(&by)),
      other => panic!("expected superseded, got {other:?}"),
    }
  }
}

#[tokio::test]
async fn reconciliation_failure_falls_back_to_per_change() {
  let (store, account, page) = store_with_page(Tier::Pro).await;

  store
    .record_change(NewChange::new(
      page.page_id,
      "hero headline",
      ChangeScope::Element,
      "a",
      "b",
    ))
    .await
    .unwrap();

  let env = env_with(
    store.clone(),
    FakeDetector::returning(vec![Ok(vec![proposal("footer links", None)])]),
    FakeReconciler::failing(),
  );

  let now = Utc::now();
  establish(&env, &account, &page, now).await;
  let outcome =
    run_page_scan(&env, &account, &page, TriggerKind::Scheduled, now + Duration::days(1))
      .await
      .unwrap();

  // The scan's detection is not lost: it lands via the per-change path.
  assert_eq!(outcome, ScanOutcome::Diffed { changes_found: 1 });
  assert_eq!(store.watching_changes(page.page_id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn per_page_failure_is_isolated() {
  let (store, account, good_page) = store_with_page(Tier::Pro).await;
  let bad_page = store
    .add_page(NewPage::new(account.account_id, "https://example.com/broken"))
    .await
    .unwrap();

  let mut env = env_with(store.clone(), FakeDetector::quiet(), FakeReconciler::incremental());
  env.capture = FakeCapture {
    fail_for: vec!["https://example.com/broken".into()],
  };

  let pages = vec![good_page.clone(), bad_page.clone()];
  let report =
    scan_pages_isolated(&env, &account, &pages, TriggerKind::Manual, Utc::now()).await;

  assert_eq!(report.scanned, 1);
  assert_eq!(report.errors.len(), 1);
  assert_eq!(report.errors[0].page_id, bad_page.page_id);

  // The failed page's scan run is recorded as failed, not left running.
  let scans = store.scans_for_page(bad_page.page_id).await.unwrap();
  assert!(matches!(
    scans[0].status,
    driftwatch_core::scan::ScanStatus::Failed { .. }
  ));
}

// ─── Entry points ────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn deploy_short_circuits_tiers_without_deploy_scans() {
  let (store, account, _page) = store_with_page(Tier::Free).await;
  let env = env_with(store.clone(), FakeDetector::quiet(), FakeReconciler::incremental());

  let event = DeployEvent {
    account_id:    account.account_id,
    changed_files: Vec::new(),
    pushed_at:     Utc::now(),
  };

  let mut steps = Steps::new();
  let report = handle_deploy(&env, &mut steps, &event, Utc::now())
    .await
    .unwrap();
  assert_eq!(report.scanned, 0);
  assert!(report.errors.is_empty());
}

#[tokio::test(start_paused = true)]
async fn deploy_caps_pages_at_tier_quota() {
  let (store, account, _first_page) = store_with_page(Tier::Starter).await;
  for i in 0..5 {
    store
      .add_page(NewPage::new(
        account.account_id,
        format!("https://example.com/extra-{i}"),
      ))
      .await
      .unwrap();
  }

  let env = env_with(store.clone(), FakeDetector::quiet(), FakeReconciler::incremental());
  let event = DeployEvent {
    account_id:    account.account_id,
    changed_files: Vec::new(),
    pushed_at:     Utc::now(),
  };

  let mut steps = Steps::new();
  let report = handle_deploy(&env, &mut steps, &event, Utc::now())
    .await
    .unwrap();

  // Six active pages, Starter quota of five, oldest first.
  assert_eq!(report.scanned, 5);
  assert!(report.errors.is_empty());
}

#[tokio::test]
async fn scheduled_sweep_is_idempotent_per_day() {
  let (store, _account, page) = store_with_page(Tier::Pro).await;
  let env = env_with(store.clone(), FakeDetector::quiet(), FakeReconciler::incremental());

  let now = Utc::now();
  let first = run_scheduled_sweep(&env, now).await.unwrap();
  assert_eq!(first.scanned, 1);

  // Same day: the (page, trigger, day) key makes the rerun a no-op.
  let second = run_scheduled_sweep(&env, now).await.unwrap();
  assert_eq!(second.scanned, 0);
  assert!(second.errors.is_empty());
  assert_eq!(store.scans_for_page(page.page_id).await.unwrap().len(), 1);
}

// ─── Checkpoint scenarios ────────────────────────────────────────────────────

fn pageview_delta(change_percent: f64) -> MetricDelta {
  MetricDelta {
    name: "pageviews".into(),
    source: "plausible".into(),
    before: 1000.0,
    after: 1000.0 * (1.0 + change_percent / 100.0),
    change_percent,
  }
}

async fn seed_change(
  store: &SqliteStore,
  page: &Page,
  age_days: i64,
) -> driftwatch_core::change::DetectedChange {
  let mut change = NewChange::new(
    page.page_id,
    "hero headline",
    ChangeScope::Element,
    "Ship faster",
    "Ship twice as fast",
  );
  change.first_detected_at = Some(Utc::now() - Duration::days(age_days));
  store.record_change(change).await.unwrap()
}

#[tokio::test]
async fn assessor_failure_still_writes_checkpoint_via_fallback() {
  let (store, _account, page) = store_with_page(Tier::Pro).await;
  let change = seed_change(&store, &page, 8).await;

  let env = AssessEnv {
    store:    store.clone(),
    metrics:  FakeMetrics { deltas: vec![pageview_delta(-9.0)] },
    assessor: FakeAssessor { verdict: None },
  };

  let report = run_checkpoint_sweep(&env, Utc::now()).await.unwrap();
  assert_eq!(report.checkpoints_written, 1);
  assert!(report.errors.is_empty());

  let checkpoints = store.checkpoints_for(change.change_id).await.unwrap();
  assert_eq!(checkpoints.len(), 1);
  assert_eq!(checkpoints[0].horizon, Horizon::D7);
  // Deterministic fallback: sign of the largest delta, lower-band
  // confidence.
  assert_eq!(checkpoints[0].assessment, Assessment::Regressed);
  assert!((0.2..0.5).contains(&checkpoints[0].confidence));
  assert_eq!(checkpoints[0].data_sources, vec!["plausible".to_string()]);
}

#[tokio::test]
async fn checkpoint_sweep_never_recomputes_a_horizon() {
  let (store, _account, page) = store_with_page(Tier::Pro).await;
  let change = seed_change(&store, &page, 16).await;

  let env = AssessEnv {
    store:    store.clone(),
    metrics:  FakeMetrics { deltas: vec![pageview_delta(12.0)] },
    assessor: FakeAssessor {
      verdict: Some(Verdict {
        assessment: Assessment::Improved,
        confidence: 0.7,
        reasoning:  "pageviews rose and the movement coincided with the change".into(),
      }),
    },
  };

  let first = run_checkpoint_sweep(&env, Utc::now()).await.unwrap();
  assert_eq!(first.checkpoints_written, 2); // 7d and 14d are both due

  let second = run_checkpoint_sweep(&env, Utc::now()).await.unwrap();
  assert_eq!(second.checkpoints_written, 0);

  let checkpoints = store.checkpoints_for(change.change_id).await.unwrap();
  assert_eq!(checkpoints.len(), 2);
}

#[tokio::test]
async fn final_horizon_settles_the_change() {
  let (store, _account, page) = store_with_page(Tier::Pro).await;
  let change = seed_change(&store, &page, 91).await;

  let env = AssessEnv {
    store:    store.clone(),
    metrics:  FakeMetrics { deltas: vec![pageview_delta(15.0)] },
    assessor: FakeAssessor {
      verdict: Some(Verdict {
        assessment: Assessment::Improved,
        confidence: 0.82,
        reasoning:  "sustained lift associated with the change across the window".into(),
      }),
    },
  };

  let report = run_checkpoint_sweep(&env, Utc::now()).await.unwrap();
  assert_eq!(report.checkpoints_written, 5);

  let settled = store.get_change(change.change_id).await.unwrap().unwrap();
  assert_eq!(settled.status, ChangeStatus::Validated);

  // Terminal horizons exhausted: nothing further is due.
  let rerun = run_checkpoint_sweep(&env, Utc::now()).await.unwrap();
  assert_eq!(rerun.checkpoints_written, 0);
}

#[tokio::test]
async fn superseded_changes_get_no_checkpoints() {
  let (store, _account, page) = store_with_page(Tier::Pro).await;
  let change = seed_change(&store, &page, 30).await;

  let mut aggregate = NewChange::new(
    page.page_id,
    "redesign",
    ChangeScope::Page,
    "old",
    "new",
  );
  aggregate.magnitude = Magnitude::Overhaul;
  store
    .supersede_changes(aggregate, &[change.change_id])
    .await
    .unwrap();

  let env = AssessEnv {
    store:    store.clone(),
    metrics:  FakeMetrics { deltas: vec![pageview_delta(5.0)] },
    assessor: FakeAssessor {
      verdict: Some(Verdict {
        assessment: Assessment::Improved,
        confidence: 0.6,
        reasoning:  "movement coincided with the change".into(),
      }),
    },
  };
  run_checkpoint_sweep(&env, Utc::now()).await.unwrap();

  // The superseded record is terminal; only the aggregate was assessed.
  assert!(store.checkpoints_for(change.change_id).await.unwrap().is_empty());
}

// ─── Steps journal interaction ───────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn deploy_replay_skips_settle_delay() {
  let (store, account, _page) = store_with_page(Tier::Starter).await;
  let env = env_with(store.clone(), FakeDetector::quiet(), FakeReconciler::incremental());
  let event = DeployEvent {
    account_id:    account.account_id,
    changed_files: Vec::new(),
    pushed_at:     Utc::now(),
  };

  let mut steps = Steps::new();
  handle_deploy(&env, &mut steps, &event, Utc::now())
    .await
    .unwrap();

  // A replayed attempt restores the journal: the settle sleep and account
  // load do not repeat, and the scan dedup makes the page work a no-op.
  let mut replayed = Steps::restore(&steps.snapshot());
  let started = tokio::time::Instant::now();
  let report = handle_deploy(&env, &mut replayed, &event, Utc::now())
    .await
    .unwrap();
  assert!(started.elapsed() < StdDuration::from_secs(1));
  assert_eq!(report.scanned, 0);
}
