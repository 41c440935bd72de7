//! Integration tests for `SqliteStore` against an in-memory database.

use chrono::{Duration, NaiveDate, Utc};
use driftwatch_core::{
  baseline::{CaptureRef, NewBaseline},
  change::{ChangeScope, ChangeStatus, Magnitude, NewChange, Settlement},
  checkpoint::{
    Assessment, FeedbackVerdict, Horizon, NewCheckpoint, NewFeedback, Verdict,
  },
  page::{NewAccount, NewPage},
  scan::{ScanKind, TriggerKind},
  store::{ChangeRefresh, ChangeStore},
  tier::Tier,
};
use uuid::Uuid;

use crate::SqliteStore;

async fn store() -> SqliteStore {
  SqliteStore::open_in_memory()
    .await
    .expect("in-memory store")
}

async fn account_and_page(s: &SqliteStore) -> (Uuid, Uuid) {
  let account = s
    .add_account(NewAccount {
      email: "owner@example.com".into(),
      tier:  Tier::Pro,
    })
    .await
    .unwrap();
  let page = s
    .add_page(NewPage::new(account.account_id, "https://example.com/pricing"))
    .await
    .unwrap();
  (account.account_id, page.page_id)
}

fn element_change(page_id: Uuid, element: &str) -> NewChange {
  NewChange::new(
    page_id,
    element,
    ChangeScope::Element,
    "Start free trial",
    "Book a demo",
  )
}

fn verdict(assessment: Assessment) -> Verdict {
  Verdict {
    assessment,
    confidence: 0.6,
    reasoning: "pageviews rose 12% and coincided with the change".into(),
  }
}

// ─── Accounts & pages ────────────────────────────────────────────────────────

#[tokio::test]
async fn add_and_get_account_and_page() {
  let s = store().await;
  let (account_id, page_id) = account_and_page(&s).await;

  let account = s.get_account(account_id).await.unwrap().unwrap();
  assert_eq!(account.tier, Tier::Pro);

  let page = s.get_page(page_id).await.unwrap().unwrap();
  assert_eq!(page.account_id, account_id);
  assert!(page.active);
  assert!(page.last_scanned_at.is_none());
}

#[tokio::test]
async fn list_active_pages_is_oldest_first() {
  let s = store().await;
  let account = s
    .add_account(NewAccount {
      email: "owner@example.com".into(),
      tier:  Tier::Starter,
    })
    .await
    .unwrap();

  let first = s
    .add_page(NewPage::new(account.account_id, "https://example.com/a"))
    .await
    .unwrap();
  let second = s
    .add_page(NewPage::new(account.account_id, "https://example.com/b"))
    .await
    .unwrap();

  let pages = s.list_active_pages(account.account_id).await.unwrap();
  assert_eq!(pages.len(), 2);
  assert_eq!(pages[0].page_id, first.page_id);
  assert_eq!(pages[1].page_id, second.page_id);
}

#[tokio::test]
async fn touch_page_scanned_updates_timestamp() {
  let s = store().await;
  let (_, page_id) = account_and_page(&s).await;

  let at = Utc::now();
  s.touch_page_scanned(page_id, at).await.unwrap();

  let page = s.get_page(page_id).await.unwrap().unwrap();
  assert_eq!(page.last_scanned_at.unwrap().timestamp(), at.timestamp());
}

// ─── Baselines ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn set_baseline_replaces_current() {
  let s = store().await;
  let (_, page_id) = account_and_page(&s).await;

  let first = s
    .set_baseline(NewBaseline {
      page_id,
      desktop: CaptureRef {
        path:         "p/desktop-1.png".into(),
        content_hash: "aa".into(),
      },
      mobile:  None,
    })
    .await
    .unwrap();

  let second = s
    .set_baseline(NewBaseline {
      page_id,
      desktop: CaptureRef {
        path:         "p/desktop-2.png".into(),
        content_hash: "bb".into(),
      },
      mobile:  Some(CaptureRef {
        path:         "p/mobile-2.png".into(),
        content_hash: "cc".into(),
      }),
    })
    .await
    .unwrap();

  let current = s.current_baseline(page_id).await.unwrap().unwrap();
  assert_eq!(current.baseline_id, second.baseline_id);
  assert_ne!(current.baseline_id, first.baseline_id);
  assert!(current.mobile.is_some());
}

#[tokio::test]
async fn no_baseline_returns_none() {
  let s = store().await;
  let (_, page_id) = account_and_page(&s).await;
  assert!(s.current_baseline(page_id).await.unwrap().is_none());
}

// ─── Scan runs ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn begin_scan_is_idempotent_per_day() {
  let s = store().await;
  let (_, page_id) = account_and_page(&s).await;
  let day = NaiveDate::from_ymd_opt(2026, 3, 14).unwrap();

  let first = s
    .begin_scan(page_id, TriggerKind::Scheduled, ScanKind::Diff, day)
    .await
    .unwrap();
  assert!(first.is_some());

  // Same (page, trigger, day) — success-equivalent no-op.
  let second = s
    .begin_scan(page_id, TriggerKind::Scheduled, ScanKind::Diff, day)
    .await
    .unwrap();
  assert!(second.is_none());

  // A different trigger on the same day is a distinct run.
  let deploy = s
    .begin_scan(page_id, TriggerKind::Deploy, ScanKind::Diff, day)
    .await
    .unwrap();
  assert!(deploy.is_some());

  assert_eq!(s.scans_for_page(page_id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn complete_and_fail_scan_record_outcome() {
  let s = store().await;
  let (_, page_id) = account_and_page(&s).await;
  let day = NaiveDate::from_ymd_opt(2026, 3, 14).unwrap();

  let scan = s
    .begin_scan(page_id, TriggerKind::Manual, ScanKind::Establish, day)
    .await
    .unwrap()
    .unwrap();
  s.complete_scan(scan.scan_id, 3).await.unwrap();

  let scans = s.scans_for_page(page_id).await.unwrap();
  assert_eq!(scans[0].changes_found, 3);
  assert_eq!(
    scans[0].status,
    driftwatch_core::scan::ScanStatus::Complete
  );
}

// ─── Change lifecycle ────────────────────────────────────────────────────────

#[tokio::test]
async fn record_and_refresh_change() {
  let s = store().await;
  let (_, page_id) = account_and_page(&s).await;

  let change = s.record_change(element_change(page_id, "cta")).await.unwrap();
  assert!(change.status.is_watching());

  let applied = s
    .refresh_change(ChangeRefresh {
      change_id:    change.change_id,
      after:        "Talk to sales".into(),
      description:  Some("CTA copy changed again".into()),
      match_note:   Some("same button, same hero region".into()),
      last_seen_at: Utc::now(),
    })
    .await
    .unwrap();
  assert!(applied);

  let fetched = s.get_change(change.change_id).await.unwrap().unwrap();
  assert_eq!(fetched.after, "Talk to sales");
  // `before` is never rewritten by a refresh.
  assert_eq!(fetched.before, "Start free trial");
}

#[tokio::test]
async fn terminal_records_never_transition_again() {
  let s = store().await;
  let (_, page_id) = account_and_page(&s).await;

  let change = s.record_change(element_change(page_id, "cta")).await.unwrap();
  assert!(s.mark_reverted(change.change_id).await.unwrap());

  // Every further transition or refresh bounces off the status guard.
  assert!(!s.mark_reverted(change.change_id).await.unwrap());
  assert!(
    !s.settle_change(change.change_id, Settlement::Validated)
      .await
      .unwrap()
  );
  assert!(
    !s.refresh_change(ChangeRefresh {
        change_id:    change.change_id,
        after:        "resurrected".into(),
        description:  None,
        match_note:   None,
        last_seen_at: Utc::now(),
      })
      .await
      .unwrap()
  );

  let fetched = s.get_change(change.change_id).await.unwrap().unwrap();
  assert_eq!(fetched.status, ChangeStatus::Reverted);
  assert_eq!(fetched.after, "Book a demo");
}

#[tokio::test]
async fn hypothesis_applies_only_while_watching() {
  let s = store().await;
  let (_, page_id) = account_and_page(&s).await;

  let change = s.record_change(element_change(page_id, "cta")).await.unwrap();
  assert!(
    s.set_hypothesis(change.change_id, "demo CTA should lift signups".into())
      .await
      .unwrap()
  );
  let fetched = s.get_change(change.change_id).await.unwrap().unwrap();
  assert_eq!(
    fetched.hypothesis.as_deref(),
    Some("demo CTA should lift signups")
  );

  s.mark_reverted(change.change_id).await.unwrap();
  assert!(
    !s.set_hypothesis(change.change_id, "too late".into())
      .await
      .unwrap()
  );
}

#[tokio::test]
async fn settle_change_closes_watching_records() {
  let s = store().await;
  let (_, page_id) = account_and_page(&s).await;

  let change = s.record_change(element_change(page_id, "cta")).await.unwrap();
  assert!(
    s.settle_change(change.change_id, Settlement::Regressed)
      .await
      .unwrap()
  );

  let fetched = s.get_change(change.change_id).await.unwrap().unwrap();
  assert_eq!(fetched.status, ChangeStatus::Regressed);
  // Settled is not terminal: remaining horizons still get checkpoints, but
  // the record is out of the watching pool.
  assert!(s.watching_changes(page_id).await.unwrap().is_empty());
  assert_eq!(s.assessable_changes().await.unwrap().len(), 1);
}

// ─── Supersession ────────────────────────────────────────────────────────────

#[tokio::test]
async fn supersede_preserves_earliest_first_detected_at() {
  let s = store().await;
  let (_, page_id) = account_and_page(&s).await;

  let mut oldest = element_change(page_id, "hero");
  oldest.first_detected_at = Some(Utc::now() - Duration::days(9));
  let oldest = s.record_change(oldest).await.unwrap();

  let mut ids = vec![oldest.change_id];
  for i in 0..5 {
    let c = s
      .record_change(element_change(page_id, &format!("section {i}")))
      .await
      .unwrap();
    ids.push(c.change_id);
  }

  let mut aggregate = NewChange::new(
    page_id,
    "full page redesign",
    ChangeScope::Page,
    "previous layout",
    "new layout",
  );
  aggregate.magnitude = Magnitude::Overhaul;

  let (agg, applied) = s.supersede_changes(aggregate, &ids).await.unwrap();
  assert_eq!(applied.len(), 6);
  assert_eq!(agg.magnitude, Magnitude::Overhaul);
  assert_eq!(
    agg.first_detected_at.timestamp(),
    oldest.first_detected_at.timestamp()
  );

  for id in &ids {
    let c = s.get_change(*id).await.unwrap().unwrap();
    assert_eq!(c.status, ChangeStatus::Superseded { by: agg.change_id });
  }
  // The aggregate is the only record left watching.
  let watching = s.watching_changes(page_id).await.unwrap();
  assert_eq!(watching.len(), 1);
  assert_eq!(watching[0].change_id, agg.change_id);
}

#[tokio::test]
async fn supersede_replay_folds_nothing_twice() {
  let s = store().await;
  let (_, page_id) = account_and_page(&s).await;

  let a = s.record_change(element_change(page_id, "a")).await.unwrap();
  let b = s.record_change(element_change(page_id, "b")).await.unwrap();
  let ids = vec![a.change_id, b.change_id];

  let mut aggregate = NewChange::new(
    page_id,
    "redesign",
    ChangeScope::Page,
    "old",
    "new",
  );
  aggregate.magnitude = Magnitude::Overhaul;

  let (first_agg, applied) = s
    .supersede_changes(aggregate.clone(), &ids)
    .await
    .unwrap();
  assert_eq!(applied.len(), 2);

  // A replayed reconciliation step targets the same (now superseded) IDs:
  // it creates its aggregate but folds nothing.
  let (_, replay_applied) = s.supersede_changes(aggregate, &ids).await.unwrap();
  assert!(replay_applied.is_empty());

  let a_final = s.get_change(a.change_id).await.unwrap().unwrap();
  assert_eq!(
    a_final.status,
    ChangeStatus::Superseded { by: first_agg.change_id }
  );
}

// ─── Checkpoints ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn checkpoint_is_written_once_per_horizon() {
  let s = store().await;
  let (_, page_id) = account_and_page(&s).await;
  let change = s.record_change(element_change(page_id, "cta")).await.unwrap();

  let first = s
    .record_checkpoint(NewCheckpoint {
      change_id:    change.change_id,
      horizon:      Horizon::D7,
      verdict:      verdict(Assessment::Improved),
      data_sources: vec!["plausible".into()],
    })
    .await
    .unwrap();
  assert!(first.is_some());

  // Second attempt for the same horizon is a no-op.
  let second = s
    .record_checkpoint(NewCheckpoint {
      change_id:    change.change_id,
      horizon:      Horizon::D7,
      verdict:      verdict(Assessment::Regressed),
      data_sources: vec![],
    })
    .await
    .unwrap();
  assert!(second.is_none());

  let all = s.checkpoints_for(change.change_id).await.unwrap();
  assert_eq!(all.len(), 1);
  assert_eq!(all[0].assessment, Assessment::Improved);

  // A different horizon still goes through.
  let d14 = s
    .record_checkpoint(NewCheckpoint {
      change_id:    change.change_id,
      horizon:      Horizon::D14,
      verdict:      verdict(Assessment::Neutral),
      data_sources: vec![],
    })
    .await
    .unwrap();
  assert!(d14.is_some());

  let all = s.checkpoints_for(change.change_id).await.unwrap();
  assert_eq!(all.len(), 2);
  assert_eq!(all[0].horizon, Horizon::D7);
  assert_eq!(all[1].horizon, Horizon::D14);
}

#[tokio::test]
async fn feedback_joins_back_to_page() {
  let s = store().await;
  let (_, page_id) = account_and_page(&s).await;
  let change = s.record_change(element_change(page_id, "cta")).await.unwrap();

  let checkpoint = s
    .record_checkpoint(NewCheckpoint {
      change_id:    change.change_id,
      horizon:      Horizon::D7,
      verdict:      verdict(Assessment::Improved),
      data_sources: vec!["plausible".into()],
    })
    .await
    .unwrap()
    .unwrap();

  s.record_feedback(NewFeedback {
    checkpoint_id: checkpoint.checkpoint_id,
    verdict:       FeedbackVerdict::Inaccurate,
    note:          Some("traffic spike was a newsletter send".into()),
  })
  .await
  .unwrap();

  let feedback = s.feedback_for_page(page_id).await.unwrap();
  assert_eq!(feedback.len(), 1);
  assert_eq!(feedback[0].verdict, FeedbackVerdict::Inaccurate);

  let other_page = {
    let account = s.list_accounts().await.unwrap().remove(0);
    s.add_page(NewPage::new(account.account_id, "https://example.com/other"))
      .await
      .unwrap()
  };
  assert!(s.feedback_for_page(other_page.page_id).await.unwrap().is_empty());
}
