//! The scheduled (cron) entry point.
//!
//! A daily sweep selects pages whose effective tier and per-page cadence
//! permit a run today and scans them with per-page isolation. Duplicate
//! protection comes from the (page, trigger, day) scan uniqueness key, so
//! re-running the sweep for the same day is harmless.

use chrono::{DateTime, Datelike, Utc, Weekday};
use driftwatch_core::{
  detect::{ChangeDetector, Reconciler},
  external::{Notifier, ScreenCapture},
  page::{Page, ScanCadence},
  scan::TriggerKind,
  store::ChangeStore,
  tier,
};
use tracing::info;

use crate::{
  Error, Result,
  scan::{BatchReport, ScanEnv, scan_pages_isolated},
};

/// Weekly-cadence pages run on this day.
const WEEKLY_SCAN_DAY: Weekday = Weekday::Mon;

/// Whether a page is due today under its tier-clamped cadence.
pub fn due_today(tier: driftwatch_core::tier::Tier, page: &Page, now: DateTime<Utc>) -> bool {
  match tier::effective_cadence(tier, page.cadence) {
    ScanCadence::Daily => true,
    ScanCadence::Weekly => now.date_naive().weekday() == WEEKLY_SCAN_DAY,
  }
}

/// Run the scheduled sweep across every account.
///
/// Fetching the account list is shared setup — its failure aborts the sweep.
/// Everything after that is isolated per page.
pub async fn run_scheduled_sweep<S, C, D, R, N>(
  env: &ScanEnv<S, C, D, R, N>,
  now: DateTime<Utc>,
) -> Result<BatchReport>
where
  S: ChangeStore,
  C: ScreenCapture,
  D: ChangeDetector,
  R: Reconciler,
  N: Notifier,
{
  let accounts = env.store.list_accounts().await.map_err(Error::store)?;

  let mut report = BatchReport::default();
  for account in accounts {
    let pages: Vec<Page> = env
      .store
      .list_active_pages(account.account_id)
      .await
      .map_err(Error::store)?
      .into_iter()
      .take(tier::page_limit(account.tier))
      .filter(|p| due_today(account.tier, p, now))
      .collect();

    if pages.is_empty() {
      continue;
    }

    let batch =
      scan_pages_isolated(env, &account, &pages, TriggerKind::Scheduled, now).await;
    report.scanned += batch.scanned;
    report.changed += batch.changed;
    report.errors.extend(batch.errors);
  }

  info!(
    scanned = report.scanned,
    changed = report.changed,
    errors = report.errors.len(),
    "scheduled sweep finished"
  );
  Ok(report)
}

#[cfg(test)]
mod tests {
  use chrono::TimeZone as _;
  use driftwatch_core::{page::NewPage, tier::Tier};
  use uuid::Uuid;

  use super::*;

  fn page(cadence: ScanCadence) -> Page {
    let mut new = NewPage::new(Uuid::new_v4(), "https://example.com/");
    new.cadence = cadence;
    Page {
      page_id:         Uuid::new_v4(),
      account_id:      new.account_id,
      url:             new.url,
      cadence:         new.cadence,
      metric_focus:    None,
      mobile_enabled:  false,
      active:          true,
      created_at:      Utc::now(),
      last_scanned_at: None,
    }
  }

  #[test]
  fn daily_page_is_due_every_day() {
    // 2026-03-12 is a Thursday.
    let thursday = Utc.with_ymd_and_hms(2026, 3, 12, 9, 0, 0).unwrap();
    assert!(due_today(Tier::Pro, &page(ScanCadence::Daily), thursday));
  }

  #[test]
  fn weekly_page_is_due_on_monday_only() {
    let monday = Utc.with_ymd_and_hms(2026, 3, 9, 9, 0, 0).unwrap();
    let thursday = Utc.with_ymd_and_hms(2026, 3, 12, 9, 0, 0).unwrap();
    let p = page(ScanCadence::Weekly);
    assert!(due_today(Tier::Pro, &p, monday));
    assert!(!due_today(Tier::Pro, &p, thursday));
  }

  #[test]
  fn free_tier_clamps_daily_pages_to_weekly() {
    let thursday = Utc.with_ymd_and_hms(2026, 3, 12, 9, 0, 0).unwrap();
    assert!(!due_today(Tier::Free, &page(ScanCadence::Daily), thursday));
  }
}
