//! The deploy-triggered entry point.
//!
//! A push event waits out a settle delay for the external deploy to finish,
//! then scans the pushing account's pages — capped at the tier's page quota,
//! oldest first, filtered to pages plausibly affected by the changed files —
//! with per-page failure isolation.

use std::time::Duration;

use chrono::{DateTime, Utc};
use driftwatch_core::{
  detect::{ChangeDetector, Reconciler},
  external::{Notifier, ScreenCapture},
  page::Page,
  scan::TriggerKind,
  store::ChangeStore,
  tier,
};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::{
  Error, Result,
  scan::{BatchReport, ScanEnv, scan_pages_isolated},
  workflow::Steps,
};

/// How long to wait after a push before capturing, so the deploy the push
/// produced is actually live.
pub const DEPLOY_SETTLE_DELAY: Duration = Duration::from_secs(5 * 60);

/// A push event as delivered by the repository webhook.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployEvent {
  pub account_id:    Uuid,
  pub changed_files: Vec<String>,
  pub pushed_at:     DateTime<Utc>,
}

// ─── Affected-page filter ────────────────────────────────────────────────────

/// Files whose stems signal a site-wide effect.
const GLOBAL_STEMS: &[&str] =
  &["app", "layout", "index", "global", "globals", "main", "styles", "theme"];

fn file_stem(path: &str) -> &str {
  let name = path.rsplit('/').next().unwrap_or(path);
  name.split('.').next().unwrap_or(name)
}

fn is_frontend_file(path: &str) -> bool {
  let ext = path.rsplit('.').next().unwrap_or_default();
  matches!(
    ext,
    "html" | "css" | "scss" | "js" | "jsx" | "ts" | "tsx" | "vue" | "svelte" | "astro" | "mdx"
  )
}

/// Heuristic: does this change set plausibly touch the page at `url`?
///
/// An empty file list (webhook without a diff) scans everything. Otherwise a
/// page is affected by any global frontend file, or by a frontend file whose
/// stem matches the page's last URL path segment (the root page matches the
/// "index" stem).
pub fn plausibly_affected(url: &str, changed_files: &[String]) -> bool {
  if changed_files.is_empty() {
    return true;
  }

  let path = url
    .split("//")
    .nth(1)
    .and_then(|rest| rest.split_once('/').map(|(_, p)| p))
    .unwrap_or("");
  let page_stem = path
    .trim_end_matches('/')
    .rsplit('/')
    .next()
    .filter(|s| !s.is_empty())
    .unwrap_or("index");

  changed_files.iter().any(|file| {
    if !is_frontend_file(file) {
      return false;
    }
    let stem = file_stem(file);
    GLOBAL_STEMS.contains(&stem) || stem.eq_ignore_ascii_case(page_stem)
  })
}

// ─── Entry point ─────────────────────────────────────────────────────────────

/// Handle one push event end to end.
///
/// The account fetch is shared setup — its failure aborts the run. A tier
/// without deploy scans short-circuits with an empty report, not an error.
pub async fn handle_deploy<S, C, D, R, N>(
  env: &ScanEnv<S, C, D, R, N>,
  steps: &mut Steps,
  event: &DeployEvent,
  now: DateTime<Utc>,
) -> Result<BatchReport>
where
  S: ChangeStore,
  C: ScreenCapture,
  D: ChangeDetector,
  R: Reconciler,
  N: Notifier,
{
  steps.sleep("deploy-settle", DEPLOY_SETTLE_DELAY).await;

  let account = {
    let store = &env.store;
    let account_id = event.account_id;
    steps
      .run("load-account", || async move {
        store
          .get_account(account_id)
          .await
          .map_err(Error::store)?
          .ok_or(Error::AccountNotFound(account_id))
      })
      .await?
  };

  if !tier::can_use_deploy_scans(account.tier) {
    info!(account = %account.account_id, tier = ?account.tier, "tier has no deploy scans");
    return Ok(BatchReport::default());
  }

  let pages: Vec<Page> = env
    .store
    .list_active_pages(account.account_id)
    .await
    .map_err(Error::store)?
    .into_iter()
    .take(tier::page_limit(account.tier))
    .filter(|p| plausibly_affected(&p.url, &event.changed_files))
    .collect();

  info!(
    account = %account.account_id,
    pages = pages.len(),
    "deploy scan starting"
  );
  Ok(scan_pages_isolated(env, &account, &pages, TriggerKind::Deploy, now).await)
}
