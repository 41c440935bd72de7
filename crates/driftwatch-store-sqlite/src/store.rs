//! [`SqliteStore`] — the SQLite implementation of [`ChangeStore`].

use std::path::Path;

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::OptionalExtension as _;
use uuid::Uuid;

use driftwatch_core::{
  baseline::{Baseline, NewBaseline},
  change::{ChangeStatus, DetectedChange, NewChange, Settlement},
  checkpoint::{Checkpoint, CheckpointFeedback, NewCheckpoint, NewFeedback},
  page::{Account, NewAccount, NewPage, Page},
  scan::{ScanKind, ScanRun, ScanStatus, TriggerKind},
  store::{ChangeRefresh, ChangeStore},
};

use crate::{
  Error, Result,
  encode::{
    RawAccount, RawBaseline, RawChange, RawCheckpoint, RawFeedback, RawScan,
    encode_cadence, encode_day, encode_dt, encode_magnitude, encode_scope,
    encode_uuid,
  },
  schema::SCHEMA,
};

/// Column list shared by every `changes` SELECT, in [`map_change_row`] order.
const CHANGE_COLUMNS: &str = "change_id, page_id, element, scope, before_text, \
   after_text, description, magnitude, hypothesis, first_detected_at, \
   last_seen_at, status, superseded_by";

fn map_change_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawChange> {
  Ok(RawChange {
    change_id:         row.get(0)?,
    page_id:           row.get(1)?,
    element:           row.get(2)?,
    scope:             row.get(3)?,
    before_text:       row.get(4)?,
    after_text:        row.get(5)?,
    description:       row.get(6)?,
    magnitude:         row.get(7)?,
    hypothesis:        row.get(8)?,
    first_detected_at: row.get(9)?,
    last_seen_at:      row.get(10)?,
    status:            row.get(11)?,
    superseded_by:     row.get(12)?,
  })
}

fn map_page_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<crate::encode::RawPage> {
  Ok(crate::encode::RawPage {
    page_id:         row.get(0)?,
    account_id:      row.get(1)?,
    url:             row.get(2)?,
    cadence:         row.get(3)?,
    metric_focus:    row.get(4)?,
    mobile_enabled:  row.get(5)?,
    active:          row.get(6)?,
    created_at:      row.get(7)?,
    last_scanned_at: row.get(8)?,
  })
}

const PAGE_COLUMNS: &str = "page_id, account_id, url, cadence, metric_focus, \
   mobile_enabled, active, created_at, last_scanned_at";

// ─── Store ───────────────────────────────────────────────────────────────────

/// A Driftwatch store backed by a single SQLite file.
///
/// Cloning is cheap — the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteStore {
  conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store — useful for testing.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  /// Guarded forward transition: `watching` → `new_status`. Returns whether
  /// the guard held; a record already past `watching` is left untouched.
  /// Supersession sets its back-reference in its own transaction and does
  /// not go through here.
  async fn transition_from_watching(
    &self,
    change_id: Uuid,
    new_status: &'static str,
  ) -> Result<bool> {
    let id_str = encode_uuid(change_id);

    let rows = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "UPDATE changes
           SET status = ?2
           WHERE change_id = ?1 AND status = 'watching'",
          rusqlite::params![id_str, new_status],
        )?)
      })
      .await?;

    Ok(rows == 1)
  }
}

// ─── ChangeStore impl ────────────────────────────────────────────────────────

impl ChangeStore for SqliteStore {
  type Error = Error;

  // ── Accounts ──────────────────────────────────────────────────────────────

  async fn add_account(&self, input: NewAccount) -> Result<Account> {
    let account = Account {
      account_id: Uuid::new_v4(),
      email:      input.email,
      tier:       input.tier,
      created_at: Utc::now(),
    };

    let id_str   = encode_uuid(account.account_id);
    let email    = account.email.clone();
    let tier_str = account.tier.discriminant().to_owned();
    let at_str   = encode_dt(account.created_at);

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO accounts (account_id, email, tier, created_at)
           VALUES (?1, ?2, ?3, ?4)",
          rusqlite::params![id_str, email, tier_str, at_str],
        )?;
        Ok(())
      })
      .await?;

    Ok(account)
  }

  async fn get_account(&self, id: Uuid) -> Result<Option<Account>> {
    let id_str = encode_uuid(id);

    let raw: Option<RawAccount> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              "SELECT account_id, email, tier, created_at
               FROM accounts WHERE account_id = ?1",
              rusqlite::params![id_str],
              |row| {
                Ok(RawAccount {
                  account_id: row.get(0)?,
                  email:      row.get(1)?,
                  tier:       row.get(2)?,
                  created_at: row.get(3)?,
                })
              },
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawAccount::into_account).transpose()
  }

  async fn list_accounts(&self) -> Result<Vec<Account>> {
    let raws: Vec<RawAccount> = self
      .conn
      .call(|conn| {
        let mut stmt = conn.prepare(
          "SELECT account_id, email, tier, created_at
           FROM accounts ORDER BY created_at",
        )?;
        let rows = stmt
          .query_map([], |row| {
            Ok(RawAccount {
              account_id: row.get(0)?,
              email:      row.get(1)?,
              tier:       row.get(2)?,
              created_at: row.get(3)?,
            })
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawAccount::into_account).collect()
  }

  // ── Pages ─────────────────────────────────────────────────────────────────

  async fn add_page(&self, input: NewPage) -> Result<Page> {
    let page = Page {
      page_id:         Uuid::new_v4(),
      account_id:      input.account_id,
      url:             input.url,
      cadence:         input.cadence,
      metric_focus:    input.metric_focus,
      mobile_enabled:  input.mobile_enabled,
      active:          true,
      created_at:      Utc::now(),
      last_scanned_at: None,
    };

    let id_str      = encode_uuid(page.page_id);
    let account_str = encode_uuid(page.account_id);
    let url         = page.url.clone();
    let cadence     = encode_cadence(page.cadence).to_owned();
    let focus       = page.metric_focus.clone();
    let mobile      = page.mobile_enabled;
    let at_str      = encode_dt(page.created_at);

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO pages (
             page_id, account_id, url, cadence, metric_focus,
             mobile_enabled, active, created_at
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1, ?7)",
          rusqlite::params![id_str, account_str, url, cadence, focus, mobile, at_str],
        )?;
        Ok(())
      })
      .await?;

    Ok(page)
  }

  async fn get_page(&self, id: Uuid) -> Result<Option<Page>> {
    let id_str = encode_uuid(id);

    let raw = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!("SELECT {PAGE_COLUMNS} FROM pages WHERE page_id = ?1"),
              rusqlite::params![id_str],
              map_page_row,
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(|r| r.into_page()).transpose()
  }

  async fn list_active_pages(&self, account_id: Uuid) -> Result<Vec<Page>> {
    let account_str = encode_uuid(account_id);

    let raws = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {PAGE_COLUMNS} FROM pages
           WHERE account_id = ?1 AND active = 1
           ORDER BY created_at"
        ))?;
        let rows = stmt
          .query_map(rusqlite::params![account_str], map_page_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(|r| r.into_page()).collect()
  }

  async fn touch_page_scanned(&self, page_id: Uuid, at: DateTime<Utc>) -> Result<()> {
    let id_str = encode_uuid(page_id);
    let at_str = encode_dt(at);

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "UPDATE pages SET last_scanned_at = ?2 WHERE page_id = ?1",
          rusqlite::params![id_str, at_str],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  // ── Baselines ─────────────────────────────────────────────────────────────

  async fn set_baseline(&self, input: NewBaseline) -> Result<Baseline> {
    let baseline = Baseline {
      baseline_id: Uuid::new_v4(),
      page_id:     input.page_id,
      captured_at: Utc::now(),
      desktop:     input.desktop,
      mobile:      input.mobile,
    };

    let id_str      = encode_uuid(baseline.baseline_id);
    let page_str    = encode_uuid(baseline.page_id);
    let at_str      = encode_dt(baseline.captured_at);
    let d_path      = baseline.desktop.path.clone();
    let d_digest    = baseline.desktop.content_hash.clone();
    let m_path      = baseline.mobile.as_ref().map(|m| m.path.clone());
    let m_digest    = baseline.mobile.as_ref().map(|m| m.content_hash.clone());

    self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        tx.execute(
          "UPDATE baselines SET current = 0 WHERE page_id = ?1 AND current = 1",
          rusqlite::params![page_str],
        )?;
        tx.execute(
          "INSERT INTO baselines (
             baseline_id, page_id, captured_at,
             desktop_path, desktop_digest, mobile_path, mobile_digest, current
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 1)",
          rusqlite::params![id_str, page_str, at_str, d_path, d_digest, m_path, m_digest],
        )?;
        tx.commit()?;
        Ok(())
      })
      .await?;

    Ok(baseline)
  }

  async fn current_baseline(&self, page_id: Uuid) -> Result<Option<Baseline>> {
    let page_str = encode_uuid(page_id);

    let raw: Option<RawBaseline> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              "SELECT baseline_id, page_id, captured_at,
                      desktop_path, desktop_digest, mobile_path, mobile_digest
               FROM baselines WHERE page_id = ?1 AND current = 1",
              rusqlite::params![page_str],
              |row| {
                Ok(RawBaseline {
                  baseline_id:    row.get(0)?,
                  page_id:        row.get(1)?,
                  captured_at:    row.get(2)?,
                  desktop_path:   row.get(3)?,
                  desktop_digest: row.get(4)?,
                  mobile_path:    row.get(5)?,
                  mobile_digest:  row.get(6)?,
                })
              },
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawBaseline::into_baseline).transpose()
  }

  // ── Scan runs ─────────────────────────────────────────────────────────────

  async fn begin_scan(
    &self,
    page_id: Uuid,
    trigger: TriggerKind,
    kind: ScanKind,
    day: NaiveDate,
  ) -> Result<Option<ScanRun>> {
    let scan = ScanRun {
      scan_id:       Uuid::new_v4(),
      page_id,
      trigger,
      kind,
      day,
      status:        ScanStatus::Running,
      started_at:    Utc::now(),
      finished_at:   None,
      changes_found: 0,
    };

    let id_str      = encode_uuid(scan.scan_id);
    let page_str    = encode_uuid(page_id);
    let trigger_str = trigger.discriminant().to_owned();
    let kind_str    = kind.discriminant().to_owned();
    let day_str     = encode_day(day);
    let at_str      = encode_dt(scan.started_at);

    // INSERT OR IGNORE against UNIQUE(page_id, trigger_kind, day); zero rows
    // means a scan already exists for this key and the caller should not run.
    let inserted = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "INSERT OR IGNORE INTO scans (
             scan_id, page_id, trigger_kind, kind, day, status, started_at
           ) VALUES (?1, ?2, ?3, ?4, ?5, 'running', ?6)",
          rusqlite::params![id_str, page_str, trigger_str, kind_str, day_str, at_str],
        )?)
      })
      .await?;

    Ok(if inserted == 1 { Some(scan) } else { None })
  }

  async fn complete_scan(&self, scan_id: Uuid, changes_found: i64) -> Result<()> {
    let id_str = encode_uuid(scan_id);
    let at_str = encode_dt(Utc::now());

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "UPDATE scans
           SET status = 'complete', finished_at = ?2, changes_found = ?3
           WHERE scan_id = ?1 AND status = 'running'",
          rusqlite::params![id_str, at_str, changes_found],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn fail_scan(&self, scan_id: Uuid, error: String) -> Result<()> {
    let id_str = encode_uuid(scan_id);
    let at_str = encode_dt(Utc::now());

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "UPDATE scans
           SET status = 'failed', finished_at = ?2, error = ?3
           WHERE scan_id = ?1 AND status = 'running'",
          rusqlite::params![id_str, at_str, error],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn scans_for_page(&self, page_id: Uuid) -> Result<Vec<ScanRun>> {
    let page_str = encode_uuid(page_id);

    let raws: Vec<RawScan> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT scan_id, page_id, trigger_kind, kind, day, status, error,
                  started_at, finished_at, changes_found
           FROM scans WHERE page_id = ?1
           ORDER BY started_at DESC",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![page_str], |row| {
            Ok(RawScan {
              scan_id:       row.get(0)?,
              page_id:       row.get(1)?,
              trigger_kind:  row.get(2)?,
              kind:          row.get(3)?,
              day:           row.get(4)?,
              status:        row.get(5)?,
              error:         row.get(6)?,
              started_at:    row.get(7)?,
              finished_at:   row.get(8)?,
              changes_found: row.get(9)?,
            })
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawScan::into_scan).collect()
  }

  // ── Detected changes ──────────────────────────────────────────────────────

  async fn record_change(&self, input: NewChange) -> Result<DetectedChange> {
    let now = Utc::now();
    let change = DetectedChange {
      change_id:         Uuid::new_v4(),
      page_id:           input.page_id,
      element:           input.element,
      scope:             input.scope,
      before:            input.before,
      after:             input.after,
      description:       input.description,
      magnitude:         input.magnitude,
      hypothesis:        None,
      first_detected_at: input.first_detected_at.unwrap_or(now),
      last_seen_at:      now,
      status:            ChangeStatus::Watching,
    };

    let id_str      = encode_uuid(change.change_id);
    let page_str    = encode_uuid(change.page_id);
    let element     = change.element.clone();
    let scope_str   = encode_scope(change.scope).to_owned();
    let before      = change.before.clone();
    let after       = change.after.clone();
    let description = change.description.clone();
    let mag_str     = encode_magnitude(change.magnitude).to_owned();
    let first_str   = encode_dt(change.first_detected_at);
    let seen_str    = encode_dt(change.last_seen_at);

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO changes (
             change_id, page_id, element, scope, before_text, after_text,
             description, magnitude, first_detected_at, last_seen_at, status
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 'watching')",
          rusqlite::params![
            id_str, page_str, element, scope_str, before, after,
            description, mag_str, first_str, seen_str,
          ],
        )?;
        Ok(())
      })
      .await?;

    Ok(change)
  }

  async fn get_change(&self, id: Uuid) -> Result<Option<DetectedChange>> {
    let id_str = encode_uuid(id);

    let raw = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!("SELECT {CHANGE_COLUMNS} FROM changes WHERE change_id = ?1"),
              rusqlite::params![id_str],
              map_change_row,
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(|r| r.into_change()).transpose()
  }

  async fn changes_for_page(&self, page_id: Uuid) -> Result<Vec<DetectedChange>> {
    let page_str = encode_uuid(page_id);

    let raws = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {CHANGE_COLUMNS} FROM changes
           WHERE page_id = ?1
           ORDER BY first_detected_at DESC"
        ))?;
        let rows = stmt
          .query_map(rusqlite::params![page_str], map_change_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(|r| r.into_change()).collect()
  }

  async fn watching_changes(&self, page_id: Uuid) -> Result<Vec<DetectedChange>> {
    let page_str = encode_uuid(page_id);

    let raws = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {CHANGE_COLUMNS} FROM changes
           WHERE page_id = ?1 AND status = 'watching'
           ORDER BY first_detected_at"
        ))?;
        let rows = stmt
          .query_map(rusqlite::params![page_str], map_change_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(|r| r.into_change()).collect()
  }

  async fn refresh_change(&self, refresh: ChangeRefresh) -> Result<bool> {
    let id_str    = encode_uuid(refresh.change_id);
    let after     = refresh.after;
    let desc      = refresh.description;
    let note      = refresh.match_note;
    let seen_str  = encode_dt(refresh.last_seen_at);

    let rows = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "UPDATE changes
           SET after_text   = ?2,
               description  = COALESCE(?3, description),
               match_note   = COALESCE(?4, match_note),
               last_seen_at = ?5
           WHERE change_id = ?1 AND status = 'watching'",
          rusqlite::params![id_str, after, desc, note, seen_str],
        )?)
      })
      .await?;

    Ok(rows == 1)
  }

  async fn supersede_changes(
    &self,
    aggregate: NewChange,
    old_ids: &[Uuid],
  ) -> Result<(DetectedChange, Vec<Uuid>)> {
    let now = Utc::now();
    let aggregate_id = Uuid::new_v4();

    let agg_id_str  = encode_uuid(aggregate_id);
    let page_str    = encode_uuid(aggregate.page_id);
    let element     = aggregate.element.clone();
    let scope_str   = encode_scope(aggregate.scope).to_owned();
    let before      = aggregate.before.clone();
    let after       = aggregate.after.clone();
    let description = aggregate.description.clone();
    let mag_str     = encode_magnitude(aggregate.magnitude).to_owned();
    let seed_first  = aggregate.first_detected_at.unwrap_or(now);
    let old_strs: Vec<String> = old_ids.iter().copied().map(encode_uuid).collect();

    // One transaction: compute the inherited age, insert the aggregate, then
    // guarded-update each constituent. A replay finds no `watching` rows left
    // and folds nothing twice.
    let (first_str, applied_strs): (String, Vec<String>) = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;

        let mut earliest = encode_dt(seed_first);
        {
          let mut stmt = tx.prepare(
            "SELECT first_detected_at FROM changes
             WHERE change_id = ?1 AND status = 'watching'",
          )?;
          for old in &old_strs {
            let first: Option<String> = stmt
              .query_row(rusqlite::params![old], |row| row.get(0))
              .optional()?;
            if let Some(first) = first
              && first < earliest
            {
              // RFC 3339 UTC strings order lexicographically.
              earliest = first;
            }
          }
        }

        tx.execute(
          "INSERT INTO changes (
             change_id, page_id, element, scope, before_text, after_text,
             description, magnitude, first_detected_at, last_seen_at, status
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 'watching')",
          rusqlite::params![
            agg_id_str, page_str, element, scope_str, before, after,
            description, mag_str, earliest, encode_dt(now),
          ],
        )?;

        let mut applied = Vec::new();
        for old in &old_strs {
          let rows = tx.execute(
            "UPDATE changes
             SET status = 'superseded', superseded_by = ?2
             WHERE change_id = ?1 AND status = 'watching'",
            rusqlite::params![old, agg_id_str],
          )?;
          if rows == 1 {
            applied.push(old.clone());
          }
        }

        tx.commit()?;
        Ok((earliest, applied))
      })
      .await?;

    let change = DetectedChange {
      change_id:         aggregate_id,
      page_id:           aggregate.page_id,
      element:           aggregate.element,
      scope:             aggregate.scope,
      before:            aggregate.before,
      after:             aggregate.after,
      description:       aggregate.description,
      magnitude:         aggregate.magnitude,
      hypothesis:        None,
      first_detected_at: crate::encode::decode_dt(&first_str)?,
      last_seen_at:      now,
      status:            ChangeStatus::Watching,
    };

    let applied = applied_strs
      .iter()
      .map(|s| crate::encode::decode_uuid(s))
      .collect::<Result<Vec<_>>>()?;

    Ok((change, applied))
  }

  async fn set_hypothesis(&self, change_id: Uuid, hypothesis: String) -> Result<bool> {
    let id_str = encode_uuid(change_id);

    let rows = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "UPDATE changes
           SET hypothesis = ?2
           WHERE change_id = ?1 AND status = 'watching'",
          rusqlite::params![id_str, hypothesis],
        )?)
      })
      .await?;

    Ok(rows == 1)
  }

  async fn settle_change(&self, change_id: Uuid, settlement: Settlement) -> Result<bool> {
    self
      .transition_from_watching(change_id, settlement.into_status().discriminant())
      .await
  }

  async fn mark_reverted(&self, change_id: Uuid) -> Result<bool> {
    self.transition_from_watching(change_id, "reverted").await
  }

  async fn assessable_changes(&self) -> Result<Vec<DetectedChange>> {
    let raws = self
      .conn
      .call(|conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {CHANGE_COLUMNS} FROM changes
           WHERE status IN ('watching', 'validated', 'regressed')
           ORDER BY first_detected_at"
        ))?;
        let rows = stmt
          .query_map([], map_change_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(|r| r.into_change()).collect()
  }

  // ── Checkpoints ───────────────────────────────────────────────────────────

  async fn record_checkpoint(&self, input: NewCheckpoint) -> Result<Option<Checkpoint>> {
    let checkpoint = Checkpoint {
      checkpoint_id: Uuid::new_v4(),
      change_id:     input.change_id,
      horizon:       input.horizon,
      assessment:    input.verdict.assessment,
      confidence:    input.verdict.confidence,
      reasoning:     input.verdict.reasoning,
      data_sources:  input.data_sources,
      computed_at:   Utc::now(),
    };

    let id_str      = encode_uuid(checkpoint.checkpoint_id);
    let change_str  = encode_uuid(checkpoint.change_id);
    let horizon     = checkpoint.horizon.days();
    let assessment  = checkpoint.assessment.discriminant().to_owned();
    let confidence  = checkpoint.confidence;
    let reasoning   = checkpoint.reasoning.clone();
    let sources_str = serde_json::to_string(&checkpoint.data_sources)?;
    let at_str      = encode_dt(checkpoint.computed_at);

    // INSERT OR IGNORE against UNIQUE(change_id, horizon_days): a horizon is
    // computed exactly once, and a replayed write is a no-op.
    let inserted = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "INSERT OR IGNORE INTO checkpoints (
             checkpoint_id, change_id, horizon_days, assessment,
             confidence, reasoning, data_sources, computed_at
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
          rusqlite::params![
            id_str, change_str, horizon, assessment,
            confidence, reasoning, sources_str, at_str,
          ],
        )?)
      })
      .await?;

    Ok(if inserted == 1 { Some(checkpoint) } else { None })
  }

  async fn get_checkpoint(&self, id: Uuid) -> Result<Option<Checkpoint>> {
    let id_str = encode_uuid(id);

    let raw: Option<RawCheckpoint> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              "SELECT checkpoint_id, change_id, horizon_days, assessment,
                      confidence, reasoning, data_sources, computed_at
               FROM checkpoints WHERE checkpoint_id = ?1",
              rusqlite::params![id_str],
              |row| {
                Ok(RawCheckpoint {
                  checkpoint_id: row.get(0)?,
                  change_id:     row.get(1)?,
                  horizon_days:  row.get(2)?,
                  assessment:    row.get(3)?,
                  confidence:    row.get(4)?,
                  reasoning:     row.get(5)?,
                  data_sources:  row.get(6)?,
                  computed_at:   row.get(7)?,
                })
              },
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawCheckpoint::into_checkpoint).transpose()
  }

  async fn checkpoints_for(&self, change_id: Uuid) -> Result<Vec<Checkpoint>> {
    let change_str = encode_uuid(change_id);

    let raws: Vec<RawCheckpoint> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT checkpoint_id, change_id, horizon_days, assessment,
                  confidence, reasoning, data_sources, computed_at
           FROM checkpoints WHERE change_id = ?1
           ORDER BY horizon_days",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![change_str], |row| {
            Ok(RawCheckpoint {
              checkpoint_id: row.get(0)?,
              change_id:     row.get(1)?,
              horizon_days:  row.get(2)?,
              assessment:    row.get(3)?,
              confidence:    row.get(4)?,
              reasoning:     row.get(5)?,
              data_sources:  row.get(6)?,
              computed_at:   row.get(7)?,
            })
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws
      .into_iter()
      .map(RawCheckpoint::into_checkpoint)
      .collect()
  }

  // ── Feedback ──────────────────────────────────────────────────────────────

  async fn record_feedback(&self, input: NewFeedback) -> Result<CheckpointFeedback> {
    let feedback = CheckpointFeedback {
      feedback_id:   Uuid::new_v4(),
      checkpoint_id: input.checkpoint_id,
      verdict:       input.verdict,
      note:          input.note,
      recorded_at:   Utc::now(),
    };

    let id_str         = encode_uuid(feedback.feedback_id);
    let checkpoint_str = encode_uuid(feedback.checkpoint_id);
    let verdict_str    = feedback.verdict.discriminant().to_owned();
    let note           = feedback.note.clone();
    let at_str         = encode_dt(feedback.recorded_at);

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO checkpoint_feedback (
             feedback_id, checkpoint_id, verdict, note, recorded_at
           ) VALUES (?1, ?2, ?3, ?4, ?5)",
          rusqlite::params![id_str, checkpoint_str, verdict_str, note, at_str],
        )?;
        Ok(())
      })
      .await?;

    Ok(feedback)
  }

  async fn feedback_for_page(&self, page_id: Uuid) -> Result<Vec<CheckpointFeedback>> {
    let page_str = encode_uuid(page_id);

    let raws: Vec<RawFeedback> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT fb.feedback_id, fb.checkpoint_id, fb.verdict, fb.note,
                  fb.recorded_at
           FROM checkpoint_feedback fb
           JOIN checkpoints cp ON cp.checkpoint_id = fb.checkpoint_id
           JOIN changes c      ON c.change_id      = cp.change_id
           WHERE c.page_id = ?1
           ORDER BY fb.recorded_at",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![page_str], |row| {
            Ok(RawFeedback {
              feedback_id:   row.get(0)?,
              checkpoint_id: row.get(1)?,
              verdict:       row.get(2)?,
              note:          row.get(3)?,
              recorded_at:   row.get(4)?,
            })
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawFeedback::into_feedback).collect()
  }
}
