//! Encoding and decoding helpers between Rust domain types and the plain-text
//! representations stored in SQLite columns.
//!
//! All timestamps are stored as RFC 3339 strings, calendar days as ISO 8601
//! dates, and UUIDs as hyphenated lowercase strings. Data-source lists are
//! stored as compact JSON.

use chrono::{DateTime, NaiveDate, Utc};
use driftwatch_core::{
  baseline::{Baseline, CaptureRef},
  change::{ChangeScope, ChangeStatus, DetectedChange, Magnitude},
  checkpoint::{
    Assessment, Checkpoint, CheckpointFeedback, FeedbackVerdict, Horizon,
  },
  page::{Account, Page, ScanCadence},
  scan::{ScanKind, ScanRun, ScanStatus, TriggerKind},
  tier::Tier,
};
use uuid::Uuid;

use crate::{Error, Result};

// ─── Uuid ────────────────────────────────────────────────────────────────────

pub fn encode_uuid(id: Uuid) -> String { id.hyphenated().to_string() }

pub fn decode_uuid(s: &str) -> Result<Uuid> { Ok(Uuid::parse_str(s)?) }

// ─── DateTime<Utc> ───────────────────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String { dt.to_rfc3339() }

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

// ─── NaiveDate ───────────────────────────────────────────────────────────────

pub fn encode_day(d: NaiveDate) -> String { d.format("%Y-%m-%d").to_string() }

pub fn decode_day(s: &str) -> Result<NaiveDate> {
  NaiveDate::parse_from_str(s, "%Y-%m-%d")
    .map_err(|e| Error::DateParse(e.to_string()))
}

// ─── Flat enums ──────────────────────────────────────────────────────────────

pub fn encode_scope(s: ChangeScope) -> &'static str {
  match s {
    ChangeScope::Element => "element",
    ChangeScope::Section => "section",
    ChangeScope::Page => "page",
  }
}

pub fn decode_scope(s: &str) -> Result<ChangeScope> {
  match s {
    "element" => Ok(ChangeScope::Element),
    "section" => Ok(ChangeScope::Section),
    "page" => Ok(ChangeScope::Page),
    other => Err(unknown("change scope", other)),
  }
}

pub fn encode_magnitude(m: Magnitude) -> &'static str {
  match m {
    Magnitude::Incremental => "incremental",
    Magnitude::Overhaul => "overhaul",
  }
}

pub fn decode_magnitude(s: &str) -> Result<Magnitude> {
  match s {
    "incremental" => Ok(Magnitude::Incremental),
    "overhaul" => Ok(Magnitude::Overhaul),
    other => Err(unknown("magnitude", other)),
  }
}

pub fn encode_cadence(c: ScanCadence) -> &'static str {
  match c {
    ScanCadence::Daily => "daily",
    ScanCadence::Weekly => "weekly",
  }
}

pub fn decode_cadence(s: &str) -> Result<ScanCadence> {
  match s {
    "daily" => Ok(ScanCadence::Daily),
    "weekly" => Ok(ScanCadence::Weekly),
    other => Err(unknown("scan cadence", other)),
  }
}

fn unknown(kind: &'static str, value: &str) -> Error {
  Error::Core(driftwatch_core::Error::UnknownDiscriminant {
    kind,
    value: value.to_string(),
  })
}

// ─── Row types ───────────────────────────────────────────────────────────────

/// Raw strings read directly from an `accounts` row.
pub struct RawAccount {
  pub account_id: String,
  pub email:      String,
  pub tier:       String,
  pub created_at: String,
}

impl RawAccount {
  pub fn into_account(self) -> Result<Account> {
    Ok(Account {
      account_id: decode_uuid(&self.account_id)?,
      email:      self.email,
      tier:       Tier::from_discriminant(&self.tier)?,
      created_at: decode_dt(&self.created_at)?,
    })
  }
}

/// Raw strings read directly from a `pages` row.
pub struct RawPage {
  pub page_id:         String,
  pub account_id:      String,
  pub url:             String,
  pub cadence:         String,
  pub metric_focus:    Option<String>,
  pub mobile_enabled:  bool,
  pub active:          bool,
  pub created_at:      String,
  pub last_scanned_at: Option<String>,
}

impl RawPage {
  pub fn into_page(self) -> Result<Page> {
    Ok(Page {
      page_id:         decode_uuid(&self.page_id)?,
      account_id:      decode_uuid(&self.account_id)?,
      url:             self.url,
      cadence:         decode_cadence(&self.cadence)?,
      metric_focus:    self.metric_focus,
      mobile_enabled:  self.mobile_enabled,
      active:          self.active,
      created_at:      decode_dt(&self.created_at)?,
      last_scanned_at: self
        .last_scanned_at
        .as_deref()
        .map(decode_dt)
        .transpose()?,
    })
  }
}

/// Raw strings read directly from a `baselines` row.
pub struct RawBaseline {
  pub baseline_id:    String,
  pub page_id:        String,
  pub captured_at:    String,
  pub desktop_path:   String,
  pub desktop_digest: String,
  pub mobile_path:    Option<String>,
  pub mobile_digest:  Option<String>,
}

impl RawBaseline {
  pub fn into_baseline(self) -> Result<Baseline> {
    let mobile = match (self.mobile_path, self.mobile_digest) {
      (Some(path), Some(content_hash)) => Some(CaptureRef { path, content_hash }),
      _ => None,
    };
    Ok(Baseline {
      baseline_id: decode_uuid(&self.baseline_id)?,
      page_id:     decode_uuid(&self.page_id)?,
      captured_at: decode_dt(&self.captured_at)?,
      desktop:     CaptureRef {
        path:         self.desktop_path,
        content_hash: self.desktop_digest,
      },
      mobile,
    })
  }
}

/// Raw strings read directly from a `changes` row.
pub struct RawChange {
  pub change_id:         String,
  pub page_id:           String,
  pub element:           String,
  pub scope:             String,
  pub before_text:       String,
  pub after_text:        String,
  pub description:       Option<String>,
  pub magnitude:         String,
  pub hypothesis:        Option<String>,
  pub first_detected_at: String,
  pub last_seen_at:      String,
  pub status:            String,
  pub superseded_by:     Option<String>,
}

impl RawChange {
  pub fn into_change(self) -> Result<DetectedChange> {
    let superseded_by = self
      .superseded_by
      .as_deref()
      .map(decode_uuid)
      .transpose()?;
    Ok(DetectedChange {
      change_id:         decode_uuid(&self.change_id)?,
      page_id:           decode_uuid(&self.page_id)?,
      element:           self.element,
      scope:             decode_scope(&self.scope)?,
      before:            self.before_text,
      after:             self.after_text,
      description:       self.description,
      magnitude:         decode_magnitude(&self.magnitude)?,
      hypothesis:        self.hypothesis,
      first_detected_at: decode_dt(&self.first_detected_at)?,
      last_seen_at:      decode_dt(&self.last_seen_at)?,
      status:            ChangeStatus::from_parts(&self.status, superseded_by)?,
    })
  }
}

/// Raw values read directly from a `checkpoints` row.
pub struct RawCheckpoint {
  pub checkpoint_id: String,
  pub change_id:     String,
  pub horizon_days:  i64,
  pub assessment:    String,
  pub confidence:    f64,
  pub reasoning:     String,
  pub data_sources:  String,
  pub computed_at:   String,
}

impl RawCheckpoint {
  pub fn into_checkpoint(self) -> Result<Checkpoint> {
    Ok(Checkpoint {
      checkpoint_id: decode_uuid(&self.checkpoint_id)?,
      change_id:     decode_uuid(&self.change_id)?,
      horizon:       Horizon::try_from(self.horizon_days).map_err(Error::Core)?,
      assessment:    Assessment::from_discriminant(&self.assessment)?,
      confidence:    self.confidence,
      reasoning:     self.reasoning,
      data_sources:  serde_json::from_str(&self.data_sources)?,
      computed_at:   decode_dt(&self.computed_at)?,
    })
  }
}

/// Raw strings read directly from a `checkpoint_feedback` row.
pub struct RawFeedback {
  pub feedback_id:   String,
  pub checkpoint_id: String,
  pub verdict:       String,
  pub note:          Option<String>,
  pub recorded_at:   String,
}

impl RawFeedback {
  pub fn into_feedback(self) -> Result<CheckpointFeedback> {
    Ok(CheckpointFeedback {
      feedback_id:   decode_uuid(&self.feedback_id)?,
      checkpoint_id: decode_uuid(&self.checkpoint_id)?,
      verdict:       FeedbackVerdict::from_discriminant(&self.verdict)?,
      note:          self.note,
      recorded_at:   decode_dt(&self.recorded_at)?,
    })
  }
}

/// Raw values read directly from a `scans` row.
pub struct RawScan {
  pub scan_id:       String,
  pub page_id:       String,
  pub trigger_kind:  String,
  pub kind:          String,
  pub day:           String,
  pub status:        String,
  pub error:         Option<String>,
  pub started_at:    String,
  pub finished_at:   Option<String>,
  pub changes_found: i64,
}

impl RawScan {
  pub fn into_scan(self) -> Result<ScanRun> {
    let status = match self.status.as_str() {
      "running" => ScanStatus::Running,
      "complete" => ScanStatus::Complete,
      "failed" => ScanStatus::Failed {
        error: self.error.unwrap_or_default(),
      },
      other => return Err(unknown("scan status", other)),
    };
    Ok(ScanRun {
      scan_id:       decode_uuid(&self.scan_id)?,
      page_id:       decode_uuid(&self.page_id)?,
      trigger:       TriggerKind::from_discriminant(&self.trigger_kind)?,
      kind:          ScanKind::from_discriminant(&self.kind)?,
      day:           decode_day(&self.day)?,
      status,
      started_at:    decode_dt(&self.started_at)?,
      finished_at:   self.finished_at.as_deref().map(decode_dt).transpose()?,
      changes_found: self.changes_found,
    })
  }
}
