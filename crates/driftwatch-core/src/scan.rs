//! Scan runs — one pipeline execution for one page at one point in time.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Error, Result};

// ─── Trigger & kind ──────────────────────────────────────────────────────────

/// What started a scan. Part of the (page, trigger, day) idempotency key, so
/// a deploy scan and a scheduled scan can both run on the same day but
/// neither can run twice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerKind {
  Deploy,
  Scheduled,
  Manual,
}

impl TriggerKind {
  pub fn discriminant(&self) -> &'static str {
    match self {
      Self::Deploy => "deploy",
      Self::Scheduled => "scheduled",
      Self::Manual => "manual",
    }
  }

  pub fn from_discriminant(s: &str) -> Result<Self> {
    match s {
      "deploy" => Ok(Self::Deploy),
      "scheduled" => Ok(Self::Scheduled),
      "manual" => Ok(Self::Manual),
      other => Err(Error::UnknownDiscriminant {
        kind:  "scan trigger",
        value: other.to_string(),
      }),
    }
  }
}

/// Whether a run diffed against a baseline or re-established one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanKind {
  /// Full capture-and-establish; produces a baseline, no diff.
  Establish,
  /// Lightweight diff against the current baseline.
  Diff,
}

impl ScanKind {
  pub fn discriminant(&self) -> &'static str {
    match self {
      Self::Establish => "establish",
      Self::Diff => "diff",
    }
  }

  pub fn from_discriminant(s: &str) -> Result<Self> {
    match s {
      "establish" => Ok(Self::Establish),
      "diff" => Ok(Self::Diff),
      other => Err(Error::UnknownDiscriminant {
        kind:  "scan kind",
        value: other.to_string(),
      }),
    }
  }
}

// ─── Status ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ScanStatus {
  Running,
  Complete,
  Failed { error: String },
}

// ─── ScanRun ─────────────────────────────────────────────────────────────────

/// One execution of the detection pipeline for one page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanRun {
  pub scan_id:       Uuid,
  pub page_id:       Uuid,
  pub trigger:       TriggerKind,
  pub kind:          ScanKind,
  /// The calendar day this run counts against for dedup purposes.
  pub day:           NaiveDate,
  pub status:        ScanStatus,
  pub started_at:    DateTime<Utc>,
  pub finished_at:   Option<DateTime<Utc>>,
  pub changes_found: i64,
}
