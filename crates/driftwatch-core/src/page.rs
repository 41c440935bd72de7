//! Accounts and pages — the thin envelopes that own everything else.
//!
//! A page holds only identity and scheduling metadata. Its observable
//! history lives in baselines, detected changes, and scan runs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::tier::Tier;

// ─── Account ─────────────────────────────────────────────────────────────────

/// The owner of a set of monitored pages. Tier and notification address are
/// the only attributes the pipeline consults; billing lives elsewhere.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
  pub account_id: Uuid,
  pub email:      String,
  pub tier:       Tier,
  pub created_at: DateTime<Utc>,
}

/// Input to [`crate::store::ChangeStore::add_account`].
#[derive(Debug, Clone)]
pub struct NewAccount {
  pub email: String,
  pub tier:  Tier,
}

// ─── Scan cadence ────────────────────────────────────────────────────────────

/// How often a page wants to be scanned by the scheduled sweep. The effective
/// cadence is this value clamped by what the account's tier allows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanCadence {
  Daily,
  Weekly,
}

// ─── Page ────────────────────────────────────────────────────────────────────

/// A monitored URL owned by one account.
///
/// Created on the first tracking request; mutated by every completed scan.
/// Never hard-deleted while owned — `active` tracks the soft lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page {
  pub page_id:         Uuid,
  pub account_id:      Uuid,
  pub url:             String,
  pub cadence:         ScanCadence,
  /// Optional tag naming the business metric this page is expected to move.
  pub metric_focus:    Option<String>,
  /// Whether mobile captures are taken alongside desktop.
  pub mobile_enabled:  bool,
  pub active:          bool,
  pub created_at:      DateTime<Utc>,
  pub last_scanned_at: Option<DateTime<Utc>>,
}

/// Input to [`crate::store::ChangeStore::add_page`].
#[derive(Debug, Clone)]
pub struct NewPage {
  pub account_id:     Uuid,
  pub url:            String,
  pub cadence:        ScanCadence,
  pub metric_focus:   Option<String>,
  pub mobile_enabled: bool,
}

impl NewPage {
  /// Convenience constructor with defaults: daily cadence, desktop only.
  pub fn new(account_id: Uuid, url: impl Into<String>) -> Self {
    Self {
      account_id,
      url: url.into(),
      cadence: ScanCadence::Daily,
      metric_focus: None,
      mobile_enabled: false,
    }
  }
}
