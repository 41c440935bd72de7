//! Tier policy — pure quota lookups, no side effects.
//!
//! The tier in force is computed once per run and threaded as a parameter
//! into every quota decision; nothing here reads ambient state.

use serde::{Deserialize, Serialize};

use crate::{Error, Result, page::ScanCadence};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
  Free,
  Starter,
  Pro,
}

impl Tier {
  pub fn discriminant(&self) -> &'static str {
    match self {
      Self::Free => "free",
      Self::Starter => "starter",
      Self::Pro => "pro",
    }
  }

  pub fn from_discriminant(s: &str) -> Result<Self> {
    match s {
      "free" => Ok(Self::Free),
      "starter" => Ok(Self::Starter),
      "pro" => Ok(Self::Pro),
      other => Err(Error::UnknownDiscriminant {
        kind:  "tier",
        value: other.to_string(),
      }),
    }
  }
}

/// Maximum number of pages an account may have scanned per run.
pub fn page_limit(tier: Tier) -> usize {
  match tier {
    Tier::Free => 1,
    Tier::Starter => 5,
    Tier::Pro => 25,
  }
}

/// Whether push events may trigger scans for this tier.
pub fn can_use_deploy_scans(tier: Tier) -> bool {
  match tier {
    Tier::Free => false,
    Tier::Starter | Tier::Pro => true,
  }
}

/// The fastest cadence the tier allows. A page asking for more frequent
/// scans than this is clamped, not rejected.
pub fn allowed_frequency(tier: Tier) -> ScanCadence {
  match tier {
    Tier::Free => ScanCadence::Weekly,
    Tier::Starter | Tier::Pro => ScanCadence::Daily,
  }
}

/// The cadence actually in force for a page: its own setting, clamped by
/// tier.
pub fn effective_cadence(tier: Tier, requested: ScanCadence) -> ScanCadence {
  match (allowed_frequency(tier), requested) {
    (ScanCadence::Weekly, _) => ScanCadence::Weekly,
    (ScanCadence::Daily, requested) => requested,
  }
}
