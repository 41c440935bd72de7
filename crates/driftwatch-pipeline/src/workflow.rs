//! Memoized step execution, mirroring the durable orchestrator's
//! `step.run` / `step.sleep` contract.
//!
//! A workflow function may be re-invoked from the top after any partial
//! failure. Steps that already completed in an earlier attempt return their
//! recorded result without executing again; steps that failed were never
//! recorded and run again. The journal is serialisable so a caller can
//! persist it between attempts.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::time::Duration;

use serde::{Serialize, de::DeserializeOwned};
use tracing::debug;

/// Journalled step state for one workflow invocation.
#[derive(Debug, Default, Clone)]
pub struct Steps {
  memo:  HashMap<String, serde_json::Value>,
  slept: HashSet<String>,
}

impl Steps {
  pub fn new() -> Self { Self::default() }

  /// Run `f` at most once per `name`. A memoized result short-circuits; an
  /// error is not memoized, so the next attempt re-executes the step.
  pub async fn run<T, E, F, Fut>(&mut self, name: &str, f: F) -> Result<T, E>
  where
    T: Serialize + DeserializeOwned,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
  {
    if let Some(recorded) = self.memo.get(name)
      && let Ok(value) = serde_json::from_value(recorded.clone())
    {
      debug!(step = name, "step replayed from journal");
      return Ok(value);
    }

    let value = f().await?;
    if let Ok(serialized) = serde_json::to_value(&value) {
      self.memo.insert(name.to_string(), serialized);
    }
    Ok(value)
  }

  /// Sleep once per `name`; a replayed workflow does not wait again.
  pub async fn sleep(&mut self, name: &str, duration: Duration) {
    if self.slept.contains(name) {
      debug!(step = name, "sleep replayed from journal");
      return;
    }
    tokio::time::sleep(duration).await;
    self.slept.insert(name.to_string());
  }

  /// Serialise the journal for persistence between attempts.
  pub fn snapshot(&self) -> serde_json::Value {
    serde_json::json!({
      "memo":  self.memo,
      "slept": self.slept.iter().collect::<Vec<_>>(),
    })
  }

  /// Rebuild from a [`snapshot`](Self::snapshot). Unrecognisable snapshots
  /// yield a fresh journal — re-running every step is always safe.
  pub fn restore(snapshot: &serde_json::Value) -> Self {
    let memo = snapshot
      .get("memo")
      .and_then(|m| serde_json::from_value(m.clone()).ok())
      .unwrap_or_default();
    let slept = snapshot
      .get("slept")
      .and_then(|s| serde_json::from_value(s.clone()).ok())
      .unwrap_or_default();
    Self { memo, slept }
  }
}

#[cfg(test)]
mod tests {
  use std::convert::Infallible;

  use super::*;

  #[tokio::test]
  async fn completed_step_runs_once_across_replay() {
    let mut steps = Steps::new();
    let mut executions = 0u32;

    for _ in 0..3 {
      let result: Result<u32, Infallible> = steps
        .run("load", || {
          executions += 1;
          async { Ok(42) }
        })
        .await;
      assert_eq!(result.unwrap(), 42);
    }

    assert_eq!(executions, 1);
  }

  #[tokio::test]
  async fn failed_step_is_retried() {
    let mut steps = Steps::new();
    let mut executions = 0u32;

    let first: Result<u32, &str> = steps
      .run("flaky", || {
        executions += 1;
        async { Err("boom") }
      })
      .await;
    assert!(first.is_err());

    let second: Result<u32, &str> = steps
      .run("flaky", || {
        executions += 1;
        async { Ok(7) }
      })
      .await;
    assert_eq!(second.unwrap(), 7);
    assert_eq!(executions, 2);
  }

  #[tokio::test]
  async fn journal_survives_snapshot_roundtrip() {
    let mut steps = Steps::new();
    let _: Result<u32, Infallible> =
      steps.run("load", || async { Ok(42) }).await;
    steps.sleep("settle", Duration::from_millis(1)).await;

    let mut restored = Steps::restore(&steps.snapshot());
    let mut executions = 0u32;
    let replayed: Result<u32, Infallible> = restored
      .run("load", || {
        executions += 1;
        async { Ok(0) }
      })
      .await;

    assert_eq!(replayed.unwrap(), 42);
    assert_eq!(executions, 0);

    // The settle sleep is not repeated either.
    let started = std::time::Instant::now();
    restored.sleep("settle", Duration::from_secs(5)).await;
    assert!(started.elapsed() < Duration::from_secs(1));
  }
}
