//! Handlers for `/changes` endpoints.

use std::sync::Arc;

use axum::{
  Json,
  extract::{Path, Query, State},
};
use chrono::{DateTime, Utc};
use driftwatch_core::{change::DetectedChange, store::ChangeStore};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::ApiError;

#[derive(Debug, Deserialize)]
pub struct ListParams {
  /// If `true`, only records still in `watching` are returned.
  #[serde(default)]
  pub watching_only:  bool,
  /// If set, restrict to changes first detected after this instant.
  pub detected_after: Option<DateTime<Utc>>,
}

/// `GET /pages/:id/changes[?watching_only=true][&detected_after=...]`
pub async fn list_for_page<S>(
  State(store): State<Arc<S>>,
  Path(page_id): Path<Uuid>,
  Query(params): Query<ListParams>,
) -> Result<Json<Vec<DetectedChange>>, ApiError>
where
  S: ChangeStore,
  S::Error: std::error::Error + Send + Sync + 'static,
{
  let mut changes = if params.watching_only {
    store.watching_changes(page_id).await
  } else {
    store.changes_for_page(page_id).await
  }
  .map_err(|e| ApiError::Store(Box::new(e)))?;

  if let Some(after) = params.detected_after {
    changes.retain(|c| c.first_detected_at > after);
  }

  Ok(Json(changes))
}

/// JSON body accepted by `POST /changes/:id/hypothesis`.
#[derive(Debug, Deserialize)]
pub struct HypothesisBody {
  pub hypothesis: String,
}

/// `POST /changes/:id/hypothesis` — attach the owner's hypothesis to a
/// change still being watched. Rejected once the record has left
/// `watching`.
pub async fn set_hypothesis<S>(
  State(store): State<Arc<S>>,
  Path(id): Path<Uuid>,
  Json(body): Json<HypothesisBody>,
) -> Result<Json<DetectedChange>, ApiError>
where
  S: ChangeStore,
  S::Error: std::error::Error + Send + Sync + 'static,
{
  let applied = store
    .set_hypothesis(id, body.hypothesis)
    .await
    .map_err(|e| ApiError::Store(Box::new(e)))?;
  if !applied {
    return Err(ApiError::BadRequest(format!(
      "change {id} is not in watching status (or does not exist)"
    )));
  }

  let change = store
    .get_change(id)
    .await
    .map_err(|e| ApiError::Store(Box::new(e)))?
    .ok_or_else(|| ApiError::NotFound(format!("change {id} not found")))?;
  Ok(Json(change))
}

/// `GET /changes/:id`
pub async fn get_one<S>(
  State(store): State<Arc<S>>,
  Path(id): Path<Uuid>,
) -> Result<Json<DetectedChange>, ApiError>
where
  S: ChangeStore,
  S::Error: std::error::Error + Send + Sync + 'static,
{
  let change = store
    .get_change(id)
    .await
    .map_err(|e| ApiError::Store(Box::new(e)))?
    .ok_or_else(|| ApiError::NotFound(format!("change {id} not found")))?;
  Ok(Json(change))
}
