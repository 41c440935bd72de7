//! Handlers for checkpoint reads and owner feedback.

use std::sync::Arc;

use axum::{
  Json,
  extract::{Path, State},
  http::StatusCode,
  response::IntoResponse,
};
use driftwatch_core::{
  checkpoint::{Checkpoint, FeedbackVerdict, NewFeedback},
  store::ChangeStore,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::ApiError;

/// `GET /changes/:id/checkpoints` — ascending by horizon.
pub async fn list_for_change<S>(
  State(store): State<Arc<S>>,
  Path(change_id): Path<Uuid>,
) -> Result<Json<Vec<Checkpoint>>, ApiError>
where
  S: ChangeStore,
  S::Error: std::error::Error + Send + Sync + 'static,
{
  let checkpoints = store
    .checkpoints_for(change_id)
    .await
    .map_err(|e| ApiError::Store(Box::new(e)))?;
  Ok(Json(checkpoints))
}

/// JSON body accepted by `POST /checkpoints/:id/feedback`.
#[derive(Debug, Deserialize)]
pub struct FeedbackBody {
  pub verdict: FeedbackVerdict,
  pub note:    Option<String>,
}

/// `POST /checkpoints/:id/feedback` — returns 201 + the stored feedback.
///
/// Feedback only calibrates later assessments; it never rewrites the
/// checkpoint it targets.
pub async fn submit_feedback<S>(
  State(store): State<Arc<S>>,
  Path(checkpoint_id): Path<Uuid>,
  Json(body): Json<FeedbackBody>,
) -> Result<impl IntoResponse, ApiError>
where
  S: ChangeStore,
  S::Error: std::error::Error + Send + Sync + 'static,
{
  // 404 beats a dangling foreign key from a mistyped ID.
  store
    .get_checkpoint(checkpoint_id)
    .await
    .map_err(|e| ApiError::Store(Box::new(e)))?
    .ok_or_else(|| ApiError::NotFound(format!("checkpoint {checkpoint_id} not found")))?;

  let feedback = store
    .record_feedback(NewFeedback {
      checkpoint_id,
      verdict: body.verdict,
      note: body.note,
    })
    .await
    .map_err(|e| ApiError::Store(Box::new(e)))?;
  Ok((StatusCode::CREATED, Json(feedback)))
}
