//! Handlers for `/pages` endpoints.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `GET`  | `/pages` | `?account_id` required |
//! | `GET`  | `/pages/:id` | Single page |
//! | `GET`  | `/pages/:id/scans` | Scan history, newest first |

use std::sync::Arc;

use axum::{
  Json,
  extract::{Path, Query, State},
};
use driftwatch_core::{page::Page, scan::ScanRun, store::ChangeStore};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::ApiError;

#[derive(Debug, Deserialize)]
pub struct ListParams {
  /// Required: the account whose active pages to return.
  pub account_id: Uuid,
}

/// `GET /pages?account_id=<id>`
pub async fn list<S>(
  State(store): State<Arc<S>>,
  Query(params): Query<ListParams>,
) -> Result<Json<Vec<Page>>, ApiError>
where
  S: ChangeStore,
  S::Error: std::error::Error + Send + Sync + 'static,
{
  let pages = store
    .list_active_pages(params.account_id)
    .await
    .map_err(|e| ApiError::Store(Box::new(e)))?;
  Ok(Json(pages))
}

/// `GET /pages/:id`
pub async fn get_one<S>(
  State(store): State<Arc<S>>,
  Path(id): Path<Uuid>,
) -> Result<Json<Page>, ApiError>
where
  S: ChangeStore,
  S::Error: std::error::Error + Send + Sync + 'static,
{
  let page = store
    .get_page(id)
    .await
    .map_err(|e| ApiError::Store(Box::new(e)))?
    .ok_or_else(|| ApiError::NotFound(format!("page {id} not found")))?;
  Ok(Json(page))
}

/// `GET /pages/:id/scans`
pub async fn scans<S>(
  State(store): State<Arc<S>>,
  Path(id): Path<Uuid>,
) -> Result<Json<Vec<ScanRun>>, ApiError>
where
  S: ChangeStore,
  S::Error: std::error::Error + Send + Sync + 'static,
{
  let scans = store
    .scans_for_page(id)
    .await
    .map_err(|e| ApiError::Store(Box::new(e)))?;
  Ok(Json(scans))
}
