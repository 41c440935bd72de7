//! JSON REST API for Driftwatch.
//!
//! Exposes an axum [`Router`] backed by any
//! [`driftwatch_core::store::ChangeStore`]. The surface is read-only from
//! the dashboard's perspective — the pipeline is the sole writer of scan
//! state — with one exception: checkpoint feedback, which the owner submits
//! here. Auth, TLS, and transport concerns are the caller's responsibility.
//!
//! # Mounting
//!
//! ```rust,ignore
//! .nest("/api", driftwatch_api::api_router(store.clone()))
//! ```

pub mod changes;
pub mod checkpoints;
pub mod error;
pub mod pages;

use std::sync::Arc;

use axum::{
  Router,
  routing::{get, post},
};
use driftwatch_core::store::ChangeStore;

pub use error::ApiError;

/// Build a fully-materialised API router for `store`.
///
/// The returned `Router<()>` can be nested into any parent router regardless
/// of its own state type.
pub fn api_router<S>(store: Arc<S>) -> Router<()>
where
  S: ChangeStore + Clone + Send + Sync + 'static,
  S::Error: std::error::Error + Send + Sync + 'static,
{
  Router::new()
    // Pages
    .route("/pages", get(pages::list::<S>))
    .route("/pages/{id}", get(pages::get_one::<S>))
    .route("/pages/{id}/changes", get(changes::list_for_page::<S>))
    .route("/pages/{id}/scans", get(pages::scans::<S>))
    // Changes
    .route("/changes/{id}", get(changes::get_one::<S>))
    .route("/changes/{id}/hypothesis", post(changes::set_hypothesis::<S>))
    .route("/changes/{id}/checkpoints", get(checkpoints::list_for_change::<S>))
    // Feedback — the one owner-submitted write.
    .route("/checkpoints/{id}/feedback", post(checkpoints::submit_feedback::<S>))
    .with_state(store)
}
