//! SQLite backend for the Driftwatch change store.
//!
//! Wraps [`tokio_rusqlite`] so all database access runs on a dedicated thread
//! pool without blocking the async runtime. Retry-safety is pushed into the
//! SQL itself: status transitions are guarded `UPDATE ... WHERE status = ...`
//! statements and at-most-once inserts are `INSERT OR IGNORE` against UNIQUE
//! constraints.

mod encode;
mod schema;
mod store;

pub mod error;

pub use error::{Error, Result};
pub use store::SqliteStore;

#[cfg(test)]
mod tests;
