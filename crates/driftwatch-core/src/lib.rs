//! Core types and trait definitions for the Driftwatch page monitor.
//!
//! This crate is deliberately free of HTTP and database dependencies.
//! All other crates depend on it; it depends on nothing proprietary.

// We intentionally use native `async fn` in traits (stabilised in Rust 1.75).
// Suppress the advisory lint about `Send` bounds on the returned futures.
#![allow(async_fn_in_trait)]

pub mod baseline;
pub mod change;
pub mod checkpoint;
pub mod detect;
pub mod error;
pub mod external;
pub mod guard;
pub mod metric;
pub mod page;
pub mod scan;
pub mod store;
pub mod tier;

pub use error::{Error, Result};
