//! Steward Store - durable SQLite persistence
//!
//! One database file holds:
//! - proposals and their lifecycle metadata
//! - analysis results and rubric scores, keyed by proposal
//! - improvement cycles bounded by a uniqueness constraint
//! - per-capability completion counters
//! - the hash-chained audit log
//!
//! Connections are wrapped in a mutex and all SQLite work runs on tokio's
//! blocking pool. Several [`SqliteStore`] handles may open the same file;
//! compare-and-swap updates inside IMMEDIATE transactions keep their writes
//! consistent.

#![warn(unreachable_pub)]

mod audit;
mod cycles;
pub mod error;
mod records;
mod rows;
mod schema;
mod store;

pub use error::StoreError;
pub use records::Completion;
pub use store::{SqliteStore, CLAIM_EXPIRED};
