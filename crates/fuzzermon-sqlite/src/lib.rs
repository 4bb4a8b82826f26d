//! SQLite persistence for opcode fuzzing results: users, arches, hosts, batches, opcodes
//! and the per-batch successes and failures.

mod open;
mod models;
mod error;
mod insert;
mod query;
mod delete;
mod ingest;
mod schema;

pub use open::Db;
pub use models::*;
pub use error::StoreError;
pub use ingest::{BatchEntry, BatchReport, IngestSummary, StateDiff};
