//! Durable run state (spec.md §4.8, §6): the SQLite-backed store the
//! coordinator writes run rows and metric/sample batches to, and the
//! control surface reads back for run history and SSE backfill.

mod rows;
mod schema;
mod store;

pub use store::{Store, Table};
