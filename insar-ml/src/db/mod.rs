//! Database access for insar-ml
//!
//! Schema creation lives in `insar_common::db`; this module holds the queries.

pub mod colors;
pub mod metrics;
pub mod results;
pub mod runs;
pub mod stores;

pub use stores::{SqliteBuildingStore, SqlitePointStore, SqliteResultSink};
