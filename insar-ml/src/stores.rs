//! Store contracts the pipelines run against
//!
//! The SQLite implementations live in [`crate::db::stores`]; tests substitute
//! in-memory fakes to inject failures.

use crate::models::PointResult;
use async_trait::async_trait;
use insar_common::geo::BBox;
use insar_common::{BuildingRecord, BuildingSource, PointRecord, Result};
use uuid::Uuid;

/// Source of measurement points
#[async_trait]
pub trait PointStore: Send + Sync {
    /// Points inside `bbox` (boundary inclusive), optionally limited to one track
    async fn query(&self, bbox: &BBox, track: Option<i64>) -> Result<Vec<PointRecord>>;
}

/// Source of building footprints
#[async_trait]
pub trait BuildingStore: Send + Sync {
    /// Every building of one dataset
    async fn query(&self, source: BuildingSource) -> Result<Vec<BuildingRecord>>;
}

/// Destination for per-point results
#[async_trait]
pub trait ResultSink: Send + Sync {
    /// Write all rows of one run atomically
    async fn insert_results(&self, run_id: Uuid, results: &[PointResult]) -> Result<()>;
}
