//! insar-ml library interface
//!
//! Point-to-building assignment, density clustering and their hybrid,
//! executed as tracked runs with persisted results, metrics and building
//! colors.

pub mod db;
pub mod models;
pub mod pipelines;
pub mod services;
pub mod stores;
pub mod utils;

pub use models::{DeleteOutcome, Metrics, PointResult, Run, RunDetail, RunRequest, RunStatus};
pub use pipelines::{Pipeline, PipelineRegistry};
pub use services::RunOrchestrator;
pub use stores::{BuildingStore, PointStore, ResultSink};
