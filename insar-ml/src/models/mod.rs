//! Data models for runs, parameters and results

pub mod params;
pub mod result;
pub mod run;

pub use params::{AssignmentParams, ClusteringParams, HybridParams};
pub use result::{Metrics, PointResult, ResultMethod};
pub use run::{DeleteOutcome, Run, RunDetail, RunRequest, RunStatus};
