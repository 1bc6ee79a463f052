//! Run orchestration, building colors and experiment tracking

pub mod colors;
pub mod orchestrator;
pub mod tracking;

pub use colors::{assign_building_colors, fallback_color_index, palette_start, PALETTE_SIZE};
pub use orchestrator::RunOrchestrator;
pub use tracking::{ExperimentTracker, MlflowTracker, TrackingError, TrackingSession};
