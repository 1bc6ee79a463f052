//! Pipelines and their registry
//!
//! The set of pipelines is closed: [`Pipeline`] names each one, and
//! [`Pipeline::configure`] turns a run's scope and loose parameters into a
//! validated [`PipelineConfig`] that can be executed.

pub mod assignment;
pub mod clustering;
pub mod dbscan;
pub mod hybrid;

use insar_common::geo::BBox;
use insar_common::{BuildingSource, Error, PointRecord, Result};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

use crate::models::params::{merge_params, params_to_map};
use crate::models::{AssignmentParams, ClusteringParams, HybridParams, Metrics};
use crate::stores::{BuildingStore, PointStore, ResultSink};

pub use assignment::AssignmentConfig;
pub use clustering::ClusteringConfig;
pub use hybrid::HybridConfig;

/// Version shared by all current pipelines
pub const PIPELINE_VERSION: &str = "0.1.0";

/// Source used when a building-matching pipeline gets none
pub const DEFAULT_SOURCE: BuildingSource = BuildingSource::Gba;

/// Stores a pipeline reads from and writes to during one run
pub struct Dataset<'a> {
    pub run_id: Uuid,
    pub points: &'a dyn PointStore,
    pub buildings: &'a dyn BuildingStore,
    pub results: &'a dyn ResultSink,
}

/// Points of the run's scope
///
/// Re-applies the bbox and track filter so every pipeline sees exactly the
/// requested points whatever the store returns.
pub(crate) async fn load_points(
    dataset: &Dataset<'_>,
    bbox: &BBox,
    track: Option<i64>,
) -> Result<Vec<PointRecord>> {
    let mut points = dataset.points.query(bbox, track).await?;
    points.retain(|p| bbox.contains(p.location) && track.map_or(true, |t| p.track == t));
    Ok(points)
}

/// Spatial and source selection of a run
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RunScope {
    pub source: Option<BuildingSource>,
    pub track: Option<i64>,
    pub bbox: Option<BBox>,
}

/// The closed set of pipelines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Pipeline {
    Assignment,
    Clustering,
    Hybrid,
}

impl Pipeline {
    pub const ALL: [Pipeline; 3] = [Pipeline::Assignment, Pipeline::Clustering, Pipeline::Hybrid];

    pub fn name(&self) -> &'static str {
        match self {
            Pipeline::Assignment => "assignment",
            Pipeline::Clustering => "clustering",
            Pipeline::Hybrid => "hybrid",
        }
    }

    pub fn version(&self) -> &'static str {
        PIPELINE_VERSION
    }

    /// Tag stored on the run record
    pub fn run_type(&self) -> &'static str {
        self.name()
    }

    /// True when results reference buildings, which makes the run colorable
    pub fn assigns_buildings(&self) -> bool {
        matches!(self, Pipeline::Assignment | Pipeline::Hybrid)
    }

    pub fn default_params(&self) -> Result<Map<String, Value>> {
        match self {
            Pipeline::Assignment => params_to_map(&AssignmentParams::default()),
            Pipeline::Clustering => params_to_map(&ClusteringParams::default()),
            Pipeline::Hybrid => params_to_map(&HybridParams::default()),
        }
    }

    /// Source stored on the run: building pipelines default to gba
    pub fn effective_source(&self, source: Option<BuildingSource>) -> Option<BuildingSource> {
        if self.assigns_buildings() {
            Some(source.unwrap_or(DEFAULT_SOURCE))
        } else {
            source
        }
    }

    /// Validate scope and parameters
    ///
    /// Returns the executable configuration and the effective parameter map.
    pub fn configure(
        &self,
        scope: &RunScope,
        overrides: &Map<String, Value>,
    ) -> Result<(PipelineConfig, Map<String, Value>)> {
        let bbox = scope
            .bbox
            .ok_or_else(|| Error::validation(format!("bbox is required for {self} pipeline")))?;
        let track = scope.track;
        let source = self.effective_source(scope.source).unwrap_or(DEFAULT_SOURCE);

        match self {
            Pipeline::Assignment => {
                let (params, effective) = merge_params::<AssignmentParams>(overrides)?;
                params.validate()?;
                let config = AssignmentConfig {
                    bbox,
                    track,
                    source,
                    params,
                };
                Ok((PipelineConfig::Assignment(config), effective))
            }
            Pipeline::Clustering => {
                let (params, effective) = merge_params::<ClusteringParams>(overrides)?;
                params.validate()?;
                let config = ClusteringConfig { bbox, track, params };
                Ok((PipelineConfig::Clustering(config), effective))
            }
            Pipeline::Hybrid => {
                let (params, effective) = merge_params::<HybridParams>(overrides)?;
                params.validate()?;
                let config = HybridConfig {
                    bbox,
                    track,
                    source,
                    params,
                };
                Ok((PipelineConfig::Hybrid(config), effective))
            }
        }
    }
}

impl fmt::Display for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A validated, executable pipeline invocation
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineConfig {
    Assignment(AssignmentConfig),
    Clustering(ClusteringConfig),
    Hybrid(HybridConfig),
}

impl PipelineConfig {
    /// Execute against `dataset`, persisting results; returns the run's metrics
    pub async fn run(&self, dataset: &Dataset<'_>) -> Result<Metrics> {
        match self {
            PipelineConfig::Assignment(config) => config.run(dataset).await,
            PipelineConfig::Clustering(config) => config.run(dataset).await,
            PipelineConfig::Hybrid(config) => config.run(dataset).await,
        }
    }
}

/// Listing entry for one pipeline
#[derive(Debug, Clone, Serialize)]
pub struct PipelineInfo {
    pub name: &'static str,
    pub version: &'static str,
    pub run_type: &'static str,
    pub default_params: Map<String, Value>,
}

/// Pipelines by name
#[derive(Debug, Clone)]
pub struct PipelineRegistry {
    pipelines: BTreeMap<&'static str, Pipeline>,
}

impl Default for PipelineRegistry {
    fn default() -> Self {
        Self {
            pipelines: Pipeline::ALL.iter().map(|p| (p.name(), *p)).collect(),
        }
    }
}

impl PipelineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve a pipeline; unknown names are validation failures
    pub fn get(&self, name: &str) -> Result<Pipeline> {
        self.pipelines.get(name).copied().ok_or_else(|| {
            Error::validation(format!(
                "unknown pipeline '{name}' (available: {})",
                self.names().join(", ")
            ))
        })
    }

    /// Sorted pipeline names
    pub fn names(&self) -> Vec<&'static str> {
        self.pipelines.keys().copied().collect()
    }

    pub fn list(&self) -> Result<Vec<PipelineInfo>> {
        self.pipelines
            .values()
            .map(|p| -> Result<PipelineInfo> {
                Ok(PipelineInfo {
                    name: p.name(),
                    version: p.version(),
                    run_type: p.run_type(),
                    default_params: p.default_params()?,
                })
            })
            .collect()
    }
}
