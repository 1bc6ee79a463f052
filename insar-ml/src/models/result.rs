//! Per-point run output

use insar_common::{BuildingKey, BuildingSource};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Named numeric outputs of a run
pub type Metrics = BTreeMap<String, f64>;

/// How a result row was produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultMethod {
    /// Within the building's height/angle buffer
    Buffer,
    /// Closest building within `max_distance_m`
    Nearest,
    /// Density cluster label
    Dbscan,
    /// No building matched
    Unassigned,
}

impl ResultMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResultMethod::Buffer => "buffer",
            ResultMethod::Nearest => "nearest",
            ResultMethod::Dbscan => "dbscan",
            ResultMethod::Unassigned => "unassigned",
        }
    }
}

impl fmt::Display for ResultMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResultMethod {
    type Err = insar_common::Error;

    fn from_str(s: &str) -> insar_common::Result<Self> {
        match s {
            "buffer" => Ok(ResultMethod::Buffer),
            "nearest" => Ok(ResultMethod::Nearest),
            "dbscan" => Ok(ResultMethod::Dbscan),
            "unassigned" => Ok(ResultMethod::Unassigned),
            other => Err(insar_common::Error::Internal(format!(
                "unknown result method '{other}'"
            ))),
        }
    }
}

/// One output row per (run, point)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointResult {
    pub code: String,
    pub track: i64,
    pub cluster_id: Option<String>,
    /// Building dataset searched; kept on unassigned rows too
    pub source: Option<BuildingSource>,
    pub building: Option<BuildingKey>,
    pub distance_m: Option<f64>,
    pub score: Option<f64>,
    pub method: Option<ResultMethod>,
    pub meta: Value,
}

impl PointResult {
    pub fn new(code: impl Into<String>, track: i64) -> Self {
        Self {
            code: code.into(),
            track,
            cluster_id: None,
            source: None,
            building: None,
            distance_m: None,
            score: None,
            method: None,
            meta: Value::Null,
        }
    }

    /// Source stored with the row: the matched building's, else the searched one
    pub fn building_source(&self) -> Option<BuildingSource> {
        self.building.as_ref().map(|b| b.source).or(self.source)
    }
}
