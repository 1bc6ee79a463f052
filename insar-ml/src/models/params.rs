//! Typed pipeline parameters
//!
//! Callers send a loose JSON object. It is shallow-merged over the pipeline's
//! defaults (caller wins), then parsed into one of the structs below and
//! bounds-checked.

use insar_common::{Error, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

/// Spatial point-to-building assignment parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AssignmentParams {
    /// Search radius for the "nearest" fallback (metres)
    pub max_distance_m: f64,
    /// Scale applied to height × tan(incidence)
    pub buffer_multiplier: f64,
    /// Lower bound of the per-building buffer (metres)
    pub min_buffer_m: f64,
    /// Height used for buildings without one (metres)
    pub default_height_m: f64,
}

impl Default for AssignmentParams {
    fn default() -> Self {
        Self {
            max_distance_m: 30.0,
            buffer_multiplier: 1.0,
            min_buffer_m: 3.0,
            default_height_m: 12.0,
        }
    }
}

impl AssignmentParams {
    pub fn validate(&self) -> Result<()> {
        non_negative("max_distance_m", self.max_distance_m)?;
        non_negative("buffer_multiplier", self.buffer_multiplier)?;
        non_negative("min_buffer_m", self.min_buffer_m)?;
        non_negative("default_height_m", self.default_height_m)?;
        Ok(())
    }
}

/// DBSCAN parameters over standardized features
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClusteringParams {
    pub eps: f64,
    pub min_samples: usize,
}

impl Default for ClusteringParams {
    fn default() -> Self {
        Self {
            eps: 0.9,
            min_samples: 8,
        }
    }
}

impl ClusteringParams {
    pub fn validate(&self) -> Result<()> {
        validate_dbscan(self.eps, self.min_samples)
    }
}

/// Assignment followed by per-building clustering
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HybridParams {
    #[serde(flatten)]
    pub assignment: AssignmentParams,
    pub eps: f64,
    pub min_samples: usize,
}

impl Default for HybridParams {
    fn default() -> Self {
        Self {
            assignment: AssignmentParams::default(),
            eps: 0.9,
            min_samples: 6,
        }
    }
}

impl HybridParams {
    pub fn validate(&self) -> Result<()> {
        self.assignment.validate()?;
        validate_dbscan(self.eps, self.min_samples)
    }

    pub fn clustering(&self) -> ClusteringParams {
        ClusteringParams {
            eps: self.eps,
            min_samples: self.min_samples,
        }
    }
}

fn non_negative(name: &str, value: f64) -> Result<()> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(Error::validation(format!(
            "{name} must be a finite number >= 0, got {value}"
        )))
    }
}

fn validate_dbscan(eps: f64, min_samples: usize) -> Result<()> {
    if !(eps.is_finite() && eps > 0.0) {
        return Err(Error::validation(format!("eps must be > 0, got {eps}")));
    }
    if min_samples < 1 {
        return Err(Error::validation("min_samples must be >= 1"));
    }
    Ok(())
}

/// Serialize typed defaults into a JSON object
pub fn params_to_map<T: Serialize>(params: &T) -> Result<Map<String, Value>> {
    match serde_json::to_value(params)? {
        Value::Object(map) => Ok(map),
        other => Err(Error::Internal(format!(
            "parameters serialized to {other}, expected an object"
        ))),
    }
}

/// Shallow-merge `overrides` over `T::default()` and parse the result
///
/// Keys the pipeline does not know are dropped with a warning. Returns the typed
/// parameters and the effective JSON map that is stored on the run.
pub fn merge_params<T>(overrides: &Map<String, Value>) -> Result<(T, Map<String, Value>)>
where
    T: Default + Serialize + DeserializeOwned,
{
    let mut merged = params_to_map(&T::default())?;
    for (key, value) in overrides {
        if merged.contains_key(key) {
            merged.insert(key.clone(), value.clone());
        } else {
            warn!(param = %key, "Ignoring unknown pipeline parameter");
        }
    }

    let typed: T = serde_json::from_value(Value::Object(merged.clone()))
        .map_err(|e| Error::validation(format!("invalid params: {e}")))?;
    Ok((typed, merged))
}
