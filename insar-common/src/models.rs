//! Read-only input records: radar measurement points and building footprints

use crate::geo::{Footprint, LonLat};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Building dataset a footprint comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildingSource {
    /// Global Building Atlas (carries heights)
    Gba,
    /// OpenStreetMap (no heights)
    Osm,
}

impl BuildingSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            BuildingSource::Gba => "gba",
            BuildingSource::Osm => "osm",
        }
    }
}

impl fmt::Display for BuildingSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BuildingSource {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "gba" => Ok(BuildingSource::Gba),
            "osm" => Ok(BuildingSource::Osm),
            other => Err(Error::validation(format!(
                "source must be 'gba' or 'osm', got '{other}'"
            ))),
        }
    }
}

/// Composite building key; orders by (source, id)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BuildingKey {
    pub source: BuildingSource,
    pub building_id: String,
}

impl BuildingKey {
    pub fn new(source: BuildingSource, building_id: impl Into<String>) -> Self {
        Self {
            source,
            building_id: building_id.into(),
        }
    }
}

impl fmt::Display for BuildingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.source, self.building_id)
    }
}

/// One persistent-scatterer measurement point
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointRecord {
    pub code: String,
    pub track: i64,
    pub location: LonLat,
    /// Mean line-of-sight velocity (mm/year)
    pub velocity: Option<f64>,
    pub coherence: Option<f64>,
    /// Seasonal displacement amplitude (mm)
    pub season_amp: Option<f64>,
    /// Radar incidence angle in degrees
    pub incidence_angle: Option<f64>,
}

/// One building footprint
#[derive(Debug, Clone, PartialEq)]
pub struct BuildingRecord {
    pub key: BuildingKey,
    pub footprint: Footprint,
    pub height_m: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_parsing() {
        assert_eq!("gba".parse::<BuildingSource>().unwrap(), BuildingSource::Gba);
        assert_eq!("osm".parse::<BuildingSource>().unwrap(), BuildingSource::Osm);
        assert!("GBA".parse::<BuildingSource>().unwrap_err().is_validation());
    }

    #[test]
    fn test_key_ordering_is_source_then_id() {
        let mut keys = vec![
            BuildingKey::new(BuildingSource::Osm, "1"),
            BuildingKey::new(BuildingSource::Gba, "b"),
            BuildingKey::new(BuildingSource::Gba, "a"),
        ];
        keys.sort();
        let labels: Vec<String> = keys.iter().map(|k| k.to_string()).collect();
        assert_eq!(labels, vec!["gba:a", "gba:b", "osm:1"]);
    }
}
