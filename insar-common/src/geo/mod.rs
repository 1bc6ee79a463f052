//! Geometry primitives for points and building footprints
//!
//! Inputs are WGS84 longitude/latitude. Distances are computed in metres by
//! projecting into a local tangent plane (see [`projection::LocalFrame`]), which is
//! accurate to well under a centimetre at building scale.

pub mod distance;
pub mod envelope;
pub mod projection;

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

pub use distance::{footprint_distance_m, point_to_footprint_m};
pub use envelope::{envelope_tree, IndexedEnvelope};
pub use projection::{LocalFrame, Utm, Xy};

/// WGS84 position in degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LonLat {
    pub lon: f64,
    pub lat: f64,
}

impl LonLat {
    pub fn new(lon: f64, lat: f64) -> Self {
        Self { lon, lat }
    }
}

/// Axis-aligned lon/lat rectangle, serialized as `[minLon, minLat, maxLon, maxLat]`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(into = "[f64; 4]", try_from = "[f64; 4]")]
pub struct BBox {
    pub min_lon: f64,
    pub min_lat: f64,
    pub max_lon: f64,
    pub max_lat: f64,
}

impl BBox {
    /// Validated constructor
    pub fn new(min_lon: f64, min_lat: f64, max_lon: f64, max_lat: f64) -> Result<Self> {
        let values = [min_lon, min_lat, max_lon, max_lat];
        if values.iter().any(|v| !v.is_finite()) {
            return Err(Error::validation("bbox values must be finite numbers"));
        }
        if !(-180.0..=180.0).contains(&min_lon) || !(-180.0..=180.0).contains(&max_lon) {
            return Err(Error::validation("bbox longitudes must lie in [-180, 180]"));
        }
        if !(-90.0..=90.0).contains(&min_lat) || !(-90.0..=90.0).contains(&max_lat) {
            return Err(Error::validation("bbox latitudes must lie in [-90, 90]"));
        }
        if min_lon > max_lon || min_lat > max_lat {
            return Err(Error::validation(
                "bbox must be ordered as min_lon,min_lat,max_lon,max_lat",
            ));
        }
        Ok(Self {
            min_lon,
            min_lat,
            max_lon,
            max_lat,
        })
    }

    /// Build from a slice of exactly four values
    pub fn from_slice(values: &[f64]) -> Result<Self> {
        match values {
            [a, b, c, d] => Self::new(*a, *b, *c, *d),
            _ => Err(Error::validation(
                "bbox must have four values: min_lon,min_lat,max_lon,max_lat",
            )),
        }
    }

    /// Parse `"min_lon,min_lat,max_lon,max_lat"`
    pub fn parse(text: &str) -> Result<Self> {
        let values = text
            .split(',')
            .map(|part| {
                part.trim()
                    .parse::<f64>()
                    .map_err(|_| Error::validation(format!("bbox value is not a number: {part}")))
            })
            .collect::<Result<Vec<f64>>>()?;
        Self::from_slice(&values)
    }

    /// Smallest box around a set of positions; `None` when empty
    pub fn enclosing<'a>(positions: impl IntoIterator<Item = &'a LonLat>) -> Option<Self> {
        let mut iter = positions.into_iter();
        let first = iter.next()?;
        let mut bbox = Self {
            min_lon: first.lon,
            min_lat: first.lat,
            max_lon: first.lon,
            max_lat: first.lat,
        };
        for p in iter {
            bbox.min_lon = bbox.min_lon.min(p.lon);
            bbox.min_lat = bbox.min_lat.min(p.lat);
            bbox.max_lon = bbox.max_lon.max(p.lon);
            bbox.max_lat = bbox.max_lat.max(p.lat);
        }
        Some(bbox)
    }

    /// Box of `radius_m` metres around a position; an unbounded radius covers the globe
    pub fn around(center: LonLat, radius_m: f64) -> Self {
        if !radius_m.is_finite() {
            return Self::world();
        }
        let (dlon, dlat) = LocalFrame::at(center).metres_to_degrees(radius_m.max(0.0));
        Self {
            min_lon: (center.lon - dlon).max(-180.0),
            min_lat: (center.lat - dlat).max(-90.0),
            max_lon: (center.lon + dlon).min(180.0),
            max_lat: (center.lat + dlat).min(90.0),
        }
    }

    pub fn world() -> Self {
        Self {
            min_lon: -180.0,
            min_lat: -90.0,
            max_lon: 180.0,
            max_lat: 90.0,
        }
    }

    /// Grow the box by `margin_m` metres on every side
    pub fn expanded_m(&self, margin_m: f64) -> Self {
        let low = Self::around(LonLat::new(self.min_lon, self.min_lat), margin_m);
        let high = Self::around(LonLat::new(self.max_lon, self.max_lat), margin_m);
        Self {
            min_lon: low.min_lon,
            min_lat: low.min_lat,
            max_lon: high.max_lon,
            max_lat: high.max_lat,
        }
    }

    /// Boundary-inclusive containment
    pub fn contains(&self, p: LonLat) -> bool {
        p.lon >= self.min_lon && p.lon <= self.max_lon && p.lat >= self.min_lat && p.lat <= self.max_lat
    }

    pub fn intersects(&self, other: &BBox) -> bool {
        self.min_lon <= other.max_lon
            && other.min_lon <= self.max_lon
            && self.min_lat <= other.max_lat
            && other.min_lat <= self.max_lat
    }

    pub fn center(&self) -> LonLat {
        LonLat::new(
            (self.min_lon + self.max_lon) / 2.0,
            (self.min_lat + self.max_lat) / 2.0,
        )
    }

    pub fn to_array(&self) -> [f64; 4] {
        [self.min_lon, self.min_lat, self.max_lon, self.max_lat]
    }
}

impl From<BBox> for [f64; 4] {
    fn from(bbox: BBox) -> Self {
        bbox.to_array()
    }
}

impl TryFrom<[f64; 4]> for BBox {
    type Error = Error;

    fn try_from(values: [f64; 4]) -> Result<Self> {
        Self::new(values[0], values[1], values[2], values[3])
    }
}

/// One polygon: outer ring plus optional holes
#[derive(Debug, Clone, PartialEq)]
pub struct Polygon {
    pub exterior: Vec<LonLat>,
    pub holes: Vec<Vec<LonLat>>,
}

/// Building footprint (polygon or multipolygon)
#[derive(Debug, Clone, PartialEq)]
pub struct Footprint {
    polygons: Vec<Polygon>,
    envelope: BBox,
}

impl Footprint {
    /// Build from polygons; every ring needs at least three positions
    pub fn new(polygons: Vec<Polygon>) -> Result<Self> {
        if polygons.is_empty() {
            return Err(Error::validation("footprint has no polygons"));
        }
        for polygon in &polygons {
            for ring in std::iter::once(&polygon.exterior).chain(polygon.holes.iter()) {
                if ring.len() < 3 {
                    return Err(Error::validation("footprint ring has fewer than 3 positions"));
                }
                if ring.iter().any(|p| !p.lon.is_finite() || !p.lat.is_finite()) {
                    return Err(Error::validation("footprint contains non-finite coordinates"));
                }
            }
        }
        let envelope = BBox::enclosing(polygons.iter().flat_map(|p| p.exterior.iter()))
            .ok_or_else(|| Error::validation("footprint has no positions"))?;
        Ok(Self { polygons, envelope })
    }

    /// Single polygon without holes
    pub fn polygon(exterior: Vec<LonLat>) -> Result<Self> {
        Self::new(vec![Polygon {
            exterior,
            holes: Vec::new(),
        }])
    }

    /// Axis-aligned rectangle footprint
    pub fn rectangle(min: LonLat, max: LonLat) -> Result<Self> {
        Self::polygon(vec![
            LonLat::new(min.lon, min.lat),
            LonLat::new(max.lon, min.lat),
            LonLat::new(max.lon, max.lat),
            LonLat::new(min.lon, max.lat),
            LonLat::new(min.lon, min.lat),
        ])
    }

    pub fn polygons(&self) -> &[Polygon] {
        &self.polygons
    }

    pub fn envelope(&self) -> BBox {
        self.envelope
    }

    /// Parse a GeoJSON `Polygon` or `MultiPolygon` geometry
    pub fn from_geojson(geometry: &Value) -> Result<Self> {
        let kind = geometry
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::validation("geometry has no type"))?;
        let coordinates = geometry
            .get("coordinates")
            .ok_or_else(|| Error::validation("geometry has no coordinates"))?;

        let polygons = match kind {
            "Polygon" => vec![parse_polygon(coordinates)?],
            "MultiPolygon" => coordinates
                .as_array()
                .ok_or_else(|| Error::validation("MultiPolygon coordinates must be an array"))?
                .iter()
                .map(parse_polygon)
                .collect::<Result<Vec<_>>>()?,
            other => {
                return Err(Error::validation(format!(
                    "unsupported footprint geometry type: {other}"
                )))
            }
        };
        Self::new(polygons)
    }

    /// GeoJSON geometry (always emitted as `MultiPolygon`)
    pub fn to_geojson(&self) -> Value {
        let ring = |r: &Vec<LonLat>| -> Vec<[f64; 2]> { r.iter().map(|p| [p.lon, p.lat]).collect() };
        let coordinates: Vec<Vec<Vec<[f64; 2]>>> = self
            .polygons
            .iter()
            .map(|p| {
                std::iter::once(ring(&p.exterior))
                    .chain(p.holes.iter().map(ring))
                    .collect()
            })
            .collect();
        json!({ "type": "MultiPolygon", "coordinates": coordinates })
    }
}

fn parse_polygon(value: &Value) -> Result<Polygon> {
    let rings = value
        .as_array()
        .ok_or_else(|| Error::validation("Polygon coordinates must be an array of rings"))?
        .iter()
        .map(parse_ring)
        .collect::<Result<Vec<_>>>()?;
    let mut rings = rings.into_iter();
    let exterior = rings
        .next()
        .ok_or_else(|| Error::validation("Polygon has no exterior ring"))?;
    Ok(Polygon {
        exterior,
        holes: rings.collect(),
    })
}

fn parse_ring(value: &Value) -> Result<Vec<LonLat>> {
    value
        .as_array()
        .ok_or_else(|| Error::validation("ring must be an array of positions"))?
        .iter()
        .map(|position| {
            let lon = position.get(0).and_then(Value::as_f64);
            let lat = position.get(1).and_then(Value::as_f64);
            match (lon, lat) {
                (Some(lon), Some(lat)) => Ok(LonLat::new(lon, lat)),
                _ => Err(Error::validation("position must be [lon, lat]")),
            }
        })
        .collect()
}
