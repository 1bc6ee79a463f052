//! Point-to-building assignment
//!
//! Each point gets a per-building buffer derived from the building height and
//! the radar incidence angle:
//!
//! ```text
//! buffer_m = max(min_buffer_m, height × tan(incidence) × buffer_multiplier)
//! ```
//!
//! Buildings whose footprint lies within that buffer are "buffer" candidates.
//! Only when there are none does the fallback consider every building within
//! `max_distance_m` ("nearest"). The closest candidate of the preferred method
//! wins; equal distances resolve to the lowest building id.

use insar_common::geo::{envelope_tree, point_to_footprint_m, BBox, IndexedEnvelope, LonLat};
use insar_common::{BuildingRecord, BuildingSource, PointRecord, Result};
use rstar::RTree;
use serde_json::json;
use std::cmp::Ordering;
use tracing::info;

use super::{load_points, Dataset};
use crate::models::{AssignmentParams, Metrics, PointResult, ResultMethod};

/// Incidence angle assumed when a point has none (degrees)
pub const DEFAULT_INCIDENCE_DEG: f64 = 38.5;

/// Slack added to the prefilter window (metres)
const WINDOW_MARGIN_M: f64 = 1.0;

/// Winning building for one point
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Match {
    /// Index into the matcher's building slice
    pub building: usize,
    pub distance_m: f64,
    /// [`ResultMethod::Buffer`] or [`ResultMethod::Nearest`]
    pub method: ResultMethod,
    /// Buffer that admitted the building; `None` for nearest matches
    pub buffer_m: Option<f64>,
}

impl Match {
    /// `1 / (1 + distance)`
    pub fn score(&self) -> f64 {
        1.0 / (1.0 + self.distance_m)
    }
}

/// Spatially indexed buildings of one source
pub struct BuildingMatcher<'a> {
    buildings: &'a [BuildingRecord],
    index: RTree<IndexedEnvelope>,
    params: AssignmentParams,
    max_height_m: f64,
}

impl<'a> BuildingMatcher<'a> {
    pub fn new(buildings: &'a [BuildingRecord], params: AssignmentParams) -> Self {
        let index = envelope_tree(buildings.iter().map(|b| b.footprint.envelope()));
        let max_height_m = buildings
            .iter()
            .map(|b| b.height_m.unwrap_or(params.default_height_m))
            .fold(params.default_height_m, f64::max);
        Self {
            buildings,
            index,
            params,
            max_height_m,
        }
    }

    pub fn building(&self, idx: usize) -> &BuildingRecord {
        &self.buildings[idx]
    }

    fn slope(&self, incidence_angle: Option<f64>) -> f64 {
        incidence_angle.unwrap_or(DEFAULT_INCIDENCE_DEG).to_radians().tan() * self.params.buffer_multiplier
    }

    /// Buffer radius for one building seen at `incidence_angle`
    pub fn buffer_m(&self, building: &BuildingRecord, incidence_angle: Option<f64>) -> f64 {
        let height = building.height_m.unwrap_or(self.params.default_height_m);
        self.params.min_buffer_m.max(height * self.slope(incidence_angle))
    }

    /// Largest radius any building could match at
    fn search_radius_m(&self, incidence_angle: Option<f64>) -> f64 {
        let slope = self.slope(incidence_angle);
        self.params
            .max_distance_m
            .max(self.params.min_buffer_m)
            .max(self.max_height_m * slope)
            .max(self.params.default_height_m * slope)
    }

    /// Best building for a point, if any qualifies
    pub fn match_point(&self, location: LonLat, incidence_angle: Option<f64>) -> Option<Match> {
        let radius = self.search_radius_m(incidence_angle);
        let window = BBox::around(location, radius + WINDOW_MARGIN_M);

        let mut best: Option<Match> = None;
        for entry in self.index.locate_in_envelope_intersecting(&window.to_aabb()) {
            let idx = entry.idx;
            let building = &self.buildings[idx];
            let distance_m = point_to_footprint_m(location, &building.footprint);
            let buffer_m = self.buffer_m(building, incidence_angle);

            let candidate = if distance_m <= buffer_m {
                Match {
                    building: idx,
                    distance_m,
                    method: ResultMethod::Buffer,
                    buffer_m: Some(buffer_m),
                }
            } else if distance_m <= self.params.max_distance_m {
                Match {
                    building: idx,
                    distance_m,
                    method: ResultMethod::Nearest,
                    buffer_m: None,
                }
            } else {
                continue;
            };

            let better = match &best {
                None => true,
                Some(current) => self.compare(&candidate, current) == Ordering::Less,
            };
            if better {
                best = Some(candidate);
            }
        }
        best
    }

    /// Buffer before nearest, then distance, then building id
    fn compare(&self, a: &Match, b: &Match) -> Ordering {
        let rank = |m: &Match| u8::from(m.method != ResultMethod::Buffer);
        rank(a)
            .cmp(&rank(b))
            .then(a.distance_m.total_cmp(&b.distance_m))
            .then_with(|| {
                self.buildings[a.building]
                    .key
                    .building_id
                    .cmp(&self.buildings[b.building].key.building_id)
            })
    }
}

/// Assign one point, producing its result row
pub fn assign_point(matcher: &BuildingMatcher<'_>, point: &PointRecord) -> (PointResult, Option<Match>) {
    let mut result = PointResult::new(point.code.clone(), point.track);
    let found = matcher.match_point(point.location, point.incidence_angle);
    match &found {
        Some(m) => {
            result.building = Some(matcher.building(m.building).key.clone());
            result.distance_m = Some(m.distance_m);
            result.score = Some(m.score());
            result.method = Some(m.method);
            result.meta = json!({ "method": m.method, "buffer_m": m.buffer_m });
        }
        None => {
            result.method = Some(ResultMethod::Unassigned);
        }
    }
    (result, found)
}

/// Validated inputs of an assignment run
#[derive(Debug, Clone, PartialEq)]
pub struct AssignmentConfig {
    pub bbox: BBox,
    pub track: Option<i64>,
    pub source: BuildingSource,
    pub params: AssignmentParams,
}

impl AssignmentConfig {
    pub async fn run(&self, dataset: &Dataset<'_>) -> Result<Metrics> {
        let points = load_points(dataset, &self.bbox, self.track).await?;
        let buildings = dataset.buildings.query(self.source).await?;
        let matcher = BuildingMatcher::new(&buildings, self.params);

        let mut results = Vec::with_capacity(points.len());
        let mut buffer_matches = 0usize;
        let mut nearest_matches = 0usize;
        for point in &points {
            let (mut result, found) = assign_point(&matcher, point);
            result.source = Some(self.source);
            match found.map(|m| m.method) {
                Some(ResultMethod::Buffer) => buffer_matches += 1,
                Some(ResultMethod::Nearest) => nearest_matches += 1,
                _ => {}
            }
            results.push(result);
        }

        dataset.results.insert_results(dataset.run_id, &results).await?;

        let assigned = buffer_matches + nearest_matches;
        info!(
            run_id = %dataset.run_id,
            points = points.len(),
            buildings = buildings.len(),
            assigned,
            "Assignment complete"
        );

        Ok(Metrics::from([
            ("total_points".to_string(), points.len() as f64),
            ("assigned_points".to_string(), assigned as f64),
            ("buffer_matches".to_string(), buffer_matches as f64),
            ("nearest_matches".to_string(), nearest_matches as f64),
        ]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use insar_common::geo::{Footprint, LocalFrame};
    use insar_common::BuildingKey;

    /// 10 m × 10 m square whose west edge sits `east_m` metres east of `origin`
    fn square_east_of(origin: LonLat, east_m: f64, id: &str, height_m: Option<f64>) -> BuildingRecord {
        let frame = LocalFrame::at(origin);
        let min = frame.offset(east_m, -5.0);
        let max = frame.offset(east_m + 10.0, 5.0);
        BuildingRecord {
            key: BuildingKey::new(BuildingSource::Gba, id),
            footprint: Footprint::rectangle(min, max).unwrap(),
            height_m,
        }
    }

    fn origin() -> LonLat {
        LonLat::new(16.37, 48.21)
    }

    #[test]
    fn test_buffer_radius_formula() {
        let buildings = vec![square_east_of(origin(), 4.0, "a", Some(20.0))];
        let matcher = BuildingMatcher::new(&buildings, AssignmentParams::default());
        let expected = 20.0 * 38.5_f64.to_radians().tan();
        assert!((matcher.buffer_m(&buildings[0], None) - expected).abs() < 1e-9);

        let low = vec![square_east_of(origin(), 4.0, "b", Some(1.0))];
        let matcher = BuildingMatcher::new(&low, AssignmentParams::default());
        assert_eq!(matcher.buffer_m(&low[0], Some(30.0)), 3.0);
    }

    #[test]
    fn test_closer_building_wins_within_buffer() {
        // Height 20 m at 38.5 degrees gives a buffer of about 15.9 m
        let buildings = vec![
            square_east_of(origin(), 9.0, "far", Some(20.0)),
            square_east_of(origin(), -14.0, "near", Some(20.0)),
        ];
        // "near" occupies [-14, -4] so the point is 4 m from it
        let matcher = BuildingMatcher::new(&buildings, AssignmentParams::default());
        let m = matcher.match_point(origin(), None).unwrap();
        assert_eq!(matcher.building(m.building).key.building_id, "near");
        assert_eq!(m.method, ResultMethod::Buffer);
        assert!((m.distance_m - 4.0).abs() < 0.01);
        assert!((m.score() - 0.2).abs() < 0.001);
    }

    #[test]
    fn test_nearest_fallback_beyond_buffer() {
        // No height data → 12 m × tan(38.5°) ≈ 9.5 m buffer, building at 25 m
        let buildings = vec![square_east_of(origin(), 25.0, "x", None)];
        let params = AssignmentParams {
            max_distance_m: 30.0,
            ..AssignmentParams::default()
        };
        let matcher = BuildingMatcher::new(&buildings, params);
        let m = matcher.match_point(origin(), None).unwrap();
        assert_eq!(m.method, ResultMethod::Nearest);
        assert!(m.buffer_m.is_none());
        assert!((m.distance_m - 25.0).abs() < 0.01);
    }

    #[test]
    fn test_unassigned_beyond_max_distance() {
        let buildings = vec![square_east_of(origin(), 45.0, "x", None)];
        let matcher = BuildingMatcher::new(&buildings, AssignmentParams::default());
        assert!(matcher.match_point(origin(), None).is_none());

        let point = PointRecord {
            code: "p".to_string(),
            track: 1,
            location: origin(),
            velocity: None,
            coherence: None,
            season_amp: None,
            incidence_angle: None,
        };
        let (result, found) = assign_point(&matcher, &point);
        assert!(found.is_none());
        assert!(result.building.is_none());
        assert!(result.score.is_none());
        assert_eq!(result.method, Some(ResultMethod::Unassigned));
    }

    #[test]
    fn test_buffer_preferred_over_closer_nearest() {
        let buildings = vec![
            // Tall building 12 m away: buffer 30 × tan(38.5°) ≈ 23.9 m
            square_east_of(origin(), 12.0, "tall", Some(30.0)),
            // Low building 8 m away west: buffer max(3, 1 × 0.8) = 3 m
            square_east_of(origin(), -18.0, "low", Some(1.0)),
        ];
        let matcher = BuildingMatcher::new(&buildings, AssignmentParams::default());
        let m = matcher.match_point(origin(), None).unwrap();
        assert_eq!(matcher.building(m.building).key.building_id, "tall");
        assert_eq!(m.method, ResultMethod::Buffer);
    }

    #[test]
    fn test_equal_distance_ties_break_by_id() {
        // Same footprint under two ids, listed out of order
        let buildings = vec![
            square_east_of(origin(), 5.0, "b", None),
            square_east_of(origin(), 5.0, "a", None),
        ];
        let matcher = BuildingMatcher::new(&buildings, AssignmentParams::default());
        let first = matcher.match_point(origin(), None).unwrap();
        assert_eq!(matcher.building(first.building).key.building_id, "a");
        for _ in 0..3 {
            assert_eq!(matcher.match_point(origin(), None), Some(first));
        }
    }
}
