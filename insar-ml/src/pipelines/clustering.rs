//! Density clustering of points on position and deformation behaviour

use insar_common::geo::{BBox, Utm};
use insar_common::{PointRecord, Result};
use serde_json::json;
use tracing::info;

use super::dbscan::{cluster_count, dbscan, standardize, NOISE};
use super::{load_points, Dataset};
use crate::models::{ClusteringParams, Metrics, PointResult, ResultMethod};

/// Feature vector: UTM x, UTM y, velocity, seasonal amplitude, coherence
pub type Features = [f64; 5];

pub fn point_features(utm: &Utm, point: &PointRecord) -> Features {
    let xy = utm.project(point.location);
    [
        xy.x,
        xy.y,
        point.velocity.unwrap_or(0.0),
        point.season_amp.unwrap_or(0.0),
        point.coherence.unwrap_or(0.0),
    ]
}

/// DBSCAN labels over standardized features
pub fn cluster_labels(features: &[Features], params: &ClusteringParams) -> Vec<i64> {
    let scaled = standardize(features);
    dbscan(&scaled, params.eps, params.min_samples)
}

/// `"cluster_<n>"` or `"noise"`
pub fn cluster_label(label: i64) -> String {
    if label == NOISE {
        "noise".to_string()
    } else {
        format!("cluster_{label}")
    }
}

/// Validated inputs of a clustering run
#[derive(Debug, Clone, PartialEq)]
pub struct ClusteringConfig {
    pub bbox: BBox,
    pub track: Option<i64>,
    pub params: ClusteringParams,
}

impl ClusteringConfig {
    pub async fn run(&self, dataset: &Dataset<'_>) -> Result<Metrics> {
        let points = load_points(dataset, &self.bbox, self.track).await?;

        let utm = Utm::for_location(self.bbox.center());
        let features: Vec<Features> = points.iter().map(|p| point_features(&utm, p)).collect();
        let labels = cluster_labels(&features, &self.params);

        let results: Vec<PointResult> = points
            .iter()
            .zip(&labels)
            .map(|(point, &label)| {
                let mut result = PointResult::new(point.code.clone(), point.track);
                result.cluster_id = Some(cluster_label(label));
                result.method = Some(ResultMethod::Dbscan);
                result.meta = json!({ "method": ResultMethod::Dbscan });
                result
            })
            .collect();

        if !results.is_empty() {
            dataset.results.insert_results(dataset.run_id, &results).await?;
        }

        let clusters = cluster_count(&labels);
        let noise_points = labels.iter().filter(|&&l| l == NOISE).count();
        info!(
            run_id = %dataset.run_id,
            points = points.len(),
            clusters,
            noise_points,
            utm_epsg = utm.epsg(),
            "Clustering complete"
        );

        Ok(Metrics::from([
            ("total_points".to_string(), points.len() as f64),
            ("clusters".to_string(), clusters as f64),
            ("noise_points".to_string(), noise_points as f64),
        ]))
    }
}
