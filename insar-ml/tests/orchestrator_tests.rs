//! Integration tests for the run lifecycle
//!
//! Runs execute against an in-memory database seeded through the SQLite
//! stores. Fakes stand in for stores and trackers where a failure has to be
//! injected.

use async_trait::async_trait;
use insar_common::db::connect_in_memory;
use insar_common::geo::{BBox, Footprint, LocalFrame, LonLat};
use insar_common::{BuildingKey, BuildingRecord, BuildingSource, Error, PointRecord, Result};
use insar_ml::db::{SqliteBuildingStore, SqlitePointStore};
use insar_ml::models::ResultMethod;
use insar_ml::services::{palette_start, ExperimentTracker, TrackingError, TrackingSession};
use insar_ml::{BuildingStore, Metrics, PointStore, RunOrchestrator, RunRequest, RunStatus};
use serde_json::{json, Map, Value};
use sqlx::SqlitePool;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

// ============================================================================
// Fixtures
// ============================================================================

fn origin() -> LonLat {
    LonLat::new(16.37, 48.21)
}

fn frame() -> LocalFrame {
    LocalFrame::at(origin())
}

fn study_bbox() -> Vec<f64> {
    vec![16.36, 48.20, 16.40, 48.22]
}

/// 10 m × 10 m square with its south-west corner at (east_m, north_m)
fn square(id: &str, east_m: f64, north_m: f64, height_m: Option<f64>) -> BuildingRecord {
    let f = frame();
    BuildingRecord {
        key: BuildingKey::new(BuildingSource::Gba, id),
        footprint: Footprint::rectangle(f.offset(east_m, north_m), f.offset(east_m + 10.0, north_m + 10.0))
            .unwrap(),
        height_m,
    }
}

fn point(code: &str, east_m: f64, north_m: f64) -> PointRecord {
    PointRecord {
        code: code.to_string(),
        track: 44,
        location: frame().offset(east_m, north_m),
        velocity: Some(-1.5),
        coherence: Some(0.8),
        season_amp: Some(2.0),
        incidence_angle: None,
    }
}

/// Buildings and points of the worked assignment examples
///
/// - `p_buffer` is 4 m from "near" (20 m tall) and 9 m from "far"
/// - `p_nearest` is 25 m from "lone" (no height, buffer ≈ 9.5 m)
/// - `p_lost` has no building within 30 m
fn buildings() -> Vec<BuildingRecord> {
    vec![
        square("near", -14.0, -5.0, Some(20.0)),
        square("far", 9.0, -5.0, Some(20.0)),
        square("lone", 525.0, -5.0, None),
    ]
}

fn points() -> Vec<PointRecord> {
    vec![
        point("p_buffer", 0.0, 0.0),
        point("p_nearest", 500.0, 0.0),
        point("p_lost", 1500.0, 0.0),
    ]
}

async fn seeded_pool() -> SqlitePool {
    let pool = connect_in_memory().await.unwrap();
    SqlitePointStore::new(pool.clone())
        .insert_points(&points())
        .await
        .unwrap();
    SqliteBuildingStore::new(pool.clone())
        .insert_buildings(&buildings())
        .await
        .unwrap();
    pool
}

fn request(pipeline: &str) -> RunRequest {
    RunRequest {
        pipeline: pipeline.to_string(),
        source: None,
        track: None,
        bbox: Some(study_bbox()),
        params: Map::new(),
    }
}

fn params(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap()
}

// ============================================================================
// Fakes
// ============================================================================

struct FailingPoints;

#[async_trait]
impl PointStore for FailingPoints {
    async fn query(&self, _bbox: &BBox, _track: Option<i64>) -> Result<Vec<PointRecord>> {
        Err(Error::Io(std::io::Error::new(
            std::io::ErrorKind::Other,
            "point store offline",
        )))
    }
}

struct StaticPoints(Vec<PointRecord>);

#[async_trait]
impl PointStore for StaticPoints {
    async fn query(&self, bbox: &BBox, _track: Option<i64>) -> Result<Vec<PointRecord>> {
        Ok(self.0.iter().filter(|p| bbox.contains(p.location)).cloned().collect())
    }
}

/// Serves buildings once, then fails
struct FlakyBuildings {
    buildings: Vec<BuildingRecord>,
    calls: AtomicUsize,
}

#[async_trait]
impl BuildingStore for FlakyBuildings {
    async fn query(&self, source: BuildingSource) -> Result<Vec<BuildingRecord>> {
        if self.calls.fetch_add(1, Ordering::SeqCst) > 0 {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "building store offline",
            )));
        }
        Ok(self
            .buildings
            .iter()
            .filter(|b| b.key.source == source)
            .cloned()
            .collect())
    }
}

/// Serves every building first, then forgets the listed ids
struct ShrinkingBuildings {
    buildings: Vec<BuildingRecord>,
    forget: Vec<&'static str>,
    calls: AtomicUsize,
}

#[async_trait]
impl BuildingStore for ShrinkingBuildings {
    async fn query(&self, source: BuildingSource) -> Result<Vec<BuildingRecord>> {
        let first = self.calls.fetch_add(1, Ordering::SeqCst) == 0;
        Ok(self
            .buildings
            .iter()
            .filter(|b| b.key.source == source)
            .filter(|b| first || !self.forget.contains(&b.key.building_id.as_str()))
            .cloned()
            .collect())
    }
}

struct UnreachableTracker;

#[async_trait]
impl ExperimentTracker for UnreachableTracker {
    async fn start_run(&self, _run_name: &str) -> std::result::Result<Box<dyn TrackingSession>, TrackingError> {
        Err(TrackingError::Network("connection refused".to_string()))
    }

    async fn delete_run(&self, _tracking_run_id: &str) -> std::result::Result<(), TrackingError> {
        Err(TrackingError::Network("connection refused".to_string()))
    }
}

#[derive(Default)]
struct Recorded {
    params: BTreeMap<String, String>,
    metrics: Metrics,
    artifacts: Vec<String>,
    ended: Option<bool>,
    deleted: Vec<String>,
}

/// In-memory tracker recording everything it receives
#[derive(Default)]
struct RecordingTracker {
    recorded: Arc<Mutex<Recorded>>,
    fail_delete: bool,
}

struct RecordingSession {
    run_id: String,
    recorded: Arc<Mutex<Recorded>>,
}

#[async_trait]
impl ExperimentTracker for RecordingTracker {
    async fn start_run(&self, _run_name: &str) -> std::result::Result<Box<dyn TrackingSession>, TrackingError> {
        Ok(Box::new(RecordingSession {
            run_id: "tracked-1".to_string(),
            recorded: self.recorded.clone(),
        }))
    }

    async fn delete_run(&self, tracking_run_id: &str) -> std::result::Result<(), TrackingError> {
        if self.fail_delete {
            return Err(TrackingError::Api(503, "unavailable".to_string()));
        }
        self.recorded.lock().unwrap().deleted.push(tracking_run_id.to_string());
        Ok(())
    }
}

#[async_trait]
impl TrackingSession for RecordingSession {
    fn run_id(&self) -> &str {
        &self.run_id
    }

    async fn log_params(&self, params: &BTreeMap<String, String>) -> std::result::Result<(), TrackingError> {
        self.recorded.lock().unwrap().params.extend(params.clone());
        Ok(())
    }

    async fn log_metrics(&self, metrics: &Metrics) -> std::result::Result<(), TrackingError> {
        self.recorded.lock().unwrap().metrics.extend(metrics.clone());
        Ok(())
    }

    async fn log_artifact(&self, local_path: &Path, artifact_dir: &str) -> std::result::Result<(), TrackingError> {
        assert!(local_path.exists(), "artifact must exist while uploading");
        let name = local_path.file_name().unwrap().to_string_lossy();
        self.recorded
            .lock()
            .unwrap()
            .artifacts
            .push(format!("{artifact_dir}/{name}"));
        Ok(())
    }

    async fn end(&self, succeeded: bool) -> std::result::Result<(), TrackingError> {
        self.recorded.lock().unwrap().ended = Some(succeeded);
        Ok(())
    }
}

// ============================================================================
// Lifecycle
// ============================================================================

#[tokio::test]
async fn test_assignment_run_succeeds_with_metrics_and_colors() {
    let pool = seeded_pool().await;
    let orchestrator = RunOrchestrator::with_sqlite_stores(pool.clone());

    let run = orchestrator.create(request("assignment")).await.unwrap();
    assert_eq!(run.status, RunStatus::Queued);
    assert_eq!(run.source, Some(BuildingSource::Gba));
    assert_eq!(run.run_type, "assignment");

    let metrics = orchestrator.execute(run.run_id).await.unwrap();
    assert_eq!(metrics["total_points"], 3.0);
    assert_eq!(metrics["assigned_points"], 2.0);
    assert_eq!(metrics["buffer_matches"], 1.0);
    assert_eq!(metrics["nearest_matches"], 1.0);

    let detail = orchestrator.detail(run.run_id).await.unwrap();
    assert_eq!(detail.run.status, RunStatus::Succeeded);
    assert!(detail.run.started_at.is_some());
    assert!(detail.run.finished_at.is_some());
    assert!(detail.run.error.is_none());
    assert_eq!(detail.metrics, metrics);

    let results = insar_ml::db::results::load_results(&pool, run.run_id).await.unwrap();
    let by_code: BTreeMap<&str, _> = results.iter().map(|r| (r.code.as_str(), r)).collect();

    let buffered = by_code["p_buffer"];
    assert_eq!(buffered.building.as_ref().unwrap().building_id, "near");
    assert_eq!(buffered.method, Some(ResultMethod::Buffer));
    assert!((buffered.distance_m.unwrap() - 4.0).abs() < 0.05);
    assert!((buffered.score.unwrap() - 0.2).abs() < 0.002);
    assert!(buffered.cluster_id.is_none());
    assert_eq!(buffered.meta["method"], "buffer");

    let nearest = by_code["p_nearest"];
    assert_eq!(nearest.building.as_ref().unwrap().building_id, "lone");
    assert_eq!(nearest.method, Some(ResultMethod::Nearest));
    assert!((nearest.distance_m.unwrap() - 25.0).abs() < 0.05);

    let lost = by_code["p_lost"];
    assert!(lost.building.is_none());
    assert_eq!(lost.source, Some(BuildingSource::Gba));
    assert!(lost.distance_m.is_none());
    assert!(lost.score.is_none());
    assert_eq!(lost.method, Some(ResultMethod::Unassigned));

    // Only referenced buildings are colored; both are isolated
    let colors = orchestrator.colors(run.run_id).await.unwrap();
    let near = BuildingKey::new(BuildingSource::Gba, "near");
    let lone = BuildingKey::new(BuildingSource::Gba, "lone");
    assert_eq!(colors.len(), 2);
    assert_eq!(colors[&near], palette_start(&near));
    assert_eq!(colors[&lone], palette_start(&lone));
}

#[tokio::test]
async fn test_clustering_run_labels_every_point() {
    let pool = seeded_pool().await;
    let orchestrator = RunOrchestrator::with_sqlite_stores(pool.clone());

    let mut req = request("clustering");
    req.params = params(json!({"eps": 0.5, "min_samples": 1}));
    let run = orchestrator.create(req).await.unwrap();
    assert!(run.source.is_none());

    let metrics = orchestrator.execute(run.run_id).await.unwrap();
    assert_eq!(metrics["total_points"], 3.0);
    assert_eq!(metrics["noise_points"], 0.0);

    let results = insar_ml::db::results::load_results(&pool, run.run_id).await.unwrap();
    assert_eq!(results.len(), 3);
    for row in &results {
        assert!(row.cluster_id.as_deref().unwrap().starts_with("cluster_"));
        assert!(row.building.is_none());
        assert!(row.source.is_none());
        assert_eq!(row.method, Some(ResultMethod::Dbscan));
    }

    // Clustering does not assign buildings, so nothing is colored
    assert!(orchestrator.colors(run.run_id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_hybrid_run_sparse_buildings_are_noise() {
    let pool = seeded_pool().await;
    let orchestrator = RunOrchestrator::with_sqlite_stores(pool.clone());

    let run = orchestrator.create(request("hybrid")).await.unwrap();
    let metrics = orchestrator.execute(run.run_id).await.unwrap();
    assert_eq!(metrics["total_points"], 3.0);
    assert_eq!(metrics["assigned_points"], 2.0);
    // One point per building never reaches min_samples
    assert_eq!(metrics["clusters"], 0.0);

    let results = insar_ml::db::results::load_results(&pool, run.run_id).await.unwrap();
    let lost = results.iter().find(|r| r.code == "p_lost").unwrap();
    assert_eq!(lost.cluster_id.as_deref(), Some("unassigned"));
    assert_eq!(lost.meta["method"], "unassigned");
    assert!(lost.building.is_none());
    assert_eq!(lost.source, Some(BuildingSource::Gba));

    let buffered = results.iter().find(|r| r.code == "p_buffer").unwrap();
    assert_eq!(buffered.building.as_ref().unwrap().building_id, "near");
    assert_eq!(buffered.cluster_id.as_deref(), Some("near:noise"));
    assert_eq!(buffered.meta["stage"], "hybrid");
    assert!(buffered.score.is_none());

    assert_eq!(orchestrator.colors(run.run_id).await.unwrap().len(), 2);
}

/// Seven coherent scatterers plus one outlier on each of two buildings
async fn dense_building_pool() -> SqlitePool {
    let pool = connect_in_memory().await.unwrap();
    let mut points = Vec::new();
    for (prefix, east_m) in [("a", 105.0), ("b", 305.0)] {
        for i in 0..7 {
            points.push(point(&format!("{prefix}{i}"), east_m, 0.0));
        }
        let mut outlier = point(&format!("{prefix}_out"), east_m, 0.0);
        outlier.velocity = Some(20.0);
        points.push(outlier);
    }
    SqlitePointStore::new(pool.clone())
        .insert_points(&points)
        .await
        .unwrap();
    SqliteBuildingStore::new(pool.clone())
        .insert_buildings(&[
            square("block_a", 100.0, -5.0, Some(20.0)),
            square("block_b", 300.0, -5.0, Some(20.0)),
        ])
        .await
        .unwrap();
    pool
}

#[tokio::test]
async fn test_hybrid_run_clusters_within_buildings() {
    let pool = dense_building_pool().await;
    let orchestrator = RunOrchestrator::with_sqlite_stores(pool.clone());

    let run = orchestrator.create(request("hybrid")).await.unwrap();
    let metrics = orchestrator.execute(run.run_id).await.unwrap();
    assert_eq!(metrics["total_points"], 16.0);
    assert_eq!(metrics["assigned_points"], 16.0);
    // One cluster per building, summed across buildings
    assert_eq!(metrics["clusters"], 2.0);

    let results = insar_ml::db::results::load_results(&pool, run.run_id).await.unwrap();
    assert_eq!(results.len(), 16);
    for row in &results {
        let building = row.building.as_ref().unwrap();
        let expected = match (row.code.as_str(), building.building_id.as_str()) {
            ("a_out", "block_a") => "block_a:noise",
            ("b_out", "block_b") => "block_b:noise",
            (code, "block_a") if code.starts_with('a') => "block_a:cluster_0",
            (code, "block_b") if code.starts_with('b') => "block_b:cluster_0",
            (code, id) => panic!("{code} assigned to unexpected building {id}"),
        };
        assert_eq!(row.cluster_id.as_deref(), Some(expected), "{}", row.code);
        assert_eq!(row.method, Some(ResultMethod::Buffer));
        assert_eq!(row.distance_m, Some(0.0));
    }
}

#[tokio::test]
async fn test_spawned_run_completes() {
    let pool = seeded_pool().await;
    let orchestrator = RunOrchestrator::with_sqlite_stores(pool);

    let run = orchestrator.create(request("assignment")).await.unwrap();
    let metrics = orchestrator.spawn(run.run_id).await.unwrap().unwrap();
    assert_eq!(metrics["assigned_points"], 2.0);

    let detail = orchestrator.detail(run.run_id).await.unwrap();
    assert_eq!(detail.run.status, RunStatus::Succeeded);
}

#[tokio::test]
async fn test_finished_run_cannot_execute_again() {
    let pool = seeded_pool().await;
    let orchestrator = RunOrchestrator::with_sqlite_stores(pool);

    let run = orchestrator.create(request("assignment")).await.unwrap();
    orchestrator.execute(run.run_id).await.unwrap();

    let err = orchestrator.execute(run.run_id).await.unwrap_err();
    assert!(err.is_validation());
    let detail = orchestrator.detail(run.run_id).await.unwrap();
    assert_eq!(detail.run.status, RunStatus::Succeeded);
}

#[tokio::test]
async fn test_track_filter_limits_points() {
    let pool = seeded_pool().await;
    let orchestrator = RunOrchestrator::with_sqlite_stores(pool);

    let mut req = request("assignment");
    req.track = Some(99);
    let run = orchestrator.create(req).await.unwrap();
    let metrics = orchestrator.execute(run.run_id).await.unwrap();
    assert_eq!(metrics["total_points"], 0.0);
    assert_eq!(metrics["assigned_points"], 0.0);
}

// ============================================================================
// Validation
// ============================================================================

#[tokio::test]
async fn test_missing_bbox_rejected_without_record() {
    let pool = seeded_pool().await;
    let orchestrator = RunOrchestrator::with_sqlite_stores(pool);

    let mut req = request("assignment");
    req.bbox = None;
    let err = orchestrator.create(req).await.unwrap_err();
    assert!(err.is_validation());
    assert!(orchestrator.list(10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_unknown_pipeline_and_source_rejected() {
    let pool = seeded_pool().await;
    let orchestrator = RunOrchestrator::with_sqlite_stores(pool);

    assert!(orchestrator.create(request("kmeans")).await.unwrap_err().is_validation());

    let mut req = request("assignment");
    req.source = Some("bing".to_string());
    assert!(orchestrator.create(req).await.unwrap_err().is_validation());

    let mut req = request("assignment");
    req.bbox = Some(vec![16.4, 48.2, 16.3, 48.3]);
    assert!(orchestrator.create(req).await.unwrap_err().is_validation());

    assert!(orchestrator.list(10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_params_merged_over_defaults() {
    let pool = seeded_pool().await;
    let orchestrator = RunOrchestrator::with_sqlite_stores(pool);

    let mut req = request("assignment");
    req.source = Some("osm".to_string());
    req.params = params(json!({"max_distance_m": 50.0, "colour": "red"}));
    let run = orchestrator.create(req).await.unwrap();

    assert_eq!(run.source, Some(BuildingSource::Osm));
    assert_eq!(run.params["max_distance_m"], json!(50.0));
    assert_eq!(run.params["min_buffer_m"], json!(3.0));
    assert!(!run.params.contains_key("colour"));

    let mut bad = request("clustering");
    bad.params = params(json!({"min_samples": "eight"}));
    assert!(orchestrator.create(bad).await.unwrap_err().is_validation());
}

// ============================================================================
// Failure handling
// ============================================================================

#[tokio::test]
async fn test_pipeline_failure_marks_run_failed() {
    let pool = connect_in_memory().await.unwrap();
    let orchestrator = RunOrchestrator::new(
        pool.clone(),
        Arc::new(FailingPoints),
        Arc::new(SqliteBuildingStore::new(pool.clone())),
    );

    let run = orchestrator.create(request("assignment")).await.unwrap();
    let err = orchestrator.execute(run.run_id).await.unwrap_err();
    assert!(matches!(err, Error::Execution(ref msg) if msg.contains("point store offline")));

    let detail = orchestrator.detail(run.run_id).await.unwrap();
    assert_eq!(detail.run.status, RunStatus::Failed);
    assert!(detail.run.error.unwrap().contains("point store offline"));
    assert!(detail.run.finished_at.is_some());
    assert!(detail.metrics.is_empty());
}

#[tokio::test]
async fn test_unreachable_tracker_does_not_fail_run() {
    let pool = seeded_pool().await;
    let orchestrator =
        RunOrchestrator::with_sqlite_stores(pool).with_tracker(Arc::new(UnreachableTracker));

    let run = orchestrator.create(request("assignment")).await.unwrap();
    orchestrator.execute(run.run_id).await.unwrap();

    let detail = orchestrator.detail(run.run_id).await.unwrap();
    assert_eq!(detail.run.status, RunStatus::Succeeded);
    assert!(detail.run.tracking_run_id.is_none());
}

#[tokio::test]
async fn test_coloring_failure_is_isolated() {
    let pool = connect_in_memory().await.unwrap();
    let buildings = Arc::new(FlakyBuildings {
        buildings: buildings(),
        calls: AtomicUsize::new(0),
    });
    let recorder = Arc::new(RecordingTracker::default());
    let orchestrator = RunOrchestrator::new(pool.clone(), Arc::new(StaticPoints(points())), buildings)
        .with_tracker(recorder.clone());

    let run = orchestrator.create(request("assignment")).await.unwrap();
    let metrics = orchestrator.execute(run.run_id).await.unwrap();
    assert_eq!(metrics["assigned_points"], 2.0);

    let detail = orchestrator.detail(run.run_id).await.unwrap();
    assert_eq!(detail.run.status, RunStatus::Succeeded);
    assert!(orchestrator.colors(run.run_id).await.unwrap().is_empty());
    assert_eq!(
        insar_ml::db::results::load_results(&pool, run.run_id).await.unwrap().len(),
        3
    );

    let recorded = recorder.recorded.lock().unwrap();
    assert_eq!(recorded.params.get("coloring_status").map(String::as_str), Some("failed"));
    assert_eq!(recorded.ended, Some(true));
}

#[tokio::test]
async fn test_buildings_without_footprint_are_not_colored() {
    let pool = connect_in_memory().await.unwrap();
    let buildings = Arc::new(ShrinkingBuildings {
        buildings: buildings(),
        forget: vec!["lone"],
        calls: AtomicUsize::new(0),
    });
    let orchestrator = RunOrchestrator::new(pool.clone(), Arc::new(StaticPoints(points())), buildings);

    let run = orchestrator.create(request("assignment")).await.unwrap();
    orchestrator.execute(run.run_id).await.unwrap();

    // "lone" is still referenced by a result row but has no footprint any more
    let results = insar_ml::db::results::load_results(&pool, run.run_id).await.unwrap();
    assert!(results
        .iter()
        .any(|r| r.building.as_ref().map(|b| b.building_id.as_str()) == Some("lone")));

    let colors = orchestrator.colors(run.run_id).await.unwrap();
    let near = BuildingKey::new(BuildingSource::Gba, "near");
    assert_eq!(colors.keys().cloned().collect::<Vec<_>>(), vec![near]);
    assert_eq!(orchestrator.recolor(run.run_id).await.unwrap(), 1);
}

// ============================================================================
// Tracking
// ============================================================================

#[tokio::test]
async fn test_tracker_receives_params_metrics_and_summary() {
    let pool = seeded_pool().await;
    let recorder = Arc::new(RecordingTracker::default());
    let orchestrator = RunOrchestrator::with_sqlite_stores(pool).with_tracker(recorder.clone());

    let run = orchestrator.create(request("assignment")).await.unwrap();
    orchestrator.execute(run.run_id).await.unwrap();

    let detail = orchestrator.detail(run.run_id).await.unwrap();
    assert_eq!(detail.run.tracking_run_id.as_deref(), Some("tracked-1"));

    let recorded = recorder.recorded.lock().unwrap();
    assert_eq!(recorded.params["pipeline"], "assignment");
    assert_eq!(recorded.params["source"], "gba");
    assert_eq!(recorded.params["max_distance_m"], "30.0");
    assert_eq!(recorded.metrics["assigned_points"], 2.0);
    assert_eq!(recorded.artifacts, vec!["summary/summary.json".to_string()]);
    assert_eq!(recorded.ended, Some(true));
}

#[tokio::test]
async fn test_failed_run_ends_tracking_as_failed() {
    let pool = connect_in_memory().await.unwrap();
    let recorder = Arc::new(RecordingTracker::default());
    let orchestrator = RunOrchestrator::new(
        pool.clone(),
        Arc::new(FailingPoints),
        Arc::new(SqliteBuildingStore::new(pool)),
    )
    .with_tracker(recorder.clone());

    let run = orchestrator.create(request("clustering")).await.unwrap();
    assert!(orchestrator.execute(run.run_id).await.is_err());

    let recorded = recorder.recorded.lock().unwrap();
    assert_eq!(recorded.ended, Some(false));
    assert!(recorded.artifacts.is_empty());
}

// ============================================================================
// Maintenance
// ============================================================================

#[tokio::test]
async fn test_recolor_is_idempotent() {
    let pool = seeded_pool().await;
    let orchestrator = RunOrchestrator::with_sqlite_stores(pool);

    let run = orchestrator.create(request("assignment")).await.unwrap();
    orchestrator.execute(run.run_id).await.unwrap();
    let before = orchestrator.colors(run.run_id).await.unwrap();

    assert_eq!(orchestrator.recolor(run.run_id).await.unwrap(), 2);
    assert_eq!(orchestrator.recolor(run.run_id).await.unwrap(), 2);
    assert_eq!(orchestrator.colors(run.run_id).await.unwrap(), before);
}

#[tokio::test]
async fn test_unknown_run_is_not_found() {
    let pool = seeded_pool().await;
    let orchestrator = RunOrchestrator::with_sqlite_stores(pool);
    let missing = uuid::Uuid::new_v4();

    assert!(matches!(orchestrator.detail(missing).await, Err(Error::NotFound(_))));
    assert!(matches!(orchestrator.recolor(missing).await, Err(Error::NotFound(_))));
    assert!(matches!(orchestrator.delete(missing, true).await, Err(Error::NotFound(_))));
}

#[tokio::test]
async fn test_delete_removes_run_and_outputs() {
    let pool = seeded_pool().await;
    let recorder = Arc::new(RecordingTracker::default());
    let orchestrator = RunOrchestrator::with_sqlite_stores(pool.clone()).with_tracker(recorder.clone());

    let run = orchestrator.create(request("assignment")).await.unwrap();
    orchestrator.execute(run.run_id).await.unwrap();

    let outcome = orchestrator.delete(run.run_id, false).await.unwrap();
    assert!(outcome.db_deleted);
    assert!(outcome.tracking_deleted);
    assert!(outcome.tracking_error.is_none());
    assert_eq!(recorder.recorded.lock().unwrap().deleted, vec!["tracked-1".to_string()]);

    assert!(matches!(orchestrator.detail(run.run_id).await, Err(Error::NotFound(_))));
    assert!(insar_ml::db::results::load_results(&pool, run.run_id).await.unwrap().is_empty());
    assert!(insar_ml::db::colors::load_colors(&pool, run.run_id).await.unwrap().is_empty());
    assert!(insar_ml::db::metrics::load_metrics(&pool, run.run_id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_delete_tracker_failure_requires_force() {
    let pool = seeded_pool().await;
    let tracker = Arc::new(RecordingTracker {
        fail_delete: true,
        ..RecordingTracker::default()
    });
    let orchestrator = RunOrchestrator::with_sqlite_stores(pool).with_tracker(tracker);

    let run = orchestrator.create(request("assignment")).await.unwrap();
    orchestrator.execute(run.run_id).await.unwrap();

    let err = orchestrator.delete(run.run_id, false).await.unwrap_err();
    assert!(matches!(err, Error::Tracking(_)));
    assert!(orchestrator.detail(run.run_id).await.is_ok());

    let outcome = orchestrator.delete(run.run_id, true).await.unwrap();
    assert!(outcome.db_deleted);
    assert!(!outcome.tracking_deleted);
    assert!(outcome.tracking_error.unwrap().contains("503"));
    assert!(orchestrator.detail(run.run_id).await.is_err());
}

#[tokio::test]
async fn test_delete_untracked_run_skips_tracker() {
    let pool = seeded_pool().await;
    let orchestrator = RunOrchestrator::with_sqlite_stores(pool);

    let run = orchestrator.create(request("clustering")).await.unwrap();
    let outcome = orchestrator.delete(run.run_id, false).await.unwrap();
    assert!(outcome.db_deleted);
    assert!(!outcome.tracking_deleted);
    assert!(outcome.tracking_error.is_none());
}

#[tokio::test]
async fn test_list_newest_first_with_limit() {
    let pool = seeded_pool().await;
    let orchestrator = RunOrchestrator::with_sqlite_stores(pool);

    let first = orchestrator.create(request("assignment")).await.unwrap();
    let second = orchestrator.create(request("clustering")).await.unwrap();
    let third = orchestrator.create(request("hybrid")).await.unwrap();

    let runs = orchestrator.list(10).await.unwrap();
    let ids: Vec<_> = runs.iter().map(|r| r.run_id).collect();
    assert_eq!(ids, vec![third.run_id, second.run_id, first.run_id]);

    let limited = orchestrator.list(2).await.unwrap();
    assert_eq!(limited.len(), 2);
    assert_eq!(limited[0].run_id, third.run_id);
}

#[tokio::test]
async fn test_pipelines_listed_with_defaults() {
    let pool = connect_in_memory().await.unwrap();
    let orchestrator = RunOrchestrator::with_sqlite_stores(pool);

    let pipelines = orchestrator.pipelines().unwrap();
    let names: Vec<&str> = pipelines.iter().map(|p| p.name).collect();
    assert_eq!(names, vec!["assignment", "clustering", "hybrid"]);
}
