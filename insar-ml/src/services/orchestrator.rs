//! Run orchestration
//!
//! Drives each run through `queued → running → succeeded | failed`:
//! 1. `create` validates the request and persists a queued run
//! 2. `execute` runs the pipeline, persists metrics and colors buildings
//! 3. Any failure in the pipeline or metric persistence marks the run failed
//!    with the error text and is returned to the caller
//!
//! Experiment tracking and building colors are auxiliary: their failures are
//! logged and never change the run's outcome.

use chrono::Utc;
use insar_common::geo::BBox;
use insar_common::{BuildingKey, BuildingSource, Error, Result};
use serde_json::json;
use sqlx::SqlitePool;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::colors::assign_building_colors;
use super::tracking::{param_value, ExperimentTracker, TrackingSession};
use crate::db;
use crate::db::{SqliteBuildingStore, SqlitePointStore, SqliteResultSink};
use crate::models::{DeleteOutcome, Metrics, Run, RunDetail, RunRequest, RunStatus};
use crate::pipelines::{Dataset, Pipeline, PipelineInfo, PipelineRegistry, RunScope};
use crate::stores::{BuildingStore, PointStore, ResultSink};

/// Artifact directory of the run summary in the tracker
const SUMMARY_ARTIFACT_DIR: &str = "summary";

/// Owns the run lifecycle
#[derive(Clone)]
pub struct RunOrchestrator {
    pool: SqlitePool,
    points: Arc<dyn PointStore>,
    buildings: Arc<dyn BuildingStore>,
    results: Arc<dyn ResultSink>,
    tracker: Option<Arc<dyn ExperimentTracker>>,
    registry: PipelineRegistry,
}

impl RunOrchestrator {
    /// Orchestrator over custom point and building stores; results go to `pool`
    pub fn new(pool: SqlitePool, points: Arc<dyn PointStore>, buildings: Arc<dyn BuildingStore>) -> Self {
        let results = Arc::new(SqliteResultSink::new(pool.clone()));
        Self {
            pool,
            points,
            buildings,
            results,
            tracker: None,
            registry: PipelineRegistry::new(),
        }
    }

    /// Orchestrator reading points and buildings from the same database
    pub fn with_sqlite_stores(pool: SqlitePool) -> Self {
        let points = Arc::new(SqlitePointStore::new(pool.clone()));
        let buildings = Arc::new(SqliteBuildingStore::new(pool.clone()));
        Self::new(pool, points, buildings)
    }

    /// Mirror runs into an experiment tracker
    pub fn with_tracker(mut self, tracker: Arc<dyn ExperimentTracker>) -> Self {
        self.tracker = Some(tracker);
        self
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn pipelines(&self) -> Result<Vec<PipelineInfo>> {
        self.registry.list()
    }

    /// Validate a request and persist it as a queued run
    ///
    /// Touches neither the point nor the building store. Nothing is persisted
    /// when validation fails.
    pub async fn create(&self, request: RunRequest) -> Result<Run> {
        let pipeline = self.registry.get(&request.pipeline)?;
        let source = request
            .source
            .as_deref()
            .map(str::parse::<BuildingSource>)
            .transpose()?;
        let bbox = request.bbox.as_deref().map(BBox::from_slice).transpose()?;

        let scope = RunScope {
            source,
            track: request.track,
            bbox,
        };
        let (_, params) = pipeline.configure(&scope, &request.params)?;

        let run = Run {
            run_id: Uuid::new_v4(),
            pipeline: pipeline.name().to_string(),
            pipeline_version: pipeline.version().to_string(),
            run_type: pipeline.run_type().to_string(),
            status: RunStatus::Queued,
            source: pipeline.effective_source(source),
            track: request.track,
            bbox,
            params,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            error: None,
            tracking_run_id: None,
        };
        db::runs::insert_run(&self.pool, &run).await?;

        tracing::info!(run_id = %run.run_id, pipeline = %pipeline, "Run queued");
        Ok(run)
    }

    /// Execute a queued run to completion
    ///
    /// Returns the metrics on success. On failure the run is marked failed
    /// with the error text and [`Error::Execution`] is returned.
    pub async fn execute(&self, run_id: Uuid) -> Result<Metrics> {
        let run = self.load(run_id).await?;
        if run.status != RunStatus::Queued {
            return Err(Error::validation(format!(
                "run {run_id} is {}, only queued runs can be executed",
                run.status
            )));
        }
        if !db::runs::transition_status(&self.pool, run_id, RunStatus::Queued, RunStatus::Running, None).await? {
            return Err(Error::validation(format!(
                "run {run_id} was started by another executor"
            )));
        }
        tracing::info!(run_id = %run_id, pipeline = %run.pipeline, "Run started");

        let session = self.open_tracking(&run).await;
        let outcome = self.run_pipeline(&run, session.as_deref()).await;

        if let Some(session) = &session {
            if let Err(e) = session.end(outcome.is_ok()).await {
                tracing::warn!(run_id = %run_id, error = %e, "Failed to close tracking run");
            }
        }

        let outcome = match outcome {
            Ok(metrics) => {
                db::runs::transition_status(&self.pool, run_id, RunStatus::Running, RunStatus::Succeeded, None)
                    .await
                    .map(|_| metrics)
            }
            Err(e) => Err(e),
        };

        match outcome {
            Ok(metrics) => {
                tracing::info!(run_id = %run_id, metrics = ?metrics, "Run succeeded");
                Ok(metrics)
            }
            Err(e) => {
                let message = match e {
                    Error::Execution(msg) => msg,
                    other => other.to_string(),
                };
                tracing::error!(run_id = %run_id, error = %message, "Run failed");
                if let Err(mark_err) = db::runs::transition_status(
                    &self.pool,
                    run_id,
                    RunStatus::Running,
                    RunStatus::Failed,
                    Some(&message),
                )
                .await
                {
                    tracing::error!(run_id = %run_id, error = %mark_err, "Failed to record run failure");
                }
                Err(Error::Execution(message))
            }
        }
    }

    /// Execute a run as an independent task
    pub fn spawn(&self, run_id: Uuid) -> JoinHandle<Result<Metrics>> {
        let orchestrator = self.clone();
        tokio::spawn(async move {
            tracing::info!(run_id = %run_id, "Background run task started");
            let result = orchestrator.execute(run_id).await;
            match &result {
                Ok(_) => tracing::info!(run_id = %run_id, "Background run task completed successfully"),
                Err(e) => tracing::error!(run_id = %run_id, error = %e, "Background run task failed"),
            }
            result
        })
    }

    /// Recompute building colors of an existing run
    pub async fn recolor(&self, run_id: Uuid) -> Result<usize> {
        self.load(run_id).await?;
        assign_building_colors(&self.pool, self.buildings.as_ref(), run_id).await
    }

    /// Delete a run, its tracked counterpart and everything it produced
    ///
    /// A tracker failure aborts the deletion unless `force` is set.
    pub async fn delete(&self, run_id: Uuid, force: bool) -> Result<DeleteOutcome> {
        let run = self.load(run_id).await?;

        let mut tracking_deleted = false;
        let mut tracking_error = None;
        if let Some(tracking_run_id) = &run.tracking_run_id {
            let attempt = match &self.tracker {
                Some(tracker) => tracker.delete_run(tracking_run_id).await.map_err(|e| e.to_string()),
                None => Err("experiment tracking is not configured".to_string()),
            };
            match attempt {
                Ok(()) => tracking_deleted = true,
                Err(msg) if force => {
                    tracing::warn!(run_id = %run_id, error = %msg, "Tracker delete failed; forcing database delete");
                    tracking_error = Some(msg);
                }
                Err(msg) => return Err(Error::Tracking(format!("tracker delete failed: {msg}"))),
            }
        }

        let db_deleted = db::runs::delete_run_cascade(&self.pool, run_id).await?;
        tracing::info!(run_id = %run_id, tracking_deleted, "Run deleted");

        Ok(DeleteOutcome {
            run_id,
            db_deleted,
            tracking_deleted,
            tracking_error,
        })
    }

    /// Runs newest first
    pub async fn list(&self, limit: i64) -> Result<Vec<Run>> {
        db::runs::list_runs(&self.pool, limit).await
    }

    /// Run with its metrics
    pub async fn detail(&self, run_id: Uuid) -> Result<RunDetail> {
        let run = self.load(run_id).await?;
        let metrics = db::metrics::load_metrics(&self.pool, run_id).await?;
        Ok(RunDetail { run, metrics })
    }

    /// Stored building colors of a run
    pub async fn colors(&self, run_id: Uuid) -> Result<BTreeMap<BuildingKey, u32>> {
        self.load(run_id).await?;
        db::colors::load_colors(&self.pool, run_id).await
    }

    async fn load(&self, run_id: Uuid) -> Result<Run> {
        db::runs::load_run(&self.pool, run_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("run {run_id}")))
    }

    /// Open a tracking session; any failure degrades to no tracking
    async fn open_tracking(&self, run: &Run) -> Option<Box<dyn TrackingSession>> {
        let tracker = self.tracker.as_ref()?;
        match tracker.start_run(&run.run_id.to_string()).await {
            Ok(session) => {
                if let Err(e) = db::runs::set_tracking_run_id(&self.pool, run.run_id, session.run_id()).await {
                    tracing::warn!(run_id = %run.run_id, error = %e, "Failed to store tracking run id");
                }
                Some(session)
            }
            Err(e) => {
                tracing::warn!(run_id = %run.run_id, error = %e, "Experiment tracking disabled for this run");
                None
            }
        }
    }

    /// Pipeline execution plus metric persistence; errors here fail the run
    async fn run_pipeline(&self, run: &Run, session: Option<&dyn TrackingSession>) -> Result<Metrics> {
        let pipeline = self.registry.get(&run.pipeline)?;
        let scope = RunScope {
            source: run.source,
            track: run.track,
            bbox: run.bbox,
        };
        let (config, _) = pipeline.configure(&scope, &run.params)?;

        if let Some(session) = session {
            if let Err(e) = session.log_params(&tracking_params(run, pipeline)).await {
                tracing::warn!(run_id = %run.run_id, error = %e, "Failed to log params to tracker");
            }
        }

        let dataset = Dataset {
            run_id: run.run_id,
            points: self.points.as_ref(),
            buildings: self.buildings.as_ref(),
            results: self.results.as_ref(),
        };
        let metrics = config.run(&dataset).await?;

        for (name, value) in &metrics {
            db::metrics::upsert_metric(&self.pool, run.run_id, name, *value).await?;
        }

        if let Some(session) = session {
            if let Err(e) = session.log_metrics(&metrics).await {
                tracing::warn!(run_id = %run.run_id, error = %e, "Failed to log metrics to tracker");
            }
        }

        if pipeline.assigns_buildings() {
            self.color_buildings(run.run_id, session).await;
        }

        if let Some(session) = session {
            if let Err(e) = upload_summary(session, run, pipeline, &metrics).await {
                tracing::warn!(run_id = %run.run_id, error = %e, "Failed to upload run summary");
            }
        }

        Ok(metrics)
    }

    async fn color_buildings(&self, run_id: Uuid, session: Option<&dyn TrackingSession>) {
        match assign_building_colors(&self.pool, self.buildings.as_ref(), run_id).await {
            Ok(count) => tracing::debug!(run_id = %run_id, buildings = count, "Colored buildings"),
            Err(e) => {
                tracing::warn!(run_id = %run_id, error = %e, "Building coloring failed");
                if let Some(session) = session {
                    let status = BTreeMap::from([("coloring_status".to_string(), "failed".to_string())]);
                    if let Err(e) = session.log_params(&status).await {
                        tracing::warn!(run_id = %run_id, error = %e, "Failed to log coloring status");
                    }
                }
            }
        }
    }
}

/// Flat string params mirrored to the tracker
fn tracking_params(run: &Run, pipeline: Pipeline) -> BTreeMap<String, String> {
    let mut params = BTreeMap::from([
        ("pipeline".to_string(), pipeline.name().to_string()),
        ("pipeline_version".to_string(), pipeline.version().to_string()),
        (
            "source".to_string(),
            run.source.map(|s| s.to_string()).unwrap_or_default(),
        ),
        (
            "track".to_string(),
            run.track.map(|t| t.to_string()).unwrap_or_default(),
        ),
        (
            "bbox".to_string(),
            run.bbox
                .map(|b| {
                    b.to_array()
                        .iter()
                        .map(|v| v.to_string())
                        .collect::<Vec<_>>()
                        .join(",")
                })
                .unwrap_or_default(),
        ),
    ]);
    for (key, value) in &run.params {
        params.insert(key.clone(), param_value(value));
    }
    params
}

/// Write the JSON summary to a scratch directory and upload it
///
/// The scratch directory is removed when this returns, on every path.
async fn upload_summary(
    session: &dyn TrackingSession,
    run: &Run,
    pipeline: Pipeline,
    metrics: &Metrics,
) -> Result<()> {
    let summary = json!({
        "run_id": run.run_id,
        "pipeline": pipeline.name(),
        "version": pipeline.version(),
        "metrics": metrics,
    });
    let scratch = tempfile::tempdir()?;
    let path = scratch.path().join("summary.json");
    tokio::fs::write(&path, serde_json::to_vec_pretty(&summary)?).await?;
    session.log_artifact(&path, SUMMARY_ARTIFACT_DIR).await?;
    Ok(())
}
