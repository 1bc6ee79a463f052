//! Experiment tracking
//!
//! Every run may mirror its parameters, metrics and a JSON summary into an
//! external tracker. [`MlflowTracker`] talks to an MLflow tracking server over
//! its REST API. The orchestrator treats every [`TrackingError`] as degraded
//! mode: it is logged and the run carries on.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::OnceCell;

use crate::models::Metrics;

const USER_AGENT: &str = concat!("insar-ml/", env!("CARGO_PKG_VERSION"));

/// MLflow accepts at most 100 params per log-batch call
const PARAMS_PER_BATCH: usize = 100;

/// MLflow param values are capped at 6000 characters
const MAX_PARAM_LEN: usize = 6000;

/// Tracker client errors
#[derive(Debug, Error)]
pub enum TrackingError {
    /// Network communication error
    #[error("Network error: {0}")]
    Network(String),

    /// Tracker returned an error response
    #[error("API error {0}: {1}")]
    Api(u16, String),

    /// Failed to parse a tracker response
    #[error("Parse error: {0}")]
    Parse(String),

    /// Reading a local artifact failed
    #[error("Artifact error: {0}")]
    Artifact(String),
}

impl From<TrackingError> for insar_common::Error {
    fn from(err: TrackingError) -> Self {
        insar_common::Error::Tracking(err.to_string())
    }
}

/// Creates and deletes tracked runs
#[async_trait]
pub trait ExperimentTracker: Send + Sync {
    /// Open a tracked run named after the engine's run id
    async fn start_run(&self, run_name: &str) -> Result<Box<dyn TrackingSession>, TrackingError>;

    /// Delete a tracked run by the tracker's id
    async fn delete_run(&self, tracking_run_id: &str) -> Result<(), TrackingError>;
}

/// One open tracked run
#[async_trait]
pub trait TrackingSession: Send + Sync {
    /// Tracker-side run id
    fn run_id(&self) -> &str;

    async fn log_params(&self, params: &BTreeMap<String, String>) -> Result<(), TrackingError>;

    async fn log_metrics(&self, metrics: &Metrics) -> Result<(), TrackingError>;

    /// Upload a local file under `artifact_dir`
    async fn log_artifact(&self, local_path: &Path, artifact_dir: &str) -> Result<(), TrackingError>;

    /// Close the run as finished or failed
    async fn end(&self, succeeded: bool) -> Result<(), TrackingError>;
}

/// Render a JSON parameter value the way it is logged to the tracker
pub fn param_value(value: &Value) -> String {
    let text = match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    text.chars().take(MAX_PARAM_LEN).collect()
}

#[derive(Debug, Clone)]
struct MlflowApi {
    http_client: reqwest::Client,
    base_url: String,
}

impl MlflowApi {
    fn endpoint(&self, path: &str) -> String {
        format!("{}/api/2.0/mlflow/{}", self.base_url, path)
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, TrackingError> {
        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            let error_text = response.text().await.unwrap_or_default();
            Err(TrackingError::Api(status.as_u16(), error_text))
        }
    }

    async fn post(&self, path: &str, body: &Value) -> Result<reqwest::Response, TrackingError> {
        let response = self
            .http_client
            .post(self.endpoint(path))
            .json(body)
            .send()
            .await
            .map_err(|e| TrackingError::Network(e.to_string()))?;
        Self::check(response).await
    }

    async fn post_json<T: for<'de> Deserialize<'de>>(&self, path: &str, body: &Value) -> Result<T, TrackingError> {
        self.post(path, body)
            .await?
            .json()
            .await
            .map_err(|e| TrackingError::Parse(e.to_string()))
    }
}

#[derive(Debug, Deserialize)]
struct ExperimentEnvelope {
    experiment: ExperimentInfo,
}

#[derive(Debug, Deserialize)]
struct ExperimentInfo {
    experiment_id: String,
}

#[derive(Debug, Deserialize)]
struct CreateExperimentResponse {
    experiment_id: String,
}

#[derive(Debug, Deserialize)]
struct CreateRunResponse {
    run: RunEnvelope,
}

#[derive(Debug, Deserialize)]
struct RunEnvelope {
    info: RunInfo,
}

#[derive(Debug, Deserialize)]
struct RunInfo {
    run_id: String,
    #[serde(default)]
    artifact_uri: Option<String>,
}

/// MLflow tracking server client
pub struct MlflowTracker {
    api: MlflowApi,
    experiment_name: String,
    experiment_id: OnceCell<String>,
}

impl MlflowTracker {
    pub fn new(tracking_uri: &str, experiment_name: &str, timeout: Duration) -> Result<Self, TrackingError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| TrackingError::Network(e.to_string()))?;

        Ok(Self {
            api: MlflowApi {
                http_client,
                base_url: tracking_uri.trim_end_matches('/').to_string(),
            },
            experiment_name: experiment_name.to_string(),
            experiment_id: OnceCell::new(),
        })
    }

    pub fn experiment_name(&self) -> &str {
        &self.experiment_name
    }

    /// Look up the experiment by name, creating it when missing (cached)
    async fn experiment_id(&self) -> Result<&str, TrackingError> {
        self.experiment_id
            .get_or_try_init(|| async {
                let response = self
                    .api
                    .http_client
                    .get(self.api.endpoint("experiments/get-by-name"))
                    .query(&[("experiment_name", self.experiment_name.as_str())])
                    .send()
                    .await
                    .map_err(|e| TrackingError::Network(e.to_string()))?;

                if response.status() != reqwest::StatusCode::NOT_FOUND {
                    let found: ExperimentEnvelope = MlflowApi::check(response)
                        .await?
                        .json()
                        .await
                        .map_err(|e| TrackingError::Parse(e.to_string()))?;
                    return Ok::<String, TrackingError>(found.experiment.experiment_id);
                }

                tracing::info!(experiment = %self.experiment_name, "Creating MLflow experiment");
                let created: CreateExperimentResponse = self
                    .api
                    .post_json("experiments/create", &json!({ "name": self.experiment_name }))
                    .await?;
                Ok::<String, TrackingError>(created.experiment_id)
            })
            .await
            .map(String::as_str)
    }
}

#[async_trait]
impl ExperimentTracker for MlflowTracker {
    async fn start_run(&self, run_name: &str) -> Result<Box<dyn TrackingSession>, TrackingError> {
        let experiment_id = self.experiment_id().await?.to_string();
        let created: CreateRunResponse = self
            .api
            .post_json(
                "runs/create",
                &json!({
                    "experiment_id": experiment_id,
                    "run_name": run_name,
                    "start_time": chrono::Utc::now().timestamp_millis(),
                    "tags": [{ "key": "mlflow.runName", "value": run_name }],
                }),
            )
            .await?;

        tracing::debug!(run_name, tracking_run_id = %created.run.info.run_id, "Opened MLflow run");

        Ok(Box::new(MlflowSession {
            api: Arc::new(self.api.clone()),
            run_id: created.run.info.run_id,
            artifact_uri: created.run.info.artifact_uri,
        }))
    }

    async fn delete_run(&self, tracking_run_id: &str) -> Result<(), TrackingError> {
        self.api
            .post("runs/delete", &json!({ "run_id": tracking_run_id }))
            .await?;
        Ok(())
    }
}

/// Open MLflow run
pub struct MlflowSession {
    api: Arc<MlflowApi>,
    run_id: String,
    artifact_uri: Option<String>,
}

/// Relative artifact root for a proxied `mlflow-artifacts:` URI
fn proxied_artifact_root(artifact_uri: &str) -> Option<&str> {
    artifact_uri
        .strip_prefix("mlflow-artifacts:")
        .map(|rest| rest.trim_start_matches('/').trim_end_matches('/'))
}

#[async_trait]
impl TrackingSession for MlflowSession {
    fn run_id(&self) -> &str {
        &self.run_id
    }

    async fn log_params(&self, params: &BTreeMap<String, String>) -> Result<(), TrackingError> {
        let entries: Vec<Value> = params
            .iter()
            .map(|(key, value)| json!({ "key": key, "value": value }))
            .collect();
        for chunk in entries.chunks(PARAMS_PER_BATCH) {
            self.api
                .post("runs/log-batch", &json!({ "run_id": self.run_id, "params": chunk }))
                .await?;
        }
        Ok(())
    }

    async fn log_metrics(&self, metrics: &Metrics) -> Result<(), TrackingError> {
        let timestamp = chrono::Utc::now().timestamp_millis();
        let entries: Vec<Value> = metrics
            .iter()
            .map(|(key, value)| json!({ "key": key, "value": value, "timestamp": timestamp, "step": 0 }))
            .collect();
        self.api
            .post("runs/log-batch", &json!({ "run_id": self.run_id, "metrics": entries }))
            .await?;
        Ok(())
    }

    async fn log_artifact(&self, local_path: &Path, artifact_dir: &str) -> Result<(), TrackingError> {
        let root = self
            .artifact_uri
            .as_deref()
            .and_then(proxied_artifact_root)
            .ok_or_else(|| {
                TrackingError::Artifact(format!(
                    "artifact store {:?} is not served by the tracking server",
                    self.artifact_uri
                ))
            })?;
        let file_name = local_path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| TrackingError::Artifact(format!("bad artifact path {}", local_path.display())))?;
        let body = tokio::fs::read(local_path)
            .await
            .map_err(|e| TrackingError::Artifact(e.to_string()))?;

        let url = format!(
            "{}/api/2.0/mlflow-artifacts/artifacts/{}/{}/{}",
            self.api.base_url, root, artifact_dir, file_name
        );
        let response = self
            .api
            .http_client
            .put(url)
            .body(body)
            .send()
            .await
            .map_err(|e| TrackingError::Network(e.to_string()))?;
        MlflowApi::check(response).await?;
        Ok(())
    }

    async fn end(&self, succeeded: bool) -> Result<(), TrackingError> {
        let status = if succeeded { "FINISHED" } else { "FAILED" };
        self.api
            .post(
                "runs/update",
                &json!({
                    "run_id": self.run_id,
                    "status": status,
                    "end_time": chrono::Utc::now().timestamp_millis(),
                }),
            )
            .await?;
        Ok(())
    }
}
