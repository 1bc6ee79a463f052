//! Run lifecycle state machine
//!
//! A run progresses through:
//! QUEUED → RUNNING → SUCCEEDED | FAILED
//!
//! Transitions only move forward; terminal states never change again.

use chrono::{DateTime, Utc};
use insar_common::geo::BBox;
use insar_common::{BuildingSource, Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Run status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// Persisted, not yet picked up
    Queued,
    /// Pipeline executing
    Running,
    /// Results and metrics persisted
    Succeeded,
    /// Pipeline or metric persistence failed; error recorded
    Failed,
}

/// Allowed (from, to) pairs
const TRANSITIONS: [(RunStatus, RunStatus); 3] = [
    (RunStatus::Queued, RunStatus::Running),
    (RunStatus::Running, RunStatus::Succeeded),
    (RunStatus::Running, RunStatus::Failed),
];

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Queued => "queued",
            RunStatus::Running => "running",
            RunStatus::Succeeded => "succeeded",
            RunStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Succeeded | RunStatus::Failed)
    }

    pub fn can_transition_to(&self, next: RunStatus) -> bool {
        TRANSITIONS.contains(&(*self, next))
    }

    /// Checked transition
    pub fn transition_to(self, next: RunStatus) -> Result<RunStatus> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(Error::Internal(format!(
                "illegal run status transition {self} -> {next}"
            )))
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "queued" => Ok(RunStatus::Queued),
            "running" => Ok(RunStatus::Running),
            "succeeded" => Ok(RunStatus::Succeeded),
            "failed" => Ok(RunStatus::Failed),
            other => Err(Error::Internal(format!("unknown run status '{other}'"))),
        }
    }
}

/// Run creation request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunRequest {
    pub pipeline: String,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub track: Option<i64>,
    /// `[minLon, minLat, maxLon, maxLat]`
    #[serde(default)]
    pub bbox: Option<Vec<f64>>,
    #[serde(default)]
    pub params: Map<String, Value>,
}

/// Persisted run record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub run_id: Uuid,
    pub pipeline: String,
    pub pipeline_version: String,
    pub run_type: String,
    pub status: RunStatus,
    pub source: Option<BuildingSource>,
    pub track: Option<i64>,
    pub bbox: Option<BBox>,
    /// Effective parameters (defaults merged with caller overrides)
    pub params: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    /// Run id in the external experiment tracker
    pub tracking_run_id: Option<String>,
}

/// Run plus its metrics
#[derive(Debug, Clone, Serialize)]
pub struct RunDetail {
    #[serde(flatten)]
    pub run: Run,
    pub metrics: BTreeMap<String, f64>,
}

/// Outcome of deleting a run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeleteOutcome {
    pub run_id: Uuid,
    pub db_deleted: bool,
    pub tracking_deleted: bool,
    pub tracking_error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_transitions_allowed() {
        assert!(RunStatus::Queued.can_transition_to(RunStatus::Running));
        assert!(RunStatus::Running.can_transition_to(RunStatus::Succeeded));
        assert!(RunStatus::Running.can_transition_to(RunStatus::Failed));
    }

    #[test]
    fn test_backward_and_skipping_transitions_rejected() {
        use RunStatus::*;
        let all = [Queued, Running, Succeeded, Failed];
        for from in all {
            for to in all {
                let allowed = matches!(
                    (from, to),
                    (Queued, Running) | (Running, Succeeded) | (Running, Failed)
                );
                assert_eq!(from.can_transition_to(to), allowed, "{from} -> {to}");
            }
        }
        assert!(Succeeded.transition_to(Running).is_err());
        assert!(Queued.transition_to(Succeeded).is_err());
    }

    #[test]
    fn test_terminal_states() {
        assert!(!RunStatus::Queued.is_terminal());
        assert!(!RunStatus::Running.is_terminal());
        assert!(RunStatus::Succeeded.is_terminal());
        assert!(RunStatus::Failed.is_terminal());
    }

    #[test]
    fn test_status_round_trips_through_text() {
        for status in [
            RunStatus::Queued,
            RunStatus::Running,
            RunStatus::Succeeded,
            RunStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<RunStatus>().unwrap(), status);
        }
        assert!("paused".parse::<RunStatus>().is_err());
    }

    #[test]
    fn test_request_defaults_optional_fields() {
        let request: RunRequest = serde_json::from_str(r#"{"pipeline": "clustering"}"#).unwrap();
        assert_eq!(request.pipeline, "clustering");
        assert!(request.source.is_none());
        assert!(request.bbox.is_none());
        assert!(request.params.is_empty());
    }
}
