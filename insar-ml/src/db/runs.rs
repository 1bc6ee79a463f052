//! Run record persistence
//!
//! Status changes are compare-and-set updates keyed on the expected current
//! status, so two executors can never both move a run forward.

use chrono::{DateTime, SecondsFormat, Utc};
use insar_common::geo::BBox;
use insar_common::{BuildingSource, Error, Result};
use serde_json::{Map, Value};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::models::{Run, RunStatus};
use crate::utils::{retry_on_lock, DEFAULT_MAX_LOCK_WAIT_MS};

/// Default page size for [`list_runs`]
pub const DEFAULT_LIST_LIMIT: i64 = 50;

/// RFC 3339 UTC text with fixed precision; sorts chronologically as text
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(column: &str, text: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Internal(format!("Failed to parse {column}: {e}")))
}

fn parse_optional_timestamp(column: &str, text: Option<String>) -> Result<Option<DateTime<Utc>>> {
    text.map(|s| parse_timestamp(column, &s)).transpose()
}

/// Insert a new run record
pub async fn insert_run(pool: &SqlitePool, run: &Run) -> Result<()> {
    let bbox = run.bbox.map(|b| serde_json::to_string(&b)).transpose()?;
    let params = serde_json::to_string(&run.params)?;

    sqlx::query(
        r#"
        INSERT INTO ml_runs (
            run_id, pipeline, pipeline_version, run_type, status, source, track,
            bbox, params, created_at, started_at, finished_at, error, tracking_run_id
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(run.run_id.to_string())
    .bind(&run.pipeline)
    .bind(&run.pipeline_version)
    .bind(&run.run_type)
    .bind(run.status.as_str())
    .bind(run.source.map(|s| s.as_str()))
    .bind(run.track)
    .bind(bbox)
    .bind(params)
    .bind(format_timestamp(run.created_at))
    .bind(run.started_at.map(format_timestamp))
    .bind(run.finished_at.map(format_timestamp))
    .bind(&run.error)
    .bind(&run.tracking_run_id)
    .execute(pool)
    .await?;

    Ok(())
}

fn run_from_row(row: &SqliteRow) -> Result<Run> {
    let run_id: String = row.get("run_id");
    let run_id = Uuid::parse_str(&run_id)
        .map_err(|e| Error::Internal(format!("Failed to parse run_id '{run_id}': {e}")))?;

    let status: String = row.get("status");
    let source: Option<String> = row.get("source");
    let bbox: Option<String> = row.get("bbox");
    let params: String = row.get("params");
    let created_at: String = row.get("created_at");

    let params: Map<String, Value> = match serde_json::from_str(&params)? {
        Value::Object(map) => map,
        _ => Map::new(),
    };

    Ok(Run {
        run_id,
        pipeline: row.get("pipeline"),
        pipeline_version: row.get("pipeline_version"),
        run_type: row.get("run_type"),
        status: status.parse()?,
        source: source.map(|s| s.parse::<BuildingSource>()).transpose()?,
        track: row.get("track"),
        bbox: bbox.map(|b| serde_json::from_str::<BBox>(&b)).transpose()?,
        params,
        created_at: parse_timestamp("created_at", &created_at)?,
        started_at: parse_optional_timestamp("started_at", row.get("started_at"))?,
        finished_at: parse_optional_timestamp("finished_at", row.get("finished_at"))?,
        error: row.get("error"),
        tracking_run_id: row.get("tracking_run_id"),
    })
}

/// Load one run
pub async fn load_run(pool: &SqlitePool, run_id: Uuid) -> Result<Option<Run>> {
    let row = sqlx::query("SELECT * FROM ml_runs WHERE run_id = ?")
        .bind(run_id.to_string())
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(run_from_row).transpose()
}

/// Runs newest first
pub async fn list_runs(pool: &SqlitePool, limit: i64) -> Result<Vec<Run>> {
    let rows = sqlx::query("SELECT * FROM ml_runs ORDER BY created_at DESC, rowid DESC LIMIT ?")
        .bind(limit.max(0))
        .fetch_all(pool)
        .await?;

    rows.iter().map(run_from_row).collect()
}

/// Move a run from `from` to `to`
///
/// Sets `started_at` when entering `running` and `finished_at` when entering a
/// terminal state. `error` is only written if the column is still NULL.
/// Returns `false` when the run was not in `from` (someone else moved it).
pub async fn transition_status(
    pool: &SqlitePool,
    run_id: Uuid,
    from: RunStatus,
    to: RunStatus,
    error: Option<&str>,
) -> Result<bool> {
    from.transition_to(to)?;

    let now = format_timestamp(Utc::now());
    let started_at = (to == RunStatus::Running).then(|| now.clone());
    let finished_at = to.is_terminal().then(|| now.clone());
    let run_id = run_id.to_string();

    let rows = retry_on_lock("transition_status", DEFAULT_MAX_LOCK_WAIT_MS, || async {
        let result = sqlx::query(
            r#"
            UPDATE ml_runs SET
                status = ?,
                started_at = COALESCE(?, started_at),
                finished_at = COALESCE(?, finished_at),
                error = COALESCE(error, ?)
            WHERE run_id = ? AND status = ?
            "#,
        )
        .bind(to.as_str())
        .bind(&started_at)
        .bind(&finished_at)
        .bind(error)
        .bind(&run_id)
        .bind(from.as_str())
        .execute(pool)
        .await?;
        Ok::<u64, Error>(result.rows_affected())
    })
    .await?;

    Ok(rows == 1)
}

/// Record the external tracker's run id
pub async fn set_tracking_run_id(pool: &SqlitePool, run_id: Uuid, tracking_run_id: &str) -> Result<()> {
    sqlx::query("UPDATE ml_runs SET tracking_run_id = ? WHERE run_id = ?")
        .bind(tracking_run_id)
        .bind(run_id.to_string())
        .execute(pool)
        .await?;
    Ok(())
}

/// Delete a run together with its results, metrics and colors
///
/// Returns `false` when no run row existed.
pub async fn delete_run_cascade(pool: &SqlitePool, run_id: Uuid) -> Result<bool> {
    let run_id = run_id.to_string();
    let mut tx = pool.begin().await?;

    for table in ["ml_point_results", "ml_run_metrics", "ml_building_colors"] {
        sqlx::query(&format!("DELETE FROM {table} WHERE run_id = ?"))
            .bind(&run_id)
            .execute(&mut *tx)
            .await?;
    }
    let deleted = sqlx::query("DELETE FROM ml_runs WHERE run_id = ?")
        .bind(&run_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

    tx.commit().await?;
    Ok(deleted == 1)
}
