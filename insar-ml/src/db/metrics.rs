//! Run metrics (one value per name per run)

use insar_common::Result;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::models::Metrics;

/// Insert or replace one metric
pub async fn upsert_metric(pool: &SqlitePool, run_id: Uuid, metric: &str, value: f64) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO ml_run_metrics (run_id, metric, value)
        VALUES (?, ?, ?)
        ON CONFLICT (run_id, metric) DO UPDATE SET value = excluded.value
        "#,
    )
    .bind(run_id.to_string())
    .bind(metric)
    .bind(value)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn load_metrics(pool: &SqlitePool, run_id: Uuid) -> Result<Metrics> {
    let rows = sqlx::query("SELECT metric, value FROM ml_run_metrics WHERE run_id = ?")
        .bind(run_id.to_string())
        .fetch_all(pool)
        .await?;

    Ok(rows
        .iter()
        .map(|row| (row.get::<String, _>("metric"), row.get::<f64, _>("value")))
        .collect())
}
