//! Per-point result rows

use insar_common::{BuildingKey, BuildingSource, Error, Result};
use serde_json::Value;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::models::{PointResult, ResultMethod};
use crate::utils::{retry_on_lock, DEFAULT_MAX_LOCK_WAIT_MS};

/// Insert every row of one run in a single transaction
pub async fn insert_results(pool: &SqlitePool, run_id: Uuid, results: &[PointResult]) -> Result<()> {
    let run_id = run_id.to_string();
    // Serialize before touching the pool
    let metas: Vec<Option<String>> = results
        .iter()
        .map(|r| match &r.meta {
            Value::Null => Ok(None),
            meta => serde_json::to_string(meta).map(Some),
        })
        .collect::<std::result::Result<_, _>>()?;

    retry_on_lock("insert_results", DEFAULT_MAX_LOCK_WAIT_MS, || async {
        let mut tx = pool.begin().await?;

        for (result, meta) in results.iter().zip(&metas) {
            sqlx::query(
                r#"
                INSERT INTO ml_point_results (
                    run_id, code, track, cluster_id, building_source, building_id,
                    distance_m, score, method, meta
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&run_id)
            .bind(&result.code)
            .bind(result.track)
            .bind(&result.cluster_id)
            .bind(result.building_source().map(|s| s.as_str()))
            .bind(result.building.as_ref().map(|b| b.building_id.as_str()))
            .bind(result.distance_m)
            .bind(result.score)
            .bind(result.method.map(|m| m.as_str()))
            .bind(meta)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok::<(), Error>(())
    })
    .await?;

    tracing::debug!(run_id = %run_id, rows = results.len(), "Inserted point results");
    Ok(())
}

/// Distinct buildings referenced by a run's results, ordered by key
pub async fn referenced_buildings(pool: &SqlitePool, run_id: Uuid) -> Result<Vec<BuildingKey>> {
    let rows = sqlx::query(
        r#"
        SELECT DISTINCT building_source, building_id
        FROM ml_point_results
        WHERE run_id = ? AND building_source IS NOT NULL AND building_id IS NOT NULL
        "#,
    )
    .bind(run_id.to_string())
    .fetch_all(pool)
    .await?;

    let mut keys = rows
        .iter()
        .map(|row| -> Result<BuildingKey> {
            let source: String = row.get("building_source");
            let building_id: String = row.get("building_id");
            Ok(BuildingKey::new(source.parse::<BuildingSource>()?, building_id))
        })
        .collect::<Result<Vec<_>>>()?;
    keys.sort();
    Ok(keys)
}

/// All rows of one run, ordered by (track, code)
pub async fn load_results(pool: &SqlitePool, run_id: Uuid) -> Result<Vec<PointResult>> {
    let rows = sqlx::query(
        r#"
        SELECT code, track, cluster_id, building_source, building_id,
               distance_m, score, method, meta
        FROM ml_point_results
        WHERE run_id = ?
        ORDER BY track, code
        "#,
    )
    .bind(run_id.to_string())
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| -> Result<PointResult> {
            let source: Option<String> = row.get("building_source");
            let building_id: Option<String> = row.get("building_id");
            let source = source.map(|s| s.parse::<BuildingSource>()).transpose()?;
            let building = match (source, building_id) {
                (Some(source), Some(id)) => Some(BuildingKey::new(source, id)),
                _ => None,
            };
            let method: Option<String> = row.get("method");
            let meta: Option<String> = row.get("meta");

            Ok(PointResult {
                code: row.get("code"),
                track: row.get("track"),
                cluster_id: row.get("cluster_id"),
                source,
                building,
                distance_m: row.get("distance_m"),
                score: row.get("score"),
                method: method.map(|m| m.parse::<ResultMethod>()).transpose()?,
                meta: match meta {
                    Some(text) => serde_json::from_str(&text)?,
                    None => Value::Null,
                },
            })
        })
        .collect()
}
