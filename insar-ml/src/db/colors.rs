//! Building color table

use insar_common::{BuildingKey, BuildingSource, Result};
use sqlx::{Row, SqlitePool};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Upsert colors for one run in a single transaction
pub async fn upsert_colors(
    pool: &SqlitePool,
    run_id: Uuid,
    colors: &BTreeMap<BuildingKey, u32>,
) -> Result<()> {
    let run_id = run_id.to_string();
    let mut tx = pool.begin().await?;

    for (key, color_index) in colors {
        sqlx::query(
            r#"
            INSERT INTO ml_building_colors (run_id, building_source, building_id, color_index)
            VALUES (?, ?, ?, ?)
            ON CONFLICT (run_id, building_source, building_id)
            DO UPDATE SET color_index = excluded.color_index
            "#,
        )
        .bind(&run_id)
        .bind(key.source.as_str())
        .bind(&key.building_id)
        .bind(i64::from(*color_index))
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(())
}

pub async fn load_colors(pool: &SqlitePool, run_id: Uuid) -> Result<BTreeMap<BuildingKey, u32>> {
    let rows = sqlx::query(
        "SELECT building_source, building_id, color_index FROM ml_building_colors WHERE run_id = ?",
    )
    .bind(run_id.to_string())
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| -> Result<(BuildingKey, u32)> {
            let source: String = row.get("building_source");
            let key = BuildingKey::new(source.parse::<BuildingSource>()?, row.get::<String, _>("building_id"));
            Ok((key, row.get::<i64, _>("color_index") as u32))
        })
        .collect()
}
