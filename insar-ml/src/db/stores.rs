//! SQLite-backed point, building and result stores

use async_trait::async_trait;
use insar_common::geo::{BBox, Footprint, LonLat};
use insar_common::{BuildingRecord, BuildingSource, Error, PointRecord, Result};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::models::PointResult;
use crate::stores::{BuildingStore, PointStore, ResultSink};

/// Points from the `insar_points` table
#[derive(Debug, Clone)]
pub struct SqlitePointStore {
    pool: SqlitePool,
}

impl SqlitePointStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert or replace points (seeding helper; bulk ETL is external)
    pub async fn insert_points(&self, points: &[PointRecord]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for point in points {
            sqlx::query(
                r#"
                INSERT OR REPLACE INTO insar_points (
                    code, track, lon, lat, velocity, coherence, season_amp, incidence_angle
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&point.code)
            .bind(point.track)
            .bind(point.location.lon)
            .bind(point.location.lat)
            .bind(point.velocity)
            .bind(point.coherence)
            .bind(point.season_amp)
            .bind(point.incidence_angle)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl PointStore for SqlitePointStore {
    async fn query(&self, bbox: &BBox, track: Option<i64>) -> Result<Vec<PointRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT code, track, lon, lat, velocity, coherence, season_amp, incidence_angle
            FROM insar_points
            WHERE lon >= ? AND lon <= ? AND lat >= ? AND lat <= ?
              AND (? IS NULL OR track = ?)
            ORDER BY track, code
            "#,
        )
        .bind(bbox.min_lon)
        .bind(bbox.max_lon)
        .bind(bbox.min_lat)
        .bind(bbox.max_lat)
        .bind(track)
        .bind(track)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| PointRecord {
                code: row.get("code"),
                track: row.get("track"),
                location: LonLat::new(row.get("lon"), row.get("lat")),
                velocity: row.get("velocity"),
                coherence: row.get("coherence"),
                season_amp: row.get("season_amp"),
                incidence_angle: row.get("incidence_angle"),
            })
            .collect())
    }
}

/// Footprints from the `buildings` table
#[derive(Debug, Clone)]
pub struct SqliteBuildingStore {
    pool: SqlitePool,
}

impl SqliteBuildingStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert or replace buildings (seeding helper)
    pub async fn insert_buildings(&self, buildings: &[BuildingRecord]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for building in buildings {
            let envelope = building.footprint.envelope();
            sqlx::query(
                r#"
                INSERT OR REPLACE INTO buildings (
                    source, building_id, footprint, height_m, min_lon, min_lat, max_lon, max_lat
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(building.key.source.as_str())
            .bind(&building.key.building_id)
            .bind(building.footprint.to_geojson().to_string())
            .bind(building.height_m)
            .bind(envelope.min_lon)
            .bind(envelope.min_lat)
            .bind(envelope.max_lon)
            .bind(envelope.max_lat)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl BuildingStore for SqliteBuildingStore {
    async fn query(&self, source: BuildingSource) -> Result<Vec<BuildingRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT building_id, footprint, height_m
            FROM buildings
            WHERE source = ?
            ORDER BY building_id
            "#,
        )
        .bind(source.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<BuildingRecord> {
                let building_id: String = row.get("building_id");
                let footprint: String = row.get("footprint");
                let geometry: serde_json::Value = serde_json::from_str(&footprint)?;
                let footprint = Footprint::from_geojson(&geometry).map_err(|e| {
                    Error::Internal(format!("building {source}:{building_id} has a bad footprint: {e}"))
                })?;
                Ok(BuildingRecord {
                    key: insar_common::BuildingKey::new(source, building_id),
                    footprint,
                    height_m: row.get("height_m"),
                })
            })
            .collect()
    }
}

/// Result rows into `ml_point_results`
#[derive(Debug, Clone)]
pub struct SqliteResultSink {
    pool: SqlitePool,
}

impl SqliteResultSink {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ResultSink for SqliteResultSink {
    async fn insert_results(&self, run_id: Uuid, results: &[PointResult]) -> Result<()> {
        super::results::insert_results(&self.pool, run_id, results).await
    }
}
