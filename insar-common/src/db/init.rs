//! Database initialization
//!
//! Opens (or creates) the SQLite database and creates every table idempotently.

use crate::Result;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::path::Path;
use tracing::info;

/// Busy timeout applied to every connection (milliseconds)
pub const BUSY_TIMEOUT_MS: u32 = 5000;

/// Open the database file, creating it and its schema when missing
pub async fn init_database(db_path: &Path, max_connections: u32) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections.max(1))
        .connect(&db_url)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    sqlx::query("PRAGMA foreign_keys = ON").execute(&pool).await?;
    // WAL lets concurrent runs read while one of them writes
    sqlx::query("PRAGMA journal_mode = WAL").execute(&pool).await?;
    sqlx::query(&format!("PRAGMA busy_timeout = {BUSY_TIMEOUT_MS}"))
        .execute(&pool)
        .await?;

    create_schema(&pool).await?;

    Ok(pool)
}

/// Private in-memory database with the full schema
///
/// Limited to one connection: each SQLite memory connection is its own database.
pub async fn connect_in_memory() -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;
    sqlx::query("PRAGMA foreign_keys = ON").execute(&pool).await?;
    create_schema(&pool).await?;
    Ok(pool)
}

/// Create all tables and indexes (safe to call repeatedly)
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    create_points_table(pool).await?;
    create_buildings_table(pool).await?;
    create_runs_table(pool).await?;
    create_point_results_table(pool).await?;
    create_run_metrics_table(pool).await?;
    create_building_colors_table(pool).await?;
    Ok(())
}

async fn create_points_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS insar_points (
            code TEXT NOT NULL,
            track INTEGER NOT NULL,
            lon REAL NOT NULL,
            lat REAL NOT NULL,
            velocity REAL,
            coherence REAL,
            season_amp REAL,
            incidence_angle REAL,
            PRIMARY KEY (code, track)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS insar_points_lon_lat_idx ON insar_points (lon, lat)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_buildings_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS buildings (
            source TEXT NOT NULL CHECK (source IN ('gba', 'osm')),
            building_id TEXT NOT NULL,
            footprint TEXT NOT NULL,
            height_m REAL,
            min_lon REAL NOT NULL,
            min_lat REAL NOT NULL,
            max_lon REAL NOT NULL,
            max_lat REAL NOT NULL,
            PRIMARY KEY (source, building_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_runs_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS ml_runs (
            run_id TEXT PRIMARY KEY,
            pipeline TEXT NOT NULL,
            pipeline_version TEXT NOT NULL,
            run_type TEXT NOT NULL,
            status TEXT NOT NULL
                CHECK (status IN ('queued', 'running', 'succeeded', 'failed')),
            source TEXT,
            track INTEGER,
            bbox TEXT,
            params TEXT NOT NULL DEFAULT '{}',
            created_at TEXT NOT NULL,
            started_at TEXT,
            finished_at TEXT,
            error TEXT,
            tracking_run_id TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS ml_runs_created_idx ON ml_runs (created_at)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_point_results_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS ml_point_results (
            run_id TEXT NOT NULL REFERENCES ml_runs (run_id),
            code TEXT NOT NULL,
            track INTEGER NOT NULL,
            cluster_id TEXT,
            building_source TEXT,
            building_id TEXT,
            distance_m REAL,
            score REAL,
            method TEXT,
            meta TEXT,
            PRIMARY KEY (run_id, code, track)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_run_metrics_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS ml_run_metrics (
            run_id TEXT NOT NULL REFERENCES ml_runs (run_id),
            metric TEXT NOT NULL,
            value REAL NOT NULL,
            PRIMARY KEY (run_id, metric)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_building_colors_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS ml_building_colors (
            run_id TEXT NOT NULL REFERENCES ml_runs (run_id),
            building_source TEXT NOT NULL,
            building_id TEXT NOT NULL,
            color_index INTEGER NOT NULL,
            PRIMARY KEY (run_id, building_source, building_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
