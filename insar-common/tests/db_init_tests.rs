//! Database initialization tests
//!
//! Schema creation must be idempotent and work for both file and memory databases.

use insar_common::db::init::{connect_in_memory, create_schema, init_database};

const TABLES: [&str; 6] = [
    "insar_points",
    "buildings",
    "ml_runs",
    "ml_point_results",
    "ml_run_metrics",
    "ml_building_colors",
];

async fn table_names(pool: &sqlx::SqlitePool) -> Vec<String> {
    sqlx::query_scalar("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
        .fetch_all(pool)
        .await
        .expect("Failed to list tables")
}

#[tokio::test]
async fn test_database_creation_when_missing() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let db_path = dir.path().join("nested").join("insar.db");

    let pool = init_database(&db_path, 2).await;
    assert!(pool.is_ok(), "Database initialization failed: {:?}", pool.err());
    assert!(db_path.exists(), "Database file was not created");

    let names = table_names(&pool.unwrap()).await;
    for table in TABLES {
        assert!(names.iter().any(|n| n == table), "missing table {table}");
    }
}

#[tokio::test]
async fn test_database_opens_existing() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let db_path = dir.path().join("insar.db");

    let first = init_database(&db_path, 2).await.expect("first open");
    first.close().await;

    let second = init_database(&db_path, 2).await;
    assert!(second.is_ok(), "Failed to open existing database: {:?}", second.err());
}

#[tokio::test]
async fn test_schema_creation_is_idempotent() {
    let pool = connect_in_memory().await.expect("in-memory database");
    create_schema(&pool).await.expect("second schema pass");
    create_schema(&pool).await.expect("third schema pass");

    let names = table_names(&pool).await;
    for table in TABLES {
        assert_eq!(names.iter().filter(|n| *n == table).count(), 1);
    }
}

#[tokio::test]
async fn test_run_status_check_constraint() {
    let pool = connect_in_memory().await.expect("in-memory database");

    let result = sqlx::query(
        "INSERT INTO ml_runs (run_id, pipeline, pipeline_version, run_type, status, created_at)
         VALUES ('r1', 'assignment', '0.1.0', 'assignment', 'paused', '2024-01-01T00:00:00Z')",
    )
    .execute(&pool)
    .await;

    assert!(result.is_err(), "unknown status must be rejected");
}
