//! insar-ml - InSAR run engine command line
//!
//! Creates and executes assignment/clustering runs against the local SQLite
//! database and inspects their results.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use insar_common::config::{CliOverrides, Settings};
use insar_common::geo::BBox;
use serde::Serialize;
use serde_json::{Map, Value};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use insar_ml::db::runs::DEFAULT_LIST_LIMIT;
use insar_ml::services::MlflowTracker;
use insar_ml::{RunOrchestrator, RunRequest};

#[derive(Parser, Debug)]
#[command(name = "insar-ml")]
#[command(about = "InSAR point-to-building assignment and clustering runs")]
#[command(version)]
struct Args {
    /// Config file (default: <config_dir>/insar/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// SQLite database path
    #[arg(long, global = true)]
    database: Option<PathBuf>,

    /// MLflow tracking server URI ("off" disables tracking)
    #[arg(long, global = true)]
    tracking_uri: Option<String>,

    /// MLflow experiment name
    #[arg(long, global = true)]
    experiment: Option<String>,

    /// Log level when RUST_LOG is unset
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List available pipelines with their defaults
    Pipelines,

    /// Create a run and execute it
    Run {
        /// Pipeline name (assignment, clustering, hybrid)
        #[arg(long)]
        pipeline: String,

        /// Building source (gba or osm)
        #[arg(long)]
        source: Option<String>,

        /// Restrict to one satellite track
        #[arg(long)]
        track: Option<i64>,

        /// min_lon,min_lat,max_lon,max_lat
        #[arg(long, allow_hyphen_values = true)]
        bbox: Option<String>,

        /// Parameters as a JSON object
        #[arg(long)]
        params: Option<String>,
    },

    /// List runs, newest first
    List {
        #[arg(long, default_value_t = DEFAULT_LIST_LIMIT)]
        limit: i64,
    },

    /// Show one run with its metrics
    Show { run_id: Uuid },

    /// Recompute building colors for a run
    Recolor { run_id: Uuid },

    /// Delete a run and its tracked counterpart
    Delete {
        run_id: Uuid,

        /// Delete from the database even if the tracker delete fails
        #[arg(long)]
        force: bool,
    },

    /// Print stored building colors of a run
    Colors { run_id: Uuid },
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn parse_params(text: Option<&str>) -> Result<Map<String, Value>> {
    match text {
        None => Ok(Map::new()),
        Some(text) => match serde_json::from_str::<Value>(text).context("--params is not valid JSON")? {
            Value::Object(map) => Ok(map),
            _ => anyhow::bail!("--params must be a JSON object"),
        },
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let settings = Settings::resolve(&CliOverrides {
        config: args.config.clone(),
        database: args.database.clone(),
        tracking_uri: args.tracking_uri.clone(),
        experiment: args.experiment.clone(),
        log_level: args.log_level.clone(),
    })?;

    // Logs go to stderr; stdout carries the JSON output
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("insar_ml={0},insar_common={0}", settings.log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    info!("Database: {}", settings.database_path.display());
    let pool = insar_common::db::init_database(&settings.database_path, settings.max_connections).await?;

    let mut orchestrator = RunOrchestrator::with_sqlite_stores(pool);
    if let Some(uri) = &settings.tracking.uri {
        let tracker = MlflowTracker::new(
            uri,
            &settings.tracking.experiment,
            Duration::from_secs(settings.tracking.timeout_secs),
        )?;
        info!(tracking_uri = %uri, experiment = %settings.tracking.experiment, "Experiment tracking enabled");
        orchestrator = orchestrator.with_tracker(Arc::new(tracker));
    }

    match args.command {
        Command::Pipelines => print_json(&orchestrator.pipelines()?)?,
        Command::Run {
            pipeline,
            source,
            track,
            bbox,
            params,
        } => {
            let bbox = bbox.as_deref().map(BBox::parse).transpose()?;
            let request = RunRequest {
                pipeline,
                source,
                track,
                bbox: bbox.map(|b| b.to_array().to_vec()),
                params: parse_params(params.as_deref())?,
            };
            let run = orchestrator.create(request).await?;
            info!(run_id = %run.run_id, "Run created");

            let handle = orchestrator.spawn(run.run_id);
            let outcome = handle.await.context("run task panicked")?;
            let detail = orchestrator.detail(run.run_id).await?;
            print_json(&detail)?;
            outcome?;
        }
        Command::List { limit } => print_json(&orchestrator.list(limit).await?)?,
        Command::Show { run_id } => print_json(&orchestrator.detail(run_id).await?)?,
        Command::Recolor { run_id } => {
            let count = orchestrator.recolor(run_id).await?;
            print_json(&serde_json::json!({ "run_id": run_id, "colored_buildings": count }))?;
        }
        Command::Delete { run_id, force } => print_json(&orchestrator.delete(run_id, force).await?)?,
        Command::Colors { run_id } => {
            let colors: Vec<Value> = orchestrator
                .colors(run_id)
                .await?
                .into_iter()
                .map(|(key, color_index)| {
                    serde_json::json!({
                        "building_source": key.source,
                        "building_id": key.building_id,
                        "color_index": color_index,
                    })
                })
                .collect();
            print_json(&colors)?;
        }
    }

    Ok(())
}
