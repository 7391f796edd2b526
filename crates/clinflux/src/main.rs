use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use clinflux_core::{
    config::EtlConfig,
    db,
    dimensions::PgDimensionStore,
    job_state::{job_status, PgJobStateStore},
    memory::{MemoryBulkSink, MemoryDimensionStore, MemoryJobStateStore},
    pipeline::PipelineContext,
    queries::{query_measurements, MeasurementFilter},
    runner::{JobRequest, JobRunner},
    sink::PgBulkSink,
};
use comfy_table::Table;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Clinical measurement ETL pipeline", long_about = None)]
struct Cli {
    /// Read configuration from a TOML file instead of the environment
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run database migrations
    Migrate,
    /// Submit a file for processing and wait for the job to finish
    Run(RunArgs),
    /// Show the recorded state of a job
    Status(StatusArgs),
    /// List raw measurements
    Query(QueryArgs),
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Job identifier used as the job-state key
    #[arg(long)]
    job_id: String,
    /// File name, relative to the data directory
    #[arg(long)]
    file: String,
    #[arg(long)]
    study_id: Option<String>,
    /// Overrides the configured data directory
    #[arg(long)]
    data_dir: Option<PathBuf>,
    /// Process against in-memory stores; nothing is written to Postgres
    #[arg(long)]
    dry_run: bool,
}

#[derive(Args, Debug)]
struct StatusArgs {
    job_id: String,
}

#[derive(Args, Debug)]
struct QueryArgs {
    #[arg(long)]
    study_id: Option<String>,
    #[arg(long)]
    participant_id: Option<String>,
    #[arg(long)]
    measurement_type: Option<String>,
    /// Inclusive lower bound (RFC 3339)
    #[arg(long)]
    start: Option<DateTime<Utc>>,
    /// Inclusive upper bound (RFC 3339)
    #[arg(long)]
    end: Option<DateTime<Utc>>,
    #[arg(long, default_value_t = 100)]
    limit: i64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Migrate => {
            let config = load_config(cli.config.as_ref())?;
            let pool = db::connect(&config.database_url, config.max_connections).await?;
            db::run_migrations(&pool).await?;
            info!("Database migrations applied");
            Ok(())
        }
        Command::Run(args) => handle_run(cli.config.as_ref(), args).await,
        Command::Status(args) => {
            let config = load_config(cli.config.as_ref())?;
            let pool = db::connect(&config.database_url, config.max_connections).await?;
            let state = job_status(&PgJobStateStore::new(pool), &args.job_id).await?;
            println!("{}", serde_json::to_string_pretty(&state)?);
            Ok(())
        }
        Command::Query(args) => handle_query(cli.config.as_ref(), args).await,
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<EtlConfig> {
    let config = match path {
        Some(path) => EtlConfig::from_file(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => EtlConfig::from_env()?,
    };
    Ok(config)
}

async fn handle_run(config_path: Option<&PathBuf>, args: RunArgs) -> Result<()> {
    let (ctx, data_dir) = if args.dry_run {
        let data_dir = args
            .data_dir
            .clone()
            .or_else(|| std::env::var("CLINFLUX_DATA_DIR").ok().map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from("./data"));
        let ctx = PipelineContext {
            dimensions: Arc::new(MemoryDimensionStore::new()),
            sink: Arc::new(MemoryBulkSink::new()),
            state: Arc::new(MemoryJobStateStore::new()),
        };
        (ctx, data_dir)
    } else {
        let config = load_config(config_path)?;
        let pool = db::connect(&config.database_url, config.max_connections).await?;
        let ctx = PipelineContext {
            dimensions: Arc::new(PgDimensionStore::new(pool.clone())),
            sink: Arc::new(PgBulkSink::new(pool.clone())),
            state: Arc::new(PgJobStateStore::new(pool)),
        };
        (ctx, args.data_dir.clone().unwrap_or(config.data_dir))
    };

    let runner = JobRunner::new(ctx, data_dir);
    let handle = runner
        .submit(JobRequest {
            job_id: args.job_id,
            filename: args.file,
            study_id: args.study_id,
        })
        .await?;

    let report = handle.await.context("job task panicked")??;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn handle_query(config_path: Option<&PathBuf>, args: QueryArgs) -> Result<()> {
    let config = load_config(config_path)?;
    let pool = db::connect(&config.database_url, config.max_connections).await?;

    let filter = MeasurementFilter {
        study_id: args.study_id,
        participant_id: args.participant_id,
        measurement_type: args.measurement_type,
        start: args.start,
        end: args.end,
        limit: Some(args.limit),
    };
    let measurements = query_measurements(&pool, &filter).await?;

    let mut table = Table::new();
    table.set_header(vec![
        "participant", "type", "value", "unit", "timestamp", "site", "quality",
    ]);
    for m in &measurements {
        table.add_row(vec![
            m.participant_id.clone(),
            m.measurement_type.clone(),
            m.value.clone(),
            m.unit.clone().unwrap_or_default(),
            m.timestamp.to_rfc3339(),
            m.site_id.clone().unwrap_or_default(),
            m.quality_score.map(|q| q.to_string()).unwrap_or_default(),
        ]);
    }
    println!("{table}");
    println!("{} measurements", measurements.len());
    Ok(())
}
