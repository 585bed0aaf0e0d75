//! Roster Ingest - roster data ingestion tool

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use roster_common::logging::{init_logging, LogConfig, LogLevel};
use roster_ingest::config::{LoaderOptions, DEFAULT_DATABASE_PATH};
use roster_ingest::loader::RecordLoader;
use roster_ingest::schema::SchemaManager;
use roster_ingest::store::Store;
use roster_ingest::{IngestPipeline, PipelineConfig, RecordKind, StoreConfig};
use std::path::{Path, PathBuf};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "roster-ingest")]
#[command(author, version, about = "Roster data ingestion tool")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Destination database file (overrides ROSTER_DATABASE_PATH)
    #[arg(long, global = true)]
    database: Option<PathBuf>,

    /// Staging directory (overrides ROSTER_STAGING_DIR)
    #[arg(long, global = true)]
    staging_dir: Option<PathBuf>,

    /// Archive URL (overrides ROSTER_SOURCE_URL)
    #[arg(long, global = true)]
    source_url: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch, extract, reset the schema and load both record types
    Run {
        /// Show a download progress bar
        #[arg(long)]
        progress: bool,

        /// Print the run report as JSON on success
        #[arg(long)]
        json: bool,
    },

    /// Drop and recreate the destination tables
    Reset,

    /// Load one tabular file into an existing table
    Load {
        /// Record type (individuals or organizations)
        #[arg(short, long)]
        kind: RecordKind,

        /// Path to the tabular file
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Show row counts per table
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    // Environment variables take precedence
    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("roster-ingest")
        .build()
        .merge_env()?;

    let _guard = init_logging(&log_config)?;

    match &cli.command {
        Command::Run { progress, json } => run(&cli, *progress, *json).await?,
        Command::Reset => reset(&cli).await?,
        Command::Load { kind, file } => load(&cli, *kind, file).await?,
        Command::Status => status(&cli).await?,
    }

    Ok(())
}

async fn run(cli: &Cli, progress: bool, json: bool) -> Result<()> {
    let mut config = PipelineConfig::from_env_with_source(cli.source_url.clone())?;
    if let Some(dir) = &cli.staging_dir {
        config = config.with_staging_dir(dir);
    }
    if let Some(path) = &cli.database {
        config = config.with_database_path(path);
    }
    config = config.with_progress(progress);
    config.validate()?;

    let mut pipeline = IngestPipeline::new(config);
    match pipeline.run().await {
        Ok(report) => {
            info!(
                run_id = %report.run_id,
                individuals = report.rows_for(RecordKind::Individual).unwrap_or(0),
                organizations = report.rows_for(RecordKind::Organization).unwrap_or(0),
                "Ingestion complete"
            );
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            }
            Ok(())
        },
        Err(e) => {
            error!(stage = %e.stage, state = %pipeline.state(), "Ingestion failed");
            Err(e.into())
        },
    }
}

async fn reset(cli: &Cli) -> Result<()> {
    let store = open_store(cli).await?;
    let result = SchemaManager::new(store.pool().clone()).reset().await;
    store.close().await;
    result.context("Schema reset failed")?;

    info!("Tables recreated");
    Ok(())
}

async fn load(cli: &Cli, kind: RecordKind, file: &Path) -> Result<()> {
    let store = open_store(cli).await?;
    let loader = RecordLoader::new(store.pool().clone(), LoaderOptions::default());
    let result = loader.load(kind, file).await;
    store.close().await;

    let stats = result.with_context(|| format!("Failed to load {} into {}", file.display(), kind))?;
    info!(table = stats.table, rows = stats.rows, batches = stats.batches, "Load complete");
    Ok(())
}

async fn status(cli: &Cli) -> Result<()> {
    let store = open_store(cli).await?;
    info!(store = %store.path().display(), "Destination store");

    for kind in RecordKind::ALL {
        if store.table_exists(kind).await? {
            let rows = store.count_rows(kind).await?;
            info!(table = kind.table(), rows, "Table");
        } else {
            info!(table = kind.table(), "Table missing (run `reset` or `run`)");
        }
    }

    store.close().await;
    Ok(())
}

async fn open_store(cli: &Cli) -> Result<Store> {
    let path = match &cli.database {
        Some(path) => path.clone(),
        None => std::env::var("ROSTER_DATABASE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_DATABASE_PATH)),
    };

    Store::open(&StoreConfig::new(&path))
        .await
        .with_context(|| format!("Failed to open store {}", path.display()))
}
