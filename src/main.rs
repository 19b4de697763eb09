//! CLI entry point for the FCD pipeline.
//!
//! Provides subcommands for ingesting raw probe exports, running the daily
//! analysis over a window, rebuilding derived outputs, querying trip points
//! and publishing artifacts to S3.

use anyhow::{Result, bail};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use fcd_pipeline::analyzers::pipeline::{
    OutputLayout, TRIP_POINTS_FILE, load_fcd_records, rebuild_od_outputs, run_window,
    write_diagram,
};
use fcd_pipeline::analyzers::writetos3::publish_outputs;
use fcd_pipeline::config::{PipelineConfig, StorageBackend};
use fcd_pipeline::fetch::load_source;
use fcd_pipeline::infra::{CsvProbeStore, PgProbeStore};
use fcd_pipeline::ingest::ingest_csv;
use fcd_pipeline::model::{ProbePoint, TripId, VehicleId};
use fcd_pipeline::output::read_records;
use fcd_pipeline::projection::{PointQuery, project, trip_list};
use fcd_pipeline::reference::ReferenceTables;
use fcd_pipeline::services::probe_store::ProbeStore;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use tracing::{error, info};
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

#[derive(Parser)]
#[command(name = "fcd_pipeline")]
#[command(about = "Floating car data ingestion and traffic analysis", long_about = None)]
struct Cli {
    /// Pipeline configuration file
    #[arg(short, long, env = "FCD_CONFIG", default_value = "config.json", global = true)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Normalize a raw probe export and insert it into the store
    Ingest {
        /// Path or URL of the raw CSV (optionally .gz); defaults to input_data.data_name
        #[arg(value_name = "FILE_OR_URL")]
        source: Option<String>,
    },
    /// Run the daily analysis over one day or the whole configured month
    Run {
        /// Single day to analyze (YYYY-MM-DD)
        #[arg(short, long)]
        date: Option<NaiveDate>,
    },
    /// Rebuild the OD matrix and zone ranking from origin_destination.csv
    OdMatrix {
        /// Number of zones in the top matrix (defaults to operation.top_zones)
        #[arg(short = 'k', long)]
        top: Option<usize>,
    },
    /// Fit the fundamental diagram from the per-zone FCD files
    Diagram,
    /// Print the points of a vehicle (and optionally one trip) as GeoJSON
    Points {
        #[arg(long)]
        vehicle_id: VehicleId,

        #[arg(long)]
        trip: Option<TripId>,

        /// Write to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// List the trip ids recorded for a vehicle
    Trips {
        #[arg(long)]
        vehicle_id: VehicleId,
    },
    /// Upload the produced artifacts to S3
    Publish {
        /// S3 bucket name to upload to (e.g., "my-bucket")
        #[arg(long)]
        s3_bucket: String,

        /// Key prefix for uploaded objects
        #[arg(long, default_value = "")]
        prefix: String,

        /// Gzip compress files before uploading
        #[arg(long, default_value_t = false)]
        gzip: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path =
        std::env::var("LOG_FILE_PATH").unwrap_or_else(|_| "logs/fcd_pipeline.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("fcd_pipeline.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, _file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::try_from_env("RUST_LOG").unwrap_or_else(|_| EnvFilter::new("info")));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(
            EnvFilter::try_from_env("RUST_LOG_JSON").unwrap_or_else(|_| EnvFilter::new("debug")),
        );

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let cli = Cli::parse();

    let config = match PipelineConfig::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!(path = %cli.config.display(), error = %e, "Cannot start without a valid configuration");
            return Err(e.into());
        }
    };
    info!(path = %cli.config.display(), "Config file loaded successfully");

    let output_dir = config.output_data.output_dir.clone();

    match cli.command {
        Commands::Ingest { source } => {
            let source = match source {
                Some(source) => source,
                None => match config.raw_input_path() {
                    Some(path) => path.to_string_lossy().into_owned(),
                    None => bail!("no source given and input_data.data_name is not set"),
                },
            };
            let bytes = load_source(&source).await?;
            let store = open_store(&config)?;
            let summary = ingest_csv(
                bytes.as_ref(),
                &config.input_data.columns,
                config.input_data.chunk_size,
                store.as_ref(),
            )
            .await?;
            info!(
                inserted = summary.inserted,
                failed_chunks = summary.failed_chunks,
                dropped = summary.rows.dropped_missing + summary.rows.dropped_malformed,
                "Ingestion finished"
            );
        }
        Commands::Run { date } => {
            let settings = config.analysis_settings()?;
            let refs = ReferenceTables::load(&config)?;
            let days = match date {
                Some(date) => vec![date],
                None => config.table_name()?.days(),
            };
            let store = open_store(&config)?;
            let layout = OutputLayout::new(&output_dir, &config.output_data.output_filename);
            run_window(store.as_ref(), &refs, &settings, &layout, &days).await?;
        }
        Commands::OdMatrix { top } => {
            let top = top.unwrap_or(config.operation.top_zones);
            let ranking = rebuild_od_outputs(&output_dir, top)?;
            for entry in ranking.iter().take(top) {
                info!(
                    rank = entry.rank,
                    zone_id = entry.zone_id,
                    total = entry.total,
                    "Most crowded zone"
                );
            }
        }
        Commands::Diagram => {
            let records = load_fcd_records(&output_dir)?;
            let fits = write_diagram(&output_dir, &records)?;
            info!(records = records.len(), zones = fits.len(), "Fundamental diagram fitted");
        }
        Commands::Points {
            vehicle_id,
            trip,
            output,
        } => {
            let points: Vec<ProbePoint> = read_records(&output_dir.join(TRIP_POINTS_FILE))?;
            let query = PointQuery {
                vehicle_id,
                trip_id: trip,
            };
            let Some(collection) = project(&points, query) else {
                bail!("no data found for vehicle {vehicle_id} and trip {trip:?}");
            };
            let json = serde_json::to_string_pretty(&collection)?;
            match output {
                Some(path) => std::fs::write(path, json)?,
                None => println!("{json}"),
            }
        }
        Commands::Trips { vehicle_id } => {
            let points: Vec<ProbePoint> = read_records(&output_dir.join(TRIP_POINTS_FILE))?;
            println!("{}", serde_json::to_string(&trip_list(&points, vehicle_id))?);
        }
        Commands::Publish {
            s3_bucket,
            prefix,
            gzip,
        } => {
            if s3_bucket.is_empty() {
                info!("S3 bucket not specified, skipping upload");
            } else {
                let aws = aws_config::load_from_env().await;
                let s3 = aws_sdk_s3::Client::new(&aws);
                publish_outputs(&s3, &s3_bucket, &prefix, &output_dir, gzip).await?;
            }
        }
    }

    Ok(())
}

/// Opens the probe store selected by `storage.backend`.
fn open_store(config: &PipelineConfig) -> Result<Box<dyn ProbeStore>> {
    let naming = config.table_name()?;
    let store: Box<dyn ProbeStore> = match config.storage.backend {
        StorageBackend::Csv => Box::new(CsvProbeStore::new(&config.storage.root, naming)),
        StorageBackend::Postgres => Box::new(PgProbeStore::new(
            &config.database,
            &config.operation,
            naming,
        )),
    };
    Ok(store)
}
