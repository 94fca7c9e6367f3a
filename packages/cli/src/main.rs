#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! CLI entry point for the mobility map toolchain.
//!
//! Exit codes: `0` on success, `1` when an import completed but reported
//! row-level errors, `2` on fatal failure.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use mobility_map_import::{ImportError, ImportReport, admins, mobility::MobilityImporter, weather};
use mobility_map_storage::{BlobStorage, LocalStorage, S3Storage};
use mobility_map_store::MobilityStore;
use mobility_map_store::duck::DuckStore;

/// Exit code for an import that completed with row-level errors.
const EXIT_ROW_ERRORS: i32 = 1;

/// Exit code for a fatal failure.
const EXIT_FATAL: i32 = 2;

#[derive(Parser)]
#[command(name = "mobility_map_cli", about = "Mobility map toolchain")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sync provider mobility exports from blob storage into the store
    SyncMobility {
        /// Import from a local directory tree instead of S3 blob storage
        #[arg(long)]
        local: Option<PathBuf>,
        /// Comma-separated collection whitelist (default: "traffic,midt")
        #[arg(long)]
        collections: Option<String>,
        /// Staging directory for downloaded blobs
        #[arg(long, default_value = "data/staging")]
        staging: PathBuf,
        /// Provider recorded on imported records
        #[arg(long)]
        provider: Option<String>,
    },
    /// Replace a country's admin boundaries from a `GeoJSON` file
    ImportAdmins {
        /// ISO 3166-1 alpha-2 country code, lowercase (e.g. "br")
        country_code: String,
        /// Path to the `GeoJSON` feature collection
        geojson: PathBuf,
        /// Shapefile source identifier (e.g. "gadm2-8")
        #[arg(long, default_value = "gadm2-8")]
        source: String,
    },
    /// Import weather observations from a local CSV file
    ImportWeather {
        /// Path to the CSV file
        file: PathBuf,
        /// Data subtype recorded on imported records (e.g. "daily")
        #[arg(long, default_value = "daily")]
        kind: String,
    },
    /// Start the API server
    Serve,
}

#[tokio::main]
async fn main() {
    pretty_env_logger::init();
    let cli = Cli::parse();

    let code = match cli.command {
        Commands::SyncMobility {
            local,
            collections,
            staging,
            provider,
        } => report_outcome(sync_mobility(local, collections, staging, provider).await),
        Commands::ImportAdmins {
            country_code,
            geojson,
            source,
        } => report_outcome(import_admins(&country_code, &geojson, &source).await),
        Commands::ImportWeather { file, kind } => {
            report_outcome(import_weather(&file, &kind).await)
        }
        Commands::Serve => serve().await,
    };

    std::process::exit(code);
}

/// Opens the store at `MOBILITY_MAP_DB` (default
/// [`mobility_map_server::DEFAULT_DB_PATH`]).
fn open_store() -> Result<Arc<dyn MobilityStore>, ImportError> {
    let db_path = std::env::var("MOBILITY_MAP_DB")
        .unwrap_or_else(|_| mobility_map_server::DEFAULT_DB_PATH.to_string());
    log::info!("Opening store at {db_path}");
    Ok(Arc::new(DuckStore::open(Path::new(&db_path))?))
}

async fn sync_mobility(
    local: Option<PathBuf>,
    collections: Option<String>,
    staging: PathBuf,
    provider: Option<String>,
) -> Result<ImportReport, ImportError> {
    let store = open_store()?;
    let storage: Arc<dyn BlobStorage> = match local {
        Some(root) => Arc::new(LocalStorage::new(root)),
        None => Arc::new(S3Storage::from_env()?),
    };

    let mut importer = MobilityImporter::new(store, storage, staging);
    if let Some(collections) = collections {
        importer = importer.with_collections(
            collections
                .split(',')
                .map(|c| c.trim().to_string())
                .filter(|c| !c.is_empty())
                .collect(),
        );
    }
    if let Some(provider) = provider {
        importer = importer.with_provider(provider);
    }

    importer.run().await
}

async fn import_admins(
    country_code: &str,
    geojson: &Path,
    source: &str,
) -> Result<ImportReport, ImportError> {
    let store = open_store()?;
    admins::import_admins(store.as_ref(), country_code, geojson, source).await
}

async fn import_weather(file: &Path, kind: &str) -> Result<ImportReport, ImportError> {
    let store = open_store()?;
    weather::import_weather(store.as_ref(), file, kind).await
}

async fn serve() -> i32 {
    // The server uses actix-web's runtime, so run it in a blocking task to
    // avoid nesting tokio runtimes.
    let outcome = tokio::task::spawn_blocking(|| {
        actix_web::rt::System::new().block_on(mobility_map_server::run_server())
    })
    .await;

    match outcome {
        Ok(Ok(())) => 0,
        Ok(Err(e)) => {
            log::error!("Server failed: {e}");
            EXIT_FATAL
        }
        Err(e) => {
            log::error!("Server task panicked: {e}");
            EXIT_FATAL
        }
    }
}

/// Logs an import outcome and maps it to an exit code.
fn report_outcome(result: Result<ImportReport, ImportError>) -> i32 {
    match result {
        Ok(report) => {
            log::info!(
                "{} records inserted across {} files",
                report.inserted,
                report.file_errors.len()
            );
            for (file, errors) in &report.file_errors {
                for error in errors {
                    log::warn!("{file}: {error}");
                }
            }
            if report.has_row_errors() {
                log::warn!("{} row errors", report.row_error_count());
                EXIT_ROW_ERRORS
            } else {
                0
            }
        }
        Err(e) => {
            log::error!("Import failed: {e}");
            EXIT_FATAL
        }
    }
}
