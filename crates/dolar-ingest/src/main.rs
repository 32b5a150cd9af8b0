//! dolar - exchange-rate ingestion pipeline

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dolar_common::logging::{init_logging, LogConfig, LogLevel};
use dolar_common::HandlerResponse;
use dolar_ingest::db::MySqlRateStore;
use dolar_ingest::ingest::{Fetcher, Normalizer, ObjectLocation};
use dolar_ingest::storage::S3Store;
use dolar_ingest::Config;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tokio::io::AsyncReadExt;
use tracing::{debug, info};

#[derive(Parser, Debug)]
#[command(name = "dolar")]
#[command(author, version, about = "USD/COP exchange-rate ingestion pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Read configuration from this file instead of `./.env`
    #[arg(long, global = true, env = "DOLAR_ENV_FILE")]
    env_file: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Download the current quotes and store them in the raw bucket
    Fetch,

    /// Load the objects named by an S3 event notification
    Load {
        /// Event JSON file, or `-` for stdin
        #[arg(short, long, default_value = "-")]
        event: PathBuf,
    },

    /// Load a single stored object, e.g. to replay it
    LoadObject {
        #[arg(short, long)]
        bucket: String,

        #[arg(short, long)]
        key: String,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let mut log_config = LogConfig::from_env()?;
    if cli.verbose {
        log_config.level = LogLevel::Debug;
    }
    let _guard = init_logging(&log_config)?;

    let config = match &cli.env_file {
        Some(path) => Config::from_env_file(path),
        None => Config::load(),
    }
    .context("Invalid configuration")?;
    debug!(?config, "Configuration loaded");

    let response = run(cli.command, config).await?;

    println!("{}", serde_json::to_string(&response)?);

    if response.is_failure() {
        Ok(ExitCode::FAILURE)
    } else {
        Ok(ExitCode::SUCCESS)
    }
}

async fn run(command: Command, config: Config) -> Result<HandlerResponse> {
    let store = S3Store::new(&config.storage).await;

    match command {
        Command::Fetch => {
            info!("Fetching exchange-rate data");
            let fetcher = Fetcher::new(config.fetcher, store)?;
            Ok(fetcher.handle().await)
        }
        Command::Load { event } => {
            let raw = read_event(&event).await?;
            info!(size = raw.len(), "Loading objects from storage event");
            let normalizer = normalizer(store, config);
            Ok(normalizer.handle_raw_event(&raw).await)
        }
        Command::LoadObject { bucket, key } => {
            let location = ObjectLocation::new(bucket, key);
            info!(%location, "Loading single object");
            let normalizer = normalizer(store, config);
            Ok(normalizer.handle_object(&location).await)
        }
    }
}

fn normalizer(store: S3Store, config: Config) -> Normalizer<S3Store, MySqlRateStore> {
    Normalizer::new(
        store,
        MySqlRateStore::new(config.database),
        config.normalizer,
    )
}

async fn read_event(path: &Path) -> Result<Vec<u8>> {
    if path.as_os_str() == "-" {
        let mut buf = Vec::new();
        tokio::io::stdin()
            .read_to_end(&mut buf)
            .await
            .context("Failed to read event from stdin")?;
        Ok(buf)
    } else {
        tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read event file {}", path.display()))
    }
}
