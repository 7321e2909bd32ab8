//! Callsync - call record and recording sync

use anyhow::{Context, Result};
use callsync::{
    config::{load_env_file, log_config, signed_url_expiry_for, Config},
    db::PgCallStore,
    extract::{Extractor, VapiClient},
    pipeline::{Pipeline, WindowOverride},
    refresh::refresh_signed_url,
    storage::Storage,
    transform::Transformer,
    upload::{AudioUploader, CsvFailureLedger, HttpAudioSource},
};
use callsync_common::logging::init_logging;
use callsync_common::time::parse_utc;
use chrono::{DateTime, Utc};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "callsync")]
#[command(author, version, about = "Sync call records and recordings into Postgres and S3")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Read variables from this file instead of `.env`
    #[arg(long, global = true)]
    env_file: Option<PathBuf>,
}

#[derive(Parser, Debug)]
enum Command {
    /// Run one incremental sync
    Run {
        /// Window start (RFC 3339); defaults to the last successful run
        #[arg(long, value_parser = parse_timestamp)]
        updated_at_gt: Option<DateTime<Utc>>,

        /// Window end (RFC 3339, exclusive); open when omitted
        #[arg(long, value_parser = parse_timestamp)]
        updated_at_lt: Option<DateTime<Utc>>,
    },

    /// Issue a fresh signed URL for an already stored recording
    RefreshUrl {
        /// Call identifier
        call_id: String,

        /// URL lifetime in hours (defaults to SIGNED_URL_EXPIRY_HOURS)
        #[arg(long)]
        expiry_hours: Option<u64>,
    },

    /// Apply database migrations
    Migrate,
}

fn parse_timestamp(value: &str) -> std::result::Result<DateTime<Utc>, String> {
    parse_utc(value).map_err(|e| e.to_string())
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // .env has to be in the environment before LOG_* are read
    load_env_file(cli.env_file.as_deref())?;
    let _guard = init_logging(&log_config(cli.verbose)?)?;

    let config = Config::load().context("Failed to load configuration")?;

    match cli.command {
        Command::Run {
            updated_at_gt,
            updated_at_lt,
        } => {
            let code = run(
                &config,
                WindowOverride {
                    start: updated_at_gt,
                    end: updated_at_lt,
                },
            )
            .await?;
            return Ok(ExitCode::from(code));
        }
        Command::RefreshUrl {
            call_id,
            expiry_hours,
        } => {
            let db = PgCallStore::connect(&config.database).await?;
            let storage = Storage::new(config.storage.clone());
            let expiry = match expiry_hours {
                Some(hours) => signed_url_expiry_for(hours).context("Invalid --expiry-hours")?,
                None => config.pipeline.signed_url_expiry(),
            };

            let refreshed = refresh_signed_url(&storage, &db, &call_id, expiry).await?;
            println!("{}", refreshed.signed_url);
            println!("expires at {}", refreshed.expires_at.to_rfc3339());
        }
        Command::Migrate => {
            let db = PgCallStore::connect(&config.database).await?;
            db.migrate().await?;
            info!("Database is up to date");
        }
    }

    Ok(ExitCode::SUCCESS)
}

async fn run(config: &Config, overrides: WindowOverride) -> Result<u8> {
    let db = Arc::new(
        PgCallStore::connect(&config.database)
            .await?
            .with_batch_size(config.pipeline.load_batch_size),
    );

    let extractor = Extractor::new(
        Arc::new(VapiClient::new(&config.api).context("Failed to build API client")?),
        &config.api,
    );

    let uploader = AudioUploader::new(
        Arc::new(Storage::new(config.storage.clone())),
        Arc::new(
            HttpAudioSource::new(config.pipeline.upload_timeout())
                .context("Failed to build audio client")?,
        ),
        &config.pipeline,
    )
    .with_ledger(Arc::new(CsvFailureLedger::new(
        config.pipeline.failed_uploads_ledger.clone(),
    )));

    let pipeline = Pipeline::new(
        extractor,
        Transformer::new(config.pipeline.existence_lookup_batch_size),
        uploader,
        db.clone(),
        db,
    )
    .with_snapshot_path(config.pipeline.snapshot_path.clone());

    let summary = pipeline.run(overrides).await;
    println!("{}", summary.render());

    Ok(summary.exit_code())
}
