#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! CLI entry point for checkpointed bike-share ingestion.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use divvy_lake_cli_utils::IndicatifProgress;
use divvy_lake_ingest::config::IngestConfig;
use divvy_lake_ingest::coordinator::{IngestionCoordinator, RunConfig};
use divvy_lake_ingest::{IngestError, build_fetchers, open_store};
use divvy_lake_ingest_models::{SourceKind, YearMonth};
use divvy_lake_source::http::build_client;
use strum::IntoEnumIterator as _;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(
    name = "divvy_lake_ingest",
    about = "Checkpointed ingestion of Divvy trips, weather, and station feeds"
)]
struct Cli {
    /// Path to a TOML config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch and store every missing partition of a source
    Run {
        #[command(flatten)]
        target: Target,
        /// Partitions processed at once (1-16)
        #[arg(long)]
        concurrency: Option<usize>,
        /// Print the run summary as JSON on stdout
        #[arg(long)]
        json: bool,
        /// Also write the JSON run summary to this file
        #[arg(long)]
        report: Option<PathBuf>,
        /// Stop starting new partitions after this many seconds
        #[arg(long)]
        timeout: Option<u64>,
    },
    /// Show which partitions are already stored, without fetching
    Status {
        #[command(flatten)]
        target: Target,
        /// Print the status as JSON on stdout
        #[arg(long)]
        json: bool,
    },
    /// Check that the configured object store is reachable and writable
    Check,
    /// List source kinds, their default scopes, and known locations
    Sources,
}

#[derive(Args)]
struct Target {
    /// Source kind (`trip_archive`, `weather`, `station_feed`)
    source: SourceKind,
    /// Comma-separated scopes (system, location, or feed endpoint)
    #[arg(long, value_delimiter = ',')]
    scopes: Vec<String>,
    /// First month of the range (YYYY-MM)
    #[arg(long)]
    start: Option<YearMonth>,
    /// Last month of the range (YYYY-MM)
    #[arg(long)]
    end: Option<YearMonth>,
    /// Snapshot time for station feeds (RFC 3339, default: now)
    #[arg(long)]
    at: Option<DateTime<Utc>>,
}

impl Target {
    fn run_config(self, config: &IngestConfig) -> Result<RunConfig, IngestError> {
        let scopes = (!self.scopes.is_empty()).then_some(self.scopes);
        Ok(config.run_config(self.source, scopes, self.start, self.end, self.at)?)
    }
}

async fn coordinator(
    config: &IngestConfig,
    kind: SourceKind,
) -> Result<IngestionCoordinator, Box<dyn std::error::Error>> {
    let client = build_client(&config.http.settings())?;
    let fetchers = build_fetchers(config, &client)?;
    let store = open_store(&config.store).await?;
    Ok(IngestionCoordinator::new(
        store,
        fetchers,
        config.coordinator_options(kind)?,
    ))
}

/// Cancels `token` on Ctrl-C, or once `timeout` elapses.
fn wire_cancellation(token: &CancellationToken, timeout: Option<Duration>) {
    let on_signal = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("Interrupted, finishing in-flight partitions");
            on_signal.cancel();
        }
    });

    if let Some(timeout) = timeout {
        let on_timeout = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            log::warn!("Run timeout of {timeout:?} reached, finishing in-flight partitions");
            on_timeout.cancel();
        });
    }
}

#[allow(clippy::too_many_lines)]
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let multi = divvy_lake_cli_utils::init_logger();
    let cli = Cli::parse();
    let mut config = IngestConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Run {
            target,
            concurrency,
            json,
            report,
            timeout,
        } => {
            if let Some(concurrency) = concurrency {
                config.run.concurrency = concurrency;
                config.validate()?;
            }
            let kind = target.source;
            let run_config = target.run_config(&config)?;
            let progress = IndicatifProgress::partitions_bar(&multi, &kind.to_string());
            let coordinator = coordinator(&config, kind).await?.with_progress(progress);

            let cancel = CancellationToken::new();
            wire_cancellation(&cancel, timeout.map(Duration::from_secs));

            let start = Instant::now();
            let summary = coordinator.run(&run_config, cancel).await?;
            log::info!("Run finished in {:.1}s", start.elapsed().as_secs_f64());

            let rendered = serde_json::to_string_pretty(&summary)?;
            if let Some(path) = report {
                std::fs::write(&path, &rendered)?;
                log::info!("Wrote run report to {}", path.display());
            }
            if json {
                println!("{rendered}");
            } else {
                println!("{summary}");
            }

            if !summary.is_complete() {
                return Err(format!(
                    "{} of {} partitions failed",
                    summary.failed, summary.required
                )
                .into());
            }
        }
        Commands::Status { target, json } => {
            let kind = target.source;
            let run_config = target.run_config(&config)?;
            let status = coordinator(&config, kind).await?.status(&run_config).await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                for partition in &status.partitions {
                    let state = format!("{:?}", partition.state).to_lowercase();
                    println!("{state:<10} {}", partition.path);
                }
                println!("{status}");
            }
        }
        Commands::Check => {
            let store = open_store(&config.store).await?;
            store
                .check_connectivity()
                .await
                .map_err(|source| IngestError::StoreUnavailable {
                    target: store.describe(),
                    source,
                })?;
            println!("{} is reachable", store.describe());
        }
        Commands::Sources => {
            println!("{:<14} {:<14} DEFAULT SCOPES", "SOURCE", "PREFIX");
            println!("{}", "-".repeat(70));
            for kind in SourceKind::iter() {
                println!(
                    "{:<14} {:<14} {}",
                    kind.to_string(),
                    kind.storage_prefix(),
                    config.default_scopes(kind)?.join(", ")
                );
            }

            println!();
            println!("{:<14} {:>10} {:>10}  NAME", "LOCATION", "LAT", "LON");
            println!("{}", "-".repeat(70));
            for location in config.locations()?.iter() {
                println!(
                    "{:<14} {:>10.4} {:>10.4}  {}",
                    location.key, location.latitude, location.longitude, location.name
                );
            }
        }
    }

    Ok(())
}
