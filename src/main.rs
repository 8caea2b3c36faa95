//! Command-line interface for vector-sync
//!
//! # Usage Examples
//!
//! ```bash
//! # Write vector-sync.yml (refuses to overwrite without --force)
//! vector-sync init
//!
//! # Run a single sync cycle and print the outcome
//! vector-sync --config ./vector-sync.yml sync
//!
//! # Poll continuously; Ctrl+C finishes in-flight batches and exits
//! vector-sync watch --interval 30s
//!
//! # Embed a query and print the closest rows
//! vector-sync query "how do I reset my password" --limit 5
//!
//! # Inspect or move the watermark
//! vector-sync status
//! vector-sync reset
//! vector-sync reset --to 2024-01-01T00:00:00Z#42
//! ```
//!
//! ## Watermark Format
//! - `<rfc3339>` positions before every row at that instant
//! - `<rfc3339>#<key>` positions after the row with that key at that instant

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use sync_core::{RowSource, Watermark};
use vector_sync::config::{duration::parse_duration, SyncConfig, CONFIG_TEMPLATE};
use vector_sync::connect::{
    build_pipeline, pipeline_options, postgres_source, verify_source, verify_source_for_watch,
};
use vector_sync::report::{outcome_summary, results_table};
use vector_sync::shutdown::setup_shutdown_handler;

#[derive(Parser)]
#[command(name = "vector-sync")]
#[command(about = "Keep a vector index in sync with a relational table")]
#[command(long_about = None)]
struct Cli {
    /// Path to the YAML configuration file
    #[arg(
        long,
        global = true,
        default_value = vector_sync::config::DEFAULT_CONFIG_PATH,
        env = "VECTOR_SYNC_CONFIG"
    )]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a commented starter configuration
    Init {
        /// Overwrite an existing configuration file
        #[arg(long)]
        force: bool,
    },

    /// Run one sync cycle
    Sync,

    /// Run sync cycles until interrupted
    Watch {
        /// Poll interval, overrides sync.poll_interval (e.g. "30s", "5m")
        #[arg(long, value_parser = parse_duration)]
        interval: Option<std::time::Duration>,
    },

    /// Search the vector store
    Query {
        /// Text to search for
        text: String,

        /// Number of results
        #[arg(long, default_value = "5")]
        limit: usize,
    },

    /// Show the persisted watermark and the number of stored vectors
    Status,

    /// Clear the watermark, or move it
    Reset {
        /// New watermark: "<rfc3339>" or "<rfc3339>#<key>"
        #[arg(long, value_name = "WATERMARK")]
        to: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = run().await {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}

async fn run() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init { force } => init_config(&cli.config, force),
        Commands::Sync => {
            let config = SyncConfig::load(&cli.config)?;
            let source = postgres_source(&config)?;
            verify_source(&source, &config).await?;
            let pipeline = build_pipeline(&config, source, pipeline_options(&config))?;

            let shutdown = setup_shutdown_handler();
            let outcome = pipeline
                .run_once(&shutdown)
                .await
                .context("Sync cycle failed")?;
            println!("{}", outcome_summary(&outcome));
            if !outcome.is_clean() {
                anyhow::bail!(
                    "{} row(s) failed and will be retried on the next cycle",
                    outcome.failed
                );
            }
            Ok(())
        }
        Commands::Watch { interval } => {
            let config = SyncConfig::load(&cli.config)?;
            let source = postgres_source(&config)?;
            verify_source_for_watch(&source, &config).await?;
            let mut options = pipeline_options(&config);
            if let Some(interval) = interval {
                options.poll_interval = interval;
            }
            let pipeline = build_pipeline(&config, source, options)?;

            let shutdown = setup_shutdown_handler();
            let report = pipeline
                .watch(&shutdown)
                .await
                .context("Watch stopped on a configuration error")?;
            println!("{report}");
            Ok(())
        }
        Commands::Query { text, limit } => {
            let config = SyncConfig::load(&cli.config)?;
            let pipeline = offline_pipeline(&config)?;
            let results = pipeline
                .query(&text, limit)
                .await
                .context("Query failed")?;
            println!("{}", results_table(&results, &config.watch.columns));
            Ok(())
        }
        Commands::Status => {
            let config = SyncConfig::load(&cli.config)?;
            let pipeline = offline_pipeline(&config)?;
            let status = pipeline.status().await.context("Failed to read status")?;
            println!("Collection: {}", config.collection());
            println!(
                "Watermark:  {}",
                if status.watermark.is_initial() {
                    "none (next sync starts from the beginning)".to_string()
                } else {
                    status.watermark.to_cli_string()
                }
            );
            println!("Vectors:    {}", status.points);
            Ok(())
        }
        Commands::Reset { to } => {
            let config = SyncConfig::load(&cli.config)?;
            let target = to
                .as_deref()
                .map(Watermark::from_cli_string)
                .transpose()
                .context("Invalid --to watermark")?;
            let pipeline = offline_pipeline(&config)?;
            let watermark = pipeline
                .reset(target)
                .await
                .context("Failed to reset watermark")?;
            if watermark.is_initial() {
                println!("Watermark cleared; the next sync processes every row");
            } else {
                println!("Watermark set to {}", watermark.to_cli_string());
            }
            Ok(())
        }
    }
}

/// Pipeline for commands that never read the source table.
fn offline_pipeline(config: &SyncConfig) -> anyhow::Result<vector_sync::SyncPipeline> {
    let source: Arc<dyn RowSource> = postgres_source(config)?;
    build_pipeline(config, source, pipeline_options(config))
}

fn init_config(path: &Path, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        anyhow::bail!(
            "{} already exists; pass --force to overwrite it",
            path.display()
        );
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    std::fs::write(path, CONFIG_TEMPLATE)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    println!("Wrote {}", path.display());
    Ok(())
}
