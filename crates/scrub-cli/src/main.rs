mod play;
mod projection;
mod render;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use scrub_store::{EventsBroker, ScrubConfig, Storage};

use crate::render::OutputFormat;

#[derive(Parser)]
#[command(name = "scrub", about = "Time-scrubbing event overlay driver")]
struct Cli {
    /// TOML config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Data directory or http(s) base URL (overrides config and SCRUB_DATA_DIR)
    #[arg(long, global = true)]
    data_root: Option<String>,

    /// Enable verbose debug output
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the timestamps of the configured window
    Timeline {
        /// Stop after this many timestamps
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Load the world outline and print its extent
    Outline,

    /// Drive the overlay from line commands on stdin
    Play {
        /// Emit one JSON object per render diff
        #[arg(long)]
        json: bool,

        /// Canvas width the projection is fitted to
        #[arg(long, default_value_t = 960.0)]
        width: f64,

        /// Canvas height the projection is fitted to
        #[arg(long, default_value_t = 500.0)]
        height: f64,
    },
}

fn load_config(cli: &Cli) -> Result<ScrubConfig> {
    let path = cli
        .config
        .clone()
        .or_else(|| std::env::var("SCRUB_CONFIG").ok().map(PathBuf::from));
    let mut config = match path {
        Some(path) => ScrubConfig::from_file(&path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => ScrubConfig::default(),
    };
    if let Some(root) = cli
        .data_root
        .clone()
        .or_else(|| std::env::var("SCRUB_DATA_DIR").ok())
    {
        config.data_root = root;
    }
    Ok(config)
}

fn open_broker(config: &ScrubConfig) -> Arc<EventsBroker<Storage>> {
    tracing::info!(root = %config.data_root, "opening storage");
    Arc::new(EventsBroker::with_categories(
        Storage::from_root(&config.data_root),
        &config.categories,
    ))
}

fn init_tracing(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into())
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let config = load_config(&cli)?;

    match &cli.command {
        Commands::Timeline { limit } => cmd_timeline(&config, *limit),
        Commands::Outline => cmd_outline(&config).await,
        Commands::Play {
            json,
            width,
            height,
        } => {
            let format = if *json {
                OutputFormat::Json
            } else {
                OutputFormat::Text
            };
            play::run(&config, format, (*width, *height)).await
        }
    }
}

fn cmd_timeline(config: &ScrubConfig, limit: Option<usize>) -> Result<()> {
    let cursor = config.cursor();
    let total = cursor.len();
    for ts in cursor.take(limit.unwrap_or(usize::MAX)) {
        println!("{ts}");
    }
    tracing::debug!(total, "timeline printed");
    Ok(())
}

async fn cmd_outline(config: &ScrubConfig) -> Result<()> {
    let broker = open_broker(config);
    let outline = broker
        .load_map_outline()
        .await
        .context("failed to load map outline")?;

    println!("features:   {}", outline.feature_count);
    match outline.bounds {
        Some(b) => println!(
            "bounds:     long [{:.2}, {:.2}], lat [{:.2}, {:.2}]",
            b.min_long, b.max_long, b.min_lat, b.max_lat
        ),
        None => println!("bounds:     (no coordinates)"),
    }
    Ok(())
}
