//! Card cache admin - inspect and maintain an on-disk card cache
//!
//! Opens the same directory the application caches into and reports or
//! clears its contents.

mod commands;
mod error;
mod types;

use crate::commands::{run, CacheHandle, Command};
use crate::error::Result;
use crate::types::AdminConfig;
use card_cache::CacheConfig;
use clap::Parser;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{prelude::*, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "card-cache-admin", about = "Inspect and maintain the card cache")]
struct Cli {
    /// Cache directory (overrides CACHE_DIR)
    #[arg(long)]
    cache_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    let env_filter = EnvFilter::from_default_env()
        .add_directive("card_cache=info".parse()?)
        .add_directive("card_cache_admin=info".parse()?);

    // Use JSON format for GCP Cloud Logging when LOG_FORMAT=json
    if std::env::var("LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false)
    {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_stackdriver::layer())
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .init();
    };

    let cli = Cli::parse();

    let mut config = load_config();
    if let Some(dir) = cli.cache_dir {
        config.cache_dir = dir;
    }
    info!("Cache dir: {:?}", config.cache_dir);
    info!(
        "Image quota: {} MB",
        config.cache.quota_bytes / (1024 * 1024)
    );
    info!(
        "Collection TTL: stale after {}s, expired after {}s",
        config.cache.stale_threshold.as_secs(),
        config.cache.max_age.as_secs()
    );

    let handle = CacheHandle::open(&config).await?;
    let output = run(&handle, cli.command).await?;
    println!("{}", output);

    Ok(())
}

fn load_config() -> AdminConfig {
    let cache_dir = std::env::var("CACHE_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| AdminConfig::default().cache_dir);

    AdminConfig {
        cache_dir,
        cache: CacheConfig::from_env(),
    }
}
