//! cubelandd entry point.

use anyhow::{Context, Result};
use clap::Parser;
use cubeland_core::config::ServerConfig;
use cubeland_services::{KeyCache, MemoryWorldSource, WorldSource};
use cubelandd::server::Server;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, Parser)]
#[command(name = "cubelandd", about = "Cubeland game server")]
struct Cli {
    /// Path to the server configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // RUST_LOG controls verbosity, e.g. RUST_LOG=cubelandd=debug
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => ServerConfig::load(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => ServerConfig::from_env(),
    };

    tracing::info!(port = config.listen.port, "cubeland server starting");

    let world: Arc<dyn WorldSource> = MemoryWorldSource::new();
    let keys = Arc::new(
        KeyCache::open(&config.keys.cache_dir, &config.keys.api_base)
            .context("failed to open key cache")?,
    );

    let server = Server::start(config, world, keys).await?;

    tokio::signal::ctrl_c()
        .await
        .context("failed to install signal handler")?;
    tracing::info!("caught interrupt, shutting down");

    server.shutdown().await
}
