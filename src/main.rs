//! ceelog Server Binary
//!
//! HTTP endpoint receiving CEE audit events into rotating log files.

use ceelog::config::ServerConfig;
use ceelog::logging;
use ceelog::server::{shutdown, EventServer};
use clap::Parser;
use std::path::PathBuf;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "ceelog-server")]
#[command(about = "HTTP ingestion endpoint for CEE audit events")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "config/server.toml")]
    config: PathBuf,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Log output directory
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Load configuration
    let config_file = args.config.exists().then_some(args.config.as_path());
    let mut config = match ServerConfig::load(config_file) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    };

    // Override config with CLI arguments
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(output) = args.output {
        config.storage.output_directory = output;
    }

    if let Err(e) = logging::init_logging(&config.logging, args.verbose) {
        eprintln!("{}", e);
        std::process::exit(1);
    }

    info!("Starting ceelog server v{}", env!("CARGO_PKG_VERSION"));
    match config_file {
        Some(path) => info!("Configuration loaded from {}", path.display()),
        None => info!("Config file not found, using defaults"),
    }
    info!("Listening address: {}:{}", config.server.host, config.server.port);
    info!("Ingest path: {}", config.server.ingest_path);
    info!("Output directory: {}", config.storage.output_directory.display());
    info!("Max file size: {} bytes", config.storage.max_file_size);
    info!("Rotation enabled: {}", config.storage.rotation.enabled);

    // Sinks are opened here; storage problems stop us before we accept anything.
    let server = match EventServer::new(config).await {
        Ok(server) => server,
        Err(e) => {
            error!("Startup failed: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = server.run(shutdown::create_shutdown_token()).await {
        error!("Server error: {}", e);
        std::process::exit(1);
    }

    info!("ceelog server stopped");
}
