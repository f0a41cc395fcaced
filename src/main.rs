//! streamsight - Real-time frame analysis service
//!
//! Clients stream encoded video frames over a WebSocket; the server locates
//! regions of interest in each frame, recognizes the text inside each region,
//! and returns a per-frame result correlated to the client's own timestamp.

mod config;
mod protocol;
mod server;
mod vision;

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::AppConfig;
use crate::vision::detector::OnnxDetector;
use crate::vision::models::{ModelKind, ModelStore};
use crate::vision::pipeline::FramePipeline;
use crate::vision::recognizer::OnnxRecognizer;

/// streamsight - streaming region detection and text recognition
#[derive(Parser, Debug)]
#[command(name = "streamsight")]
#[command(about = "Real-time frame analysis service over a WebSocket")]
struct Args {
    /// Host to bind the listener on (overrides the config file)
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on (overrides the config file)
    #[arg(long)]
    port: Option<u16>,

    /// Path to a TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,
}

fn main() -> Result<()> {
    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let args = Args::parse();

    info!("streamsight starting...");

    let mut config = load_or_create_config(args.config.as_deref());
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }

    // Acquire model files before any connection is accepted; capability
    // initialization failures belong to bootstrap, never to a session.
    let store = ModelStore::new(&config.models)?;
    let detection_model = store.ensure(ModelKind::Detection)?;
    let recognition_model = store.ensure(ModelKind::Recognition)?;
    let dictionary = store.ensure(ModelKind::Dictionary)?;

    let detector = OnnxDetector::new(&detection_model, config.detection.clone())?;
    let recognizer = OnnxRecognizer::new(&recognition_model, &dictionary, config.recognition.clone())?;

    // The two capabilities are process-wide singletons shared by every
    // session; each session gets its own pipeline handle.
    let pipeline = Arc::new(FramePipeline::new(Arc::new(detector), Arc::new(recognizer)));

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let runtime = tokio::runtime::Runtime::new().context("Failed to create tokio runtime")?;
    runtime.block_on(server::run(&addr, pipeline))?;

    info!("streamsight shutdown complete");

    Ok(())
}

/// Load configuration from an explicit path, the default location, or fall
/// back to built-in defaults.
fn load_or_create_config(path: Option<&std::path::Path>) -> AppConfig {
    if let Some(path) = path {
        match config::load_config(path) {
            Ok(config) => {
                info!("Loaded configuration from {:?}", path);
                return config;
            }
            Err(e) => {
                tracing::warn!("Failed to load configuration from {:?}: {}", path, e);
            }
        }
    } else if let Ok(config_dir) = config::get_config_dir() {
        let config_path = config_dir.join("config.toml");
        if config_path.exists() {
            if let Ok(config) = config::load_config(&config_path) {
                info!("Loaded configuration from {:?}", config_path);
                return config;
            }
        } else {
            let config = AppConfig::default();
            if config::save_config(&config, &config_path).is_ok() {
                info!("Wrote default configuration to {:?}", config_path);
            }
            return config;
        }
    }
    info!("Using default configuration");
    AppConfig::default()
}
