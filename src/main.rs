use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info, warn};
use sitaware::ai::build_backend;
use sitaware::bus::BroadcastBus;
use sitaware::config::Config;
use sitaware::error::ConfigError;
use sitaware::inbound::{InboundEvent, InboundRouter};
use sitaware::SituationalAwareness;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, Notify};

/// Command-line arguments for the situational-awareness engine
#[derive(Parser)]
#[command(
    name = "sitaware",
    about = "Tactical situational awareness - AI-assisted insight and alert engine",
    long_about = "Ingests subsystem observations as JSON lines on stdin, periodically asks a \
                  reasoning backend for insights, escalates severe ones into alerts and prints \
                  the final situational state on shutdown."
)]
struct Cli {
    /// Path to configuration file
    #[arg(
        short,
        long,
        value_name = "FILE",
        help = "Configuration file path (TOML format)"
    )]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(
        short,
        long,
        help = "Enable verbose logging output (sets RUST_LOG=debug)"
    )]
    verbose: bool,
}

impl Cli {
    /// Validate the CLI arguments
    ///
    /// Missing config files are allowed and fall back to defaults.
    fn validate(&self) -> Result<(), String> {
        if let Some(ref config_path) = self.config {
            if config_path.exists() {
                if !config_path.is_file() {
                    return Err(format!(
                        "Configuration path is not a file: {}",
                        config_path.display()
                    ));
                }

                if let Some(extension) = config_path.extension() {
                    if extension != "toml" {
                        warn!(
                            "Configuration file does not have .toml extension: {}",
                            config_path.display()
                        );
                    }
                }
            }
        }

        Ok(())
    }
}

/// Load configuration, falling back to defaults only when the file is missing
fn load_config(config_path: Option<&Path>) -> Result<Config, ConfigError> {
    match config_path {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            match Config::from_file(path) {
                Err(ConfigError::ReadError(e)) if !path.exists() => {
                    warn!(
                        "Configuration file '{}' not found ({}), using defaults",
                        path.display(),
                        e
                    );
                    Ok(Config::default())
                }
                other => other,
            }
        }
        None => {
            info!("Using default configuration");
            Ok(Config::default())
        }
    }
}

/// Forward stdin JSON lines to the router until EOF
async fn read_stdin(sender: mpsc::Sender<InboundEvent>) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut line_number = 0usize;

    while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
        line_number += 1;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match serde_json::from_str::<InboundEvent>(line) {
            Ok(event) => {
                if sender.send(event).await.is_err() {
                    break;
                }
            }
            Err(e) => warn!("Skipping malformed input on line {}: {}", line_number, e),
        }
    }

    info!("Reached end of input after {} lines", line_number);
    Ok(())
}

async fn run(config: Config) -> Result<()> {
    let backend = build_backend(&config.ai.backend);
    let bus = BroadcastBus::default();
    let engine = Arc::new(
        SituationalAwareness::new(config, backend, Arc::new(bus.clone()))
            .context("Failed to build situational awareness engine")?,
    );

    engine
        .initialize(None)
        .context("Failed to initialize situational awareness engine")?;

    let (sender, receiver) = mpsc::channel(256);
    let router = InboundRouter::new(engine.clone()).spawn(receiver);

    let shutdown = Arc::new(Notify::new());
    let signal = shutdown.clone();
    ctrlc::set_handler(move || {
        info!("Received interrupt signal (SIGINT), shutting down gracefully...");
        signal.notify_one();
    })
    .context("Error setting SIGINT handler for graceful shutdown")?;

    info!("Situational awareness is running. Press Ctrl+C to stop.");

    tokio::select! {
        result = read_stdin(sender) => {
            if let Err(e) = result {
                error!("Input reader failed: {:#}", e);
            }
        }
        _ = shutdown.notified() => {}
    }

    // The reader's sender is gone by now, so the router drains and exits
    if let Err(e) = router.await {
        error!("Inbound router task failed: {}", e);
    }

    engine.stop();
    let state = engine.get_current_state();
    println!(
        "{}",
        serde_json::to_string_pretty(&state).context("Failed to serialize final state")?
    );

    engine.cleanup();
    info!("Situational awareness shutdown complete");
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.verbose {
        std::env::set_var("RUST_LOG", "debug");
    }
    env_logger::init();

    info!("Starting situational awareness engine");

    if let Err(e) = cli.validate() {
        anyhow::bail!("Invalid arguments: {}", e);
    }

    let config = load_config(cli.config.as_deref()).context("Failed to load configuration")?;

    let runtime = tokio::runtime::Runtime::new().context("Failed to start tokio runtime")?;
    let result = runtime.block_on(run(config));

    // A pending stdin read holds a blocking thread that would stall a normal drop
    runtime.shutdown_background();
    result
}
