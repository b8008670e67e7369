//! midimap - MIDI mapping engine
//!
//! Connects to MIDI inputs, turns control movements into action values
//! according to the mapping document, and offers a shell for authoring.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use midimap::config::{EngineConfig, MappingWatcher};
use midimap::engine::{ConsoleSink, Engine};
use midimap::paths::AppPaths;
use midimap::ports::{self, InputPorts};

/// midimap - map MIDI controllers to named actions
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (defaults to the platform config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,

    /// List available MIDI input ports
    #[arg(long)]
    list_ports: bool,

    /// Run without the interactive shell
    #[arg(long)]
    no_shell: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let args = Args::parse();

    init_logging(&args.log_level, args.log_json)?;

    let config_path = match args.config {
        Some(path) => path,
        None => {
            let paths = AppPaths::detect();
            paths.ensure_directories()?;
            paths.config
        }
    };

    info!("Starting midimap...");
    info!("Configuration file: {}", config_path.display());

    let config = EngineConfig::load(&config_path).await?;

    if args.list_ports {
        ports::print_ports(Some(&config));
        return Ok(());
    }

    run_app(config, !args.no_shell, shutdown_signal()).await?;

    info!("midimap shutdown complete");
    Ok(())
}

async fn run_app(
    config: EngineConfig,
    with_shell: bool,
    shutdown: impl std::future::Future<Output = ()>,
) -> Result<()> {
    let (bridge_tx, bridge_rx) = midimap::bridge::channel(config.bridge.queue_capacity);
    let mut engine = Engine::with_bridge(config.engine_options(), bridge_rx);

    if config.mappings.exists() {
        let count = engine
            .load_bindings(&config.mappings)
            .with_context(|| format!("Failed to load {}", config.mappings.display()))?;
        info!("📝 Loaded {} bindings from {}", count, config.mappings.display());
    } else {
        info!(
            "No mapping document at {} yet, starting empty",
            config.mappings.display()
        );
    }

    // Reloads are best effort; editing still works through the shell
    let mut watcher = match MappingWatcher::new(&config.mappings) {
        Ok(watcher) => Some(watcher),
        Err(e) => {
            warn!("⚠️  Mapping hot-reload disabled: {:#}", e);
            None
        }
    };

    let mut inputs = InputPorts::new(bridge_tx.clone());
    match inputs.rescan(&mut engine, &config) {
        Ok(summary) => info!("Connected {} input port(s)", summary.added),
        Err(e) => warn!("⚠️  MIDI port discovery failed: {:#}", e),
    }

    let mut shell_done = if with_shell {
        let (done_tx, done_rx) = oneshot::channel::<()>();
        let bridge = bridge_tx.clone();
        let runtime = tokio::runtime::Handle::current();
        let mappings = config.mappings.clone();
        std::thread::Builder::new()
            .name("midimap-shell".into())
            .spawn(move || {
                if let Err(e) = midimap::cli::run_shell(bridge, runtime, mappings) {
                    warn!("Shell exited with error: {:#}", e);
                }
                let _ = done_tx.send(());
            })
            .context("Failed to spawn shell thread")?;
        Some(done_rx)
    } else {
        None
    };

    let mut sink = ConsoleSink::new();
    let mut tick = tokio::time::interval(Duration::from_millis(config.tick_ms));
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut rescan = tokio::time::interval(Duration::from_millis(config.rescan_ms));
    rescan.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    info!("🎹 Listening for MIDI input");

    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = tick.tick() => {
                let summary = engine.tick(&mut sink);
                if summary.commands > 0 {
                    debug!("Applied {} authoring command(s)", summary.commands);
                }
            }

            _ = rescan.tick() => {
                if let Err(e) = inputs.rescan(&mut engine, &config) {
                    debug!("Port rescan failed: {:#}", e);
                }
            }

            // Handle mapping document changes
            Some(path) = async {
                match watcher.as_mut() {
                    Some(w) => w.changed().await,
                    None => std::future::pending().await,
                }
            } => {
                // Our own saves land here too; a failed reload keeps the old table
                if let Ok(Some(count)) = engine.reload_bindings(&path) {
                    info!("📝 Mappings reloaded: {} bindings", count);
                }
            }

            _ = async {
                match shell_done.as_mut() {
                    Some(done) => {
                        let _ = done.await;
                    }
                    None => std::future::pending().await,
                }
            } => {
                info!("Shell closed, stopping event loop");
                break;
            }

            // Handle shutdown signal
            _ = &mut shutdown => {
                info!("Shutdown signal received, stopping event loop");
                break;
            }
        }
    }

    info!("Shutting down...");
    let stats = engine.stats();
    info!(
        "Dispatched {} action(s), {} decode error(s), {} dropped packet(s)",
        stats.dispatched, stats.decode_errors, stats.dropped_packets
    );
    drop(inputs);

    Ok(())
}

fn init_logging(level: &str, json: bool) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_target(false))
            .init();
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_thread_names(false),
            )
            .init();
    }

    Ok(())
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install CTRL+C signal handler");
    info!("Shutdown signal received");
}
