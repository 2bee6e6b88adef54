//! vision-relay service binary
//!
//! # Usage
//!
//! ```bash
//! # Defaults: Ollama on localhost:11434, HTTP on 0.0.0.0:3000
//! cargo run --release
//!
//! # Explicit config, JSON logs
//! ./vision-relay --config relay_config.toml --log-json
//! ```
//!
//! # Environment Variables
//!
//! - `RELAY_CONFIG`: Path to the TOML config file
//! - `RELAY_GENERATOR_API_KEY`: Bearer key for the text-to-image endpoint
//! - `RUST_LOG`: Logging level (default: info)
//! - `RESET_DB`: Set to "true" to wipe records and media on startup

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use clap::Parser;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use vision_relay::api::{create_app, ApiSettings, ApiState};
use vision_relay::broadcast::EventBus;
use vision_relay::config::{self, RelayConfig};
use vision_relay::generator::{HttpImageGenerator, ImageGenerator};
use vision_relay::pipeline::{run_drain_scheduler, PipelineOrchestrator, QueueProcessor, StageFloors};
use vision_relay::storage::{MediaStore, RecordStore, SledStore};
use vision_relay::vision::{OllamaDescriber, VisionDescriber};

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "vision-relay")]
#[command(about = "Webcam frame relay: vision descriptions, image generation, live viewers")]
#[command(version)]
struct CliArgs {
    /// Path to relay_config.toml (overrides RELAY_CONFIG and ./relay_config.toml)
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Override the server address (default: "0.0.0.0:3000")
    #[arg(short, long, value_name = "HOST:PORT")]
    addr: Option<String>,

    /// Override the sled data directory
    #[arg(long, value_name = "PATH")]
    data_dir: Option<PathBuf>,

    /// Do not start the background drain scheduler
    #[arg(long)]
    no_queue: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,

    /// Wipe all records and media files on startup.
    /// WARNING: This is destructive and cannot be undone!
    #[arg(long, env = "RESET_DB", value_parser = clap::builder::BoolishValueParser::new(), default_value_t = false)]
    reset_db: bool,
}

// ============================================================================
// Task Names for Supervisor Logging
// ============================================================================

#[derive(Debug, Clone, Copy)]
enum TaskName {
    HttpServer,
    DrainScheduler,
}

impl std::fmt::Display for TaskName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskName::HttpServer => write!(f, "HttpServer"),
            TaskName::DrainScheduler => write!(f, "DrainScheduler"),
        }
    }
}

// ============================================================================
// Startup helpers
// ============================================================================

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    }
}

/// Config file from `--config`, else the standard search order, then CLI
/// overrides on top.
fn load_config(args: &CliArgs) -> Result<RelayConfig> {
    let mut relay_config = match &args.config {
        Some(path) => {
            let mut loaded = RelayConfig::load_from_file(path)?;
            loaded.apply_api_key_override(
                std::env::var(config::defaults::GENERATOR_API_KEY_ENV).ok(),
            );
            info!(path = %path.display(), "Loaded relay config from --config");
            loaded
        }
        None => RelayConfig::load(),
    };

    if let Some(addr) = &args.addr {
        relay_config.server.bind_address = addr.clone();
    }
    if let Some(dir) = &args.data_dir {
        relay_config.storage.data_dir = dir.clone();
    }
    if args.no_queue {
        relay_config.queue.enabled = false;
    }

    relay_config.validate()?;
    Ok(relay_config)
}

/// Remove a directory tree if present, listing what goes.
fn reset_directory(path: &Path) -> Result<()> {
    if !path.exists() {
        info!(path = %path.display(), "Nothing to reset");
        return Ok(());
    }

    warn!("  Removing: {}", path.display());
    if let Ok(entries) = std::fs::read_dir(path) {
        for entry in entries.flatten() {
            let entry_path = entry.path();
            let kind = if entry_path.is_dir() { "DIR " } else { "FILE" };
            warn!("    {} {}", kind, entry_path.display());
        }
    }
    std::fs::remove_dir_all(path)
        .with_context(|| format!("Failed to remove {}", path.display()))?;
    Ok(())
}

fn reset_data(relay_config: &RelayConfig) -> Result<()> {
    warn!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    warn!("  RESET_DB DETECTED - WIPING ALL RECORDS AND MEDIA");
    warn!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    reset_directory(&relay_config.storage.data_dir)?;
    reset_directory(&relay_config.storage.captures_dir)?;
    warn!("  A fresh database will be created on startup.");
    Ok(())
}

// ============================================================================
// Task spawning
// ============================================================================

/// Spawn the HTTP server task into the JoinSet.
fn spawn_http_server(
    task_set: &mut JoinSet<Result<TaskName>>,
    listener: tokio::net::TcpListener,
    app: Router,
    cancel_token: CancellationToken,
) {
    task_set.spawn(async move {
        info!("[HttpServer] Task starting");

        let result = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                cancel_token.cancelled().await;
                info!("[HttpServer] Received shutdown signal");
            })
            .await;

        match result {
            Ok(()) => {
                info!("[HttpServer] Graceful shutdown complete");
                Ok(TaskName::HttpServer)
            }
            Err(e) => {
                error!("[HttpServer] Server error: {}", e);
                Err(anyhow::anyhow!("HTTP server error: {}", e))
            }
        }
    });
}

/// Spawn the background drain scheduler.
fn spawn_drain_scheduler(
    task_set: &mut JoinSet<Result<TaskName>>,
    processor: Arc<QueueProcessor>,
    relay_config: &RelayConfig,
    cancel_token: CancellationToken,
) {
    let interval = relay_config.queue.poll_interval();
    task_set.spawn(async move {
        let triggers = run_drain_scheduler(processor, interval, cancel_token).await;
        info!("[DrainScheduler] Stopped after {} triggers", triggers);
        Ok(TaskName::DrainScheduler)
    });
}

/// Run the supervisor loop: monitor tasks, cancel on failure.
async fn run_supervisor(
    task_set: &mut JoinSet<Result<TaskName>>,
    cancel_token: CancellationToken,
) -> Result<()> {
    info!("🔒 Supervisor: All tasks spawned, monitoring...");

    loop {
        tokio::select! {
            () = cancel_token.cancelled() => {
                info!("🛑 Supervisor: Shutdown signal received");
                break;
            }
            result = task_set.join_next() => {
                match result {
                    Some(Ok(Ok(task_name))) => {
                        info!("🔒 Supervisor: Task {} completed normally", task_name);
                    }
                    Some(Ok(Err(e))) => {
                        error!("🔒 Supervisor: Task failed with error: {}", e);
                        cancel_token.cancel();
                        return Err(e);
                    }
                    Some(Err(e)) => {
                        error!("🔒 Supervisor: Task panicked: {}", e);
                        cancel_token.cancel();
                        return Err(anyhow::anyhow!("Task panicked: {}", e));
                    }
                    None => {
                        info!("🔒 Supervisor: All tasks completed");
                        break;
                    }
                }
            }
        }
    }

    // Let remaining tasks observe the cancellation and finish
    while let Some(result) = task_set.join_next().await {
        match result {
            Ok(Ok(task_name)) => info!("🔒 Supervisor: Task {} stopped", task_name),
            Ok(Err(e)) => warn!("🔒 Supervisor: Task ended with error during shutdown: {}", e),
            Err(e) => warn!("🔒 Supervisor: Task aborted during shutdown: {}", e),
        }
    }

    Ok(())
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();
    init_tracing(args.log_json);

    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    info!("  vision-relay v{}", env!("CARGO_PKG_VERSION"));
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let relay_config = load_config(&args)?;

    // Reset check, BEFORE any storage initialization
    if args.reset_db {
        reset_data(&relay_config)?;
    }

    config::init(relay_config.clone());

    // --- storage ---
    let sled_store = SledStore::open(&relay_config.storage.data_dir)
        .with_context(|| format!("Failed to open store at {}", relay_config.storage.data_dir.display()))?;
    let store: Arc<dyn RecordStore> = Arc::new(sled_store);
    let media = MediaStore::new(&relay_config.storage.captures_dir);
    media.ensure_dir().await.context("Failed to create captures directory")?;
    info!(
        "💾 Store: {} at {} | media: {}",
        store.backend_name(),
        relay_config.storage.data_dir.display(),
        media.dir().display()
    );

    // --- model clients ---
    let call_timeout = relay_config.queue.call_timeout();
    let ollama = OllamaDescriber::from_config(&relay_config.vision, call_timeout);
    if ollama.is_available().await {
        if ollama.is_model_available().await {
            info!("👁️  Vision: {} ready at {}", ollama.model(), relay_config.vision.base_url);
        } else {
            warn!(
                "👁️  Vision: server up but model {} is not installed (ollama pull {})",
                ollama.model(),
                ollama.model()
            );
        }
    } else {
        warn!(
            "👁️  Vision: Ollama not reachable at {}; drains will be skipped until it is",
            relay_config.vision.base_url
        );
    }
    let describer: Arc<dyn VisionDescriber> = Arc::new(ollama);

    let http_generator = HttpImageGenerator::from_config(&relay_config.generator, call_timeout);
    if http_generator.is_configured() {
        info!("🎨 Generator: endpoint configured");
    } else {
        warn!("🎨 Generator: no endpoint configured, start-pipeline will stop after describing");
    }
    let generator: Arc<dyn ImageGenerator> = Arc::new(http_generator);

    // --- pipeline ---
    let events = EventBus::new(relay_config.events.channel_capacity);
    let processor = Arc::new(QueueProcessor::new(
        Arc::clone(&store),
        Arc::clone(&describer),
        media.clone(),
        events.clone(),
        call_timeout,
    ));
    let floors = StageFloors::from(&relay_config.pacing);
    let orchestrator = Arc::new(PipelineOrchestrator::new(
        Arc::clone(&store),
        Arc::clone(&describer),
        generator,
        media.clone(),
        events.clone(),
        floors,
        call_timeout,
    ));
    info!(
        "⏳ Pacing floors: description {:?}, generation {:?}",
        floors.description, floors.generation
    );

    // Graceful shutdown via Ctrl+C
    let cancel_token = CancellationToken::new();
    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("🛑 Received Ctrl+C, initiating shutdown...");
        shutdown_token.cancel();
    });

    // --- HTTP ---
    let state = ApiState {
        store,
        media,
        events,
        processor: Arc::clone(&processor),
        orchestrator,
        describer,
        shutdown: cancel_token.clone(),
    };
    let app = create_app(state, &ApiSettings::from(&relay_config.server));

    let addr: SocketAddr = relay_config
        .server
        .bind_address
        .parse()
        .with_context(|| format!("Invalid bind address {}", relay_config.server.bind_address))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!("🌐 HTTP + websocket listening on http://{}", addr);

    info!("🔒 Supervisor: Initializing task monitoring");
    let mut task_set: JoinSet<Result<TaskName>> = JoinSet::new();
    spawn_http_server(&mut task_set, listener, app, cancel_token.clone());
    if relay_config.queue.enabled {
        spawn_drain_scheduler(&mut task_set, processor, &relay_config, cancel_token.clone());
    } else {
        info!("📭 Drain scheduler disabled");
    }

    run_supervisor(&mut task_set, cancel_token).await?;

    info!("✓ vision-relay shutdown complete");
    Ok(())
}
