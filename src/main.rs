use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;

use cohost_core::capability::GenerationBackend;
use cohost_llm::{LocalBackend, LocalConfig};
use cohost_server::{JsonFileStore, ServerConfig};
use cohost_telemetry::TelemetryConfig;

/// AI co-host relay for stream overlays: fans highlighted content out to
/// connected displays and reacts to it with a locally hosted model.
#[derive(Parser, Debug)]
#[command(name = "cohost", version)]
struct Args {
    /// Port for the HTTP + WebSocket server.
    #[arg(long, default_value_t = 3388)]
    port: u16,

    /// Data directory (models, layout settings, log database).
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Path to the llama-server binary.
    #[arg(long, default_value = "llama-server")]
    llama_server: PathBuf,

    /// Disable the SQLite log sink.
    #[arg(long)]
    no_log_db: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let data_dir = args.data_dir.unwrap_or_else(|| dirs_home().join(".cohost"));

    let _telemetry = cohost_telemetry::init_telemetry(TelemetryConfig {
        log_to_sqlite: !args.no_log_db,
        log_db_path: data_dir.join("database").join("logs.db"),
        ..Default::default()
    });

    tracing::info!(data_dir = %data_dir.display(), "starting cohost");

    let store = Arc::new(JsonFileStore::new(data_dir.join("layout-settings.json")));

    let backend = Arc::new(LocalBackend::new(LocalConfig {
        models_dir: data_dir.join("models"),
        server_bin: args.llama_server,
        ..Default::default()
    }));

    // Boot the capability in the background; the relay runs without it and
    // reports readiness to displays as events come in.
    tokio::spawn(bootstrap_capability(Arc::clone(&backend)));

    let config = ServerConfig {
        port: args.port,
        ..Default::default()
    };
    let handle = cohost_server::start(config, backend, store)
        .await
        .context("failed to start server")?;

    tracing::info!(port = handle.port, "cohost ready");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl+c")?;

    tracing::info!("shutting down");
    Ok(())
}

/// Initialize the backend and auto-load the first model already on disk.
async fn bootstrap_capability(backend: Arc<LocalBackend>) {
    if let Err(e) = backend.initialize().await {
        tracing::error!(error = %e, "generation backend failed to initialize");
        return;
    }

    let downloaded = backend
        .list_available()
        .into_iter()
        .find(|(_, state)| state.downloaded);

    match downloaded {
        Some((model_id, _)) => {
            tracing::info!(model = %model_id, "auto-loading downloaded model");
            if let Err(e) = backend.load(&model_id).await {
                tracing::warn!(model = %model_id, error = %e, "auto-load failed");
            }
        }
        None => {
            tracing::info!("no models downloaded yet; trigger one via POST /llm/download");
        }
    }
}

fn dirs_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}
