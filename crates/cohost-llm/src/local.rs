//! Generation backend wrapping a local `llama-server` process.
//!
//! The backend owns three concerns: fetching GGUF builds from the catalog
//! into a models directory, supervising one `llama-server` child at a time,
//! and turning `/completion` responses into plain reaction text. Download
//! transfers run in spawned tasks and report through the progress channel;
//! the accepting call returns as soon as the transfer starts.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::RwLock;
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tokio::sync::{broadcast, Mutex};

use cohost_core::capability::{
    CapabilityStatus, GenerateOptions, GenerationBackend, ModelState, ProgressNotice,
};
use cohost_core::errors::CapabilityError;

use crate::catalog::{self, GgufModel};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const PROGRESS_CHANNEL_CAPACITY: usize = 64;
const HEALTH_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Configuration for the local backend.
#[derive(Clone, Debug)]
pub struct LocalConfig {
    /// Directory holding downloaded GGUF files.
    pub models_dir: PathBuf,
    /// Path to the `llama-server` binary (resolved via PATH when bare).
    pub server_bin: PathBuf,
    /// Port the child server listens on.
    pub server_port: u16,
    /// How long to wait for a loaded model to report healthy.
    pub startup_timeout: Duration,
}

impl Default for LocalConfig {
    fn default() -> Self {
        let home = std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"));
        Self {
            models_dir: home.join(".cohost").join("models"),
            server_bin: PathBuf::from("llama-server"),
            server_port: 3391,
            startup_timeout: Duration::from_secs(120),
        }
    }
}

struct LoadedModel {
    child: tokio::process::Child,
    model_id: String,
}

/// `GenerationBackend` implementation backed by llama.cpp's `llama-server`.
pub struct LocalBackend {
    config: LocalConfig,
    client: reqwest::Client,
    ready: AtomicBool,
    loaded: Mutex<Option<LoadedModel>>,
    // Mirror of the loaded model id for the synchronous status() read.
    loaded_model_id: RwLock<Option<String>>,
    progress_tx: broadcast::Sender<ProgressNotice>,
}

impl LocalBackend {
    pub fn new(config: LocalConfig) -> Self {
        let (progress_tx, _) = broadcast::channel(PROGRESS_CHANNEL_CAPACITY);
        Self {
            config,
            client: reqwest::Client::builder()
                .connect_timeout(CONNECT_TIMEOUT)
                .build()
                .unwrap_or_default(),
            ready: AtomicBool::new(false),
            loaded: Mutex::new(None),
            loaded_model_id: RwLock::new(None),
            progress_tx,
        }
    }

    fn completion_url(&self) -> String {
        format!("http://127.0.0.1:{}/completion", self.config.server_port)
    }

    fn health_url(&self) -> String {
        format!("http://127.0.0.1:{}/health", self.config.server_port)
    }

    fn notify(&self, notice: ProgressNotice) {
        // No receivers yet is fine; notices are best-effort.
        let _ = self.progress_tx.send(notice);
    }

    fn require_ready(&self) -> Result<(), CapabilityError> {
        if self.ready.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(CapabilityError::NotReady)
        }
    }

    /// Wait for the child server to answer its health probe.
    async fn await_healthy(&self) -> Result<(), CapabilityError> {
        let deadline = tokio::time::Instant::now() + self.config.startup_timeout;
        loop {
            match self.client.get(self.health_url()).send().await {
                Ok(resp) if resp.status().is_success() => return Ok(()),
                _ => {}
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(CapabilityError::Timeout(self.config.startup_timeout));
            }
            tokio::time::sleep(HEALTH_POLL_INTERVAL).await;
        }
    }
}

/// Stream `model`'s GGUF into `models_dir`, reporting whole-percent steps.
async fn download_file(
    client: reqwest::Client,
    model: &'static GgufModel,
    models_dir: PathBuf,
    progress_tx: broadcast::Sender<ProgressNotice>,
) -> Result<(), CapabilityError> {
    let resp = client
        .get(model.url)
        .send()
        .await
        .and_then(reqwest::Response::error_for_status)
        .map_err(|e| CapabilityError::Http(e.to_string()))?;

    let total = resp.content_length().unwrap_or(model.size_bytes);
    let final_path = model.path_in(&models_dir);
    let part_path = final_path.with_extension("gguf.part");

    let mut file = tokio::fs::File::create(&part_path)
        .await
        .map_err(|e| CapabilityError::Io(e.to_string()))?;

    let mut stream = resp.bytes_stream();
    let mut received: u64 = 0;
    let mut last_percent: u64 = 0;

    while let Some(chunk) = stream.next().await {
        let chunk: bytes::Bytes = chunk.map_err(|e| CapabilityError::Http(e.to_string()))?;
        file.write_all(&chunk)
            .await
            .map_err(|e| CapabilityError::Io(e.to_string()))?;
        received += chunk.len() as u64;

        let percent = if total > 0 {
            (received * 100 / total).min(100)
        } else {
            0
        };
        if percent > last_percent {
            last_percent = percent;
            let _ = progress_tx.send(ProgressNotice::download_progress(model.id, percent as f64));
        }
    }

    file.flush()
        .await
        .map_err(|e| CapabilityError::Io(e.to_string()))?;
    drop(file);

    tokio::fs::rename(&part_path, &final_path)
        .await
        .map_err(|e| CapabilityError::Io(e.to_string()))?;

    Ok(())
}

#[derive(Deserialize)]
struct CompletionResponse {
    content: String,
}

#[async_trait]
impl GenerationBackend for LocalBackend {
    fn name(&self) -> &str {
        "local-llama"
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    async fn initialize(&self) -> Result<(), CapabilityError> {
        tokio::fs::create_dir_all(&self.config.models_dir)
            .await
            .map_err(|e| CapabilityError::Io(e.to_string()))?;
        self.ready.store(true, Ordering::Release);
        tracing::info!(
            models_dir = %self.config.models_dir.display(),
            "generation backend initialized"
        );
        Ok(())
    }

    async fn generate(
        &self,
        prompt: &str,
        options: &GenerateOptions,
    ) -> Result<String, CapabilityError> {
        self.require_ready()?;
        if self.loaded_model_id.read().is_none() {
            return Err(CapabilityError::NoModelLoaded);
        }

        let body = serde_json::json!({
            "prompt": prompt,
            "n_predict": options.max_tokens,
            "temperature": options.temperature,
            "stream": false,
        });

        let resp = self
            .client
            .post(self.completion_url())
            .json(&body)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| CapabilityError::Http(e.to_string()))?;

        let completion: CompletionResponse = resp
            .json()
            .await
            .map_err(|e| CapabilityError::Backend(e.to_string()))?;

        Ok(completion.content)
    }

    fn status(&self) -> CapabilityStatus {
        let loaded = self.loaded_model_id.read().clone();
        CapabilityStatus {
            initialized: self.is_ready(),
            model_loaded: loaded.is_some(),
            loaded_model: loaded,
        }
    }

    fn list_available(&self) -> BTreeMap<String, ModelState> {
        catalog::all_models()
            .iter()
            .map(|m| {
                (
                    m.id.to_string(),
                    ModelState {
                        downloaded: m.is_downloaded(&self.config.models_dir),
                        display_name: m.display_name.to_string(),
                        size_bytes: m.size_bytes,
                    },
                )
            })
            .collect()
    }

    async fn download(&self, model_id: &str) -> Result<(), CapabilityError> {
        self.require_ready()?;
        let model = catalog::find_model(model_id)
            .ok_or_else(|| CapabilityError::UnknownModel(model_id.to_string()))?;

        if model.is_downloaded(&self.config.models_dir) {
            self.notify(ProgressNotice::download_complete(model.id));
            return Ok(());
        }

        let client = self.client.clone();
        let models_dir = self.config.models_dir.clone();
        let progress_tx = self.progress_tx.clone();

        tokio::spawn(async move {
            tracing::info!(model = model.id, "model download started");
            match download_file(client, model, models_dir, progress_tx.clone()).await {
                Ok(()) => {
                    tracing::info!(model = model.id, "model download complete");
                    let _ = progress_tx.send(ProgressNotice::download_complete(model.id));
                }
                Err(e) => {
                    tracing::warn!(model = model.id, error = %e, "model download failed");
                    let _ =
                        progress_tx.send(ProgressNotice::error(Some(model.id), e.to_string()));
                }
            }
        });

        Ok(())
    }

    async fn load(&self, model_id: &str) -> Result<(), CapabilityError> {
        self.require_ready()?;
        let model = catalog::find_model(model_id)
            .ok_or_else(|| CapabilityError::UnknownModel(model_id.to_string()))?;
        let model_path = model.path_in(&self.config.models_dir);
        if !model_path.is_file() {
            return Err(CapabilityError::NotDownloaded(model_id.to_string()));
        }

        let mut loaded = self.loaded.lock().await;

        // Replace any previously loaded model.
        if let Some(mut prev) = loaded.take() {
            *self.loaded_model_id.write() = None;
            let _ = prev.child.kill().await;
            tracing::info!(model = %prev.model_id, "previous model unloaded");
        }

        let child = tokio::process::Command::new(&self.config.server_bin)
            .arg("-m")
            .arg(&model_path)
            .arg("--host")
            .arg("127.0.0.1")
            .arg("--port")
            .arg(self.config.server_port.to_string())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                let err = CapabilityError::Io(format!(
                    "failed to spawn {}: {e}",
                    self.config.server_bin.display()
                ));
                self.notify(ProgressNotice::error(Some(model.id), err.to_string()));
                err
            })?;

        *loaded = Some(LoadedModel {
            child,
            model_id: model.id.to_string(),
        });

        if let Err(e) = self.await_healthy().await {
            if let Some(mut failed) = loaded.take() {
                let _ = failed.child.kill().await;
            }
            self.notify(ProgressNotice::error(Some(model.id), e.to_string()));
            return Err(e);
        }

        *self.loaded_model_id.write() = Some(model.id.to_string());
        self.notify(ProgressNotice::load_complete(model.id));
        tracing::info!(model = model.id, "model loaded");
        Ok(())
    }

    async fn unload(&self) -> Result<(), CapabilityError> {
        let mut loaded = self.loaded.lock().await;
        if let Some(mut prev) = loaded.take() {
            *self.loaded_model_id.write() = None;
            let _ = prev.child.kill().await;
            self.notify(ProgressNotice::unload_complete());
            tracing::info!(model = %prev.model_id, "model unloaded");
        }
        Ok(())
    }

    fn subscribe_progress(&self) -> broadcast::Receiver<ProgressNotice> {
        self.progress_tx.subscribe()
    }
}
