use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::errors::CapabilityError;

/// Options for a single generation call. These are relay-level constants,
/// not per-request input.
#[derive(Clone, Copy, Debug)]
pub struct GenerateOptions {
    pub max_tokens: u32,
    pub temperature: f64,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self {
            max_tokens: 100,
            temperature: 0.8,
        }
    }
}

/// Snapshot of the capability adapter's state.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilityStatus {
    pub initialized: bool,
    pub model_loaded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loaded_model: Option<String>,
}

/// Per-model download/load state as reported by `list_available`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelState {
    pub downloaded: bool,
    pub display_name: String,
    pub size_bytes: u64,
}

/// Kind tag for out-of-band capability progress notifications.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProgressKind {
    #[serde(rename = "download-progress")]
    DownloadProgress,
    #[serde(rename = "download-complete")]
    DownloadComplete,
    #[serde(rename = "load-complete")]
    LoadComplete,
    #[serde(rename = "unload-complete")]
    UnloadComplete,
    #[serde(rename = "error")]
    Error,
}

/// One progress notification. Fields are forwarded to displays verbatim
/// as the payload of an `llm-progress` event.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressNotice {
    #[serde(rename = "type")]
    pub kind: ProgressKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProgressNotice {
    pub fn download_progress(model: &str, percent: f64) -> Self {
        Self {
            kind: ProgressKind::DownloadProgress,
            progress: Some(percent),
            model_name: Some(model.to_string()),
            error: None,
        }
    }

    pub fn download_complete(model: &str) -> Self {
        Self {
            kind: ProgressKind::DownloadComplete,
            progress: Some(100.0),
            model_name: Some(model.to_string()),
            error: None,
        }
    }

    pub fn load_complete(model: &str) -> Self {
        Self {
            kind: ProgressKind::LoadComplete,
            progress: None,
            model_name: Some(model.to_string()),
            error: None,
        }
    }

    pub fn unload_complete() -> Self {
        Self {
            kind: ProgressKind::UnloadComplete,
            progress: None,
            model_name: None,
            error: None,
        }
    }

    pub fn error(model: Option<&str>, message: impl Into<String>) -> Self {
        Self {
            kind: ProgressKind::Error,
            progress: None,
            model_name: model.map(str::to_string),
            error: Some(message.into()),
        }
    }
}

/// The generation capability consumed by the relay.
///
/// Implementations wrap a locally hosted model backend. The relay treats the
/// whole surface as optional: `is_ready` is a non-blocking flag flipped
/// exactly once by a successful `initialize`, and every other call may be
/// rejected with `CapabilityError::NotReady` before that.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Non-blocking readiness flag read.
    fn is_ready(&self) -> bool;

    /// One-time initialization. Flips the readiness flag on success.
    async fn initialize(&self) -> Result<(), CapabilityError>;

    /// Produce a completion for `prompt`. Requires a loaded model.
    async fn generate(
        &self,
        prompt: &str,
        options: &GenerateOptions,
    ) -> Result<String, CapabilityError>;

    fn status(&self) -> CapabilityStatus;

    /// Known models with their current download state.
    fn list_available(&self) -> BTreeMap<String, ModelState>;

    /// Start fetching a model. Accepted synchronously; the transfer runs in
    /// the background with progress reported on the notification channel.
    async fn download(&self, model_id: &str) -> Result<(), CapabilityError>;

    async fn load(&self, model_id: &str) -> Result<(), CapabilityError>;

    async fn unload(&self) -> Result<(), CapabilityError>;

    /// Subscribe to out-of-band progress notifications.
    fn subscribe_progress(&self) -> broadcast::Receiver<ProgressNotice>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_options_defaults() {
        let opts = GenerateOptions::default();
        assert_eq!(opts.max_tokens, 100);
        assert!((opts.temperature - 0.8).abs() < f64::EPSILON);
    }

    #[test]
    fn progress_notice_wire_shape() {
        let json =
            serde_json::to_value(ProgressNotice::download_progress("qwen2.5-3b-instruct", 42.0))
                .unwrap();
        assert_eq!(json["type"], "download-progress");
        assert_eq!(json["progress"], 42.0);
        assert_eq!(json["modelName"], "qwen2.5-3b-instruct");
        assert!(json.get("error").is_none());
    }

    #[test]
    fn error_notice_carries_message() {
        let json = serde_json::to_value(ProgressNotice::error(Some("m"), "disk full")).unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["error"], "disk full");
    }

    #[test]
    fn status_omits_absent_model() {
        let json = serde_json::to_value(CapabilityStatus {
            initialized: true,
            model_loaded: false,
            loaded_model: None,
        })
        .unwrap();
        assert_eq!(json["initialized"], true);
        assert_eq!(json["modelLoaded"], false);
        assert!(json.get("loadedModel").is_none());
    }
}
