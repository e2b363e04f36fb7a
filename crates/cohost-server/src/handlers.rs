//! Request/response endpoints, decoupled from the relay's event model.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use cohost_core::capability::{CapabilityStatus, ModelState};
use cohost_core::errors::CapabilityError;
use cohost_core::layout::{LayoutPatch, LayoutSettings};

use crate::server::AppState;

/// Failure envelope: non-2xx with `{ok: false, error}`.
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn from_capability(err: &CapabilityError) -> Self {
        let status = match err {
            CapabilityError::NotReady => StatusCode::SERVICE_UNAVAILABLE,
            CapabilityError::UnknownModel(_) | CapabilityError::NotDownloaded(_) => {
                StatusCode::BAD_REQUEST
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(serde_json::json!({"ok": false, "error": self.message})),
        )
            .into_response()
    }
}

fn accepted() -> Json<serde_json::Value> {
    Json(serde_json::json!({"ok": true}))
}

fn require_model_name(body: &serde_json::Value) -> Result<&str, ApiError> {
    body.get("modelName")
        .and_then(|v| v.as_str())
        .ok_or_else(|| ApiError::bad_request("missing required field: modelName"))
}

/// Process liveness only; no dependency on capability readiness.
pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

pub async fn llm_status(State(state): State<AppState>) -> Json<CapabilityStatus> {
    Json(state.backend.status())
}

pub async fn llm_models(State(state): State<AppState>) -> Json<BTreeMap<String, ModelState>> {
    Json(state.backend.list_available())
}

/// Start a model download. The response only confirms acceptance; the
/// transfer itself runs in the background with progress on the broadcast
/// channel.
pub async fn llm_download(
    State(state): State<AppState>,
    Json(body): Json<serde_json::Value>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let model_name = require_model_name(&body)?;
    state
        .backend
        .download(model_name)
        .await
        .map_err(|e| ApiError::from_capability(&e))?;
    Ok(accepted())
}

/// Start loading a model. Accepted as soon as the task is spawned;
/// completion or failure is observable via `llm-progress` or a status poll.
pub async fn llm_load(
    State(state): State<AppState>,
    Json(body): Json<serde_json::Value>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let model_name = require_model_name(&body)?.to_string();
    if !state.backend.is_ready() {
        return Err(ApiError::from_capability(&CapabilityError::NotReady));
    }

    let backend = Arc::clone(&state.backend);
    tokio::spawn(async move {
        if let Err(e) = backend.load(&model_name).await {
            tracing::warn!(model = %model_name, error = %e, "model load failed");
        }
    });

    Ok(accepted())
}

pub async fn llm_unload(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    let backend = Arc::clone(&state.backend);
    tokio::spawn(async move {
        if let Err(e) = backend.unload().await {
            tracing::warn!(error = %e, "model unload failed");
        }
    });
    Ok(accepted())
}

pub async fn layout_get(State(state): State<AppState>) -> Json<LayoutSettings> {
    Json(state.layout.get().await)
}

/// Merge a partial patch, persist, broadcast, and return the full value.
pub async fn layout_update(
    State(state): State<AppState>,
    Json(body): Json<serde_json::Value>,
) -> Result<Json<LayoutSettings>, ApiError> {
    let patch: LayoutPatch = serde_json::from_value(body)
        .map_err(|e| ApiError::bad_request(format!("invalid layout patch: {e}")))?;
    Ok(Json(state.layout.update(&patch).await))
}
