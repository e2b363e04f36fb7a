use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::Router;
use tokio::sync::mpsc;
use tower_http::cors::CorsLayer;

use cohost_core::capability::GenerationBackend;

use crate::client::{self, ClientId, ClientRegistry};
use crate::handlers;
use crate::layout::{self, LayoutStore, LayoutSurface};
use crate::relay::{self, ReactionConfig, Relay};

const CLEANUP_INTERVAL: Duration = Duration::from_secs(60);
const INBOUND_CHANNEL_CAPACITY: usize = 1024;

/// Server configuration.
pub struct ServerConfig {
    pub port: u16,
    pub max_send_queue: usize,
    pub reaction: ReactionConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 3388,
            max_send_queue: 256,
            reaction: ReactionConfig::default(),
        }
    }
}

/// Shared application state passed to axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ClientRegistry>,
    pub layout: Arc<LayoutSurface>,
    pub backend: Arc<dyn GenerationBackend>,
    pub message_tx: mpsc::Sender<(ClientId, String)>,
}

/// Build the axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(handlers::health))
        .route("/llm/status", get(handlers::llm_status))
        .route("/llm/models", get(handlers::llm_models))
        .route("/llm/download", post(handlers::llm_download))
        .route("/llm/load", post(handlers::llm_load))
        .route("/llm/unload", post(handlers::llm_unload))
        .route("/layout", get(handlers::layout_get).post(handlers::layout_update))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

/// Create and start the server. Returns a handle keeping its tasks alive.
pub async fn start(
    config: ServerConfig,
    backend: Arc<dyn GenerationBackend>,
    store: Arc<dyn LayoutStore>,
) -> Result<ServerHandle, std::io::Error> {
    let registry = Arc::new(ClientRegistry::new(config.max_send_queue));

    // Durable storage is read exactly once, here.
    let initial = layout::load_initial(store.as_ref());
    let layout = Arc::new(LayoutSurface::new(
        initial,
        store,
        Arc::clone(&registry),
    ));

    let relay = Arc::new(Relay::new(
        Arc::clone(&registry),
        Arc::clone(&backend),
        config.reaction.clone(),
    ));

    // Capability progress notices fan out to all displays.
    let progress_handle = relay::spawn_progress_forwarder(Arc::clone(&registry), &backend);

    let cleanup_handle = client::start_cleanup_task(Arc::clone(&registry), CLEANUP_INTERVAL);

    // Producer frames from every connection funnel through one channel, so
    // raw relays keep a single global order.
    let (message_tx, message_rx) = mpsc::channel::<(ClientId, String)>(INBOUND_CHANNEL_CAPACITY);
    let inbound_handle = tokio::spawn(process_inbound(message_rx, Arc::clone(&relay)));

    let state = AppState {
        registry,
        layout,
        backend,
        message_tx,
    };

    let router = build_router(state);
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    tracing::info!(port = local_addr.port(), "cohost relay started");

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, router).await.ok();
    });

    Ok(ServerHandle {
        port: local_addr.port(),
        _server: server_handle,
        _inbound: inbound_handle,
        _progress: progress_handle,
        _cleanup: cleanup_handle,
    })
}

/// Handle returned by `start()` — keeps background tasks alive.
pub struct ServerHandle {
    pub port: u16,
    _server: tokio::task::JoinHandle<()>,
    _inbound: tokio::task::JoinHandle<()>,
    _progress: tokio::task::JoinHandle<()>,
    _cleanup: tokio::task::JoinHandle<()>,
}

/// Drain producer frames into the relay, one at a time.
async fn process_inbound(mut rx: mpsc::Receiver<(ClientId, String)>, relay: Arc<Relay>) {
    while let Some((client_id, raw)) = rx.recv().await {
        tracing::debug!(client_id = %client_id, "producer frame received");
        relay.handle_inbound(&raw);
    }
}

/// WebSocket upgrade handler.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle a new display connection.
async fn handle_socket(socket: WebSocket, state: AppState) {
    let (client_id, rx) = state.registry.register();
    tracing::info!(client_id = %client_id, "display connected");

    client::handle_ws_connection(socket, client_id, rx, state.registry, state.message_tx).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use cohost_llm::mock::MockBackend;
    use crate::layout::JsonFileStore;

    fn temp_store() -> Arc<JsonFileStore> {
        let dir = std::env::temp_dir().join(format!("cohost-server-{}", uuid::Uuid::now_v7()));
        Arc::new(JsonFileStore::new(dir.join("layout-settings.json")))
    }

    async fn start_test_server(backend: MockBackend) -> ServerHandle {
        let config = ServerConfig {
            port: 0, // random port
            ..Default::default()
        };
        start(config, Arc::new(backend), temp_store()).await.unwrap()
    }

    #[tokio::test]
    async fn server_starts_and_serves_health() {
        let handle = start_test_server(MockBackend::new(vec![])).await;
        assert!(handle.port > 0);

        let url = format!("http://127.0.0.1:{}/health", handle.port);
        let resp = reqwest::get(&url).await.unwrap();
        assert_eq!(resp.status(), 200);

        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn health_ignores_capability_readiness() {
        let handle = start_test_server(MockBackend::not_ready()).await;

        let url = format!("http://127.0.0.1:{}/health", handle.port);
        let resp = reqwest::get(&url).await.unwrap();
        assert_eq!(resp.status(), 200);
    }

    #[tokio::test]
    async fn llm_status_passes_through() {
        let handle = start_test_server(MockBackend::new(vec![])).await;

        let url = format!("http://127.0.0.1:{}/llm/status", handle.port);
        let body: serde_json::Value = reqwest::get(&url).await.unwrap().json().await.unwrap();
        assert_eq!(body["initialized"], true);
        assert_eq!(body["modelLoaded"], true);
    }

    #[tokio::test]
    async fn llm_models_lists_catalog() {
        let handle = start_test_server(MockBackend::new(vec![])).await;

        let url = format!("http://127.0.0.1:{}/llm/models", handle.port);
        let body: serde_json::Value = reqwest::get(&url).await.unwrap().json().await.unwrap();
        assert_eq!(body["mock-model"]["downloaded"], true);
    }

    #[tokio::test]
    async fn layout_roundtrip_over_http() {
        let handle = start_test_server(MockBackend::new(vec![])).await;
        let base = format!("http://127.0.0.1:{}", handle.port);
        let client = reqwest::Client::new();

        let initial: serde_json::Value = client
            .get(format!("{base}/layout"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(initial["showFaceCam"], true);

        let merged: serde_json::Value = client
            .post(format!("{base}/layout"))
            .json(&serde_json::json!({"showFaceCam": false}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(merged["showFaceCam"], false);
        assert_eq!(merged["showHandCam"], true);

        let after: serde_json::Value = client
            .get(format!("{base}/layout"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(after["showFaceCam"], false);
    }

    #[tokio::test]
    async fn download_without_model_name_is_rejected() {
        let handle = start_test_server(MockBackend::new(vec![])).await;
        let client = reqwest::Client::new();

        let resp = client
            .post(format!("http://127.0.0.1:{}/llm/download", handle.port))
            .json(&serde_json::json!({}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);

        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["ok"], false);
        assert!(body["error"].as_str().unwrap().contains("modelName"));
    }

    #[tokio::test]
    async fn load_rejected_while_not_ready() {
        let handle = start_test_server(MockBackend::not_ready()).await;
        let client = reqwest::Client::new();

        let resp = client
            .post(format!("http://127.0.0.1:{}/llm/load", handle.port))
            .json(&serde_json::json!({"modelName": "mock-model"}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 503);

        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["ok"], false);
    }

    #[tokio::test]
    async fn lifecycle_actions_accepted() {
        let handle = start_test_server(MockBackend::new(vec![])).await;
        let base = format!("http://127.0.0.1:{}", handle.port);
        let client = reqwest::Client::new();

        for path in ["/llm/download", "/llm/load"] {
            let resp = client
                .post(format!("{base}{path}"))
                .json(&serde_json::json!({"modelName": "mock-model"}))
                .send()
                .await
                .unwrap();
            assert_eq!(resp.status(), 200, "POST {path}");
            let body: serde_json::Value = resp.json().await.unwrap();
            assert_eq!(body["ok"], true);
        }

        let resp = client
            .post(format!("{base}/llm/unload"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
    }

    #[tokio::test]
    async fn build_router_creates_routes() {
        let registry = Arc::new(ClientRegistry::new(32));
        let layout = Arc::new(LayoutSurface::new(
            Default::default(),
            temp_store(),
            Arc::clone(&registry),
        ));
        let (message_tx, _rx) = mpsc::channel(32);

        let state = AppState {
            registry,
            layout,
            backend: Arc::new(MockBackend::new(vec![])),
            message_tx,
        };

        let _router = build_router(state);
        // If this doesn't panic, the router was built successfully
    }
}
