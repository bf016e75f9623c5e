use std::sync::Arc;

use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use tokio::sync::mpsc;
use tower_http::cors::CorsLayer;

use firetap_core::config::MonitorConfig;
use firetap_core::ids::ViewerId;
use firetap_core::session::SessionInput;
use firetap_source::consumer::TraceConsumer;

use crate::broadcaster::Broadcaster;
use crate::coordinator::{self, CoordinatorHandle, SessionSnapshot};
use crate::rpc::{self, RpcRequest, RpcResponse};
use crate::viewer::{self, ViewerRegistry};
use crate::bridge;

const TRACE_QUEUE: usize = 1024;
const REQUEST_QUEUE: usize = 1024;

/// Server configuration.
pub struct ServerConfig {
    pub port: u16,
    pub max_send_queue: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 9090,
            max_send_queue: 256,
        }
    }
}

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ViewerRegistry>,
    pub inputs: mpsc::Sender<SessionInput>,
    pub snapshot: Arc<SessionSnapshot>,
    pub requests_tx: mpsc::Sender<(ViewerId, String)>,
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

/// Create and start the server. The returned handle keeps the background
/// tasks alive.
pub async fn start(
    config: ServerConfig,
    monitor: MonitorConfig,
    source: Arc<dyn TraceConsumer>,
) -> Result<ServerHandle, std::io::Error> {
    let registry = Arc::new(ViewerRegistry::new(config.max_send_queue));
    let broadcaster = Arc::new(Broadcaster::new(Arc::clone(&registry)));

    // Trace events bypass the session loop: source -> bridge -> viewers.
    let (trace_tx, trace_rx) = mpsc::channel(TRACE_QUEUE);
    let coordinator = coordinator::spawn(source, Arc::clone(&broadcaster), trace_tx, monitor);
    let bridge_handle = bridge::spawn(trace_rx, Arc::clone(&broadcaster));

    let (requests_tx, requests_rx) = mpsc::channel::<(ViewerId, String)>(REQUEST_QUEUE);
    let rpc_handle = tokio::spawn(process_requests(
        requests_rx,
        coordinator.inputs.clone(),
        Arc::clone(&coordinator.snapshot),
        Arc::clone(&registry),
    ));

    let state = AppState {
        registry,
        inputs: coordinator.inputs.clone(),
        snapshot: Arc::clone(&coordinator.snapshot),
        requests_tx,
    };

    let router = build_router(state);
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    tracing::info!(port = local_addr.port(), "firetap server started");

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, router).await.ok();
    });

    Ok(ServerHandle {
        port: local_addr.port(),
        _coordinator: coordinator,
        _server: server_handle,
        _bridge: bridge_handle,
        _rpc: rpc_handle,
    })
}

/// Handle returned by `start()`; keeps background tasks alive.
pub struct ServerHandle {
    pub port: u16,
    _coordinator: CoordinatorHandle,
    _server: tokio::task::JoinHandle<()>,
    _bridge: tokio::task::JoinHandle<()>,
    _rpc: tokio::task::JoinHandle<()>,
}

/// WebSocket upgrade handler.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle a new WebSocket connection for its whole lifetime. Presence inputs
/// are sent exactly once on either side of the connection.
async fn handle_socket(socket: WebSocket, state: AppState) {
    let (viewer_id, rx) = state.registry.register();
    tracing::info!(viewer_id = %viewer_id, "viewer connected");
    let _ = state
        .inputs
        .send(SessionInput::ViewerConnected(viewer_id.clone()))
        .await;

    viewer::handle_ws_connection(
        socket,
        viewer_id.clone(),
        rx,
        Arc::clone(&state.registry),
        state.requests_tx.clone(),
    )
    .await;

    tracing::info!(viewer_id = %viewer_id, "viewer disconnected");
    let _ = state
        .inputs
        .send(SessionInput::ViewerDisconnected(viewer_id))
        .await;
}

/// Health check HTTP endpoint.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    axum::Json(serde_json::json!({
        "status": "healthy",
        "clientCount": state.snapshot.viewer_count(),
        "monitoringActive": state.snapshot.monitoring_active(),
    }))
}

/// Process incoming requests from viewer WebSockets.
async fn process_requests(
    mut requests: mpsc::Receiver<(ViewerId, String)>,
    inputs: mpsc::Sender<SessionInput>,
    snapshot: Arc<SessionSnapshot>,
    registry: Arc<ViewerRegistry>,
) {
    while let Some((viewer_id, raw)) = requests.recv().await {
        let request: RpcRequest = match serde_json::from_str(&raw) {
            Ok(request) => request,
            Err(_) => {
                if let Ok(json) = serde_json::to_string(&RpcResponse::parse_error()) {
                    registry.send_to(&viewer_id, &json);
                }
                continue;
            }
        };

        let response = rpc::dispatch(&inputs, &snapshot, &viewer_id, request).await;
        if let Ok(json) = serde_json::to_string(&response) {
            registry.send_to(&viewer_id, &json);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use firetap_source::mock::MockTraceConsumer;

    fn test_source() -> Arc<dyn TraceConsumer> {
        Arc::new(MockTraceConsumer::new())
    }

    #[tokio::test]
    async fn server_starts_and_serves_health() {
        let config = ServerConfig {
            port: 0, // random port
            ..Default::default()
        };

        let handle = start(config, MonitorConfig::default(), test_source())
            .await
            .unwrap();
        assert!(handle.port > 0);

        let url = format!("http://127.0.0.1:{}/health", handle.port);
        let resp = reqwest::get(&url).await.unwrap();
        assert_eq!(resp.status(), 200);

        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["clientCount"], 0);
        assert_eq!(body["monitoringActive"], false);
    }

    #[tokio::test]
    async fn build_router_creates_routes() {
        let registry = Arc::new(ViewerRegistry::new(32));
        let snapshot = Arc::new(SessionSnapshot::default());
        let (inputs, _inputs_rx) = mpsc::channel(8);
        let (requests_tx, _requests_rx) = mpsc::channel(8);

        let state = AppState {
            registry,
            inputs,
            snapshot,
            requests_tx,
        };

        let _router = build_router(state);
    }

    #[tokio::test]
    async fn parse_error_goes_back_to_sender() {
        let registry = Arc::new(ViewerRegistry::new(32));
        let snapshot = Arc::new(SessionSnapshot::default());
        let (inputs, _inputs_rx) = mpsc::channel(8);
        let (requests_tx, requests_rx) = mpsc::channel(8);

        let _task = tokio::spawn(process_requests(
            requests_rx,
            inputs,
            Arc::clone(&snapshot),
            Arc::clone(&registry),
        ));

        let (viewer_id, mut rx) = registry.register();
        requests_tx
            .send((viewer_id, "not json".to_string()))
            .await
            .unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        let msg: serde_json::Value = serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(msg["error"]["code"], "PARSE_ERROR");
    }
}
