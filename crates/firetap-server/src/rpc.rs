//! JSON-RPC surface for viewer requests sent over the WebSocket.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use firetap_core::ids::ViewerId;
use firetap_core::session::SessionInput;

use crate::coordinator::SessionSnapshot;

/// Request sent by a viewer as a text frame.
#[derive(Debug, Deserialize)]
pub struct RpcRequest {
    pub method: String,
    pub params: Option<serde_json::Value>,
    pub id: Option<serde_json::Value>,
}

/// Response wire format: `{ id, success, result?, error?: { code, message } }`.
#[derive(Debug, Serialize)]
pub struct RpcResponse {
    pub id: Option<serde_json::Value>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

#[derive(Debug, Serialize)]
pub struct RpcError {
    pub code: String,
    pub message: String,
}

impl RpcResponse {
    pub fn success(id: Option<serde_json::Value>, result: serde_json::Value) -> Self {
        Self {
            id,
            success: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: Option<serde_json::Value>, code: &str, message: impl Into<String>) -> Self {
        Self {
            id,
            success: false,
            result: None,
            error: Some(RpcError {
                code: code.to_string(),
                message: message.into(),
            }),
        }
    }

    pub fn method_not_found(id: Option<serde_json::Value>, method: &str) -> Self {
        Self::error(id, "METHOD_NOT_FOUND", format!("Method not found: {method}"))
    }

    pub fn parse_error() -> Self {
        Self::error(None, "PARSE_ERROR", "Parse error")
    }

    pub fn internal_error(id: Option<serde_json::Value>, message: impl Into<String>) -> Self {
        Self::error(id, "INTERNAL_ERROR", message)
    }
}

/// Route one viewer request.
///
/// Start/stop are acknowledged immediately; the session outcome arrives
/// asynchronously as a `monitoring-status` notice once the coordinator
/// processes the input.
pub async fn dispatch(
    inputs: &mpsc::Sender<SessionInput>,
    snapshot: &SessionSnapshot,
    viewer: &ViewerId,
    request: RpcRequest,
) -> RpcResponse {
    match request.method.as_str() {
        "monitor.start" => {
            if inputs
                .send(SessionInput::StartRequested(viewer.clone()))
                .await
                .is_err()
            {
                return RpcResponse::internal_error(request.id, "session loop unavailable");
            }
            RpcResponse::success(request.id, serde_json::json!({"acknowledged": true}))
        }
        "monitor.stop" => {
            if inputs
                .send(SessionInput::StopRequested(viewer.clone()))
                .await
                .is_err()
            {
                return RpcResponse::internal_error(request.id, "session loop unavailable");
            }
            RpcResponse::success(request.id, serde_json::json!({"acknowledged": true}))
        }
        "monitor.status" => RpcResponse::success(
            request.id,
            serde_json::json!({
                "active": snapshot.monitoring_active(),
                "clientCount": snapshot.viewer_count(),
            }),
        ),
        "system.ping" | "health" => {
            RpcResponse::success(request.id, serde_json::json!({"status": "healthy"}))
        }
        other => RpcResponse::method_not_found(request.id, other),
    }
}
