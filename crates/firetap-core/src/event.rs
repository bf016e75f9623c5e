use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Sentinel target when the trace routing key carries no second segment.
pub const UNKNOWN_TARGET: &str = "unknown";

/// Whether a trace record captured a message entering an exchange or being
/// delivered to a queue.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TraceAction {
    Publish,
    Deliver,
}

impl TraceAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Publish => "publish",
            Self::Deliver => "deliver",
        }
    }
}

/// One normalized broker trace record. Immutable once built; identity is
/// structural at this layer (delivery ids are assigned at fan-out time).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceEvent {
    /// Capture timestamp.
    pub occurred_at: DateTime<Utc>,
    pub action: TraceAction,
    /// Exchange or queue name from the routing key's second segment.
    pub target: String,
    pub routing_key: String,
    pub exchange_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub headers: Option<serde_json::Map<String, serde_json::Value>>,
    pub body_size: usize,
    /// Decoded JSON when the payload parses, otherwise the raw text.
    pub body: serde_json::Value,
}
