//! Outbound messages delivered to viewers over the push channel.

use serde::{Deserialize, Serialize};

use crate::event::TraceEvent;
use crate::ids::MessageId;

/// One trace event as fanned out to a viewer: the normalized event plus
/// per-delivery presentation metadata.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FirehoseMessage {
    pub id: MessageId,
    pub display_time: String,
    #[serde(flatten)]
    pub event: TraceEvent,
}

/// Everything the server pushes to viewers, tagged for the client.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WireMessage {
    /// Sent to a newly connected viewer.
    #[serde(rename = "connection-status", rename_all = "camelCase")]
    ConnectionStatus {
        connected: bool,
        client_count: u32,
        monitoring_active: bool,
    },

    /// Broadcast on session transitions; unicast for acknowledgments.
    #[serde(rename = "monitoring-status")]
    MonitoringStatus { active: bool, message: String },

    #[serde(rename = "firehose-message")]
    Firehose(FirehoseMessage),

    /// Broadcast when the trace source fails.
    #[serde(rename = "monitoring-error")]
    MonitoringError { error: String, timestamp: String },
}
