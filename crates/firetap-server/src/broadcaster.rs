//! Fan-out of trace events and session notices to connected viewers.

use std::sync::Arc;

use chrono::{Local, Utc};

use firetap_core::event::TraceEvent;
use firetap_core::ids::{MessageId, ViewerId};
use firetap_core::session::Notice;
use firetap_core::wire::{FirehoseMessage, WireMessage};

use crate::viewer::ViewerRegistry;

pub struct Broadcaster {
    registry: Arc<ViewerRegistry>,
}

impl Broadcaster {
    pub fn new(registry: Arc<ViewerRegistry>) -> Self {
        Self { registry }
    }

    /// Fan the event out to every viewer connected right now, stamping each
    /// delivery with its own id and a shared display time.
    ///
    /// Delivery is best-effort to channels open at call time; viewers
    /// connecting later never receive it (no backlog).
    pub fn publish_event(&self, event: TraceEvent) {
        let display_time = Local::now().format("%H:%M:%S").to_string();
        for viewer in self.registry.connected_ids() {
            let message = WireMessage::Firehose(FirehoseMessage {
                id: MessageId::new(),
                display_time: display_time.clone(),
                event: event.clone(),
            });
            match serde_json::to_string(&message) {
                Ok(json) => {
                    self.registry.send_to(&viewer, &json);
                }
                Err(error) => tracing::error!(%error, "failed to encode firehose message"),
            }
        }
    }

    /// Broadcast a session notice to every viewer.
    pub fn publish(&self, notice: Notice) {
        let message = Self::to_wire(notice);
        self.broadcast(&message);
    }

    /// Unicast a session notice to one viewer.
    pub fn notify(&self, viewer: &ViewerId, notice: Notice) {
        let message = Self::to_wire(notice);
        match serde_json::to_string(&message) {
            Ok(json) => {
                self.registry.send_to(viewer, &json);
            }
            Err(error) => tracing::error!(%error, "failed to encode notice"),
        }
    }

    fn to_wire(notice: Notice) -> WireMessage {
        match notice {
            Notice::Status { active, message } => WireMessage::MonitoringStatus { active, message },
            Notice::Error { error } => WireMessage::MonitoringError {
                error,
                timestamp: Utc::now().to_rfc3339(),
            },
            Notice::Connection {
                client_count,
                monitoring_active,
            } => WireMessage::ConnectionStatus {
                connected: true,
                client_count,
                monitoring_active,
            },
        }
    }

    fn broadcast(&self, message: &WireMessage) {
        match serde_json::to_string(message) {
            Ok(json) => {
                self.registry.broadcast(&json);
            }
            Err(error) => tracing::error!(%error, "failed to encode outbound message"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use firetap_core::event::TraceAction;

    fn sample_event() -> TraceEvent {
        TraceEvent {
            occurred_at: Utc::now(),
            action: TraceAction::Publish,
            target: "orders".into(),
            routing_key: "publish.orders".into(),
            exchange_name: "amq.rabbitmq.trace".into(),
            headers: None,
            body_size: 2,
            body: serde_json::json!({}),
        }
    }

    #[test]
    fn fan_out_is_isolated_per_viewer() {
        let registry = Arc::new(ViewerRegistry::new(32));
        let broadcaster = Broadcaster::new(Arc::clone(&registry));
        let (_a, mut rx_a) = registry.register();
        let (_b, mut rx_b) = registry.register();

        broadcaster.publish_event(sample_event());

        let to_a: serde_json::Value = serde_json::from_str(&rx_a.try_recv().unwrap()).unwrap();
        let to_b: serde_json::Value = serde_json::from_str(&rx_b.try_recv().unwrap()).unwrap();

        // Exactly one delivery each.
        assert!(rx_a.try_recv().is_err());
        assert!(rx_b.try_recv().is_err());

        // Identical event fields, but each delivery carries its own id.
        assert_eq!(to_a["type"], "firehose-message");
        assert_eq!(to_a["routingKey"], to_b["routingKey"]);
        assert_eq!(to_a["target"], to_b["target"]);
        assert_eq!(to_a["displayTime"], to_b["displayTime"]);
        assert_ne!(to_a["id"], to_b["id"]);
    }

    #[test]
    fn successive_publishes_get_distinct_ids() {
        let registry = Arc::new(ViewerRegistry::new(32));
        let broadcaster = Broadcaster::new(Arc::clone(&registry));
        let (_a, mut rx) = registry.register();

        broadcaster.publish_event(sample_event());
        broadcaster.publish_event(sample_event());

        let first: serde_json::Value = serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
        let second: serde_json::Value = serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
        assert_ne!(first["id"], second["id"]);
    }

    #[test]
    fn late_viewer_gets_no_backlog() {
        let registry = Arc::new(ViewerRegistry::new(32));
        let broadcaster = Broadcaster::new(Arc::clone(&registry));

        broadcaster.publish_event(sample_event());
        let (_late, mut rx) = registry.register();
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn notify_is_unicast() {
        let registry = Arc::new(ViewerRegistry::new(32));
        let broadcaster = Broadcaster::new(Arc::clone(&registry));
        let (a, mut rx_a) = registry.register();
        let (_b, mut rx_b) = registry.register();

        broadcaster.notify(
            &a,
            Notice::Status {
                active: false,
                message: "monitoring already stopped".into(),
            },
        );

        let msg: serde_json::Value = serde_json::from_str(&rx_a.try_recv().unwrap()).unwrap();
        assert_eq!(msg["type"], "monitoring-status");
        assert!(rx_b.try_recv().is_err());
    }

    #[test]
    fn error_notice_carries_timestamp() {
        let registry = Arc::new(ViewerRegistry::new(32));
        let broadcaster = Broadcaster::new(Arc::clone(&registry));
        let (_a, mut rx) = registry.register();

        broadcaster.publish(Notice::Error {
            error: "broker unreachable: refused".into(),
        });

        let msg: serde_json::Value = serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(msg["type"], "monitoring-error");
        assert!(msg["timestamp"].as_str().unwrap().contains('T'));
    }
}
