//! Forwards events from the trace source to connected viewers.

use std::sync::Arc;

use tokio::sync::mpsc;

use firetap_core::session::Notice;
use firetap_source::consumer::SourceEvent;

use crate::broadcaster::Broadcaster;

/// Spawn the bridge task: reads from the source event channel and fans out
/// to all currently connected viewers until the channel closes.
pub fn spawn(
    mut events: mpsc::Receiver<SourceEvent>,
    broadcaster: Arc<Broadcaster>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                SourceEvent::Trace(trace) => broadcaster.publish_event(trace),
                SourceEvent::Failed(cause) => {
                    tracing::warn!(cause = %cause, "trace source reported a failure");
                    broadcaster.publish(Notice::Error { error: cause });
                }
            }
        }
        tracing::info!("trace bridge channel closed");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use firetap_core::event::{TraceAction, TraceEvent};

    use crate::viewer::ViewerRegistry;

    fn sample_event() -> TraceEvent {
        TraceEvent {
            occurred_at: Utc::now(),
            action: TraceAction::Deliver,
            target: "work".into(),
            routing_key: "deliver.work".into(),
            exchange_name: "amq.rabbitmq.trace".into(),
            headers: None,
            body_size: 4,
            body: serde_json::Value::String("text".into()),
        }
    }

    #[tokio::test]
    async fn bridge_forwards_trace_events() {
        let registry = Arc::new(ViewerRegistry::new(32));
        let broadcaster = Arc::new(Broadcaster::new(Arc::clone(&registry)));
        let (_viewer, mut rx) = registry.register();

        let (tx, events) = mpsc::channel(8);
        let handle = spawn(events, broadcaster);

        tx.send(SourceEvent::Trace(sample_event())).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let msg: serde_json::Value = serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(msg["type"], "firehose-message");
        assert_eq!(msg["target"], "work");

        handle.abort();
    }

    #[tokio::test]
    async fn bridge_broadcasts_source_failures() {
        let registry = Arc::new(ViewerRegistry::new(32));
        let broadcaster = Arc::new(Broadcaster::new(Arc::clone(&registry)));
        let (_viewer, mut rx) = registry.register();

        let (tx, events) = mpsc::channel(8);
        let handle = spawn(events, broadcaster);

        tx.send(SourceEvent::Failed("consumer cancelled".into()))
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let msg: serde_json::Value = serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(msg["type"], "monitoring-error");
        assert!(msg["error"].as_str().unwrap().contains("cancelled"));

        handle.abort();
    }

    #[tokio::test]
    async fn bridge_exits_when_channel_closes() {
        let registry = Arc::new(ViewerRegistry::new(32));
        let broadcaster = Arc::new(Broadcaster::new(registry));

        let (tx, events) = mpsc::channel::<SourceEvent>(8);
        let handle = spawn(events, broadcaster);
        drop(tx);

        tokio::time::timeout(std::time::Duration::from_secs(1), handle)
            .await
            .expect("bridge should exit")
            .unwrap();
    }
}
