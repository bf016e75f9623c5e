//! Scriptable trace consumer for deterministic tests without a broker.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use firetap_core::config::TraceFilter;
use firetap_core::errors::SourceError;
use firetap_core::event::TraceEvent;

use crate::consumer::{SourceEvent, TraceConsumer};

/// Pre-programmed trace consumer: scripted start/stop outcomes, call
/// counters, and a handle to the event sink captured from the last `start`.
#[derive(Default)]
pub struct MockTraceConsumer {
    start_results: Mutex<VecDeque<Result<(), SourceError>>>,
    stop_results: Mutex<VecDeque<Result<(), SourceError>>>,
    start_delay: Option<Duration>,
    start_calls: AtomicUsize,
    stop_calls: AtomicUsize,
    sink: Mutex<Option<mpsc::Sender<SourceEvent>>>,
}

impl MockTraceConsumer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an error for the next `start` call; later calls succeed.
    pub fn with_start_error(error: SourceError) -> Self {
        let mock = Self::default();
        mock.start_results.lock().unwrap().push_back(Err(error));
        mock
    }

    /// Queue an error for the next `stop` call; later calls succeed.
    pub fn with_stop_error(error: SourceError) -> Self {
        let mock = Self::default();
        mock.stop_results.lock().unwrap().push_back(Err(error));
        mock
    }

    /// Keep every `start` call in flight for `delay` before it resolves.
    pub fn with_start_delay(delay: Duration) -> Self {
        Self {
            start_delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn start_calls(&self) -> usize {
        self.start_calls.load(Ordering::SeqCst)
    }

    pub fn stop_calls(&self) -> usize {
        self.stop_calls.load(Ordering::SeqCst)
    }

    /// Push an event through the sink captured from the last `start`.
    pub async fn emit(&self, event: TraceEvent) -> bool {
        let sink = self.sink.lock().unwrap().clone();
        match sink {
            Some(tx) => tx.send(SourceEvent::Trace(event)).await.is_ok(),
            None => false,
        }
    }
}

#[async_trait]
impl TraceConsumer for MockTraceConsumer {
    async fn start(
        &self,
        _filter: &TraceFilter,
        events: mpsc::Sender<SourceEvent>,
    ) -> Result<(), SourceError> {
        self.start_calls.fetch_add(1, Ordering::SeqCst);
        *self.sink.lock().unwrap() = Some(events);
        if let Some(delay) = self.start_delay {
            tokio::time::sleep(delay).await;
        }
        let scripted = self.start_results.lock().unwrap().pop_front();
        scripted.unwrap_or(Ok(()))
    }

    async fn stop(&self) -> Result<(), SourceError> {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        let scripted = self.stop_results.lock().unwrap().pop_front();
        scripted.unwrap_or(Ok(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
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

    #[tokio::test]
    async fn counts_calls_and_captures_sink() {
        let mock = MockTraceConsumer::new();
        let (tx, mut rx) = mpsc::channel(8);
        assert_eq!(mock.start_calls(), 0);

        mock.start(&TraceFilter::All, tx).await.unwrap();
        assert_eq!(mock.start_calls(), 1);

        assert!(mock.emit(sample_event()).await);
        assert!(matches!(rx.recv().await, Some(SourceEvent::Trace(_))));

        mock.stop().await.unwrap();
        assert_eq!(mock.stop_calls(), 1);
    }

    #[tokio::test]
    async fn scripted_error_fires_once() {
        let mock = MockTraceConsumer::with_start_error(SourceError::Connect("refused".into()));
        let (tx, _rx) = mpsc::channel(8);
        assert!(mock.start(&TraceFilter::All, tx.clone()).await.is_err());
        assert!(mock.start(&TraceFilter::All, tx).await.is_ok());
        assert_eq!(mock.start_calls(), 2);
    }

    #[tokio::test]
    async fn emit_without_start_is_false() {
        let mock = MockTraceConsumer::new();
        assert!(!mock.emit(sample_event()).await);
    }
}
