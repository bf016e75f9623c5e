use async_trait::async_trait;
use tokio::sync::mpsc;

use firetap_core::config::TraceFilter;
use firetap_core::errors::SourceError;
use firetap_core::event::TraceEvent;

/// What the consume loop pushes downstream: one normalized event per
/// successfully delivered broker message, or a consumer-level failure.
/// Per-record normalization problems never appear here.
#[derive(Clone, Debug)]
pub enum SourceEvent {
    Trace(TraceEvent),
    Failed(String),
}

/// The broker capability the session coordinator drives.
///
/// `start` establishes connectivity (idempotent when a live connection
/// exists), binds a transient queue to the trace exchange with the filter's
/// routing key, and begins pushing into `events`. `stop` tears the
/// subscription down and is a no-op when nothing is running. Exactly one
/// upstream subscription exists per consumer; the coordinator serializes
/// start/stop so implementations never see overlapping calls.
#[async_trait]
pub trait TraceConsumer: Send + Sync {
    async fn start(
        &self,
        filter: &TraceFilter,
        events: mpsc::Sender<SourceEvent>,
    ) -> Result<(), SourceError>;

    async fn stop(&self) -> Result<(), SourceError>;
}
