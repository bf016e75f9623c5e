//! Async driver around the pure session state machine.
//!
//! Every state transition happens inside one task consuming a serialized
//! input stream, so transitions are atomic with respect to each other.
//! Source start/stop involve network I/O and run as detached tasks; their
//! completions re-enter the loop as inputs, which keeps "operation in
//! flight" as explicit machine state instead of a held lock.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use firetap_core::config::MonitorConfig;
use firetap_core::session::{Effect, SessionInput, SessionState};
use firetap_source::consumer::{SourceEvent, TraceConsumer};

use crate::broadcaster::Broadcaster;

const INPUT_QUEUE: usize = 256;

/// Lock-free view of the session for RPC and health reads.
#[derive(Default)]
pub struct SessionSnapshot {
    monitoring_active: AtomicBool,
    viewer_count: AtomicU32,
}

impl SessionSnapshot {
    pub fn monitoring_active(&self) -> bool {
        self.monitoring_active.load(Ordering::Relaxed)
    }

    pub fn viewer_count(&self) -> u32 {
        self.viewer_count.load(Ordering::Relaxed)
    }
}

/// Handle to a running coordinator. Dropping it does not stop the loop; the
/// loop ends when every input sender is gone.
pub struct CoordinatorHandle {
    pub inputs: mpsc::Sender<SessionInput>,
    pub snapshot: Arc<SessionSnapshot>,
    _task: tokio::task::JoinHandle<()>,
}

/// Spawn the session loop.
pub fn spawn(
    source: Arc<dyn TraceConsumer>,
    broadcaster: Arc<Broadcaster>,
    trace_events: mpsc::Sender<SourceEvent>,
    config: MonitorConfig,
) -> CoordinatorHandle {
    let (inputs_tx, inputs_rx) = mpsc::channel(INPUT_QUEUE);
    let snapshot = Arc::new(SessionSnapshot::default());

    let coordinator = SessionCoordinator {
        state: SessionState::new(),
        inputs: inputs_tx.clone(),
        source,
        broadcaster,
        trace_events,
        config,
        snapshot: Arc::clone(&snapshot),
        grace_cancel: None,
    };
    let task = tokio::spawn(coordinator.run(inputs_rx));

    CoordinatorHandle {
        inputs: inputs_tx,
        snapshot,
        _task: task,
    }
}

struct SessionCoordinator {
    state: SessionState,
    inputs: mpsc::Sender<SessionInput>,
    source: Arc<dyn TraceConsumer>,
    broadcaster: Arc<Broadcaster>,
    trace_events: mpsc::Sender<SourceEvent>,
    config: MonitorConfig,
    snapshot: Arc<SessionSnapshot>,
    grace_cancel: Option<CancellationToken>,
}

impl SessionCoordinator {
    async fn run(mut self, mut inputs: mpsc::Receiver<SessionInput>) {
        while let Some(input) = inputs.recv().await {
            tracing::debug!(?input, phase = ?self.state.phase(), "session input");
            let effects = self.state.step(input);
            self.snapshot
                .monitoring_active
                .store(self.state.monitoring_active(), Ordering::Relaxed);
            self.snapshot
                .viewer_count
                .store(self.state.viewer_count(), Ordering::Relaxed);
            for effect in effects {
                self.apply(effect);
            }
        }
        tracing::info!("session input channel closed");
    }

    fn apply(&mut self, effect: Effect) {
        match effect {
            Effect::StartSource => self.start_source(),
            Effect::StopSource => self.stop_source(),
            Effect::ArmGrace { generation } => self.arm_grace(generation),
            Effect::CancelGrace => {
                if let Some(token) = self.grace_cancel.take() {
                    token.cancel();
                }
            }
            Effect::Broadcast(notice) => self.broadcaster.publish(notice),
            Effect::Notify(viewer, notice) => self.broadcaster.notify(&viewer, notice),
        }
    }

    fn start_source(&self) {
        let source = Arc::clone(&self.source);
        let filter = self.config.filter.clone();
        let events = self.trace_events.clone();
        let inputs = self.inputs.clone();
        tokio::spawn(async move {
            let result = source.start(&filter, events).await;
            if let Err(ref error) = result {
                tracing::warn!(kind = error.error_kind(), %error, "trace source start failed");
            }
            let _ = inputs.send(SessionInput::StartCompleted(result)).await;
        });
    }

    fn stop_source(&self) {
        let source = Arc::clone(&self.source);
        let inputs = self.inputs.clone();
        tokio::spawn(async move {
            let result = source.stop().await;
            if let Err(ref error) = result {
                // Non-fatal: the session still advances to idle.
                tracing::warn!(kind = error.error_kind(), %error, "trace source teardown failed");
            }
            let _ = inputs.send(SessionInput::StopCompleted(result)).await;
        });
    }

    fn arm_grace(&mut self, generation: u64) {
        let token = CancellationToken::new();
        self.grace_cancel = Some(token.clone());
        let delay = self.config.grace_period;
        let inputs = self.inputs.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    let _ = inputs.send(SessionInput::GraceExpired(generation)).await;
                }
            }
        });
    }
}
