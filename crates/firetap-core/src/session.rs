//! Monitoring-session state machine.
//!
//! One upstream trace subscription is shared by every connected viewer. The
//! machine decides when that subscription should exist: auto-start when the
//! first viewer arrives, a grace period before teardown when the last one
//! leaves, and a manual-stop override that suppresses auto-start until an
//! explicit start.
//!
//! `SessionState::step` is a pure transition function: it mutates the
//! bookkeeping and returns the side effects the driver must execute
//! (start/stop the source, arm/cancel the grace timer, send notices). Source
//! start/stop run detached; their completions re-enter as inputs, so
//! in-flight operations are tracked as explicit phases rather than held
//! locks, and a second request can never issue a duplicate subscription.

use crate::errors::SourceError;
use crate::ids::ViewerId;
use crate::presence::PresenceRegistry;

/// Where the upstream subscription currently is. `Active` is the sole truth
/// for "a subscription exists"; `Starting`/`Stopping` mark in-flight source
/// operations.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Starting,
    Active,
    Stopping,
}

/// Inputs consumed by the session loop, one at a time.
#[derive(Clone, Debug)]
pub enum SessionInput {
    ViewerConnected(ViewerId),
    ViewerDisconnected(ViewerId),
    StartRequested(ViewerId),
    StopRequested(ViewerId),
    /// Grace timer fired. Carries the generation it was armed with; a stale
    /// generation means the timer was cancelled, making the expiry
    /// indistinguishable from a timer that was never armed.
    GraceExpired(u64),
    StartCompleted(Result<(), SourceError>),
    StopCompleted(Result<(), SourceError>),
}

/// Viewer-facing notifications emitted by transitions.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Notice {
    Status { active: bool, message: String },
    Error { error: String },
    Connection { client_count: u32, monitoring_active: bool },
}

/// Side effects returned by `step`, executed by the driver in order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Effect {
    StartSource,
    StopSource,
    ArmGrace { generation: u64 },
    CancelGrace,
    Broadcast(Notice),
    Notify(ViewerId, Notice),
}

/// Session bookkeeping. Single writer: only the coordinator's input loop
/// calls `step`, so every transition observes a fully applied prior one.
#[derive(Debug)]
pub struct SessionState {
    phase: Phase,
    /// Last explicit user action was stop; suppresses auto-start-on-connect.
    manual_stop: bool,
    presence: PresenceRegistry,
    /// Generation of the armed grace timer, if any. Armed only while
    /// `Active` with zero viewers; cleared the moment either breaks.
    pending_shutdown: Option<u64>,
    grace_generation: u64,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionState {
    pub fn new() -> Self {
        Self {
            phase: Phase::Idle,
            manual_stop: false,
            presence: PresenceRegistry::new(),
            pending_shutdown: None,
            grace_generation: 0,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// True iff an upstream subscription currently exists.
    pub fn monitoring_active(&self) -> bool {
        self.phase == Phase::Active
    }

    pub fn manual_stop(&self) -> bool {
        self.manual_stop
    }

    pub fn viewer_count(&self) -> u32 {
        self.presence.count()
    }

    pub fn step(&mut self, input: SessionInput) -> Vec<Effect> {
        match input {
            SessionInput::ViewerConnected(viewer) => self.viewer_connected(viewer),
            SessionInput::ViewerDisconnected(_) => self.viewer_disconnected(),
            SessionInput::StartRequested(viewer) => self.start_requested(viewer),
            SessionInput::StopRequested(viewer) => self.stop_requested(viewer),
            SessionInput::GraceExpired(generation) => self.grace_expired(generation),
            SessionInput::StartCompleted(result) => self.start_completed(result),
            SessionInput::StopCompleted(result) => self.stop_completed(result),
        }
    }

    fn viewer_connected(&mut self, viewer: ViewerId) -> Vec<Effect> {
        let change = self.presence.on_connect();
        let mut effects = vec![Effect::Notify(
            viewer.clone(),
            Notice::Connection {
                client_count: change.count,
                monitoring_active: self.monitoring_active(),
            },
        )];

        // A reconnect within the grace window resurrects the session without
        // an upstream restart.
        if self.pending_shutdown.take().is_some() {
            effects.push(Effect::CancelGrace);
        }

        match self.phase {
            Phase::Idle if !self.manual_stop => {
                self.phase = Phase::Starting;
                effects.push(Effect::StartSource);
            }
            Phase::Idle => {
                effects.push(Effect::Notify(
                    viewer,
                    Notice::Status {
                        active: false,
                        message: "monitoring stopped by request; send start to resume".into(),
                    },
                ));
            }
            _ => {}
        }
        effects
    }

    fn viewer_disconnected(&mut self) -> Vec<Effect> {
        let change = self.presence.on_disconnect();
        if change.now_zero && self.phase == Phase::Active {
            return vec![self.arm_grace()];
        }
        Vec::new()
    }

    fn start_requested(&mut self, viewer: ViewerId) -> Vec<Effect> {
        self.manual_stop = false;
        match self.phase {
            Phase::Idle => {
                self.phase = Phase::Starting;
                vec![Effect::StartSource]
            }
            Phase::Active => vec![Effect::Notify(
                viewer,
                Notice::Status {
                    active: true,
                    message: "monitoring already active".into(),
                },
            )],
            Phase::Starting => vec![Effect::Notify(
                viewer,
                Notice::Status {
                    active: false,
                    message: "activation already in progress".into(),
                },
            )],
            Phase::Stopping => vec![Effect::Notify(
                viewer,
                Notice::Status {
                    active: false,
                    message: "stop in progress; monitoring will restart".into(),
                },
            )],
        }
    }

    fn stop_requested(&mut self, viewer: ViewerId) -> Vec<Effect> {
        self.manual_stop = true;
        match self.phase {
            Phase::Active => {
                let mut effects = Vec::new();
                if self.pending_shutdown.take().is_some() {
                    effects.push(Effect::CancelGrace);
                }
                self.phase = Phase::Stopping;
                effects.push(Effect::StopSource);
                effects
            }
            Phase::Idle => vec![Effect::Notify(
                viewer,
                Notice::Status {
                    active: false,
                    message: "monitoring already stopped".into(),
                },
            )],
            Phase::Starting => vec![Effect::Notify(
                viewer,
                Notice::Status {
                    active: false,
                    message: "activation in progress; monitoring will stop once it resolves".into(),
                },
            )],
            Phase::Stopping => vec![Effect::Notify(
                viewer,
                Notice::Status {
                    active: false,
                    message: "stop already in progress".into(),
                },
            )],
        }
    }

    fn grace_expired(&mut self, generation: u64) -> Vec<Effect> {
        if self.pending_shutdown != Some(generation) {
            // Cancelled or superseded; same as never armed.
            return Vec::new();
        }
        self.pending_shutdown = None;
        if self.phase == Phase::Active && self.presence.count() == 0 {
            // An automatic stop is not a user decision; it must not block the
            // next viewer's auto-start.
            self.manual_stop = false;
            self.phase = Phase::Stopping;
            return vec![Effect::StopSource];
        }
        Vec::new()
    }

    fn start_completed(&mut self, result: Result<(), SourceError>) -> Vec<Effect> {
        if self.phase != Phase::Starting {
            return Vec::new();
        }
        match result {
            Ok(()) if self.manual_stop => {
                // A stop request landed while the subscription was being
                // established; honor it now.
                self.phase = Phase::Stopping;
                vec![Effect::StopSource]
            }
            Ok(()) => {
                self.phase = Phase::Active;
                let mut effects = vec![Effect::Broadcast(Notice::Status {
                    active: true,
                    message: "trace monitoring active".into(),
                })];
                if self.presence.count() == 0 {
                    // Everyone left while the start was in flight.
                    effects.push(self.arm_grace());
                }
                effects
            }
            Err(error) => {
                // The attempt aborts; manual_stop is left untouched so the
                // next connect or explicit start can retry.
                self.phase = Phase::Idle;
                vec![Effect::Broadcast(Notice::Error {
                    error: error.to_string(),
                })]
            }
        }
    }

    fn stop_completed(&mut self, _result: Result<(), SourceError>) -> Vec<Effect> {
        // A failed teardown still forces Idle; staying Active after a stop
        // attempt would permanently block future starts. The driver logs the
        // failure.
        self.phase = Phase::Idle;
        self.pending_shutdown = None;
        let mut effects = vec![Effect::Broadcast(Notice::Status {
            active: false,
            message: "trace monitoring stopped".into(),
        })];
        if !self.manual_stop && self.presence.count() > 0 {
            // Viewers arrived while the teardown was in flight; bring the
            // subscription straight back.
            self.phase = Phase::Starting;
            effects.push(Effect::StartSource);
        }
        effects
    }

    fn arm_grace(&mut self) -> Effect {
        self.grace_generation = self.grace_generation.wrapping_add(1);
        self.pending_shutdown = Some(self.grace_generation);
        Effect::ArmGrace {
            generation: self.grace_generation,
        }
    }
}
