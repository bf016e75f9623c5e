//! Core domain types for firetap: normalized trace events, the outbound wire
//! protocol, and the pure monitoring-session state machine shared by the
//! server crates.

pub mod config;
pub mod errors;
pub mod event;
pub mod ids;
pub mod presence;
pub mod session;
pub mod wire;

pub use config::{MonitorConfig, TraceFilter};
pub use errors::{NormalizeError, SourceError};
pub use event::{TraceAction, TraceEvent};
pub use ids::{MessageId, ViewerId};
pub use session::{Effect, Notice, Phase, SessionInput, SessionState};
