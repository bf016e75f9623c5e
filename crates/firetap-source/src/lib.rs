//! Upstream trace subscription: the broker consumer seam, its AMQP
//! implementation, and trace-record normalization.

pub mod amqp;
pub mod consumer;
pub mod mock;
pub mod normalize;

pub use amqp::AmqpTraceConsumer;
pub use consumer::{SourceEvent, TraceConsumer};
