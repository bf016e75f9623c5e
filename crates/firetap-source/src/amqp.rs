//! AMQP-backed trace consumer.
//!
//! Binds a transient, exclusive, auto-deleting queue to the broker's trace
//! exchange and pushes normalized events into the session's event channel.
//! The connection and channel handles live here exclusively; nothing outside
//! this module touches them.

use async_trait::async_trait;
use futures::StreamExt;
use lapin::message::Delivery;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::{AMQPValue, FieldTable};
use lapin::{Channel, Connection, ConnectionProperties};
use tokio::sync::{mpsc, Mutex};

use firetap_core::config::{TraceFilter, TRACE_EXCHANGE};
use firetap_core::errors::SourceError;

use crate::consumer::{SourceEvent, TraceConsumer};
use crate::normalize::{normalize, RawTrace};

const CONSUMER_TAG: &str = "firetap";
const REPLY_SUCCESS: u16 = 200;

#[derive(Default)]
struct AmqpState {
    connection: Option<Connection>,
    channel: Option<Channel>,
    consume_task: Option<tokio::task::JoinHandle<()>>,
}

pub struct AmqpTraceConsumer {
    url: String,
    state: Mutex<AmqpState>,
}

impl AmqpTraceConsumer {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            state: Mutex::new(AmqpState::default()),
        }
    }
}

#[async_trait]
impl TraceConsumer for AmqpTraceConsumer {
    async fn start(
        &self,
        filter: &TraceFilter,
        events: mpsc::Sender<SourceEvent>,
    ) -> Result<(), SourceError> {
        let mut state = self.state.lock().await;

        let live = state
            .connection
            .as_ref()
            .is_some_and(|c| c.status().connected());
        if !live {
            let connection = Connection::connect(&self.url, ConnectionProperties::default())
                .await
                .map_err(|e| SourceError::Connect(e.to_string()))?;
            state.connection = Some(connection);
        }
        let Some(connection) = state.connection.as_ref() else {
            return Err(SourceError::Connect("no broker connection".into()));
        };

        let channel = connection
            .create_channel()
            .await
            .map_err(|e| SourceError::Subscribe(e.to_string()))?;
        let queue = channel
            .queue_declare(
                "",
                QueueDeclareOptions {
                    exclusive: true,
                    auto_delete: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| SourceError::Subscribe(e.to_string()))?;
        let routing_key = filter.routing_key();
        channel
            .queue_bind(
                queue.name().as_str(),
                TRACE_EXCHANGE,
                &routing_key,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| SourceError::Subscribe(e.to_string()))?;
        let consumer = channel
            .basic_consume(
                queue.name().as_str(),
                CONSUMER_TAG,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| SourceError::Subscribe(e.to_string()))?;

        tracing::info!(
            queue = queue.name().as_str(),
            routing_key = %routing_key,
            "trace subscription established"
        );
        state.consume_task = Some(tokio::spawn(consume_loop(consumer, events)));
        state.channel = Some(channel);
        Ok(())
    }

    async fn stop(&self) -> Result<(), SourceError> {
        let mut state = self.state.lock().await;
        if let Some(task) = state.consume_task.take() {
            task.abort();
        }

        let mut failure = None;
        if let Some(channel) = state.channel.take() {
            if let Err(error) = channel.close(REPLY_SUCCESS, "monitoring stopped").await {
                failure = Some(error.to_string());
            }
        }
        if let Some(connection) = state.connection.take() {
            if let Err(error) = connection.close(REPLY_SUCCESS, "monitoring stopped").await {
                failure.get_or_insert(error.to_string());
            }
        }
        match failure {
            None => Ok(()),
            Some(cause) => Err(SourceError::Stop(cause)),
        }
    }
}

/// Consume trace deliveries until the channel closes or the session side
/// drops the event receiver. Each delivery is acked after its normalized
/// event is dispatched; malformed records are rejected without requeue and
/// monitoring continues.
async fn consume_loop(mut consumer: lapin::Consumer, events: mpsc::Sender<SourceEvent>) {
    while let Some(delivery) = consumer.next().await {
        let delivery = match delivery {
            Ok(delivery) => delivery,
            Err(error) => {
                tracing::warn!(%error, "trace consumer stream error");
                let _ = events.send(SourceEvent::Failed(error.to_string())).await;
                continue;
            }
        };
        match normalize(raw_trace(&delivery)) {
            Ok(event) => {
                if events.send(SourceEvent::Trace(event)).await.is_err() {
                    // Session side went away; leave the delivery unacked and
                    // let teardown reclaim the queue.
                    break;
                }
                if let Err(error) = delivery.ack(BasicAckOptions::default()).await {
                    tracing::warn!(%error, "failed to ack trace record");
                }
            }
            Err(error) => {
                tracing::debug!(
                    %error,
                    routing_key = delivery.routing_key.as_str(),
                    "rejecting malformed trace record"
                );
                let options = BasicNackOptions {
                    requeue: false,
                    ..Default::default()
                };
                if let Err(error) = delivery.nack(options).await {
                    tracing::warn!(%error, "failed to nack trace record");
                }
            }
        }
    }
}

fn raw_trace(delivery: &Delivery) -> RawTrace {
    RawTrace {
        routing_key: delivery.routing_key.as_str().to_string(),
        exchange: delivery.exchange.as_str().to_string(),
        headers: delivery
            .properties
            .headers()
            .as_ref()
            .map(field_table_to_json),
        body: delivery.data.clone(),
    }
}

/// Convert an AMQP header table to JSON for the wire.
fn field_table_to_json(table: &FieldTable) -> serde_json::Map<String, serde_json::Value> {
    table
        .inner()
        .iter()
        .map(|(key, value)| (key.as_str().to_string(), amqp_value_to_json(value)))
        .collect()
}

fn amqp_value_to_json(value: &AMQPValue) -> serde_json::Value {
    use serde_json::Value;
    match value {
        AMQPValue::Boolean(b) => Value::Bool(*b),
        AMQPValue::ShortShortInt(n) => Value::from(*n),
        AMQPValue::ShortShortUInt(n) => Value::from(*n),
        AMQPValue::ShortInt(n) => Value::from(*n),
        AMQPValue::ShortUInt(n) => Value::from(*n),
        AMQPValue::LongInt(n) => Value::from(*n),
        AMQPValue::LongUInt(n) => Value::from(*n),
        AMQPValue::LongLongInt(n) => Value::from(*n),
        AMQPValue::Float(n) => Value::from(*n),
        AMQPValue::Double(n) => Value::from(*n),
        AMQPValue::ShortString(s) => Value::String(s.as_str().to_string()),
        AMQPValue::LongString(s) => {
            Value::String(String::from_utf8_lossy(s.as_bytes()).into_owned())
        }
        AMQPValue::FieldArray(items) => {
            Value::Array(items.as_slice().iter().map(amqp_value_to_json).collect())
        }
        AMQPValue::FieldTable(nested) => Value::Object(field_table_to_json(nested)),
        AMQPValue::Timestamp(n) => Value::from(*n),
        AMQPValue::ByteArray(bytes) => {
            Value::String(String::from_utf8_lossy(bytes.as_slice()).into_owned())
        }
        _ => Value::Null,
    }
}
