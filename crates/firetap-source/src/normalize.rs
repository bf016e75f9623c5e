//! Raw trace record → `TraceEvent`.

use chrono::Utc;

use firetap_core::errors::NormalizeError;
use firetap_core::event::{TraceAction, TraceEvent, UNKNOWN_TARGET};

/// A trace record as read off the broker, before normalization.
#[derive(Clone, Debug)]
pub struct RawTrace {
    pub routing_key: String,
    pub exchange: String,
    pub headers: Option<serde_json::Map<String, serde_json::Value>>,
    pub body: Vec<u8>,
}

/// Normalize one raw trace record.
///
/// The trace routing key carries `<action>.<target>`; a missing target maps
/// to the `unknown` sentinel. Bodies that are not well-formed JSON are kept
/// as raw text; payload shape is never an error. Only an unparseable action
/// segment rejects the record.
pub fn normalize(raw: RawTrace) -> Result<TraceEvent, NormalizeError> {
    let mut segments = raw.routing_key.splitn(2, '.');
    let action = match segments.next() {
        None | Some("") => return Err(NormalizeError::MissingAction),
        Some("publish") => TraceAction::Publish,
        Some("deliver") => TraceAction::Deliver,
        Some(other) => return Err(NormalizeError::UnknownAction(other.to_string())),
    };
    let target = segments
        .next()
        .filter(|t| !t.is_empty())
        .unwrap_or(UNKNOWN_TARGET)
        .to_string();

    let body = match serde_json::from_slice(&raw.body) {
        Ok(value) => value,
        Err(_) => serde_json::Value::String(String::from_utf8_lossy(&raw.body).into_owned()),
    };

    Ok(TraceEvent {
        occurred_at: Utc::now(),
        action,
        target,
        routing_key: raw.routing_key,
        exchange_name: raw.exchange,
        headers: raw.headers,
        body_size: raw.body.len(),
        body,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(routing_key: &str, body: &[u8]) -> RawTrace {
        RawTrace {
            routing_key: routing_key.into(),
            exchange: "amq.rabbitmq.trace".into(),
            headers: None,
            body: body.to_vec(),
        }
    }

    #[test]
    fn publish_key_extracts_target() {
        let event = normalize(raw("publish.my-exchange", b"{}")).unwrap();
        assert_eq!(event.action, TraceAction::Publish);
        assert_eq!(event.target, "my-exchange");
        assert_eq!(event.routing_key, "publish.my-exchange");
    }

    #[test]
    fn deliver_key_without_target_uses_sentinel() {
        let event = normalize(raw("deliver", b"{}")).unwrap();
        assert_eq!(event.action, TraceAction::Deliver);
        assert_eq!(event.target, "unknown");
    }

    #[test]
    fn empty_target_segment_uses_sentinel() {
        let event = normalize(raw("publish.", b"{}")).unwrap();
        assert_eq!(event.target, "unknown");
    }

    #[test]
    fn queue_names_with_dots_survive() {
        let event = normalize(raw("deliver.orders.dead-letter", b"{}")).unwrap();
        assert_eq!(event.target, "orders.dead-letter");
    }

    #[test]
    fn json_body_is_decoded() {
        let event = normalize(raw("publish.orders", br#"{"qty": 3}"#)).unwrap();
        assert_eq!(event.body["qty"], 3);
        assert_eq!(event.body_size, 10);
    }

    #[test]
    fn malformed_body_kept_as_raw_text() {
        let event = normalize(raw("publish.orders", b"not json at all")).unwrap();
        assert_eq!(event.body, serde_json::Value::String("not json at all".into()));
        assert_eq!(event.body_size, 15);
    }

    #[test]
    fn non_utf8_body_is_lossy_not_fatal() {
        let event = normalize(raw("deliver.q", &[0xff, 0xfe, 0x01])).unwrap();
        assert!(event.body.is_string());
        assert_eq!(event.body_size, 3);
    }

    #[test]
    fn unknown_action_is_rejected() {
        let err = normalize(raw("route.orders", b"{}")).unwrap_err();
        assert_eq!(err, NormalizeError::UnknownAction("route".into()));
    }

    #[test]
    fn empty_routing_key_is_rejected() {
        let err = normalize(raw("", b"{}")).unwrap_err();
        assert_eq!(err, NormalizeError::MissingAction);
    }

    #[test]
    fn headers_pass_through() {
        let mut headers = serde_json::Map::new();
        headers.insert("exchange_name".into(), serde_json::Value::String("orders".into()));
        let event = normalize(RawTrace {
            routing_key: "publish.orders".into(),
            exchange: "amq.rabbitmq.trace".into(),
            headers: Some(headers),
            body: b"{}".to_vec(),
        })
        .unwrap();
        assert_eq!(event.headers.unwrap()["exchange_name"], "orders");
    }
}
