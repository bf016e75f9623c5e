use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for a connected viewer.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ViewerId(pub String);

impl ViewerId {
    pub fn new() -> Self {
        Self(format!("viewer_{}", Uuid::now_v7()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ViewerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ViewerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Per-delivery identifier stamped onto each fanned-out firehose message.
///
/// UUIDv7 is timestamp-plus-random, so ids sort by delivery time without any
/// coordination between broadcasts. This is presentation metadata only; two
/// deliveries of the same trace event carry different ids.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub String);

impl MessageId {
    pub fn new() -> Self {
        Self(format!("msg_{}", Uuid::now_v7()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn viewer_id_has_prefix() {
        let id = ViewerId::new();
        assert!(id.as_str().starts_with("viewer_"), "got: {id}");
    }

    #[test]
    fn message_id_has_prefix() {
        let id = MessageId::new();
        assert!(id.as_str().starts_with("msg_"), "got: {id}");
    }

    #[test]
    fn ids_are_unique() {
        let a = MessageId::new();
        let b = MessageId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn message_ids_sort_by_creation() {
        let ids: Vec<MessageId> = (0..50).map(|_| MessageId::new()).collect();
        for w in ids.windows(2) {
            assert!(w[0].as_str() <= w[1].as_str(), "not ordered: {} > {}", w[0], w[1]);
        }
    }

    #[test]
    fn serde_is_transparent() {
        let id = ViewerId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{id}\""));
        let parsed: ViewerId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, parsed);
    }
}
