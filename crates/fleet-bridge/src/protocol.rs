use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Well-known bus topics.
pub mod topics {
    /// One message per executed task.
    pub const TASKS: &str = "tasks";
    /// Refined task ordering produced by the refiner.
    pub const REFINEMENTS: &str = "refinements";
    /// Default topic for generated recommendations.
    pub const RECOMMENDATIONS: &str = "recommendations";
    /// Generic agent liveness pings.
    pub const HEARTBEATS: &str = "heartbeats";
    /// Worker state changes.
    pub const SUPERVISOR: &str = "supervisor";
    /// Configuration reload notifications.
    pub const CONFIG: &str = "config";
}

/// Opaque message body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data")]
#[serde(rename_all = "snake_case")]
pub enum Payload {
    Text(String),
    Bytes(Vec<u8>),
}

impl Payload {
    /// Serialize `value` as JSON text.
    pub fn json<T: Serialize>(value: &T) -> Result<Self, serde_json::Error> {
        serde_json::to_string(value).map(Payload::Text)
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Payload::Text(s) => Some(s),
            Payload::Bytes(b) => std::str::from_utf8(b).ok(),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Payload::Text(s) => s.as_bytes(),
            Payload::Bytes(b) => b,
        }
    }

    /// Decode a JSON payload.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(self.as_bytes())
    }
}

impl From<String> for Payload {
    fn from(s: String) -> Self {
        Payload::Text(s)
    }
}

impl From<&str> for Payload {
    fn from(s: &str) -> Self {
        Payload::Text(s.to_string())
    }
}

impl From<Vec<u8>> for Payload {
    fn from(b: Vec<u8>) -> Self {
        Payload::Bytes(b)
    }
}

impl From<serde_json::Value> for Payload {
    fn from(v: serde_json::Value) -> Self {
        Payload::Text(v.to_string())
    }
}

/// A message as delivered to subscribers. Every subscriber gets its own
/// clone, so nothing a receiver does is visible to the others.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub topic: String,
    pub payload: Payload,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn new(topic: impl Into<String>, payload: impl Into<Payload>) -> Self {
        Self {
            id: Uuid::new_v4(),
            topic: topic.into(),
            payload: payload.into(),
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn text_payload_roundtrips_through_serde() {
        let msg = Message::new("updates", "ping");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["topic"], "updates");
        assert_eq!(json["payload"]["kind"], "text");
        assert_eq!(json["payload"]["data"], "ping");

        let back: Message = serde_json::from_value(json).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn bytes_payload_exposes_text_when_utf8() {
        let p = Payload::from(b"hello".to_vec());
        assert_eq!(p.as_text(), Some("hello"));
        let bad = Payload::Bytes(vec![0xff, 0xfe]);
        assert_eq!(bad.as_text(), None);
        assert_eq!(bad.as_bytes(), &[0xff, 0xfe]);
    }

    #[test]
    fn json_payload_decodes() {
        let p = Payload::json(&json!({"task": "backup_database", "ok": true})).unwrap();
        let v: serde_json::Value = p.decode().unwrap();
        assert_eq!(v["task"], "backup_database");
    }

    #[test]
    fn each_message_gets_unique_id() {
        let a = Message::new("t", "x");
        let b = Message::new("t", "x");
        assert_ne!(a.id, b.id);
    }
}
