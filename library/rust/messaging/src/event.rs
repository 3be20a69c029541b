use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Envelope は全イベント共通のワイヤーフォーマット。
///
/// JSON 表現は `{"id": "<uuid>", "type": "<string>", "timestamp": "<RFC3339>", "payload": {...}}`。
/// id は生成時に一度だけ採番され、以後変更されない。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Envelope<P> {
    /// イベント ID（UUID v4）
    pub id: String,
    /// イベント種別（例: "markCreated", "comment.created"）
    #[serde(rename = "type")]
    pub event_type: String,
    /// 発行日時（常に UTC）
    pub timestamp: DateTime<Utc>,
    pub payload: P,
}

impl<P> Envelope<P> {
    /// 新しい ID と現在時刻でエンベロープを生成する。
    pub fn new(event_type: impl Into<String>, payload: P) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            event_type: event_type.into(),
            timestamp: Utc::now(),
            payload,
        }
    }

    /// ルーターの type_extract にそのまま渡せる形でイベント種別を返す。
    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    /// JSON バイト列にシリアライズする。
    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error>
    where
        P: Serialize,
    {
        serde_json::to_vec(self)
    }

    /// JSON バイト列からデシリアライズする。
    pub fn from_json(bytes: &[u8]) -> Result<Self, serde_json::Error>
    where
        P: for<'de> Deserialize<'de>,
    {
        serde_json::from_slice(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    struct Payload {
        id: i64,
        name: String,
    }

    #[test]
    fn test_envelope_new() {
        let env = Envelope::new("markCreated", json!({"id": 7}));
        assert_eq!(env.event_type(), "markCreated");
        assert!(Uuid::parse_str(&env.id).is_ok());
        assert!(env.timestamp <= Utc::now());
    }

    #[test]
    fn test_envelope_ids_are_unique() {
        let a = Envelope::new("markCreated", ());
        let b = Envelope::new("markCreated", ());
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_envelope_wire_field_names() {
        let env = Envelope::new(
            "markCreated",
            Payload {
                id: 7,
                name: "park".to_string(),
            },
        );
        let value: serde_json::Value = serde_json::from_slice(&env.to_json().unwrap()).unwrap();
        let obj = value.as_object().unwrap();
        let mut keys: Vec<_> = obj.keys().map(String::as_str).collect();
        keys.sort_unstable();
        assert_eq!(keys, vec!["id", "payload", "timestamp", "type"]);
        assert_eq!(value["type"], "markCreated");
        assert_eq!(value["payload"]["id"], 7);
        assert!(value["timestamp"].as_str().unwrap().ends_with('Z'));
    }

    #[test]
    fn test_envelope_serialization_roundtrip() {
        let env = Envelope::new(
            "markUpdated",
            Payload {
                id: 42,
                name: "lake".to_string(),
            },
        );
        let decoded = Envelope::<Payload>::from_json(&env.to_json().unwrap()).unwrap();
        assert_eq!(decoded, env);
    }

    #[test]
    fn test_envelope_decodes_external_json() {
        let raw = br#"{"id":"6f1c1d8e-4a8b-4c55-9d4b-0b7f2a6c1e11","type":"user.created","timestamp":"2026-03-01T10:00:00.5Z","payload":{"id":1,"name":"a"}}"#;
        let env = Envelope::<Payload>::from_json(raw).unwrap();
        assert_eq!(env.id, "6f1c1d8e-4a8b-4c55-9d4b-0b7f2a6c1e11");
        assert_eq!(env.event_type, "user.created");
        assert_eq!(env.timestamp.to_rfc3339(), "2026-03-01T10:00:00.500+00:00");
        let reencoded: serde_json::Value = serde_json::from_slice(&env.to_json().unwrap()).unwrap();
        assert_eq!(reencoded["id"], "6f1c1d8e-4a8b-4c55-9d4b-0b7f2a6c1e11");
    }
}
