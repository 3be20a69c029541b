use serde::de::DeserializeOwned;

/// Header はメッセージヘッダーの 1 エントリ。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub key: String,
    pub value: Vec<u8>,
}

impl Header {
    pub fn new(key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Message はトランスポート上の 1 メッセージ。
///
/// 発行時は topic / key / value / headers のみを設定し、partition と offset は
/// トランスポートが受信時に埋める。同じ key のメッセージは同じパーティションに入る。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    /// パーティションキー。空の場合はトランスポートがパーティションを選ぶ。
    pub key: Vec<u8>,
    /// JSON シリアライズされたエンベロープ
    pub value: Vec<u8>,
    pub headers: Vec<Header>,
}

impl Message {
    /// 発行用のメッセージを生成する。
    pub fn new(topic: impl Into<String>, key: impl Into<Vec<u8>>, value: Vec<u8>) -> Self {
        Self {
            topic: topic.into(),
            partition: 0,
            offset: 0,
            key: key.into(),
            value,
            headers: Vec::new(),
        }
    }

    pub fn with_headers(mut self, headers: Vec<Header>) -> Self {
        self.headers = headers;
        self
    }

    /// キーを UTF-8 文字列として返す（ログ用）。
    pub fn key_str(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.key)
    }

    /// ペイロードを JSON としてデシリアライズする。
    pub fn deserialize_json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_new_has_no_position() {
        let msg = Message::new("mark-service.events", "42", b"{}".to_vec());
        assert_eq!(msg.topic, "mark-service.events");
        assert_eq!(msg.key, b"42");
        assert_eq!(msg.partition, 0);
        assert_eq!(msg.offset, 0);
        assert!(msg.headers.is_empty());
    }

    #[test]
    fn test_deserialize_json() {
        let payload = serde_json::json!({"id": 7, "type": "markCreated"});
        let msg = Message::new("t", "7", serde_json::to_vec(&payload).unwrap());
        let parsed: serde_json::Value = msg.deserialize_json().unwrap();
        assert_eq!(parsed["id"], 7);
        assert_eq!(parsed["type"], "markCreated");
    }

    #[test]
    fn test_key_str_is_lossy() {
        let msg = Message::new("t", vec![0xff, b'a'], Vec::new());
        assert_eq!(msg.key_str(), "\u{fffd}a");
    }
}
