/// MessagingError はメッセージング基盤自身の操作（発行・受信・コミット・設定）に関するエラーを表す。
/// ハンドラーの処理結果の分類には [`crate::classify::HandlerError`] を使う。
#[derive(Debug, thiserror::Error)]
pub enum MessagingError {
    /// イベントを JSON にシリアライズできなかった。呼び出し側の型の問題なので再試行しない。
    #[error("marshal event: {0}")]
    Marshal(#[source] serde_json::Error),

    /// バッチ内の index 番目のイベントをシリアライズできなかった。
    #[error("marshal event {index}: {source}")]
    MarshalBatch {
        index: usize,
        #[source]
        source: serde_json::Error,
    },

    /// ブローカーとの通信失敗（fetch / write）。
    #[error("transport error: {0}")]
    Transport(String),

    #[error("commit error: {0}")]
    Commit(String),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    /// クローズ済みのリーダー・ライターに対する操作。
    #[error("{0} is closed")]
    Closed(&'static str),
}

impl MessagingError {
    /// シリアライズ失敗かどうかを判定する。
    pub fn is_marshal(&self) -> bool {
        matches!(self, Self::Marshal(_) | Self::MarshalBatch { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_error_display() {
        let err = MessagingError::Transport("kafka broker unreachable".to_string());
        assert!(err.to_string().contains("kafka broker unreachable"));
    }

    #[test]
    fn test_marshal_batch_error_names_index() {
        let source = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err = MessagingError::MarshalBatch { index: 3, source };
        assert!(err.to_string().starts_with("marshal event 3:"));
        assert!(err.is_marshal());
    }

    #[test]
    fn test_closed_error_display() {
        let err = MessagingError::Closed("reader");
        assert_eq!(err.to_string(), "reader is closed");
        assert!(!err.is_marshal());
    }
}
