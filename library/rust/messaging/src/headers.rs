//! ヘッダーに載せるイベントメタデータ。
//!
//! ヘッダーはボディをデシリアライズせずにルーティング・フィルタリングするための
//! 最適化であり、正しさに必要な情報はボディ側にも必ず含める。

use chrono::{SecondsFormat, Utc};

use crate::message::{Header, Message};

pub const HEADER_EVENT_TYPE: &str = "event_type";
pub const HEADER_USER_ID: &str = "user_id";
pub const HEADER_SOURCE_ID: &str = "source_id";
pub const HEADER_TIMESTAMP: &str = "timestamp";

/// EventMeta はヘッダーで運ぶイベントメタデータ。空文字列は「未設定」を意味する。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventMeta {
    pub event_type: String,
    /// パーティションキーとしても使われる
    pub user_id: String,
    pub source_id: String,
    /// RFC3339 形式の発行日時
    pub timestamp: String,
}

impl EventMeta {
    /// イベント種別と現在時刻（UTC, RFC3339）で EventMeta を生成する。
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            ..Self::default()
        }
    }

    pub fn with_user_id(mut self, user_id: impl ToString) -> Self {
        self.user_id = user_id.to_string();
        self
    }

    pub fn with_source_id(mut self, source_id: impl ToString) -> Self {
        self.source_id = source_id.to_string();
        self
    }

    pub fn with_timestamp(mut self, timestamp: impl Into<String>) -> Self {
        self.timestamp = timestamp.into();
        self
    }

    /// 空でないフィールドだけをヘッダーに変換する。
    /// 順序は event_type, user_id, source_id, timestamp で固定。
    pub fn to_headers(&self) -> Vec<Header> {
        [
            (HEADER_EVENT_TYPE, &self.event_type),
            (HEADER_USER_ID, &self.user_id),
            (HEADER_SOURCE_ID, &self.source_id),
            (HEADER_TIMESTAMP, &self.timestamp),
        ]
        .into_iter()
        .filter(|(_, value)| !value.is_empty())
        .map(|(key, value)| Header::new(key, value.as_bytes()))
        .collect()
    }
}

/// EventMeta からヘッダーを生成する。[`EventMeta::to_headers`] と同じ。
pub fn make_headers(meta: &EventMeta) -> Vec<Header> {
    meta.to_headers()
}

/// メッセージのヘッダーから EventMeta を取り出す。
/// 未知のキーは無視し、存在しないキーは空文字列になる。同じキーが複数あれば最後の値を採用する。
pub fn extract_meta(message: &Message) -> EventMeta {
    let mut meta = EventMeta::default();
    for header in &message.headers {
        let slot = match header.key.as_str() {
            HEADER_EVENT_TYPE => &mut meta.event_type,
            HEADER_USER_ID => &mut meta.user_id,
            HEADER_SOURCE_ID => &mut meta.source_id,
            HEADER_TIMESTAMP => &mut meta.timestamp,
            _ => continue,
        };
        *slot = String::from_utf8_lossy(&header.value).into_owned();
    }
    meta
}

/// 指定キーの最初のヘッダー値を返す。存在しなければ空文字列。
pub fn get_header(message: &Message, key: &str) -> String {
    message
        .headers
        .iter()
        .find(|h| h.key == key)
        .map(|h| String::from_utf8_lossy(&h.value).into_owned())
        .unwrap_or_default()
}
