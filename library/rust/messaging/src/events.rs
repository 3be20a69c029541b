//! サービス間でやり取りするドメインイベントのカタログ。

use serde::{Deserialize, Serialize};

use crate::event::Envelope;

pub const MARK_CREATED: &str = "markCreated";
pub const MARK_UPDATED: &str = "markUpdated";
pub const MARK_DELETED: &str = "markDeleted";

pub const COMMENT_CREATED: &str = "comment.created";
pub const COMMENT_UPDATED: &str = "comment.updated";
pub const COMMENT_DELETED: &str = "comment.deleted";

pub const USER_CREATED: &str = "user.created";
pub const USER_UPDATED: &str = "user.updated";
pub const USER_DELETED: &str = "user.deleted";

/// サービス名からイベントトピック名を組み立てる（`<service-name>.events`）。
pub fn service_topic(service: &str) -> String {
    format!("{service}.events")
}

/// MarkPayload はマーク関連イベントのペイロード。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MarkPayload {
    #[serde(rename = "id")]
    pub mark_id: i64,
    pub category_id: i64,
    pub owner_id: i64,
    pub mark_name: String,
    pub additional_info: Option<String>,
    #[serde(default)]
    pub is_ended: bool,
}

impl MarkPayload {
    /// 作成直後のマーク（is_ended = false）のペイロードを生成する。
    pub fn new(
        mark_id: i64,
        category_id: i64,
        owner_id: i64,
        mark_name: impl Into<String>,
        additional_info: Option<String>,
    ) -> Self {
        Self {
            mark_id,
            category_id,
            owner_id,
            mark_name: mark_name.into(),
            additional_info,
            is_ended: false,
        }
    }
}

pub type MarkEvent = Envelope<MarkPayload>;

impl Envelope<MarkPayload> {
    pub fn mark_created(payload: MarkPayload) -> Self {
        Self::new(MARK_CREATED, payload)
    }
}

/// CommentPayload はコメント関連イベントのペイロード。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CommentPayload {
    pub comment_id: u64,
    pub user_id: u64,
    pub entity_type: String,
    pub entity_id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<u64>,
    pub content: String,
}

pub type CommentEvent = Envelope<CommentPayload>;

impl Envelope<CommentPayload> {
    pub fn comment_created(payload: CommentPayload) -> Self {
        Self::new(COMMENT_CREATED, payload)
    }
}

/// UserPayload はユーザー関連イベントのペイロード。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserPayload {
    pub user_id: i64,
}

pub type UserEvent = Envelope<UserPayload>;

impl Envelope<UserPayload> {
    pub fn user_created(user_id: i64) -> Self {
        Self::new(USER_CREATED, UserPayload { user_id })
    }
}
