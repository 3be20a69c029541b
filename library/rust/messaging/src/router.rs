//! 型文字列でイベントをハンドラーへ振り分けるルーター。
//!
//! ```ignore
//! let mut router = Router::new(|e: &MarkEvent| e.event_type());
//! router.register_fn(events::MARK_CREATED, |event: MarkEvent| async move {
//!     tracing::info!(mark_id = event.payload.mark_id, "mark created");
//!     Ok(())
//! });
//! consumer.run(cancel, &router.message_handler()).await?;
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;

use crate::classify::HandlerError;
use crate::consumer::MessageHandler;
use crate::error::MessagingError;
use crate::message::Message;

/// EventHandler は特定のイベント種別を処理するハンドラー。
#[async_trait]
pub trait EventHandler<T>: Send + Sync {
    async fn handle(&self, event: T) -> Result<(), HandlerError>;
}

/// EventDecoder はメッセージのボディをイベント型に変換する。
pub trait EventDecoder<T>: Send + Sync {
    fn decode(&self, bytes: &[u8]) -> Result<T, MessagingError>;
}

/// JsonDecoder はボディを JSON としてデコードする。
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonDecoder;

impl<T: DeserializeOwned> EventDecoder<T> for JsonDecoder {
    fn decode(&self, bytes: &[u8]) -> Result<T, MessagingError> {
        serde_json::from_slice(bytes).map_err(|e| MessagingError::Decode(e.to_string()))
    }
}

/// async クロージャを EventHandler として扱うアダプター。
pub struct FnEventHandler<F, T> {
    f: F,
    _event: PhantomData<fn(T)>,
}

impl<F, T> FnEventHandler<F, T> {
    pub fn new(f: F) -> Self {
        Self {
            f,
            _event: PhantomData,
        }
    }
}

#[async_trait]
impl<F, Fut, T> EventHandler<T> for FnEventHandler<F, T>
where
    F: Fn(T) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), HandlerError>> + Send,
    T: Send + 'static,
{
    async fn handle(&self, event: T) -> Result<(), HandlerError> {
        (self.f)(event).await
    }
}

type TypeExtract<T> = Box<dyn Fn(&T) -> &str + Send + Sync>;

/// Router はデコードしたイベントを種別文字列で登録済みハンドラーへ振り分ける。
///
/// 登録はサービス起動時に済ませる。[`Router::message_handler`] で変換した後は
/// 登録内容を変更できない。
pub struct Router<T> {
    handlers: HashMap<String, Arc<dyn EventHandler<T>>>,
    type_extract: TypeExtract<T>,
    decoder: Arc<dyn EventDecoder<T>>,
}

impl<T> Router<T>
where
    T: DeserializeOwned + Send + 'static,
{
    /// JSON デコーダーでルーターを生成する。
    /// type_extract はイベントから種別文字列を取り出す関数。
    pub fn new<X>(type_extract: X) -> Self
    where
        X: Fn(&T) -> &str + Send + Sync + 'static,
    {
        Self::with_decoder(type_extract, JsonDecoder)
    }
}

impl<T> Router<T>
where
    T: Send + 'static,
{
    /// 任意のデコーダーでルーターを生成する。
    pub fn with_decoder<X, D>(type_extract: X, decoder: D) -> Self
    where
        X: Fn(&T) -> &str + Send + Sync + 'static,
        D: EventDecoder<T> + 'static,
    {
        Self {
            handlers: HashMap::new(),
            type_extract: Box::new(type_extract),
            decoder: Arc::new(decoder),
        }
    }

    /// ハンドラーを登録する。同じ種別への再登録は上書きする。
    pub fn register(
        &mut self,
        event_type: impl Into<String>,
        handler: Arc<dyn EventHandler<T>>,
    ) -> &mut Self {
        let event_type = event_type.into();
        if self.handlers.insert(event_type.clone(), handler).is_some() {
            tracing::debug!(event_type = %event_type, "event handler replaced");
        }
        self
    }

    /// async クロージャをハンドラーとして登録する。
    pub fn register_fn<F, Fut>(&mut self, event_type: impl Into<String>, f: F) -> &mut Self
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        self.register(event_type, Arc::new(FnEventHandler::new(f)))
    }

    /// イベントを対応するハンドラーへ渡す。
    /// 未登録の種別は無視して Ok(()) を返す（古いコンシューマーが新しい種別で壊れないように）。
    pub async fn route(&self, event: T) -> Result<(), HandlerError> {
        let Some(handler) = self.handler_for(&event) else {
            return Ok(());
        };
        handler.handle(event).await
    }

    fn handler_for(&self, event: &T) -> Option<&Arc<dyn EventHandler<T>>> {
        let event_type = (self.type_extract)(event);
        let handler = self.handlers.get(event_type);
        if handler.is_none() {
            tracing::trace!(event_type = %event_type, "no handler registered, ignoring event");
        }
        handler
    }

    /// メッセージをデコードしてルーティングする。デコード失敗は Skip に分類する。
    pub async fn dispatch(&self, message: &Message) -> Result<(), HandlerError> {
        let event = self
            .decoder
            .decode(&message.value)
            .map_err(|e| HandlerError::skip(format!("decode event: {e}")))?;
        self.route(event).await
    }

    /// Consumer::run に渡すハンドラーへ変換する。以後ルーターは変更できない。
    pub fn message_handler(self) -> Arc<dyn MessageHandler> {
        Arc::new(self)
    }

    pub fn has_handler(&self, event_type: &str) -> bool {
        self.handlers.contains_key(event_type)
    }

    /// 登録済みの種別をソートして返す（診断・テスト用）。
    pub fn registered_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.handlers.keys().cloned().collect();
        types.sort_unstable();
        types
    }
}

#[async_trait]
impl<T> MessageHandler for Router<T>
where
    T: Send + 'static,
{
    async fn handle(&self, message: &Message) -> Result<(), HandlerError> {
        self.dispatch(message).await
    }
}
