//! ハンドラーの処理結果の分類。
//!
//! コンシューマーはハンドラーが返した [`HandlerError`] の [`ErrorKind`] だけを見て
//! オフセットをコミットするかどうかを決める。エラーのラップ階層は分類に使わない。

use std::fmt;

use crate::error::MessagingError;

/// 分類の原因となったエラー。
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// ErrorKind はハンドラー失敗の分類。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// 不正・無関係なメッセージ。コミットして二度と処理しない。
    Skip,
    /// 一時的な失敗。コミットせず、固定時間待機する。
    Retryable,
    /// 回復不能だがパーティションを止めるほどではない失敗。コミットして破棄する。
    Fatal,
    /// 分類されていないエラー。Fatal と同じ扱い。
    Unclassified,
}

impl ErrorKind {
    /// この分類のときオフセットをコミットするか。
    pub fn commits_offset(self) -> bool {
        !matches!(self, Self::Retryable)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Skip => "skip",
            Self::Retryable => "retryable",
            Self::Fatal => "fatal",
            Self::Unclassified => "unclassified",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// HandlerError はハンドラーが返すエラー。分類と原因を持つ。
#[derive(Debug)]
pub struct HandlerError {
    kind: ErrorKind,
    cause: Option<BoxError>,
}

impl HandlerError {
    pub fn new(kind: ErrorKind, cause: impl Into<BoxError>) -> Self {
        Self {
            kind,
            cause: Some(cause.into()),
        }
    }

    /// メッセージをスキップする（コミットする）。
    pub fn skip(cause: impl Into<BoxError>) -> Self {
        Self::new(ErrorKind::Skip, cause)
    }

    /// 原因なしでスキップする。ヘッダー欠落など、ログだけで十分な場合に使う。
    pub fn skip_silently() -> Self {
        Self {
            kind: ErrorKind::Skip,
            cause: None,
        }
    }

    /// 一時的な失敗として扱う（コミットしない）。
    pub fn retryable(cause: impl Into<BoxError>) -> Self {
        Self::new(ErrorKind::Retryable, cause)
    }

    /// 回復不能な失敗として扱う（コミットして破棄する）。
    pub fn fatal(cause: impl Into<BoxError>) -> Self {
        Self::new(ErrorKind::Fatal, cause)
    }

    pub fn unclassified(cause: impl Into<BoxError>) -> Self {
        Self::new(ErrorKind::Unclassified, cause)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn cause(&self) -> Option<&(dyn std::error::Error + Send + Sync + 'static)> {
        self.cause.as_deref()
    }

    pub fn is_skip(&self) -> bool {
        self.kind == ErrorKind::Skip
    }

    pub fn is_retryable(&self) -> bool {
        self.kind == ErrorKind::Retryable
    }

    pub fn is_fatal(&self) -> bool {
        self.kind == ErrorKind::Fatal
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.cause {
            Some(cause) => write!(f, "{}: {}", self.kind, cause),
            None => write!(f, "{}", self.kind),
        }
    }
}

impl std::error::Error for HandlerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_deref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

impl From<anyhow::Error> for HandlerError {
    fn from(err: anyhow::Error) -> Self {
        Self::unclassified(err)
    }
}

impl From<MessagingError> for HandlerError {
    fn from(err: MessagingError) -> Self {
        Self::unclassified(err)
    }
}
