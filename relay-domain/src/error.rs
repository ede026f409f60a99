//! 统一错误定义
//!
//! 按处理策略划分：初始化错误（终止启动）、可重试的瞬时错误、
//! 不可重试的数据错误，以及与处理失败相区分的取消。
//!
use thiserror::Error;
use uuid::Uuid;

/// 统一错误类型
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum DomainError {
    // --- 初始化 ---
    #[error("initialization failed: missing dependency {dependency}")]
    MissingDependency { dependency: &'static str },
    #[error("unknown transport: {name}")]
    UnknownTransport { name: String },
    #[error("invalid config: {reason}")]
    InvalidConfig { reason: String },
    #[error("invalid state: {reason}")]
    InvalidState { reason: String },

    // --- 瞬时错误（可重试） ---
    #[error("storage unavailable: {reason}")]
    StorageUnavailable { reason: String },
    #[error("transport error: transport={transport}, reason={reason}")]
    Transport { transport: String, reason: String },
    #[error("acknowledgement timed out: subscription={subscription}, event={event}")]
    AckTimeout { subscription: Uuid, event: Uuid },
    #[error("delivery rejected: subscription={subscription}, event={event}, reason={reason}")]
    DeliveryRejected {
        subscription: Uuid,
        event: Uuid,
        reason: String,
    },

    // --- 数据错误（不重试） ---
    #[error("serialization error: {source}")]
    Serde {
        #[from]
        source: serde_json::Error,
    },
    #[error("parse error: {reason}")]
    Parse { reason: String },
    #[error("invalid filter: {reason}")]
    InvalidFilter { reason: String },
    #[error("invalid event: {reason}")]
    InvalidEvent { reason: String },
    #[error("not found: {reason}")]
    NotFound { reason: String },
    #[error("subscription removed: {id}")]
    SubscriptionRemoved { id: Uuid },

    // --- 取消 ---
    #[error("operation cancelled")]
    Cancelled,
}

/// 统一 Result 类型别名
pub type DomainResult<T> = Result<T, DomainError>;

impl DomainError {
    pub fn storage(reason: impl Into<String>) -> Self {
        DomainError::StorageUnavailable {
            reason: reason.into(),
        }
    }

    pub fn transport(transport: impl Into<String>, reason: impl Into<String>) -> Self {
        DomainError::Transport {
            transport: transport.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_event(reason: impl Into<String>) -> Self {
        DomainError::InvalidEvent {
            reason: reason.into(),
        }
    }

    /// 是否属于可通过重试恢复的瞬时错误
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DomainError::StorageUnavailable { .. }
                | DomainError::Transport { .. }
                | DomainError::AckTimeout { .. }
                | DomainError::DeliveryRejected { .. }
        )
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, DomainError::Cancelled)
    }
}

// ---- Cross-crate conversions ----

impl From<uuid::Error> for DomainError {
    fn from(err: uuid::Error) -> Self {
        DomainError::Parse {
            reason: err.to_string(),
        }
    }
}

impl From<regex::Error> for DomainError {
    fn from(err: regex::Error) -> Self {
        DomainError::InvalidFilter {
            reason: err.to_string(),
        }
    }
}

// 连接类错误视为瞬时，解码/约束类错误视为数据错误；
// 查询事件时单行解码失败应由存储实现跳过该行（见 `EventStorage::query_events`）
#[cfg(feature = "infra-sqlx")]
impl From<sqlx::Error> for DomainError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => DomainError::NotFound {
                reason: "row not found".to_string(),
            },
            sqlx::Error::Decode(_)
            | sqlx::Error::ColumnDecode { .. }
            | sqlx::Error::ColumnNotFound(_)
            | sqlx::Error::TypeNotFound { .. } => DomainError::InvalidEvent {
                reason: err.to_string(),
            },
            sqlx::Error::Database(ref db)
                if db.code().is_some_and(|code| code.starts_with("23")) =>
            {
                DomainError::InvalidEvent {
                    reason: err.to_string(),
                }
            }
            other => DomainError::StorageUnavailable {
                reason: other.to_string(),
            },
        }
    }
}
