//! 事件模型（Event）
//!
//! `Event` 是持久化后的不可变记录：序号由存储层在写入时分配，是唯一排序键；
//! `id` 是唯一去重键。`LedgerEvent` 是账本插件回调时提交的原始形态。
//!
use crate::error::{DomainError, DomainResult};
use bon::Builder;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 全局事件序号
pub type Sequence = i64;

#[derive(Debug, Clone, PartialEq, Builder, Serialize, Deserialize)]
pub struct Event {
    /// 事件唯一标识符（去重键）
    id: Uuid,
    /// 全局事件位点，由存储层在持久化后赋值
    sequence: Option<Sequence>,
    /// 命名空间
    #[builder(into)]
    namespace: String,
    /// 事件主题/类型
    #[builder(into)]
    topic: String,
    /// 产生事件的插件名称
    #[builder(into)]
    source: String,
    /// 负载引用（链下存储地址、消息 ID 等）
    #[builder(into)]
    payload_ref: String,
    /// 账本原生位置（区块号/日志索引等）
    #[builder(into)]
    protocol_id: Option<String>,
    /// 事件发生时间
    timestamp: DateTime<Utc>,
}

impl Event {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// 未持久化的事件返回 0
    pub fn sequence(&self) -> Sequence {
        self.sequence.unwrap_or_default()
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn payload_ref(&self) -> &str {
        &self.payload_ref
    }

    pub fn protocol_id(&self) -> Option<&str> {
        self.protocol_id.as_deref()
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// 由存储层调用，赋予持久化序号
    pub fn with_sequence(mut self, sequence: Sequence) -> Self {
        self.sequence = Some(sequence);
        self
    }
}

/// 账本插件回调提交的事件
#[derive(Debug, Clone, Builder, Serialize, Deserialize)]
pub struct LedgerEvent {
    #[builder(default = Uuid::new_v4())]
    pub id: Uuid,
    #[builder(into)]
    pub namespace: String,
    #[builder(into)]
    pub name: String,
    #[builder(into, default)]
    pub payload_ref: String,
    #[builder(into)]
    pub protocol_id: Option<String>,
    #[builder(default = Utc::now())]
    pub timestamp: DateTime<Utc>,
}

impl LedgerEvent {
    /// 入库前的即时校验，失败会作为同步确认失败返回给账本插件
    pub fn validate(&self) -> DomainResult<()> {
        validate_namespace(&self.namespace)?;
        if self.name.trim().is_empty() {
            return Err(DomainError::invalid_event("event name must not be empty"));
        }
        if self.id.is_nil() {
            return Err(DomainError::invalid_event("event id must not be nil"));
        }
        Ok(())
    }

    pub fn into_event(self, source: &str) -> Event {
        Event {
            id: self.id,
            sequence: None,
            namespace: self.namespace,
            topic: self.name,
            source: source.to_string(),
            payload_ref: self.payload_ref,
            protocol_id: self.protocol_id,
            timestamp: self.timestamp,
        }
    }
}

/// 命名空间：1~64 个字符，仅允许字母、数字、`-`、`_`、`.`
pub fn validate_namespace(namespace: &str) -> DomainResult<()> {
    let valid = !namespace.is_empty()
        && namespace.len() <= 64
        && namespace
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));

    if valid {
        Ok(())
    } else {
        Err(DomainError::invalid_event(format!(
            "invalid namespace '{namespace}'"
        )))
    }
}
