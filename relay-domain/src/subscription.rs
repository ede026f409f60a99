//! 订阅模型（Subscription）
//!
//! 订阅描述消费者的兴趣：命名空间、传输插件、过滤条件与游标。
//! 游标表示“已看过”的最后一个序号，而非“已匹配”的最后一个序号。
//!
use crate::error::DomainResult;
use crate::event::{Event, Sequence};
use bon::Builder;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type SubscriptionId = Uuid;

/// 订阅过滤条件（正则表达式），为空的字段匹配全部
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionFilter {
    pub topic: Option<String>,
    pub source: Option<String>,
}

impl SubscriptionFilter {
    pub fn topic(pattern: impl Into<String>) -> Self {
        Self {
            topic: Some(pattern.into()),
            source: None,
        }
    }

    pub fn compile(&self) -> DomainResult<CompiledFilter> {
        Ok(CompiledFilter {
            topic: self.topic.as_deref().map(Regex::new).transpose()?,
            source: self.source.as_deref().map(Regex::new).transpose()?,
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct CompiledFilter {
    topic: Option<Regex>,
    source: Option<Regex>,
}

impl CompiledFilter {
    pub fn matches(&self, event: &Event) -> bool {
        let topic_ok = self.topic.as_ref().is_none_or(|r| r.is_match(event.topic()));
        let source_ok = self
            .source
            .as_ref()
            .is_none_or(|r| r.is_match(event.source()));
        topic_ok && source_ok
    }
}

#[derive(Debug, Clone, PartialEq, Builder, Serialize, Deserialize)]
pub struct Subscription {
    #[builder(default = Uuid::new_v4())]
    id: SubscriptionId,
    #[builder(into)]
    namespace: String,
    #[builder(into)]
    name: String,
    /// 绑定的传输插件名称
    #[builder(into)]
    transport: String,
    #[builder(default)]
    filter: SubscriptionFilter,
    /// 最后一个已投递/已看过的序号
    #[builder(default)]
    cursor: Sequence,
    #[builder(default = Utc::now())]
    created: DateTime<Utc>,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn transport(&self) -> &str {
        &self.transport
    }

    pub fn filter(&self) -> &SubscriptionFilter {
        &self.filter
    }

    pub fn cursor(&self) -> Sequence {
        self.cursor
    }

    pub fn created(&self) -> DateTime<Utc> {
        self.created
    }

    pub fn with_cursor(mut self, cursor: Sequence) -> Self {
        self.cursor = cursor;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DomainError;

    fn event(topic: &str, source: &str) -> Event {
        Event::builder()
            .id(Uuid::new_v4())
            .namespace("ns1")
            .topic(topic)
            .source(source)
            .payload_ref("ref")
            .timestamp(Utc::now())
            .build()
    }

    #[test]
    fn empty_filter_matches_everything() {
        let f = SubscriptionFilter::default().compile().unwrap();
        assert!(f.matches(&event("A", "ethereum")));
        assert!(f.matches(&event("B", "fabric")));
    }

    #[test]
    fn topic_and_source_are_combined() {
        let f = SubscriptionFilter {
            topic: Some("^Token.*".into()),
            source: Some("ethereum".into()),
        }
        .compile()
        .unwrap();

        assert!(f.matches(&event("TokenTransfer", "ethereum")));
        assert!(!f.matches(&event("TokenTransfer", "fabric")));
        assert!(!f.matches(&event("BatchPin", "ethereum")));
    }

    #[test]
    fn unparseable_filter_is_rejected() {
        let err = SubscriptionFilter::topic("([").compile().unwrap_err();
        assert!(matches!(err, DomainError::InvalidFilter { .. }));
    }
}
