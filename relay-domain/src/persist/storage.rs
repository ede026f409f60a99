//! 持久化存储（EventStorage）协议
//!
//! 所有操作都可能失败，实现方需按错误性质返回：连接类问题返回可重试的
//! `DomainError::StorageUnavailable`，数据问题返回不可重试的错误。
//! “写入事件”与“推进游标”是彼此独立的原子操作，不假设跨实体事务。
//!
use crate::error::DomainResult as Result;
use crate::event::{Event, Sequence};
use crate::subscription::{Subscription, SubscriptionId};
use async_trait::async_trait;
use std::fmt;

/// 游标归属：聚合器自身的水位线，或某个订阅的投递游标
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CursorKey {
    Aggregator,
    Subscription(SubscriptionId),
}

impl fmt::Display for CursorKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CursorKey::Aggregator => write!(f, "aggregator"),
            CursorKey::Subscription(id) => write!(f, "subscription:{id}"),
        }
    }
}

#[async_trait]
pub trait EventStorage: Send + Sync {
    /// 写入事件并分配序号；以 `id` 去重，重复写入返回已有记录
    async fn persist_event(&self, event: Event) -> Result<Event>;

    /// 查询序号大于 `after` 的事件，按序号升序，最多 `limit` 条；
    /// `namespace` 为空表示全部命名空间。
    ///
    /// 无法解码的单行记录由实现方记录日志后跳过，而不是让整批查询失败：
    /// 调用方允许序号出现空洞，并会越过空洞继续推进游标。
    /// 这里返回的不可重试错误会让同一批次在每一轮都再次失败。
    async fn query_events(
        &self,
        namespace: Option<&str>,
        after: Sequence,
        limit: usize,
    ) -> Result<Vec<Event>>;

    /// 已持久化的最大序号，空库为 0
    async fn latest_sequence(&self) -> Result<Sequence>;

    async fn get_cursor(&self, key: CursorKey) -> Result<Option<Sequence>>;

    /// 推进游标；小于当前值的推进被忽略（游标单调不减）
    async fn advance_cursor(&self, key: CursorKey, sequence: Sequence) -> Result<()>;

    async fn insert_subscription(&self, subscription: &Subscription) -> Result<()>;

    /// 删除订阅及其游标，返回是否存在
    async fn delete_subscription(&self, id: SubscriptionId) -> Result<bool>;

    /// 返回全部订阅，`cursor` 为当前持久化的游标
    async fn list_subscriptions(&self) -> Result<Vec<Subscription>>;
}

/// 存储层变更回调：任何写入方持久化事件后都会触发
pub trait StorageCallbacks: Send + Sync {
    fn event_persisted(&self, namespace: &str, sequence: Sequence);
}
