//! 账本插件（LedgerPlugin）协议
//!
//! 账本插件观察到新区块/事件后通过 `LedgerCallbacks` 回调提交，
//! 回调同步返回成功或失败，由插件自行决定对本节点的重试与退避。
//!
use crate::error::DomainResult;
use crate::event::{LedgerEvent, Sequence};
use async_trait::async_trait;

pub trait LedgerPlugin: Send + Sync {
    /// 插件名称，写入事件的 `source` 字段
    fn name(&self) -> &str;
}

#[async_trait]
pub trait LedgerCallbacks: Send + Sync {
    /// 校验并持久化事件，返回分配的序号
    async fn ledger_event(&self, event: LedgerEvent) -> DomainResult<Sequence>;

    /// 同一区块内的多个事件，按顺序提交，遇错即停
    async fn ledger_events(&self, events: Vec<LedgerEvent>) -> DomainResult<Vec<Sequence>> {
        let mut sequences = Vec::with_capacity(events.len());
        for event in events {
            sequences.push(self.ledger_event(event).await?);
        }
        Ok(sequences)
    }
}
