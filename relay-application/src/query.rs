//! 只读查询（Query）及其处理器
//!
//! 不改变订阅或事件状态，结果以序列化友好的 [`Dto`] 返回，与领域模型解耦。
//!
use crate::{context::AppContext, error::AppError};
use async_trait::async_trait;
use serde::Serialize;

pub trait Dto: Serialize + Send + Sync + 'static {}

pub trait Query: Send + Sync + 'static {
    const NAME: &'static str;

    type Dto: Dto;
}

#[async_trait]
pub trait QueryHandler<Q>: Send + Sync
where
    Q: Query,
{
    async fn handle(&self, ctx: &AppContext, q: Q) -> Result<Q::Dto, AppError>;
}
