//! 管理命令（Command）及其处理器
//!
//! 改变订阅集合的写操作，例如创建或删除订阅：
//! - 不返回业务数据，需要标识时由调用方预先生成（如订阅 `id`）；
//! - 读操作请使用 [`Query`](crate::query::Query)。
//!
use crate::{context::AppContext, error::AppError};
use async_trait::async_trait;

pub trait Command: Send + Sync + 'static {
    /// 稳定名称，用于日志与追踪
    const NAME: &'static str;
}

#[async_trait]
pub trait CommandHandler<C>: Send + Sync
where
    C: Command,
{
    async fn handle(&self, ctx: &AppContext, cmd: C) -> Result<(), AppError>;
}
