//! 应用层（relay-application）
//!
//! 面向管理接口的订阅用例：创建、删除与列出订阅。
//! 写操作以命令（`Command`）表达，读操作以查询（`Query`）表达，
//! 均由 `SubscriptionService` 处理，并把变更同步到运行中的 `EventManager`。
//!
pub mod command;
pub mod context;
pub mod error;
pub mod query;
pub mod subscription_service;

pub use subscription_service::{
    CreateSubscription, DeleteSubscription, ListSubscriptions, SubscriptionDto, SubscriptionList,
    SubscriptionService,
};
