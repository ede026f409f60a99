//! 持久化协议（persist）
//!
//! 定义引擎依赖的持久化能力集合：写入事件、按序号查询、推进游标、
//! 订阅记录的增删查，以及存储层的变更回调。
//! `InMemoryStorage` 是满足协议的内存实现，用于测试、示例与本地开发。
//!
mod memory;
mod storage;

pub use memory::InMemoryStorage;
pub use storage::{CursorKey, EventStorage, StorageCallbacks};
