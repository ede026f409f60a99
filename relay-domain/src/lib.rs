//! 事件聚合与分发引擎（relay-domain）
//!
//! 接收来自账本插件等上游的事件通知，持久化并按序号排序后，
//! 通过可插拔的传输插件以“至少一次”语义扇出给各个订阅：
//! - 事件与订阅模型（`event`、`subscription`）
//! - 指数退避重试策略（`retry`），仅在进程关闭时放弃
//! - 持久化协议与内存实现（`persist`）
//! - 事件子系统（`eventing`）：唤醒器、聚合器、订阅管理器与门面 `EventManager`
//!
//! 本 crate 只定义协议与引擎，具体存储后端与传输实现由上层注入。
//!
//! 典型用法：
//! 1. 准备 `EventStorage` 实现与 `TransportRegistry`；
//! 2. 通过 `EventManager::builder()` 装配并 `start()`；
//! 3. 账本插件经由 `LedgerCallbacks` 回调写入事件；
//! 4. 关闭时取消 `CancellationToken` 并 `wait_stop()`。
//!
pub mod config;
pub mod error;
pub mod event;
#[cfg(feature = "eventing")]
pub mod eventing;
pub mod persist;
pub mod retry;
pub mod subscription;
