//! 事件子系统（eventing）
//!
//! 提供事件聚合与分发的协议与运行时：
//! - `EventPoller`：合并唤醒信号 + 兜底定时器；
//! - `Aggregator`：按序号查询事件，唤醒落后的订阅，推进水位线；
//! - `SubscriptionManager`：每个传输一个实例，每个订阅一个独立的工作循环，负责匹配、投递与游标推进；
//! - `Transport`/`TransportRegistry`：可插拔的传输插件及其注册表；
//! - `EventManager`：门面，实现账本插件回调并暴露生命周期操作。
//!
//! 该模块仅定义协议与引擎，不绑定具体传输实现，可对接任意消息系统或内存实现。
//!
pub mod aggregator;
pub mod event_manager;
pub mod ledger;
pub mod poller;
pub mod subscription_manager;
pub mod transport;
pub mod transport_inmemory;

pub use aggregator::{Aggregator, PassSummary};
pub use event_manager::EventManager;
pub use ledger::{LedgerCallbacks, LedgerPlugin};
pub use poller::{EventPoller, NewEventSignal};
pub use subscription_manager::{ActiveSubscription, SubscriptionManager};
pub use transport::{
    AckOutcome, Acknowledgement, SendOutcome, Transport, TransportCallbacks, TransportFactory,
    TransportRegistry,
};
pub use transport_inmemory::{Delivery, InMemoryTransport};
