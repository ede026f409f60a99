//! 传输插件（Transport）协议与注册表
//!
//! 传输插件负责把事件送达外部订阅方，能力集合为 {match, send, acknowledge}：
//! - `matches`：判断事件是否满足订阅过滤条件（默认使用正则过滤器）；
//! - `send`：投递事件，返回已送达或需等待异步确认；
//! - 确认：插件通过 `init` 时收到的 `TransportCallbacks` 回报确认结果。
//!
//! `TransportRegistry` 以名称为键保存工厂，启动时一次性解析。
//!
use crate::error::{DomainError, DomainResult};
use crate::event::Event;
use crate::subscription::{CompiledFilter, Subscription, SubscriptionId};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

/// `send` 的返回：立即成功，或需要等待异步确认后才能推进游标
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Delivered,
    AwaitingAck,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AckOutcome {
    Accepted,
    /// 订阅方拒收，按瞬时错误重投
    Rejected { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Acknowledgement {
    pub subscription: SubscriptionId,
    pub event: Uuid,
    pub outcome: AckOutcome,
}

impl Acknowledgement {
    pub fn accepted(subscription: SubscriptionId, event: Uuid) -> Self {
        Self {
            subscription,
            event,
            outcome: AckOutcome::Accepted,
        }
    }

    pub fn rejected(subscription: SubscriptionId, event: Uuid, reason: impl Into<String>) -> Self {
        Self {
            subscription,
            event,
            outcome: AckOutcome::Rejected {
                reason: reason.into(),
            },
        }
    }
}

/// 由订阅管理器实现，传输插件用它回报异步确认
pub trait TransportCallbacks: Send + Sync {
    /// 没有与之匹配的在途投递时返回 `DomainError::NotFound`
    fn acknowledge(&self, ack: Acknowledgement) -> DomainResult<()>;
}

#[async_trait]
pub trait Transport: Send + Sync {
    fn name(&self) -> &str;

    /// 订阅管理器构造时调用一次
    fn init(&self, callbacks: Arc<dyn TransportCallbacks>) -> DomainResult<()> {
        let _ = callbacks;
        Ok(())
    }

    /// 返回不可重试的错误表示事件对该传输而言是畸形数据，将被跳过
    fn matches(&self, event: &Event, filter: &CompiledFilter) -> DomainResult<bool> {
        Ok(filter.matches(event))
    }

    async fn send(&self, subscription: &Subscription, event: &Event) -> DomainResult<SendOutcome>;
}

pub type TransportFactory = Arc<dyn Fn() -> Arc<dyn Transport> + Send + Sync>;

#[derive(Clone, Default)]
pub struct TransportRegistry {
    factories: BTreeMap<String, TransportFactory>,
}

impl TransportRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 预置内存传输（名称 `memory`）
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("memory", || {
            Arc::new(super::InMemoryTransport::default()) as Arc<dyn Transport>
        });
        registry
    }

    pub fn register<F>(&mut self, name: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn() -> Arc<dyn Transport> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Arc::new(factory));
        self
    }

    /// 注册已有实例：每次解析都返回同一个实例
    pub fn register_instance(
        &mut self,
        name: impl Into<String>,
        transport: Arc<dyn Transport>,
    ) -> &mut Self {
        self.register(name, move || transport.clone())
    }

    pub fn resolve(&self, name: &str) -> DomainResult<Arc<dyn Transport>> {
        self.factories
            .get(name)
            .map(|factory| factory())
            .ok_or_else(|| DomainError::UnknownTransport {
                name: name.to_string(),
            })
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }
}
