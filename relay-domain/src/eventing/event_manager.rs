//! 事件管理器（EventManager）
//!
//! 顶层门面，持有聚合器与各传输的订阅管理器：
//! - 构造时校验必需的协作者（账本插件、持久化存储），并按配置解析启用的传输；
//! - 实现账本插件的入站回调：校验 → 持久化 → 唤醒聚合器；
//! - 生命周期：`start` / `signal_new_event` / `shutdown` / `wait_stop`。
//!
//! 聚合器与各订阅的工作循环共享同一个取消令牌树：`shutdown` 取消根令牌，
//! `wait_stop` 等待聚合器与所有已启动的订阅循环退出。
//!
use crate::config::EventManagerConfig;
use crate::error::{DomainError, DomainResult};
use crate::event::{LedgerEvent, Sequence};
use crate::eventing::{
    Aggregator, EventPoller, LedgerCallbacks, LedgerPlugin, NewEventSignal, SubscriptionManager,
    TransportRegistry,
};
use crate::persist::EventStorage;
use crate::retry::Retry;
use crate::subscription::{Subscription, SubscriptionId};
use async_trait::async_trait;
use futures_util::future::join_all;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub struct EventManager {
    ledger: Arc<dyn LedgerPlugin>,
    storage: Arc<dyn EventStorage>,
    managers: BTreeMap<String, Arc<SubscriptionManager>>,
    aggregator: Arc<Aggregator>,
    retry: Retry,
    token: CancellationToken,
    started: AtomicBool,
}

#[bon::bon]
impl EventManager {
    /// 缺少账本插件或存储时返回 `DomainError::MissingDependency`；
    /// 任一启用的传输无法解析时返回 `DomainError::UnknownTransport`。
    #[builder]
    pub fn new(
        ledger: Option<Arc<dyn LedgerPlugin>>,
        storage: Option<Arc<dyn EventStorage>>,
        #[builder(default = TransportRegistry::with_defaults())] registry: TransportRegistry,
        #[builder(default)] config: EventManagerConfig,
        #[builder(default)] token: CancellationToken,
    ) -> DomainResult<Self> {
        let ledger = ledger.ok_or(DomainError::MissingDependency {
            dependency: "ledger plugin",
        })?;
        let storage = storage.ok_or(DomainError::MissingDependency {
            dependency: "event storage",
        })?;
        config.validate()?;

        let retry = config.retry();
        // 订阅推进游标后经由同一信号唤醒聚合器
        let poller = EventPoller::new(config.poll_interval());
        let progress = poller.signal_handle();

        let mut managers = BTreeMap::new();
        for name in &config.transports.enabled {
            if managers.contains_key(name) {
                continue;
            }
            let manager = SubscriptionManager::builder()
                .name(name.as_str())
                .transport(registry.resolve(name)?)
                .storage(storage.clone())
                .retry(retry)
                .ack_timeout(config.ack_timeout())
                .batch_size(config.aggregator.batch_size)
                .poll_interval(config.poll_interval())
                .progress(progress.clone())
                .token(token.child_token())
                .build()?;
            managers.insert(name.clone(), Arc::new(manager));
        }

        let aggregator = Aggregator::builder()
            .storage(storage.clone())
            .managers(managers.values().cloned().collect())
            .retry(retry)
            .batch_size(config.aggregator.batch_size)
            .poller(poller)
            .build();

        Ok(Self {
            ledger,
            storage,
            managers,
            aggregator: Arc::new(aggregator),
            retry,
            token,
            started: AtomicBool::new(false),
        })
    }
}

impl EventManager {
    /// 恢复持久化的订阅，启动各订阅与聚合器的工作循环，随后立即返回。
    ///
    /// 未知传输或过滤器无法编译的订阅记录日志后跳过；重复启动返回
    /// `DomainError::InvalidState`。
    pub async fn start(&self) -> DomainResult<()> {
        if self.started.swap(true, Ordering::AcqRel) {
            return Err(DomainError::InvalidState {
                reason: "event manager already started".to_string(),
            });
        }

        let result = self.restore_and_start().await;
        if result.is_err() {
            self.started.store(false, Ordering::Release);
        }
        result
    }

    async fn restore_and_start(&self) -> DomainResult<()> {
        let subscriptions = self
            .retry
            .run(&self.token, "list_subscriptions", |_| {
                self.storage.list_subscriptions()
            })
            .await?;

        let mut restored = 0usize;
        for sub in subscriptions {
            let id = sub.id();
            let Some(manager) = self.managers.get(sub.transport()) else {
                warn!(
                    subscription = %id,
                    transport = sub.transport(),
                    "subscription bound to a transport that is not enabled, skipping"
                );
                continue;
            };
            match manager.add_subscription(sub) {
                Ok(()) => restored += 1,
                Err(err) => warn!(subscription = %id, error = %err, "skipping subscription"),
            }
        }

        for manager in self.managers.values() {
            manager.start();
        }
        self.aggregator.start(self.token.clone())?;
        info!(
            ledger = self.ledger.name(),
            transports = ?self.transports().collect::<Vec<_>>(),
            subscriptions = restored,
            "event manager started"
        );
        Ok(())
    }

    /// 合并唤醒信号的只写句柄，可交给存储层作为 `StorageCallbacks`
    pub fn new_events(&self) -> NewEventSignal {
        self.aggregator.signal_handle()
    }

    pub fn signal_new_event(&self) -> bool {
        self.aggregator.signal_handle().signal()
    }

    /// 请求关闭：取消所有在途重试与等待
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// 等待聚合器与订阅工作循环完全退出；未启动时立即返回
    pub async fn wait_stop(&self) {
        if !self.started.load(Ordering::Acquire) {
            return;
        }
        self.aggregator.closed().cancelled().await;
        join_all(self.managers.values().map(|manager| manager.wait_stop())).await;
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn aggregator(&self) -> &Arc<Aggregator> {
        &self.aggregator
    }

    pub fn subscription_manager(&self, transport: &str) -> Option<&Arc<SubscriptionManager>> {
        self.managers.get(transport)
    }

    /// 启用的传输名称
    pub fn transports(&self) -> impl Iterator<Item = &str> {
        self.managers.keys().map(String::as_str)
    }

    /// 注册订阅到对应的订阅管理器；已启动时订阅的工作循环随即开始追赶
    pub fn add_subscription(&self, subscription: Subscription) -> DomainResult<()> {
        let manager =
            self.managers
                .get(subscription.transport())
                .ok_or_else(|| DomainError::UnknownTransport {
                    name: subscription.transport().to_string(),
                })?;
        manager.add_subscription(subscription)?;
        self.signal_new_event();
        Ok(())
    }

    /// 移除订阅；被移除的订阅不再压住水位线，因此同时唤醒聚合器
    pub fn remove_subscription(&self, id: SubscriptionId) -> bool {
        let removed = self
            .managers
            .values()
            .any(|manager| manager.remove_subscription(id));
        if removed {
            self.signal_new_event();
        }
        removed
    }

    /// 所有传输下的订阅，`cursor` 为当前内存游标
    pub fn subscriptions(&self) -> Vec<Subscription> {
        self.managers
            .values()
            .flat_map(|manager| manager.subscriptions())
            .collect()
    }
}

#[async_trait]
impl LedgerCallbacks for EventManager {
    async fn ledger_event(&self, event: LedgerEvent) -> DomainResult<Sequence> {
        event.validate()?;

        let persisted = self
            .storage
            .persist_event(event.into_event(self.ledger.name()))
            .await?;
        debug!(
            event = %persisted.id(),
            namespace = persisted.namespace(),
            sequence = persisted.sequence(),
            "ledger event persisted"
        );

        self.signal_new_event();
        Ok(persisted.sequence())
    }
}
