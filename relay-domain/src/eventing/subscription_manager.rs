//! 订阅管理器（SubscriptionManager）
//!
//! 每个启用的传输插件对应一个实例，持有绑定到该传输的订阅集合。
//! 启动后每个订阅拥有独立的长驻工作循环（`EventPoller`），按自身游标从存储
//! 拉取事件，彼此互不阻塞：某个订阅的消费者长时间离线，只会卡住它自己的游标。
//! - `catch_up`：从游标之后拉取一批事件并处理，批次已满时立即再唤醒自身；
//! - `process`：按序号顺序把一批事件中匹配的部分投递给单个订阅，并推进游标；
//! - `deliver`：单次投递，失败经由重试策略无限重试，直到成功或订阅被移除/进程关闭；
//! - 支持需要异步确认的传输：确认到达前不推进游标，超时或拒收按瞬时错误重投。
//!
//! 游标记录“已看过”的最后序号：不匹配的事件同样推进游标。
//!
use crate::error::{DomainError, DomainResult};
use crate::event::{Event, Sequence};
use crate::eventing::{
    AckOutcome, Acknowledgement, EventPoller, NewEventSignal, SendOutcome, Transport,
    TransportCallbacks,
};
use crate::persist::{CursorKey, EventStorage};
use crate::retry::Retry;
use crate::subscription::{CompiledFilter, Subscription, SubscriptionId};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures_util::future::join_all;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// 已注册的订阅：编译后的过滤器、内存游标、取消令牌与工作循环
pub struct ActiveSubscription {
    subscription: Subscription,
    filter: CompiledFilter,
    cursor: AtomicI64,
    token: CancellationToken,
    worker: EventPoller,
}

impl ActiveSubscription {
    pub fn id(&self) -> SubscriptionId {
        self.subscription.id()
    }

    pub fn subscription(&self) -> &Subscription {
        &self.subscription
    }

    pub fn cursor(&self) -> Sequence {
        self.cursor.load(Ordering::Acquire)
    }

    /// 唤醒该订阅的工作循环；已有待处理信号时为空操作
    pub fn wake(&self) -> bool {
        self.worker.signal_handle().signal()
    }
}

struct PendingAck {
    event: Uuid,
    tx: oneshot::Sender<AckOutcome>,
}

/// 在途的异步确认；同一订阅同一时刻至多一条
#[derive(Default)]
struct PendingAcks {
    inner: DashMap<SubscriptionId, PendingAck>,
}

impl PendingAcks {
    fn register(&self, subscription: SubscriptionId, event: Uuid) -> oneshot::Receiver<AckOutcome> {
        let (tx, rx) = oneshot::channel();
        self.inner.insert(subscription, PendingAck { event, tx });
        rx
    }

    fn release(&self, subscription: SubscriptionId) {
        self.inner.remove(&subscription);
    }
}

impl TransportCallbacks for PendingAcks {
    fn acknowledge(&self, ack: Acknowledgement) -> DomainResult<()> {
        let event = ack.event;
        let Some((_, pending)) = self
            .inner
            .remove_if(&ack.subscription, |_, pending| pending.event == event)
        else {
            return Err(DomainError::NotFound {
                reason: format!(
                    "no delivery awaiting acknowledgement: subscription={}, event={}",
                    ack.subscription, ack.event
                ),
            });
        };
        // 接收方已放弃（超时）时忽略
        let _ = pending.tx.send(ack.outcome);
        Ok(())
    }
}

pub struct SubscriptionManager {
    name: String,
    transport: Arc<dyn Transport>,
    storage: Arc<dyn EventStorage>,
    retry: Retry,
    ack_timeout: Duration,
    batch_size: usize,
    poll_interval: Duration,
    subscriptions: DashMap<SubscriptionId, Arc<ActiveSubscription>>,
    pending: Arc<PendingAcks>,
    progress: Option<NewEventSignal>,
    running: AtomicBool,
    token: CancellationToken,
}

#[bon::bon]
impl SubscriptionManager {
    /// 构造时调用一次 `transport.init`，失败即构造失败。
    ///
    /// `progress` 在任一订阅推进游标后被触发（通常是聚合器的唤醒信号）。
    #[builder]
    pub fn new(
        #[builder(into)] name: String,
        transport: Arc<dyn Transport>,
        storage: Arc<dyn EventStorage>,
        #[builder(default)] retry: Retry,
        #[builder(default = Duration::from_secs(30))] ack_timeout: Duration,
        #[builder(default = 50)] batch_size: usize,
        #[builder(default = Duration::from_secs(1))] poll_interval: Duration,
        progress: Option<NewEventSignal>,
        #[builder(default)] token: CancellationToken,
    ) -> DomainResult<Self> {
        let pending = Arc::new(PendingAcks::default());
        transport.init(pending.clone())?;

        Ok(Self {
            name,
            transport,
            storage,
            retry,
            ack_timeout,
            batch_size: batch_size.max(1),
            poll_interval,
            subscriptions: DashMap::new(),
            pending,
            progress,
            running: AtomicBool::new(false),
            token,
        })
    }
}

impl SubscriptionManager {
    /// 注册名称（即订阅的 `transport` 字段）
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// 为已注册的订阅启动工作循环；此后注册的订阅在注册时即启动
    pub fn start(self: &Arc<Self>) {
        self.running.store(true, Ordering::SeqCst);
        for sub in self.active() {
            self.spawn_worker(&sub);
        }
    }

    /// 等待所有已启动的工作循环退出（需先取消令牌）
    pub async fn wait_stop(&self) {
        let closed: Vec<CancellationToken> = self
            .subscriptions
            .iter()
            .filter(|entry| entry.worker.is_started())
            .map(|entry| entry.worker.closed())
            .collect();
        join_all(closed.iter().map(CancellationToken::cancelled)).await;
    }

    /// 注册订阅；过滤器无法编译时返回 `DomainError::InvalidFilter`。
    /// 已存在的订阅保持不变。
    pub fn add_subscription(self: &Arc<Self>, subscription: Subscription) -> DomainResult<()> {
        if subscription.transport() != self.name {
            return Err(DomainError::InvalidState {
                reason: format!(
                    "subscription {} is bound to transport '{}', not '{}'",
                    subscription.id(),
                    subscription.transport(),
                    self.name
                ),
            });
        }
        let filter = subscription.filter().compile()?;

        let sub = match self.subscriptions.entry(subscription.id()) {
            Entry::Occupied(_) => return Ok(()),
            Entry::Vacant(slot) => {
                info!(
                    transport = %self.name,
                    subscription = %subscription.id(),
                    name = subscription.name(),
                    cursor = subscription.cursor(),
                    "subscription registered"
                );
                let active = Arc::new(ActiveSubscription {
                    cursor: AtomicI64::new(subscription.cursor()),
                    filter,
                    token: self.token.child_token(),
                    worker: EventPoller::new(self.poll_interval),
                    subscription,
                });
                slot.insert(active.clone());
                active
            }
        };

        if self.running.load(Ordering::SeqCst) {
            self.spawn_worker(&sub);
        }
        Ok(())
    }

    /// 移除订阅并释放在途投递（取消重试与工作循环、放弃等待中的确认）
    pub fn remove_subscription(&self, id: SubscriptionId) -> bool {
        let Some((_, sub)) = self.subscriptions.remove(&id) else {
            return false;
        };
        sub.token.cancel();
        self.pending.release(id);
        info!(transport = %self.name, subscription = %id, "subscription removed");
        true
    }

    /// 当前注册的订阅快照
    pub fn active(&self) -> Vec<Arc<ActiveSubscription>> {
        self.subscriptions
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// 订阅记录，`cursor` 为当前内存游标
    pub fn subscriptions(&self) -> Vec<Subscription> {
        let mut subs: Vec<Subscription> = self
            .subscriptions
            .iter()
            .map(|entry| entry.subscription.clone().with_cursor(entry.cursor()))
            .collect();
        subs.sort_by_key(|s| s.created());
        subs
    }

    pub fn cursor(&self, id: SubscriptionId) -> Option<Sequence> {
        self.subscriptions.get(&id).map(|entry| entry.cursor())
    }

    /// 工作循环的一轮：从游标之后拉取一批事件并处理，返回本批事件数。
    ///
    /// 批次已满时再次唤醒自身；有进展时触发 `progress`。
    pub async fn catch_up(&self, sub: &ActiveSubscription) -> DomainResult<usize> {
        let from = sub.cursor();
        let events: Vec<Event> = self
            .retry
            .run(&sub.token, "query_events", |_| {
                self.storage.query_events(None, from, self.batch_size)
            })
            .await?;
        if events.is_empty() {
            return Ok(0);
        }

        self.process(sub, &events).await?;

        if events.len() >= self.batch_size {
            sub.wake();
        }
        if let Some(progress) = &self.progress {
            progress.signal();
        }
        Ok(events.len())
    }

    /// 按序号顺序处理一批事件。
    ///
    /// - 序号不大于游标的事件跳过；
    /// - 匹配的事件投递成功后立即持久化推进游标；
    /// - 畸形数据（不可重试错误）记录日志后跳过，游标照常推进；
    /// - 取消或订阅被移除时返回错误，不推进未完成事件的游标。
    pub async fn process(&self, sub: &ActiveSubscription, events: &[Event]) -> DomainResult<()> {
        let mut seen = sub.cursor();

        for event in events {
            let sequence = event.sequence();
            if sequence <= seen {
                continue;
            }

            if self.matches(sub, event) {
                match self.deliver(sub, event).await {
                    Ok(()) => self.advance(sub, sequence).await?,
                    Err(err) if err.is_cancelled() => return Err(err),
                    Err(err @ DomainError::SubscriptionRemoved { .. }) => return Err(err),
                    Err(err) => {
                        warn!(
                            transport = %self.name,
                            subscription = %sub.id(),
                            sequence,
                            error = %err,
                            "skipping undeliverable event"
                        );
                    }
                }
            }
            seen = sequence;
        }

        if seen > sub.cursor() {
            self.advance(sub, seen).await?;
        }
        Ok(())
    }

    /// 投递单个事件，瞬时错误按重试策略无限重试
    pub async fn deliver(&self, sub: &ActiveSubscription, event: &Event) -> DomainResult<()> {
        self.retry
            .run(&sub.token, "deliver", |attempt| async move {
                debug!(
                    transport = %self.name,
                    subscription = %sub.id(),
                    sequence = event.sequence(),
                    attempt,
                    "delivering event"
                );
                self.send_once(sub, event).await
            })
            .await
    }

    fn spawn_worker(self: &Arc<Self>, sub: &Arc<ActiveSubscription>) {
        let manager = self.clone();
        let worker_sub = sub.clone();
        let started = sub.worker.start(sub.token.clone(), move || {
            let manager = manager.clone();
            let sub = worker_sub.clone();
            async move {
                match manager.catch_up(&sub).await {
                    Ok(0) => {}
                    Ok(events) => debug!(
                        transport = %manager.name,
                        subscription = %sub.id(),
                        events,
                        cursor = sub.cursor(),
                        "subscription pass complete"
                    ),
                    Err(err) if err.is_cancelled() => {}
                    Err(DomainError::SubscriptionRemoved { .. }) => {}
                    Err(err) => warn!(
                        transport = %manager.name,
                        subscription = %sub.id(),
                        error = %err,
                        "subscription pass failed"
                    ),
                }
            }
        });
        // 并发的 start/add_subscription 可能对同一订阅重复启动
        if started.is_ok() {
            debug!(transport = %self.name, subscription = %sub.id(), "subscription worker started");
        }
    }

    fn matches(&self, sub: &ActiveSubscription, event: &Event) -> bool {
        if event.namespace() != sub.subscription.namespace() {
            return false;
        }
        match self.transport.matches(event, &sub.filter) {
            Ok(matched) => matched,
            Err(err) => {
                warn!(
                    transport = %self.name,
                    subscription = %sub.id(),
                    sequence = event.sequence(),
                    error = %err,
                    "event cannot be matched, skipping"
                );
                false
            }
        }
    }

    async fn send_once(&self, sub: &ActiveSubscription, event: &Event) -> DomainResult<()> {
        let id = sub.id();
        let ack = self.pending.register(id, event.id());

        let outcome = match self.transport.send(&sub.subscription, event).await {
            Ok(outcome) => outcome,
            Err(err) => {
                self.pending.release(id);
                return Err(err);
            }
        };

        if outcome == SendOutcome::Delivered {
            self.pending.release(id);
            return Ok(());
        }

        let result = tokio::select! {
            _ = sub.token.cancelled() => Err(DomainError::Cancelled),
            received = tokio::time::timeout(self.ack_timeout, ack) => match received {
                Err(_) => Err(DomainError::AckTimeout { subscription: id, event: event.id() }),
                Ok(Err(_)) => Err(DomainError::SubscriptionRemoved { id }),
                Ok(Ok(AckOutcome::Accepted)) => Ok(()),
                Ok(Ok(AckOutcome::Rejected { reason })) => Err(DomainError::DeliveryRejected {
                    subscription: id,
                    event: event.id(),
                    reason,
                }),
            },
        };
        self.pending.release(id);
        result
    }

    async fn advance(&self, sub: &ActiveSubscription, sequence: Sequence) -> DomainResult<()> {
        let key = CursorKey::Subscription(sub.id());
        self.retry
            .run(&sub.token, "advance_cursor", |_| {
                self.storage.advance_cursor(key, sequence)
            })
            .await?;
        sub.cursor.fetch_max(sequence, Ordering::AcqRel);
        Ok(())
    }
}
