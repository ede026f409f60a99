//! 聚合器（Aggregator）
//!
//! 单个长驻工作循环，由 `EventPoller` 的信号或定时器唤醒，每轮：
//! 1. 读取水位线（首轮从存储加载）；
//! 2. 从水位线之后按序号查询一批事件；
//! 3. 唤醒落后于本批次的订阅工作循环（批次已满时唤醒全部订阅）；
//! 4. 把水位线推进到 `min(本批最后序号, 各订阅游标)` 并持久化；
//! 5. 批次已满且整批都已被所有订阅看过时，立即再次触发信号。
//!
//! 投递由各订阅的工作循环独立完成，某个订阅停滞只会压住水位线，
//! 不会阻塞其它订阅。订阅推进游标后会回头唤醒聚合器。
//!
use crate::error::{DomainError, DomainResult};
use crate::event::{Event, Sequence};
use crate::eventing::{EventPoller, NewEventSignal, SubscriptionManager};
use crate::persist::{CursorKey, EventStorage};
use crate::retry::Retry;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

/// 单轮处理的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PassSummary {
    pub events: usize,
    pub watermark: Sequence,
    /// 游标落后于本批最后序号的订阅数
    pub lagging: usize,
}

pub struct Aggregator {
    storage: Arc<dyn EventStorage>,
    managers: Vec<Arc<SubscriptionManager>>,
    retry: Retry,
    batch_size: usize,
    watermark: AtomicI64,
    watermark_loaded: AtomicBool,
    poller: EventPoller,
}

#[bon::bon]
impl Aggregator {
    /// `poller` 可由调用方预先创建，以便在构造订阅管理器时取得唤醒句柄
    #[builder]
    pub fn new(
        storage: Arc<dyn EventStorage>,
        #[builder(default)] managers: Vec<Arc<SubscriptionManager>>,
        #[builder(default)] retry: Retry,
        #[builder(default = 50)] batch_size: usize,
        #[builder(default = Duration::from_secs(1))] poll_interval: Duration,
        poller: Option<EventPoller>,
    ) -> Self {
        Self {
            storage,
            managers,
            retry,
            batch_size: batch_size.max(1),
            watermark: AtomicI64::new(0),
            watermark_loaded: AtomicBool::new(false),
            poller: poller.unwrap_or_else(|| EventPoller::new(poll_interval)),
        }
    }
}

impl Aggregator {
    /// 已被所有订阅看过的最大序号
    pub fn watermark(&self) -> Sequence {
        self.watermark.load(Ordering::Acquire)
    }

    pub fn signal_handle(&self) -> NewEventSignal {
        self.poller.signal_handle()
    }

    /// 工作循环退出后被取消
    pub fn closed(&self) -> CancellationToken {
        self.poller.closed()
    }

    /// 启动工作循环；只能启动一次
    pub fn start(self: &Arc<Self>, token: CancellationToken) -> DomainResult<JoinHandle<()>> {
        let aggregator = self.clone();
        let pass_token = token.clone();

        self.poller.start(token, move || {
            let aggregator = aggregator.clone();
            let token = pass_token.clone();
            async move {
                match aggregator.process_pass(&token).await {
                    Ok(summary) if summary.events > 0 => debug!(
                        events = summary.events,
                        watermark = summary.watermark,
                        lagging = summary.lagging,
                        "aggregator pass complete"
                    ),
                    Ok(_) => {}
                    Err(err) if err.is_cancelled() => debug!("aggregator pass cancelled"),
                    Err(err) => error!(error = %err, "aggregator pass failed"),
                }
            }
        })
    }

    /// 执行一轮：查询、唤醒落后的订阅、推进水位线
    pub async fn process_pass(&self, token: &CancellationToken) -> DomainResult<PassSummary> {
        let watermark = self.load_watermark(token).await?;

        let events: Vec<Event> = self
            .retry
            .run(token, "query_events", |_| {
                self.storage.query_events(None, watermark, self.batch_size)
            })
            .await?;

        let Some(last) = events.last().map(Event::sequence) else {
            return Ok(PassSummary {
                events: 0,
                watermark,
                lagging: 0,
            });
        };
        // 批次已满时后面可能还有事件，游标已越过本批的订阅同样需要唤醒
        let full = events.len() >= self.batch_size;

        let mut target = last;
        let mut lagging = 0;
        for sub in self.managers.iter().flat_map(|m| m.active()) {
            let cursor = sub.cursor();
            if cursor < last {
                lagging += 1;
            }
            if full || cursor < last {
                sub.wake();
            }
            target = target.min(cursor);
        }

        if token.is_cancelled() {
            return Err(DomainError::Cancelled);
        }

        if target > watermark {
            self.retry
                .run(token, "advance_watermark", |_| {
                    self.storage.advance_cursor(CursorKey::Aggregator, target)
                })
                .await?;
            self.watermark.fetch_max(target, Ordering::AcqRel);
        }

        if full && target == last {
            self.poller.signal_handle().signal();
        }

        Ok(PassSummary {
            events: events.len(),
            watermark: self.watermark(),
            lagging,
        })
    }

    async fn load_watermark(&self, token: &CancellationToken) -> DomainResult<Sequence> {
        if !self.watermark_loaded.load(Ordering::Acquire) {
            let stored = self
                .retry
                .run(token, "load_watermark", |_| {
                    self.storage.get_cursor(CursorKey::Aggregator)
                })
                .await?;
            self.watermark
                .fetch_max(stored.unwrap_or_default(), Ordering::AcqRel);
            self.watermark_loaded.store(true, Ordering::Release);
        }
        Ok(self.watermark())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eventing::InMemoryTransport;
    use crate::persist::InMemoryStorage;
    use crate::subscription::Subscription;
    use chrono::Utc;
    use uuid::Uuid;

    async fn persist(storage: &InMemoryStorage, n: usize) {
        for _ in 0..n {
            let event = Event::builder()
                .id(Uuid::new_v4())
                .namespace("ns1")
                .topic("A")
                .source("ledger")
                .payload_ref("ref")
                .timestamp(Utc::now())
                .build();
            storage.persist_event(event).await.unwrap();
        }
    }

    #[tokio::test]
    async fn loads_durable_watermark_on_first_pass() {
        let storage = Arc::new(InMemoryStorage::new());
        persist(&storage, 4).await;
        storage
            .advance_cursor(CursorKey::Aggregator, 3)
            .await
            .unwrap();

        let aggregator = Aggregator::builder().storage(storage.clone()).build();
        let summary = aggregator
            .process_pass(&CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(
            summary,
            PassSummary {
                events: 1,
                watermark: 4,
                lagging: 0
            }
        );
    }

    #[tokio::test]
    async fn lagging_subscription_holds_back_watermark() {
        let storage = Arc::new(InMemoryStorage::new());
        persist(&storage, 3).await;

        let manager = Arc::new(
            SubscriptionManager::builder()
                .name("memory")
                .transport(Arc::new(InMemoryTransport::default()))
                .storage(storage.clone())
                .build()
                .unwrap(),
        );
        let aggregator = Aggregator::builder()
            .storage(storage.clone())
            .managers(vec![manager.clone()])
            .build();
        let token = CancellationToken::new();

        let sub = Subscription::builder()
            .namespace("ns1")
            .name("late")
            .transport("memory")
            .cursor(1)
            .build();
        storage.insert_subscription(&sub).await.unwrap();
        manager.add_subscription(sub.clone()).unwrap();

        let summary = aggregator.process_pass(&token).await.unwrap();
        assert_eq!(summary.lagging, 1);
        assert_eq!(aggregator.watermark(), 1);

        let active = manager.active().pop().unwrap();
        assert_eq!(manager.catch_up(&active).await.unwrap(), 2);
        assert_eq!(manager.cursor(sub.id()), Some(3));

        let summary = aggregator.process_pass(&token).await.unwrap();
        assert_eq!(summary.lagging, 0);
        assert_eq!(aggregator.watermark(), 3);
        assert_eq!(
            storage.get_cursor(CursorKey::Aggregator).await.unwrap(),
            Some(3)
        );
    }

    #[tokio::test]
    async fn cancelled_pass_does_not_advance() {
        let storage = Arc::new(InMemoryStorage::new());
        persist(&storage, 2).await;
        let aggregator = Aggregator::builder().storage(storage.clone()).build();

        let token = CancellationToken::new();
        token.cancel();
        let err = aggregator.process_pass(&token).await.unwrap_err();

        assert!(err.is_cancelled());
        assert_eq!(aggregator.watermark(), 0);
        assert_eq!(
            storage.get_cursor(CursorKey::Aggregator).await.unwrap(),
            None
        );
    }
}
