//! 订阅管理用例（SubscriptionService）
//!
//! - `CreateSubscription`：校验后写入存储，注册到运行中的订阅管理器并唤醒聚合器；
//!   未指定游标时默认取当前最大序号（只接收此后的事件）；
//!   创建串行执行，“同一命名空间内名称唯一”的检查与写入之间不会插入其它创建；
//! - `DeleteSubscription`：先释放在途投递，再删除持久化记录；
//! - `ListSubscriptions`：按命名空间列出持久化的订阅及其游标。
//!
use crate::command::{Command, CommandHandler};
use crate::context::AppContext;
use crate::error::AppError;
use crate::query::{Dto, Query, QueryHandler};
use async_trait::async_trait;
use bon::Builder;
use chrono::{DateTime, Utc};
use relay_domain::event::{Sequence, validate_namespace};
use relay_domain::eventing::EventManager;
use relay_domain::persist::EventStorage;
use relay_domain::subscription::{Subscription, SubscriptionFilter, SubscriptionId};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Clone, Builder)]
pub struct CreateSubscription {
    #[builder(default = Uuid::new_v4())]
    pub id: SubscriptionId,
    #[builder(into)]
    pub namespace: String,
    #[builder(into)]
    pub name: String,
    #[builder(into)]
    pub transport: String,
    #[builder(default)]
    pub filter: SubscriptionFilter,
    /// 起始游标；为空表示从当前最大序号开始
    pub cursor: Option<Sequence>,
}

impl Command for CreateSubscription {
    const NAME: &'static str = "CreateSubscription";
}

#[derive(Debug, Clone)]
pub struct DeleteSubscription {
    pub id: SubscriptionId,
}

impl Command for DeleteSubscription {
    const NAME: &'static str = "DeleteSubscription";
}

#[derive(Debug, Clone, Default)]
pub struct ListSubscriptions {
    pub namespace: Option<String>,
}

impl Query for ListSubscriptions {
    const NAME: &'static str = "ListSubscriptions";
    type Dto = SubscriptionList;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubscriptionDto {
    pub id: SubscriptionId,
    pub namespace: String,
    pub name: String,
    pub transport: String,
    pub filter: SubscriptionFilter,
    pub cursor: Sequence,
    pub created: DateTime<Utc>,
}

impl From<Subscription> for SubscriptionDto {
    fn from(sub: Subscription) -> Self {
        Self {
            id: sub.id(),
            namespace: sub.namespace().to_string(),
            name: sub.name().to_string(),
            transport: sub.transport().to_string(),
            filter: sub.filter().clone(),
            cursor: sub.cursor(),
            created: sub.created(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SubscriptionList {
    pub items: Vec<SubscriptionDto>,
}

impl Dto for SubscriptionList {}

pub struct SubscriptionService {
    storage: Arc<dyn EventStorage>,
    events: Arc<EventManager>,
    creating: Mutex<()>,
}

impl SubscriptionService {
    pub fn new(storage: Arc<dyn EventStorage>, events: Arc<EventManager>) -> Self {
        Self {
            storage,
            events,
            creating: Mutex::new(()),
        }
    }

    async fn validate(&self, cmd: &CreateSubscription) -> Result<Sequence, AppError> {
        validate_namespace(&cmd.namespace).map_err(|e| AppError::Validation(e.to_string()))?;
        if cmd.name.trim().is_empty() {
            return Err(AppError::Validation(
                "subscription name must not be empty".into(),
            ));
        }
        if self.events.subscription_manager(&cmd.transport).is_none() {
            return Err(AppError::Validation(format!(
                "transport '{}' is not enabled",
                cmd.transport
            )));
        }
        cmd.filter
            .compile()
            .map_err(|e| AppError::Validation(e.to_string()))?;

        let existing = self.storage.list_subscriptions().await?;
        if existing
            .iter()
            .any(|s| s.namespace() == cmd.namespace && s.name() == cmd.name)
        {
            return Err(AppError::Conflict(format!(
                "subscription '{}' already exists in namespace '{}'",
                cmd.name, cmd.namespace
            )));
        }

        let latest = self.storage.latest_sequence().await?;
        match cmd.cursor {
            None => Ok(latest),
            Some(cursor) if (0..=latest).contains(&cursor) => Ok(cursor),
            Some(cursor) => Err(AppError::Validation(format!(
                "cursor {cursor} is outside 0..={latest}"
            ))),
        }
    }
}

#[async_trait]
impl CommandHandler<CreateSubscription> for SubscriptionService {
    async fn handle(&self, ctx: &AppContext, cmd: CreateSubscription) -> Result<(), AppError> {
        let _creating = self.creating.lock().await;
        let cursor = self.validate(&cmd).await?;

        let subscription = Subscription::builder()
            .id(cmd.id)
            .namespace(cmd.namespace)
            .name(cmd.name)
            .transport(cmd.transport)
            .filter(cmd.filter)
            .cursor(cursor)
            .build();

        self.storage.insert_subscription(&subscription).await?;
        self.events.add_subscription(subscription)?;

        info!(
            command = CreateSubscription::NAME,
            actor = ctx.actor.as_deref(),
            correlation_id = ctx.correlation_id.as_deref(),
            subscription = %cmd.id,
            cursor,
            "subscription created"
        );
        Ok(())
    }
}

#[async_trait]
impl CommandHandler<DeleteSubscription> for SubscriptionService {
    async fn handle(&self, ctx: &AppContext, cmd: DeleteSubscription) -> Result<(), AppError> {
        let released = self.events.remove_subscription(cmd.id);
        let deleted = self.storage.delete_subscription(cmd.id).await?;
        if !released && !deleted {
            return Err(AppError::NotFound(cmd.id.to_string()));
        }

        info!(
            command = DeleteSubscription::NAME,
            actor = ctx.actor.as_deref(),
            correlation_id = ctx.correlation_id.as_deref(),
            subscription = %cmd.id,
            "subscription deleted"
        );
        Ok(())
    }
}

#[async_trait]
impl QueryHandler<ListSubscriptions> for SubscriptionService {
    async fn handle(&self, _ctx: &AppContext, q: ListSubscriptions) -> Result<SubscriptionList, AppError> {
        let items = self
            .storage
            .list_subscriptions()
            .await?
            .into_iter()
            .filter(|s| q.namespace.as_deref().is_none_or(|ns| s.namespace() == ns))
            .map(SubscriptionDto::from)
            .collect();
        Ok(SubscriptionList { items })
    }
}
