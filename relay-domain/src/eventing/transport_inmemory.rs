//! 内存版传输（InMemoryTransport）
//!
//! 基于 `tokio::sync::broadcast` 把投递广播给进程内的监听者：
//! - `send` 立即成功，不需要异步确认；
//! - `deliveries` 返回 `'static` 生命周期的投递流，便于在 `tokio::spawn` 中使用；
//! - 典型用途：测试环境、示例与本地开发。
//!
//! 注意：没有监听者时投递仍视为成功。

use crate::error::{DomainError, DomainResult as Result};
use crate::event::Event;
use crate::eventing::{SendOutcome, Transport};
use crate::subscription::{Subscription, SubscriptionId};
use async_trait::async_trait;
use futures_core::stream::BoxStream;
use futures_util::StreamExt;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

#[derive(Debug, Clone)]
pub struct Delivery {
    pub subscription: SubscriptionId,
    pub subscription_name: String,
    pub event: Event,
}

#[derive(Clone)]
pub struct InMemoryTransport {
    tx: broadcast::Sender<Delivery>,
}

impl InMemoryTransport {
    /// `capacity` 为广播缓冲区容量
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn deliveries(&self) -> BoxStream<'static, Result<Delivery>> {
        let rx = self.tx.subscribe();
        let stream = BroadcastStream::new(rx)
            .map(|r| r.map_err(|e| DomainError::transport("memory", e.to_string())));
        Box::pin(stream)
    }
}

impl Default for InMemoryTransport {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    fn name(&self) -> &str {
        "memory"
    }

    async fn send(&self, subscription: &Subscription, event: &Event) -> Result<SendOutcome> {
        let _ = self.tx.send(Delivery {
            subscription: subscription.id(),
            subscription_name: subscription.name().to_string(),
            event: event.clone(),
        });
        Ok(SendOutcome::Delivered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    #[tokio::test]
    async fn broadcasts_deliveries_to_listeners() {
        let transport = InMemoryTransport::new(16);
        let mut deliveries = transport.deliveries();

        let sub = Subscription::builder()
            .namespace("ns1")
            .name("audit")
            .transport("memory")
            .build();
        let event = Event::builder()
            .id(Uuid::new_v4())
            .namespace("ns1")
            .topic("A")
            .source("ledger")
            .payload_ref("ref")
            .timestamp(Utc::now())
            .build()
            .with_sequence(1);

        let outcome = transport.send(&sub, &event).await.unwrap();
        assert_eq!(outcome, SendOutcome::Delivered);

        let got = deliveries.next().await.unwrap().unwrap();
        assert_eq!(got.subscription, sub.id());
        assert_eq!(got.subscription_name, "audit");
        assert_eq!(got.event.sequence(), 1);
    }
}
