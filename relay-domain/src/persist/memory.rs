//! 内存版持久化存储（InMemoryStorage）
//!
//! 基于 `std::sync::Mutex` 的轻量实现，满足 `EventStorage` 协议：
//! - 序号从 1 开始连续分配，按 `id` 去重；
//! - 游标单调不减，已删除订阅的游标推进被忽略；
//! - 新事件写入后（锁释放后）通知已注册的 `StorageCallbacks`。
//!
//! 注意：进程退出即丢失数据，仅用于测试、示例与本地开发。

use crate::error::DomainResult as Result;
use crate::event::{Event, Sequence};
use crate::persist::{CursorKey, EventStorage, StorageCallbacks};
use crate::subscription::{Subscription, SubscriptionId};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use uuid::Uuid;

#[derive(Default)]
struct State {
    events: Vec<Event>,
    by_id: HashMap<Uuid, usize>,
    cursors: HashMap<CursorKey, Sequence>,
    subscriptions: HashMap<SubscriptionId, Subscription>,
}

#[derive(Default)]
pub struct InMemoryStorage {
    state: Mutex<State>,
    callbacks: RwLock<Vec<Arc<dyn StorageCallbacks>>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册变更回调
    pub fn add_callbacks(&self, callbacks: Arc<dyn StorageCallbacks>) {
        self.callbacks
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(callbacks);
    }

    /// 全部事件快照（按序号升序）
    pub fn events(&self) -> Vec<Event> {
        self.lock().events.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn notify(&self, namespace: &str, sequence: Sequence) {
        let callbacks = self.callbacks.read().unwrap_or_else(|e| e.into_inner());
        for cb in callbacks.iter() {
            cb.event_persisted(namespace, sequence);
        }
    }
}

#[async_trait]
impl EventStorage for InMemoryStorage {
    async fn persist_event(&self, event: Event) -> Result<Event> {
        let stored = {
            let mut state = self.lock();
            if let Some(&idx) = state.by_id.get(&event.id()) {
                return Ok(state.events[idx].clone());
            }

            let sequence = state.events.len() as Sequence + 1;
            let stored = event.with_sequence(sequence);
            let idx = state.events.len();
            state.by_id.insert(stored.id(), idx);
            state.events.push(stored.clone());
            stored
        };

        self.notify(stored.namespace(), stored.sequence());
        Ok(stored)
    }

    async fn query_events(
        &self,
        namespace: Option<&str>,
        after: Sequence,
        limit: usize,
    ) -> Result<Vec<Event>> {
        let state = self.lock();
        // 序号与下标一一对应：sequence = idx + 1
        let start = after.clamp(0, state.events.len() as Sequence) as usize;

        Ok(state.events[start..]
            .iter()
            .filter(|e| namespace.is_none_or(|ns| e.namespace() == ns))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn latest_sequence(&self) -> Result<Sequence> {
        Ok(self.lock().events.len() as Sequence)
    }

    async fn get_cursor(&self, key: CursorKey) -> Result<Option<Sequence>> {
        Ok(self.lock().cursors.get(&key).copied())
    }

    async fn advance_cursor(&self, key: CursorKey, sequence: Sequence) -> Result<()> {
        let mut state = self.lock();
        if let CursorKey::Subscription(id) = key {
            if !state.subscriptions.contains_key(&id) {
                return Ok(());
            }
        }

        let cursor = state.cursors.entry(key).or_default();
        *cursor = (*cursor).max(sequence);
        Ok(())
    }

    async fn insert_subscription(&self, subscription: &Subscription) -> Result<()> {
        let mut state = self.lock();
        state.cursors.insert(
            CursorKey::Subscription(subscription.id()),
            subscription.cursor(),
        );
        state
            .subscriptions
            .insert(subscription.id(), subscription.clone());
        Ok(())
    }

    async fn delete_subscription(&self, id: SubscriptionId) -> Result<bool> {
        let mut state = self.lock();
        state.cursors.remove(&CursorKey::Subscription(id));
        Ok(state.subscriptions.remove(&id).is_some())
    }

    async fn list_subscriptions(&self) -> Result<Vec<Subscription>> {
        let state = self.lock();
        let mut subs: Vec<Subscription> = state
            .subscriptions
            .values()
            .map(|s| {
                let cursor = state
                    .cursors
                    .get(&CursorKey::Subscription(s.id()))
                    .copied()
                    .unwrap_or(s.cursor());
                s.clone().with_cursor(cursor)
            })
            .collect();
        subs.sort_by_key(|s| s.created());
        Ok(subs)
    }
}
