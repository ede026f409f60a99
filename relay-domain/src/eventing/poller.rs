//! 事件唤醒器（EventPoller）
//!
//! 将“有新事件可处理”与“需要执行一轮处理”解耦：
//! - 合并信号：容量为 1 的通道，已有待处理信号时再次发送为空操作；
//! - 兜底定时器：即使信号全部丢失，也能在一个周期内推进；
//! - 关闭：取消令牌触发后循环尽快退出，并关闭 `closed` 指示器供调用方等待。
//!
use crate::error::{DomainError, DomainResult};
use crate::event::Sequence;
use crate::persist::StorageCallbacks;
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// 合并唤醒信号的只写句柄，可在任意并发调用方克隆使用
#[derive(Debug, Clone)]
pub struct NewEventSignal {
    tx: mpsc::Sender<()>,
}

impl NewEventSignal {
    /// 发送唤醒信号；返回 `false` 表示已有待处理信号（或循环已退出）
    pub fn signal(&self) -> bool {
        self.tx.try_send(()).is_ok()
    }
}

impl StorageCallbacks for NewEventSignal {
    fn event_persisted(&self, namespace: &str, sequence: Sequence) {
        trace!(namespace, sequence, "event persisted, signalling");
        self.signal();
    }
}

pub struct EventPoller {
    tx: mpsc::Sender<()>,
    rx: Mutex<Option<mpsc::Receiver<()>>>,
    interval: Duration,
    closed: CancellationToken,
}

impl EventPoller {
    pub fn new(interval: Duration) -> Self {
        let (tx, rx) = mpsc::channel(1);
        Self {
            tx,
            rx: Mutex::new(Some(rx)),
            interval,
            closed: CancellationToken::new(),
        }
    }

    pub fn signal_handle(&self) -> NewEventSignal {
        NewEventSignal {
            tx: self.tx.clone(),
        }
    }

    /// 循环完全退出后被取消
    pub fn closed(&self) -> CancellationToken {
        self.closed.clone()
    }

    pub fn is_started(&self) -> bool {
        self.rx.lock().unwrap_or_else(|e| e.into_inner()).is_none()
    }

    /// 启动处理循环：每次被信号或定时器唤醒后调用一次 `pass`。
    ///
    /// 定时器的首个 tick 立即触发，因此启动后会马上执行一轮（追赶积压）。
    /// 只能启动一次，重复启动返回 `DomainError::InvalidState`。
    pub fn start<F, Fut>(&self, token: CancellationToken, mut pass: F) -> DomainResult<JoinHandle<()>>
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut rx = self
            .rx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .ok_or_else(|| DomainError::InvalidState {
                reason: "event poller already started".to_string(),
            })?;

        let interval = self.interval;
        let closed = self.closed.clone();

        Ok(tokio::spawn(async move {
            let _closed = closed.drop_guard();
            let mut ticker = time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    Some(()) = rx.recv() => {}
                    _ = ticker.tick() => {}
                }
                pass().await;
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_pass(count: Arc<AtomicUsize>) -> impl FnMut() -> std::future::Ready<()> + Send {
        move || {
            count.fetch_add(1, Ordering::SeqCst);
            std::future::ready(())
        }
    }

    async fn wait_for(count: &AtomicUsize, expected: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while count.load(Ordering::SeqCst) < expected {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .expect("pass count not reached");
    }

    #[tokio::test(start_paused = true)]
    async fn rapid_signals_coalesce_into_one_pass() {
        let poller = EventPoller::new(Duration::from_secs(3600));
        let token = CancellationToken::new();
        let count = Arc::new(AtomicUsize::new(0));
        let handle = poller
            .start(token.clone(), counting_pass(count.clone()))
            .unwrap();

        // 启动后的首轮
        wait_for(&count, 1).await;

        let signal = poller.signal_handle();
        let accepted: Vec<bool> = (0..10).map(|_| signal.signal()).collect();
        assert!(accepted[0]);
        assert!(accepted[1..].iter().all(|ok| !ok));

        wait_for(&count, 2).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(count.load(Ordering::SeqCst), 2);

        token.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn timer_drives_progress_without_signals() {
        let poller = EventPoller::new(Duration::from_millis(100));
        let token = CancellationToken::new();
        let count = Arc::new(AtomicUsize::new(0));
        let _handle = poller
            .start(token.clone(), counting_pass(count.clone()))
            .unwrap();

        tokio::time::sleep(Duration::from_millis(350)).await;
        assert!(count.load(Ordering::SeqCst) >= 3);
        token.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_closes_indicator_and_rejects_restart() {
        let poller = EventPoller::new(Duration::from_millis(100));
        let token = CancellationToken::new();
        let count = Arc::new(AtomicUsize::new(0));
        assert!(!poller.is_started());
        poller
            .start(token.clone(), counting_pass(count.clone()))
            .unwrap();

        assert!(poller.is_started());
        assert!(matches!(
            poller.start(token.clone(), counting_pass(count.clone())),
            Err(DomainError::InvalidState { .. })
        ));

        let closed = poller.closed();
        assert!(!closed.is_cancelled());
        token.cancel();
        tokio::time::timeout(Duration::from_secs(1), closed.cancelled())
            .await
            .unwrap();

        // 循环已退出，信号不再被接收者消费
        let signal = poller.signal_handle();
        signal.signal();
        assert!(!signal.signal());
    }
}
