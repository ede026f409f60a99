//! 重试策略（Retry）
//!
//! 指数退避：失败后等待当前延迟，延迟乘以 `factor` 并封顶于 `maximum_delay`。
//! 瞬时错误无限重试，直到成功或取消令牌触发；不可重试的错误立即返回。
//! 延迟序列是确定的：相同的失败序列产生相同的延迟序列。
//! 每次 `run` 使用新的 `RetryState`，因此成功之后的下一个操作总是从初始延迟开始。
//!
use crate::error::{DomainError, DomainResult};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Retry {
    pub initial_delay: Duration,
    pub maximum_delay: Duration,
    pub factor: f64,
}

impl Default for Retry {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(100),
            maximum_delay: Duration::from_secs(30),
            factor: 2.0,
        }
    }
}

impl Retry {
    pub fn state(&self) -> RetryState {
        RetryState {
            retry: *self,
            delay: self.initial_delay,
            attempts: 0,
        }
    }

    /// 执行 `work` 直到成功；`work` 收到的是从 1 开始的尝试次数。
    ///
    /// - 可重试错误：记录日志、休眠后重试；
    /// - 不可重试错误：原样返回；
    /// - 令牌取消：返回 `DomainError::Cancelled`（休眠中同样立即响应）。
    pub async fn run<T, F, Fut>(
        &self,
        token: &CancellationToken,
        operation: &str,
        mut work: F,
    ) -> DomainResult<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = DomainResult<T>>,
    {
        let mut state = self.state();

        loop {
            if token.is_cancelled() {
                return Err(DomainError::Cancelled);
            }

            let attempt = state.attempts() + 1;
            let err = match work(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() => err,
                Err(err) => return Err(err),
            };

            let delay = state.next_delay();
            warn!(
                operation,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "operation failed, retrying"
            );

            tokio::select! {
                _ = token.cancelled() => return Err(DomainError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

/// 单次操作的重试状态（仅驻留内存）
#[derive(Debug, Clone)]
pub struct RetryState {
    retry: Retry,
    delay: Duration,
    attempts: u32,
}

impl RetryState {
    /// 返回本次应等待的延迟，并推进到下一次的延迟
    pub fn next_delay(&mut self) -> Duration {
        let current = self.delay;
        self.attempts += 1;

        let max = self.retry.maximum_delay;
        let grown = current.as_secs_f64() * self.retry.factor;
        self.delay = if grown.is_finite() && grown < max.as_secs_f64() {
            Duration::try_from_secs_f64(grown).unwrap_or(max)
        } else {
            max
        };

        current.min(max)
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    fn retry() -> Retry {
        Retry {
            initial_delay: Duration::from_millis(100),
            maximum_delay: Duration::from_millis(1000),
            factor: 2.0,
        }
    }

    #[test]
    fn delay_grows_by_factor_and_caps() {
        let mut state = retry().state();
        let delays: Vec<u128> = (0..6).map(|_| state.next_delay().as_millis()).collect();
        assert_eq!(delays, vec![100, 200, 400, 800, 1000, 1000]);
        assert_eq!(state.attempts(), 6);
    }

    #[test]
    fn fractional_factor_is_deterministic() {
        let r = Retry {
            factor: 1.5,
            ..retry()
        };
        let a: Vec<Duration> = {
            let mut s = r.state();
            (0..5).map(|_| s.next_delay()).collect()
        };
        let b: Vec<Duration> = {
            let mut s = r.state();
            (0..5).map(|_| s.next_delay()).collect()
        };
        assert_eq!(a, b);
        assert_eq!(a[1], Duration::from_millis(150));
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transient_errors_until_success() {
        let token = CancellationToken::new();
        let calls = Arc::new(AtomicU32::new(0));
        let started = Instant::now();

        let out = retry()
            .run(&token, "test", |attempt| {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    if attempt < 3 {
                        Err(DomainError::storage("unavailable"))
                    } else {
                        Ok(attempt)
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(out, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // 100ms + 200ms
        assert!(started.elapsed() >= Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn each_run_starts_from_initial_delay() {
        let token = CancellationToken::new();
        let r = retry();

        let flaky = |fail_until: u32| {
            move |attempt: u32| async move {
                if attempt < fail_until {
                    Err(DomainError::storage("unavailable"))
                } else {
                    Ok(())
                }
            }
        };

        r.run(&token, "first", flaky(4)).await.unwrap();

        let started = Instant::now();
        r.run(&token, "second", flaky(2)).await.unwrap();
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(100));
        assert!(elapsed < Duration::from_millis(200));
    }

    #[tokio::test(start_paused = true)]
    async fn fatal_errors_are_not_retried() {
        let token = CancellationToken::new();
        let calls = AtomicU32::new(0);

        let err = retry()
            .run(&token, "test", |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(DomainError::invalid_event("malformed")) }
            })
            .await
            .unwrap_err();

        assert!(matches!(err, DomainError::InvalidEvent { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_sleep() {
        let token = CancellationToken::new();
        let slow = Retry {
            initial_delay: Duration::from_secs(3600),
            maximum_delay: Duration::from_secs(3600),
            factor: 1.0,
        };

        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            canceller.cancel();
        });

        let err = slow
            .run(&token, "test", |_| async {
                Err::<(), _>(DomainError::storage("down"))
            })
            .await
            .unwrap_err();

        assert!(err.is_cancelled());
    }
}
