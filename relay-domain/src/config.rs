//! 事件管理器配置
//!
//! 以显式结构体承载原先散落在全局配置中的参数，生命周期随 `EventManager` 实例。
//! 所有字段均有默认值，可直接由 TOML/JSON 反序列化：
//!
//! ```toml
//! [aggregator]
//! batch_size = 50
//! poll_interval_ms = 1000
//!
//! [aggregator.retry]
//! init_delay_ms = 100
//! max_delay_ms = 30000
//! factor = 2.0
//!
//! [transports]
//! enabled = ["memory"]
//!
//! [delivery]
//! ack_timeout_ms = 30000
//! ```
use crate::error::{DomainError, DomainResult};
use crate::retry::Retry;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventManagerConfig {
    pub aggregator: AggregatorConfig,
    pub transports: TransportsConfig,
    pub delivery: DeliveryConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregatorConfig {
    /// 单次查询的最大事件数
    pub batch_size: usize,
    /// 兜底定时器间隔（聚合器与每个订阅的工作循环共用）
    pub poll_interval_ms: u64,
    pub retry: RetryConfig,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            poll_interval_ms: 1000,
            retry: RetryConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub init_delay_ms: u64,
    pub max_delay_ms: u64,
    pub factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            init_delay_ms: 100,
            max_delay_ms: 30_000,
            factor: 2.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportsConfig {
    /// 启用的传输插件名称，由 `TransportRegistry` 解析
    pub enabled: Vec<String>,
}

impl Default for TransportsConfig {
    fn default() -> Self {
        Self {
            enabled: vec!["memory".to_string()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    /// 需要异步确认的传输，等待确认的超时
    pub ack_timeout_ms: u64,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            ack_timeout_ms: 30_000,
        }
    }
}

impl EventManagerConfig {
    pub fn validate(&self) -> DomainResult<()> {
        let retry = &self.aggregator.retry;

        if self.aggregator.batch_size == 0 {
            return Err(invalid("aggregator.batch_size must be greater than 0"));
        }
        if self.aggregator.poll_interval_ms == 0 {
            return Err(invalid("aggregator.poll_interval_ms must be greater than 0"));
        }
        // 初始延迟为 0 时退避永远停在 0，无限重试会变成空转
        if retry.init_delay_ms == 0 {
            return Err(invalid("aggregator.retry.init_delay_ms must be greater than 0"));
        }
        if !retry.factor.is_finite() || retry.factor < 1.0 {
            return Err(invalid("aggregator.retry.factor must be >= 1.0"));
        }
        if retry.init_delay_ms > retry.max_delay_ms {
            return Err(invalid(
                "aggregator.retry.init_delay_ms must not exceed max_delay_ms",
            ));
        }
        if self.delivery.ack_timeout_ms == 0 {
            return Err(invalid("delivery.ack_timeout_ms must be greater than 0"));
        }
        Ok(())
    }

    pub fn retry(&self) -> Retry {
        let retry = &self.aggregator.retry;
        Retry {
            initial_delay: Duration::from_millis(retry.init_delay_ms),
            maximum_delay: Duration::from_millis(retry.max_delay_ms),
            factor: retry.factor,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.aggregator.poll_interval_ms)
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.delivery.ack_timeout_ms)
    }
}

fn invalid(reason: &str) -> DomainError {
    DomainError::InvalidConfig {
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = EventManagerConfig::default();
        config.validate().unwrap();

        let retry = config.retry();
        assert_eq!(retry.initial_delay, Duration::from_millis(100));
        assert_eq!(retry.maximum_delay, Duration::from_secs(30));
        assert_eq!(retry.factor, 2.0);
        assert_eq!(config.transports.enabled, vec!["memory".to_string()]);
    }

    #[test]
    fn partial_document_keeps_defaults() {
        let config: EventManagerConfig = serde_json::from_value(serde_json::json!({
            "aggregator": { "batch_size": 5, "retry": { "factor": 3.0 } }
        }))
        .unwrap();

        assert_eq!(config.aggregator.batch_size, 5);
        assert_eq!(config.aggregator.poll_interval_ms, 1000);
        assert_eq!(config.aggregator.retry.factor, 3.0);
        assert_eq!(config.aggregator.retry.init_delay_ms, 100);
    }

    #[test]
    fn rejects_invalid_values() {
        let mut config = EventManagerConfig::default();
        config.aggregator.retry.factor = 0.5;
        assert!(matches!(
            config.validate(),
            Err(DomainError::InvalidConfig { .. })
        ));

        let mut config = EventManagerConfig::default();
        config.aggregator.batch_size = 0;
        assert!(config.validate().is_err());

        let mut config = EventManagerConfig::default();
        config.aggregator.retry.init_delay_ms = 60_000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_zero_initial_delay() {
        let mut config = EventManagerConfig::default();
        config.aggregator.retry.init_delay_ms = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("init_delay_ms"));
    }
}
