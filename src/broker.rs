//! # Broker Abstraction
//!
//! A small, transport-agnostic contract the publisher and the worker
//! framework program against. The production implementation
//! ([`crate::kafka::KafkaBroker`]) and the in-memory implementation below
//! both satisfy it; no other module branches on which one is in use.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::error::{Result, SubstrateError};
use crate::types::{ComponentHealth, HealthStatus};

/// A consumed message handed to a subscriber's handler.
#[derive(Debug, Clone)]
pub struct BrokerMessage {
    pub topic: String,
    pub key: Option<String>,
    pub value: Vec<u8>,
}

/// Handler invoked per consumed message. Handler errors are logged by the
/// broker/worker loop and do not kill the consume loop.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: BrokerMessage) -> Result<()>;
}

/// Pluggable pub/sub transport. Implementations must retry transient
/// publish errors with exponential backoff and fail fast on permanent
/// errors (see [`publish_with_retry`]).
#[async_trait]
pub trait Broker: Send + Sync {
    /// Publish `value` to `topic`, partitioned by `partition_key`.
    async fn publish(&self, topic: &str, partition_key: &str, value: Vec<u8>) -> Result<()>;

    /// Blocking-style consume loop (runs until cancelled). `handler` is
    /// invoked per message; handler errors are logged, not propagated.
    async fn subscribe(
        &self,
        topics: &[String],
        group_id: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<()>;

    /// Current connectivity/health of the broker client.
    async fn health(&self) -> ComponentHealth;

    /// Idempotent graceful teardown.
    async fn close(&self) -> Result<()>;
}

/// Backoff parameters for the app-level publish retry loop that wraps a
/// broker's own `publish` attempt.
#[derive(Debug, Clone, Copy)]
pub struct PublishRetryConfig {
    pub initial_backoff: Duration,
    pub max_retries: u32,
    pub multiplier: f64,
}

impl Default for PublishRetryConfig {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_millis(100),
            max_retries: 3,
            multiplier: 2.0,
        }
    }
}

/// Wraps a single publish attempt with exponential backoff, distinguishing
/// retryable from permanent failures via [`SubstrateError::is_retryable`].
pub async fn publish_with_retry<F, Fut>(
    config: &PublishRetryConfig,
    mut attempt: F,
) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<()>>,
{
    let mut delay = config.initial_backoff;
    let mut attempts = 0u32;
    loop {
        match attempt().await {
            Ok(()) => return Ok(()),
            Err(e) if e.is_retryable() && attempts < config.max_retries => {
                attempts += 1;
                tracing::warn!(
                    attempt = attempts,
                    max_retries = config.max_retries,
                    error = %e,
                    "transient broker publish error, retrying"
                );
                tokio::time::sleep(delay).await;
                delay = Duration::from_secs_f64(delay.as_secs_f64() * config.multiplier);
            }
            Err(e) => return Err(e),
        }
    }
}

/// In-process broker used by the test harness and by deployments that want
/// the worker framework without a live Kafka cluster. Topics are simple
/// FIFO queues; there is no partitioning, only per-topic ordering.
#[derive(Default)]
pub struct InMemoryBroker {
    topics: Mutex<HashMap<String, Vec<BrokerMessage>>>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self {
            topics: Mutex::new(HashMap::new()),
        }
    }

    /// Test/diagnostic helper: drain and return all messages published to
    /// `topic` so far, in publish order.
    pub async fn drain(&self, topic: &str) -> Vec<BrokerMessage> {
        let mut topics = self.topics.lock().await;
        topics.remove(topic).unwrap_or_default()
    }

    pub async fn peek(&self, topic: &str) -> Vec<BrokerMessage> {
        let topics = self.topics.lock().await;
        topics.get(topic).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn publish(&self, topic: &str, partition_key: &str, value: Vec<u8>) -> Result<()> {
        let mut topics = self.topics.lock().await;
        topics
            .entry(topic.to_string())
            .or_default()
            .push(BrokerMessage {
                topic: topic.to_string(),
                key: Some(partition_key.to_string()),
                value,
            });
        Ok(())
    }

    async fn subscribe(
        &self,
        topics: &[String],
        _group_id: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<()> {
        for topic in topics {
            let messages = self.drain(topic).await;
            for message in messages {
                if let Err(e) = handler.handle(message).await {
                    tracing::warn!(error = %e, topic = %topic, "handler error during in-memory subscribe");
                }
            }
        }
        Ok(())
    }

    async fn health(&self) -> ComponentHealth {
        ComponentHealth {
            component: "in_memory_broker".to_string(),
            status: HealthStatus::Healthy,
            last_check: chrono::Utc::now(),
            details: HashMap::new(),
        }
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Lift a non-retryable condition into a `BrokerPublish` error.
pub fn permanent_publish_error(topic: &str, message: impl Into<String>) -> SubstrateError {
    SubstrateError::broker_publish(message.into(), topic.to_string(), false)
}

/// Lift a transient condition into a retryable `BrokerPublish` error.
pub fn transient_publish_error(topic: &str, message: impl Into<String>) -> SubstrateError {
    SubstrateError::broker_publish(message.into(), topic.to_string(), true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_in_memory_publish_and_drain() {
        let broker = InMemoryBroker::new();
        broker
            .publish("exceptions", "tenant-a", b"hello".to_vec())
            .await
            .unwrap();
        let drained = broker.drain("exceptions").await;
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].value, b"hello");
    }

    #[tokio::test]
    async fn test_publish_order_preserved_per_topic() {
        let broker = InMemoryBroker::new();
        for i in 0..5u8 {
            broker
                .publish("exceptions", "tenant-a:exc-1", vec![i])
                .await
                .unwrap();
        }
        let drained = broker.drain("exceptions").await;
        let values: Vec<u8> = drained.into_iter().map(|m| m.value[0]).collect();
        assert_eq!(values, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_health_reports_healthy() {
        let broker = InMemoryBroker::new();
        let health = broker.health().await;
        assert_eq!(health.status, HealthStatus::Healthy);
    }

    #[tokio::test]
    async fn test_publish_with_retry_succeeds_after_transient_failures() {
        let attempts = Arc::new(AtomicU32::new(0));
        let config = PublishRetryConfig {
            initial_backoff: Duration::from_millis(1),
            max_retries: 5,
            multiplier: 1.0,
        };
        let attempts_clone = attempts.clone();
        let result = publish_with_retry(&config, move || {
            let attempts = attempts_clone.clone();
            async move {
                let n = attempts.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(transient_publish_error("t", "not yet"))
                } else {
                    Ok(())
                }
            }
        })
        .await;
        assert!(result.is_ok());
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_publish_with_retry_fails_fast_on_permanent_error() {
        let attempts = Arc::new(AtomicU32::new(0));
        let config = PublishRetryConfig::default();
        let attempts_clone = attempts.clone();
        let result: Result<()> = publish_with_retry(&config, move || {
            let attempts = attempts_clone.clone();
            async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(permanent_publish_error("t", "nope"))
            }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_publish_with_retry_exhausts_and_fails() {
        let config = PublishRetryConfig {
            initial_backoff: Duration::from_millis(1),
            max_retries: 2,
            multiplier: 1.0,
        };
        let attempts = Arc::new(AtomicU32::new(0));
        let attempts_clone = attempts.clone();
        let result: Result<()> = publish_with_retry(&config, move || {
            let attempts = attempts_clone.clone();
            async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(transient_publish_error("t", "still failing"))
            }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }
}
