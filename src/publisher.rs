//! # Event Publisher
//!
//! The only sanctioned way to put an event on a topic. `publish` runs
//! normalization, rate limiting, partitioning, and persist-before-broker-send
//! in a fixed order so every event in `event_log` has actually reached (or
//! is retrying toward) the broker, and vice versa.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::broker::Broker;
use crate::error::{Result, SubstrateError};
use crate::events::{event_types, CanonicalEvent};
use crate::metrics::Metrics;
use crate::partitioning::partition_key;
use crate::rate_limiter::PerTenantRateLimiter;
use crate::storage::EventStore;
use crate::topic_naming::TopicNamingStrategy;

/// Coordinates validation, rate limiting, persistence, and broker delivery
/// for outbound events.
pub struct EventPublisher {
    broker: Arc<dyn Broker>,
    store: Arc<EventStore>,
    rate_limiter: Arc<PerTenantRateLimiter>,
    topics: TopicNamingStrategy,
    metrics: Arc<Metrics>,
    rate_limit_enabled: bool,
}

impl EventPublisher {
    pub fn new(
        broker: Arc<dyn Broker>,
        store: Arc<EventStore>,
        rate_limiter: Arc<PerTenantRateLimiter>,
        topics: TopicNamingStrategy,
        metrics: Arc<Metrics>,
        rate_limit_enabled: bool,
    ) -> Self {
        Self {
            broker,
            store,
            rate_limiter,
            topics,
            metrics,
            rate_limit_enabled,
        }
    }

    /// Publish `event` to `topic`.
    ///
    /// 1. validate the event (already done by [`CanonicalEvent::create`] at
    ///    construction, re-checked here defensively),
    /// 2. check the tenant's rate limit, emitting `BackpressureDetected` and
    ///    returning `RateLimited` on denial,
    /// 3. derive the deterministic partition key,
    /// 4. append to `event_log` first,
    /// 5. publish to the broker with retry,
    /// 6. record metrics for the outcome.
    pub async fn publish(&self, topic: &str, event: &CanonicalEvent) -> Result<()> {
        if event.tenant_id.trim().is_empty() {
            return Err(SubstrateError::schema_invalid(
                "tenant_id must not be empty",
                Some(event.event_id),
            ));
        }

        if self.rate_limit_enabled {
            let decision = self.rate_limiter.check_rate_limit(&event.tenant_id, 1);
            if !decision.allowed {
                let wait_seconds = decision.wait_seconds.unwrap_or(0.0);
                self.metrics.record_rate_limited(&event.tenant_id);
                self.emit_backpressure(event, wait_seconds).await;
                return Err(SubstrateError::RateLimited {
                    tenant_id: event.tenant_id.clone(),
                    retry_after_secs: wait_seconds,
                });
            }
        }

        let key = partition_key(&event.tenant_id, event.exception_id.as_deref())?;

        self.store.append(event).await?;

        let payload = event.to_bytes()?;
        self.broker.publish(topic, &key, payload).await?;

        self.metrics.record_published(&event.tenant_id, &event.event_type, topic);
        debug!(event_id = %event.event_id, topic, partition_key = %key, "published event");
        Ok(())
    }

    /// Convenience wrapper that resolves the topic from `event.event_type`
    /// via the configured naming strategy, falling back to the exceptions
    /// topic for unrecognized types.
    pub async fn publish_routed(&self, event: &CanonicalEvent, tenant_scoped: bool) -> Result<()> {
        let tenant = tenant_scoped.then_some(event.tenant_id.as_str());
        let topic = match event.event_type.as_str() {
            t if t == event_types::EXCEPTION_INGESTED
                || t == event_types::EXCEPTION_NORMALIZED
                || t == event_types::MANUAL_EXCEPTION_CREATED =>
            {
                self.topics.exceptions_topic(tenant)
            }
            t if t == event_types::SLA_IMMINENT || t == event_types::SLA_EXPIRED => {
                self.topics.sla_topic(tenant)
            }
            t if t == event_types::PLAYBOOK_MATCHED
                || t == event_types::STEP_EXECUTION_REQUESTED =>
            {
                self.topics.playbooks_topic(tenant)
            }
            t if t == event_types::TOOL_EXECUTION_REQUESTED
                || t == event_types::TOOL_EXECUTION_COMPLETED =>
            {
                self.topics.tools_topic(tenant)
            }
            t if t == event_types::BACKPRESSURE_DETECTED => self.topics.backpressure_topic(tenant),
            _ => self.topics.exceptions_topic(tenant),
        };
        self.publish(&topic, event).await
    }

    async fn emit_backpressure(&self, source: &CanonicalEvent, wait_seconds: f64) {
        let payload = Value::Object(
            [
                ("tenant_id".to_string(), Value::String(source.tenant_id.clone())),
                ("retry_after_secs".to_string(), serde_json::json!(wait_seconds)),
            ]
            .into_iter()
            .collect(),
        );

        let derived = match source.derive(event_types::BACKPRESSURE_DETECTED, payload, HashMap::new()) {
            Ok(e) => e,
            Err(e) => {
                warn!(error = %e, "failed to build BackpressureDetected event");
                return;
            }
        };

        let topic = self.topics.backpressure_topic(None);
        if let Err(e) = self.store.append(&derived).await {
            warn!(error = %e, "failed to persist BackpressureDetected event");
            return;
        }
        if let Ok(bytes) = derived.to_bytes() {
            if let Err(e) = self.broker.publish(&topic, &source.tenant_id, bytes).await {
                warn!(error = %e, "failed to publish BackpressureDetected event");
            }
        }
        self.metrics.record_backpressure(&source.tenant_id);
    }
}
