//! # Retry Scheduler & Dead Letter Queue
//!
//! DB-driven retry mechanism with exponential backoff: retry counts live in
//! `event_processing.error_message` (parsed back out via the `(retry N/M)`
//! suffix), not in a separate counter column, mirroring the reference
//! scheduler this module is modeled on. Re-publish after the backoff delay
//! is a detached `tokio::spawn` task rather than a durable job-queue entry —
//! a known limitation recorded in `DESIGN.md`, matching the reference
//! scheduler's own `asyncio.create_task` fire-and-forget approach.

use regex::Regex;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::events::{event_types, CanonicalEvent};
use crate::metrics::Metrics;
use crate::publisher::EventPublisher;
use crate::retry_policy::RetryPolicyRegistry;
use crate::storage::EventStore;
use crate::types::{DlqStatus, ProcessingStatus};

/// Outcome of [`RetryScheduler::schedule_retry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryOutcome {
    /// A retry was scheduled; re-publish will happen after the computed delay.
    Scheduled,
    /// The retry budget is exhausted; the event was routed to the DLQ.
    DeadLettered,
}

/// Schedules retries for failed message handling and routes exhausted
/// events to the dead-letter queue.
pub struct RetryScheduler {
    store: Arc<EventStore>,
    publisher: Arc<EventPublisher>,
    policy_registry: RetryPolicyRegistry,
    metrics: Arc<Metrics>,
    retry_count_pattern: Regex,
}

impl RetryScheduler {
    pub fn new(
        store: Arc<EventStore>,
        publisher: Arc<EventPublisher>,
        policy_registry: RetryPolicyRegistry,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            store,
            publisher,
            policy_registry,
            metrics,
            retry_count_pattern: Regex::new(r"\(retry (\d+)/").expect("static retry-count regex"),
        }
    }

    /// Schedule a retry for `event`, which failed processing in
    /// `worker_type` with `error_message`. Returns [`RetryOutcome::Scheduled`]
    /// if a retry was scheduled, or [`RetryOutcome::DeadLettered`] once the
    /// configured retry budget for `event.event_type` is exhausted.
    pub async fn schedule_retry(
        &self,
        event: &CanonicalEvent,
        worker_type: &str,
        error_message: &str,
    ) -> crate::error::Result<RetryOutcome> {
        let policy = self.policy_registry.get(&event.event_type);
        let max_retries = policy.max_retries;

        let retry_count = self.current_retry_count(event, worker_type).await;

        if retry_count >= max_retries {
            warn!(
                event_id = %event.event_id,
                worker_type,
                max_retries,
                "max retries exceeded, moving to dead letter queue"
            );
            self.move_to_dlq(event, worker_type, retry_count, error_message)
                .await;
            return Ok(RetryOutcome::DeadLettered);
        }

        let next_attempt = retry_count + 1;
        let delay_seconds = self
            .policy_registry
            .calculate_delay(&event.event_type, next_attempt);

        self.store
            .mark_failed(
                event.event_id,
                worker_type,
                &format!("{error_message} (retry {next_attempt}/{max_retries})"),
            )
            .await?;

        self.metrics
            .record_retry_scheduled(&event.tenant_id, worker_type, &event.event_type, next_attempt);

        self.emit_retry_scheduled(event, worker_type, next_attempt, delay_seconds, error_message)
            .await;

        self.spawn_republish(event.clone(), delay_seconds);

        info!(
            event_id = %event.event_id,
            worker_type,
            attempt = next_attempt,
            max_retries,
            delay_seconds,
            "scheduled retry"
        );

        Ok(RetryOutcome::Scheduled)
    }

    async fn current_retry_count(&self, event: &CanonicalEvent, worker_type: &str) -> u32 {
        match self
            .store
            .processing_error_message(event.event_id, worker_type)
            .await
        {
            Ok(Some((status, Some(message)))) => self
                .retry_count_pattern
                .captures(&message)
                .and_then(|c| c.get(1))
                .and_then(|m| m.as_str().parse::<u32>().ok())
                .unwrap_or(if status == ProcessingStatus::Failed { 1 } else { 0 }),
            Ok(Some((ProcessingStatus::Failed, None))) => 1,
            Ok(_) => 0,
            Err(e) => {
                error!(error = %e, "failed to read processing row for retry count, assuming 0");
                0
            }
        }
    }

    fn spawn_republish(&self, event: CanonicalEvent, delay_seconds: f64) {
        let publisher = self.publisher.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_secs_f64(delay_seconds.max(0.0))).await;
            debug!(event_id = %event.event_id, "re-publishing event after retry delay");
            if let Err(e) = publisher.publish_routed(&event, false).await {
                error!(error = %e, event_id = %event.event_id, "failed to re-publish event after retry delay");
            }
        });
    }

    async fn emit_retry_scheduled(
        &self,
        event: &CanonicalEvent,
        worker_type: &str,
        retry_count: u32,
        delay_seconds: f64,
        error_message: &str,
    ) {
        let payload = serde_json::json!({
            "original_event_id": event.event_id,
            "retry_reason": format!("worker {worker_type} failed: {error_message}"),
            "retry_count": retry_count,
            "retry_delay_seconds": delay_seconds,
        });
        match event.derive(event_types::RETRY_SCHEDULED, payload, Default::default()) {
            Ok(derived) => {
                if let Err(e) = self.publisher.publish_routed(&derived, false).await {
                    error!(error = %e, "failed to emit RetryScheduled event");
                }
            }
            Err(e) => error!(error = %e, "failed to build RetryScheduled event"),
        }
    }

    async fn move_to_dlq(
        &self,
        event: &CanonicalEvent,
        worker_type: &str,
        retry_count: u32,
        error_message: &str,
    ) {
        let original_topic = event_types_to_topic(&event.event_type);

        if let Err(e) = self
            .store
            .insert_dlq_entry(event, original_topic, error_message, retry_count, worker_type)
            .await
        {
            error!(error = %e, event_id = %event.event_id, "failed to persist DLQ entry");
        } else {
            self.metrics
                .record_dead_lettered(&event.tenant_id, worker_type, &event.event_type);

            match self
                .store
                .dlq_size(&event.tenant_id, &event.event_type, worker_type)
                .await
            {
                Ok(size) => self.metrics.set_dlq_size(&event.tenant_id, worker_type, size),
                Err(e) => warn!(error = %e, "failed to refresh dlq_size gauge"),
            }
        }

        let payload = serde_json::json!({
            "original_event_id": event.event_id,
            "original_event_type": event.event_type,
            "failure_reason": error_message,
            "retry_count": retry_count,
            "original_topic": original_topic,
        });
        match event.derive(event_types::DEAD_LETTERED, payload, Default::default()) {
            Ok(derived) => {
                if let Err(e) = self.publisher.publish_routed(&derived, false).await {
                    error!(error = %e, "failed to emit DeadLettered event");
                }
            }
            Err(e) => error!(error = %e, "failed to build DeadLettered event"),
        }
    }

    /// Mark a dead-letter entry as manually retried by an operator, routing
    /// the original payload back through the publisher.
    pub async fn replay_dlq_entry(
        &self,
        event: &CanonicalEvent,
        worker_type: &str,
    ) -> crate::error::Result<()> {
        self.store
            .set_dlq_status(event.event_id, worker_type, DlqStatus::Retrying)
            .await?;
        self.publisher.publish_routed(event, false).await?;
        self.store
            .set_dlq_status(event.event_id, worker_type, DlqStatus::Succeeded)
            .await?;
        Ok(())
    }
}

fn event_types_to_topic(event_type: &str) -> &'static str {
    match event_type {
        t if t == event_types::TOOL_EXECUTION_REQUESTED || t == event_types::TOOL_EXECUTION_COMPLETED => {
            crate::topic_naming::TOPIC_TOOLS
        }
        t if t == event_types::PLAYBOOK_MATCHED || t == event_types::STEP_EXECUTION_REQUESTED => {
            crate::topic_naming::TOPIC_PLAYBOOKS
        }
        t if t == event_types::SLA_IMMINENT || t == event_types::SLA_EXPIRED => {
            crate::topic_naming::TOPIC_SLA
        }
        _ => crate::topic_naming::TOPIC_EXCEPTIONS,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_count_regex_parses_suffix() {
        let re = Regex::new(r"\(retry (\d+)/").unwrap();
        let caps = re.captures("boom (retry 2/5)").unwrap();
        assert_eq!(&caps[1], "2");
    }

    #[test]
    fn test_retry_count_regex_no_match_on_plain_message() {
        let re = Regex::new(r"\(retry (\d+)/").unwrap();
        assert!(re.captures("boom").is_none());
    }

    #[test]
    fn test_event_type_to_topic_mapping() {
        assert_eq!(
            event_types_to_topic(event_types::TOOL_EXECUTION_REQUESTED),
            "tools"
        );
        assert_eq!(event_types_to_topic(event_types::EXCEPTION_INGESTED), "exceptions");
    }
}
