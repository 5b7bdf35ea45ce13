//! # Worker Base Framework
//!
//! Implements the 8-step message handling contract every worker type
//! shares: deserialize, validate schema version, validate tenant, check
//! idempotency, mark processing, call `process_event`, mark completed or
//! hand off to the retry scheduler, record metrics. Concurrency is bounded
//! by a semaphore rather than the reference worker's thread pool, since
//! each in-flight handler here is an async task, not an OS thread.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use crate::broker::{BrokerMessage, MessageHandler};
use crate::error::{ProcessingErrorType, Result, SubstrateError};
use crate::events::{event_types, CanonicalEvent, SUPPORTED_SCHEMA_VERSION};
use crate::metrics::Metrics;
use crate::publisher::EventPublisher;
use crate::retry_scheduler::RetryScheduler;
use crate::storage::EventStore;
use crate::topic_naming::TOPIC_EXCEPTIONS;
use crate::types::HealthStatus;

/// Implemented by each of the seven reference workers (intake, triage,
/// policy, playbook, tool, feedback, sla_monitor) to define what happens to
/// one canonical event. Errors returned here are routed to the retry
/// scheduler; `process_event` itself never needs to touch retries or the
/// dead-letter queue.
#[async_trait]
pub trait EventProcessor: Send + Sync {
    async fn process_event(&self, event: &CanonicalEvent) -> Result<()>;
}

/// Point-in-time health/statistics snapshot for a worker process.
#[derive(Debug, Clone)]
pub struct WorkerHealth {
    pub status: HealthStatus,
    pub is_running: bool,
    pub messages_processed: u64,
    pub errors_count: u64,
    pub last_error: Option<String>,
}

/// Wraps an [`EventProcessor`] with the shared worker machinery and
/// implements [`MessageHandler`] so it can be handed directly to
/// [`crate::broker::Broker::subscribe`].
pub struct WorkerRuntime {
    worker_type: String,
    processor: Arc<dyn EventProcessor>,
    store: Arc<EventStore>,
    publisher: Arc<EventPublisher>,
    retry_scheduler: Arc<RetryScheduler>,
    metrics: Arc<Metrics>,
    allow_future_schema: bool,
    expected_tenant_id: Option<String>,
    concurrency_limit: Arc<Semaphore>,

    running: std::sync::atomic::AtomicBool,
    messages_processed: AtomicU64,
    errors_count: AtomicU64,
    in_flight: AtomicU64,
    last_error: std::sync::RwLock<Option<String>>,
}

impl WorkerRuntime {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        worker_type: impl Into<String>,
        processor: Arc<dyn EventProcessor>,
        store: Arc<EventStore>,
        publisher: Arc<EventPublisher>,
        retry_scheduler: Arc<RetryScheduler>,
        metrics: Arc<Metrics>,
        allow_future_schema: bool,
        expected_tenant_id: Option<String>,
        concurrency: usize,
    ) -> Self {
        Self {
            worker_type: worker_type.into(),
            processor,
            store,
            publisher,
            retry_scheduler,
            metrics,
            allow_future_schema,
            expected_tenant_id,
            concurrency_limit: Arc::new(Semaphore::new(concurrency.max(1))),
            running: std::sync::atomic::AtomicBool::new(true),
            messages_processed: AtomicU64::new(0),
            errors_count: AtomicU64::new(0),
            in_flight: AtomicU64::new(0),
            last_error: std::sync::RwLock::new(None),
        }
    }

    pub fn health(&self) -> WorkerHealth {
        let processed = self.messages_processed.load(Ordering::Relaxed);
        let errors = self.errors_count.load(Ordering::Relaxed);
        let running = self.running.load(Ordering::Relaxed);

        let status = if !running {
            HealthStatus::Unhealthy
        } else if errors > 0 && processed == 0 {
            HealthStatus::Unhealthy
        } else if processed > 0 && (errors as f64) > (processed as f64) * 0.1 {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };

        WorkerHealth {
            status,
            is_running: running,
            messages_processed: processed,
            errors_count: errors,
            last_error: self.last_error.read().unwrap().clone(),
        }
    }

    pub fn shutdown(&self) {
        self.running.store(false, Ordering::Relaxed);
    }

    /// Validates `event.version` against [`SUPPORTED_SCHEMA_VERSION`]. On
    /// rejection, emits a `DeadLettered` control event before returning the
    /// error — schema incompatibility is never retried.
    async fn validate_schema_version(&self, event: &CanonicalEvent) -> Result<()> {
        if event.version <= SUPPORTED_SCHEMA_VERSION {
            return Ok(());
        }
        if self.allow_future_schema {
            warn!(
                event_id = %event.event_id,
                version = event.version,
                "processing event with future schema version (allow_future_schema=true)"
            );
            return Ok(());
        }

        warn!(
            event_id = %event.event_id,
            version = event.version,
            supported = SUPPORTED_SCHEMA_VERSION,
            "rejecting event with incompatible schema version"
        );

        let payload = serde_json::json!({
            "original_event_id": event.event_id,
            "original_event_type": event.event_type,
            "failure_reason": format!(
                "schema_incompatible: event version {} > supported version {}",
                event.version, SUPPORTED_SCHEMA_VERSION
            ),
            "retry_count": 0,
        });
        if let Ok(derived) = event.derive(event_types::DEAD_LETTERED, payload, Default::default()) {
            if let Err(e) = self.publisher.publish(TOPIC_EXCEPTIONS, &derived).await {
                error!(error = %e, "failed to emit DeadLettered event for schema incompatibility");
            }
        }

        Err(SubstrateError::SchemaVersionUnsupported {
            event_id: event.event_id,
            found: event.version,
            supported: SUPPORTED_SCHEMA_VERSION,
        })
    }

    fn validate_tenant(&self, event: &CanonicalEvent) -> bool {
        if event.tenant_id.trim().is_empty() {
            warn!(event_id = %event.event_id, "rejected event with missing tenant_id");
            return false;
        }
        if let Some(expected) = &self.expected_tenant_id {
            if event.tenant_id.trim() != expected {
                warn!(
                    event_id = %event.event_id,
                    tenant_id = %event.tenant_id,
                    expected,
                    "rejected cross-tenant event"
                );
                return false;
            }
        }
        true
    }

    async fn handle_one(&self, message: BrokerMessage) -> Result<()> {
        let _permit = self
            .concurrency_limit
            .acquire()
            .await
            .map_err(|e| SubstrateError::internal(format!("semaphore closed: {e}")))?;

        let event = match CanonicalEvent::from_bytes(&message.value) {
            Ok(e) => e,
            Err(e) => {
                warn!(error = %e, topic = %message.topic, "failed to deserialize message, skipping");
                self.record_error(&e.to_string());
                return Ok(());
            }
        };

        if self.validate_schema_version(&event).await.is_err() {
            self.record_error("schema_version_unsupported");
            return Ok(());
        }

        if !self.validate_tenant(&event) {
            return Ok(());
        }

        let already_processed = self
            .store
            .is_processed(event.event_id, &self.worker_type)
            .await
            .unwrap_or(false);
        if already_processed {
            info!(event_id = %event.event_id, worker_type = %self.worker_type, "skipping duplicate event");
            return Ok(());
        }

        if let Err(e) = self
            .store
            .mark_processing(
                event.event_id,
                &self.worker_type,
                &event.tenant_id,
                event.exception_id.as_deref(),
            )
            .await
        {
            warn!(error = %e, "failed to mark event processing, continuing anyway");
        }

        self.metrics.set_active_workers(&self.worker_type, self.concurrency_limit.available_permits() as i64);
        self.in_flight.fetch_add(1, Ordering::Relaxed);
        self.metrics.set_events_in_processing(
            &event.tenant_id,
            &self.worker_type,
            self.in_flight.load(Ordering::Relaxed) as i64,
        );

        let start = std::time::Instant::now();
        match self.processor.process_event(&event).await {
            Ok(()) => {
                let elapsed = start.elapsed();
                self.metrics.observe_processing_duration(
                    &self.worker_type,
                    &event.event_type,
                    elapsed.as_secs_f64(),
                );
                self.metrics.observe_processing_duration_ms(
                    &event.tenant_id,
                    &self.worker_type,
                    elapsed.as_secs_f64() * 1000.0,
                );
                if let Err(e) = self.store.mark_completed(event.event_id, &self.worker_type).await {
                    warn!(error = %e, "failed to mark event completed");
                }
                self.metrics
                    .record_processed(&event.tenant_id, &self.worker_type, &event.event_type, "success");
                self.messages_processed.fetch_add(1, Ordering::Relaxed);
                info!(event_id = %event.event_id, worker_type = %self.worker_type, "processed event");
            }
            Err(e) => {
                let error_type = classify_error(&e);
                self.metrics
                    .record_failed(&event.tenant_id, &self.worker_type, &error_type.to_string());
                self.metrics
                    .record_processed(&event.tenant_id, &self.worker_type, &event.event_type, "failure");
                self.record_error(&e.to_string());

                match self
                    .retry_scheduler
                    .schedule_retry(&event, &self.worker_type, &e.to_string())
                    .await
                {
                    Ok(_) => {}
                    Err(schedule_err) => {
                        error!(error = %schedule_err, "failed to schedule retry");
                    }
                }
            }
        }

        self.in_flight.fetch_sub(1, Ordering::Relaxed);
        self.metrics.set_events_in_processing(
            &event.tenant_id,
            &self.worker_type,
            self.in_flight.load(Ordering::Relaxed) as i64,
        );

        Ok(())
    }

    fn record_error(&self, message: &str) {
        self.errors_count.fetch_add(1, Ordering::Relaxed);
        *self.last_error.write().unwrap() = Some(message.to_string());
    }
}

fn classify_error(error: &SubstrateError) -> ProcessingErrorType {
    if let SubstrateError::Processing { error_type, .. } = error {
        return *error_type;
    }
    let message = error.to_string().to_lowercase();
    if message.contains("validation") {
        ProcessingErrorType::ValidationError
    } else if message.contains("timeout") {
        ProcessingErrorType::Timeout
    } else if message.contains("database") || message.contains("db ") {
        ProcessingErrorType::DatabaseError
    } else {
        ProcessingErrorType::ProcessingError
    }
}

#[async_trait]
impl MessageHandler for WorkerRuntime {
    async fn handle(&self, message: BrokerMessage) -> Result<()> {
        self.handle_one(message).await
    }
}
