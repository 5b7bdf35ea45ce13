//! # Metrics
//!
//! Prometheus collectors for the substrate. Unlike the collector this
//! module is modeled on — which registered unlabeled counters per concern —
//! every series here carries the label set the audit surface and alerting
//! rules actually key on (`tenant_id`, `event_type`, `worker_type`), because
//! a single-process-per-worker-type deployment makes per-tenant cardinality
//! the whole point of the dashboard.

use prometheus::{
    histogram_opts, opts, register_histogram_vec_with_registry, register_int_counter_vec_with_registry,
    register_int_gauge_vec_with_registry, Encoder, HistogramVec, IntCounterVec, IntGaugeVec, Registry,
    TextEncoder,
};
use tracing::info;

use crate::error::{Result, SubstrateError};

/// Prometheus collectors shared by every worker process.
pub struct Metrics {
    registry: Registry,

    events_published_total: IntCounterVec,
    events_processed_total: IntCounterVec,
    events_failed_total: IntCounterVec,
    rate_limited_total: IntCounterVec,
    backpressure_total: IntCounterVec,
    retries_scheduled_total: IntCounterVec,
    dead_lettered_total: IntCounterVec,
    dlq_size: IntGaugeVec,

    processing_duration_seconds: HistogramVec,
    processing_duration_ms: HistogramVec,
    broker_publish_duration_seconds: HistogramVec,

    active_workers: IntGaugeVec,
    events_in_processing: IntGaugeVec,
    kafka_consumer_lag: IntGaugeVec,
}

impl Metrics {
    pub fn new(include_tenant_id: bool) -> Result<Self> {
        info!(include_tenant_id, "initializing metrics registry");
        let registry = Registry::new();
        let tenant_label = if include_tenant_id { "tenant_id" } else { "tenant_bucket" };

        let events_published_total = register_int_counter_vec_with_registry!(
            opts!("events_published_total", "Total events published by the publisher"),
            &[tenant_label, "event_type", "topic"],
            &registry
        )
        .map_err(registration_error)?;

        let events_processed_total = register_int_counter_vec_with_registry!(
            opts!(
                "events_processed_total",
                "Total events processed by a worker, by outcome"
            ),
            &[tenant_label, "worker_type", "event_type", "status"],
            &registry
        )
        .map_err(registration_error)?;

        let events_failed_total = register_int_counter_vec_with_registry!(
            opts!("events_failed_total", "Total event processing failures"),
            &[tenant_label, "worker_type", "error_type"],
            &registry
        )
        .map_err(registration_error)?;

        let rate_limited_total = register_int_counter_vec_with_registry!(
            opts!("rate_limited_total", "Total publish attempts denied by the rate limiter"),
            &[tenant_label],
            &registry
        )
        .map_err(registration_error)?;

        let backpressure_total = register_int_counter_vec_with_registry!(
            opts!("backpressure_total", "Total BackpressureDetected events emitted"),
            &[tenant_label],
            &registry
        )
        .map_err(registration_error)?;

        let retries_scheduled_total = register_int_counter_vec_with_registry!(
            opts!("retries_scheduled_total", "Total retries scheduled"),
            &[tenant_label, "worker_type", "event_type", "retry_attempt"],
            &registry
        )
        .map_err(registration_error)?;

        let dead_lettered_total = register_int_counter_vec_with_registry!(
            opts!("dead_lettered_total", "Total events routed to the dead letter queue"),
            &[tenant_label, "worker_type", "event_type"],
            &registry
        )
        .map_err(registration_error)?;

        let dlq_size = register_int_gauge_vec_with_registry!(
            opts!("dlq_size", "Current pending dead-letter entry count"),
            &[tenant_label, "worker_type"],
            &registry
        )
        .map_err(registration_error)?;

        let processing_duration_seconds = register_histogram_vec_with_registry!(
            histogram_opts!(
                "processing_duration_seconds",
                "Time spent in a worker's process_event call"
            ),
            &["worker_type", "event_type"],
            &registry
        )
        .map_err(registration_error)?;

        let processing_duration_ms = register_histogram_vec_with_registry!(
            histogram_opts!(
                "processing_duration_ms",
                "Time spent in a worker's process_event call, coarser labels and millisecond buckets",
                vec![1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0, 10000.0]
            ),
            &[tenant_label, "worker_type"],
            &registry
        )
        .map_err(registration_error)?;

        let broker_publish_duration_seconds = register_histogram_vec_with_registry!(
            histogram_opts!(
                "broker_publish_duration_seconds",
                "Time spent publishing a single event to the broker, including retries"
            ),
            &["topic"],
            &registry
        )
        .map_err(registration_error)?;

        let active_workers = register_int_gauge_vec_with_registry!(
            opts!("active_workers", "Concurrent in-flight message handlers"),
            &["worker_type"],
            &registry
        )
        .map_err(registration_error)?;

        let events_in_processing = register_int_gauge_vec_with_registry!(
            opts!("events_in_processing", "Events currently between mark_processing and a terminal state"),
            &[tenant_label, "worker_type"],
            &registry
        )
        .map_err(registration_error)?;

        let kafka_consumer_lag = register_int_gauge_vec_with_registry!(
            opts!("kafka_consumer_lag", "Best-effort consumer lag per topic/group"),
            &["topic", "group_id"],
            &registry
        )
        .map_err(registration_error)?;

        Ok(Self {
            registry,
            events_published_total,
            events_processed_total,
            events_failed_total,
            rate_limited_total,
            backpressure_total,
            retries_scheduled_total,
            dead_lettered_total,
            dlq_size,
            processing_duration_seconds,
            processing_duration_ms,
            broker_publish_duration_seconds,
            active_workers,
            events_in_processing,
            kafka_consumer_lag,
        })
    }

    #[cfg(any(test, feature = "test-support"))]
    pub fn new_for_test() -> Self {
        Self::new(true).expect("metrics registration should not fail in tests")
    }

    pub fn record_published(&self, tenant_id: &str, event_type: &str, topic: &str) {
        self.events_published_total
            .with_label_values(&[tenant_id, event_type, topic])
            .inc();
    }

    pub fn record_processed(&self, tenant_id: &str, worker_type: &str, event_type: &str, status: &str) {
        self.events_processed_total
            .with_label_values(&[tenant_id, worker_type, event_type, status])
            .inc();
    }

    pub fn record_failed(&self, tenant_id: &str, worker_type: &str, error_type: &str) {
        self.events_failed_total
            .with_label_values(&[tenant_id, worker_type, error_type])
            .inc();
    }

    pub fn record_rate_limited(&self, tenant_id: &str) {
        self.rate_limited_total.with_label_values(&[tenant_id]).inc();
    }

    pub fn record_backpressure(&self, tenant_id: &str) {
        self.backpressure_total.with_label_values(&[tenant_id]).inc();
    }

    pub fn record_retry_scheduled(&self, tenant_id: &str, worker_type: &str, event_type: &str, retry_attempt: u32) {
        let attempt = retry_attempt.to_string();
        self.retries_scheduled_total
            .with_label_values(&[tenant_id, worker_type, event_type, &attempt])
            .inc();
    }

    pub fn record_dead_lettered(&self, tenant_id: &str, worker_type: &str, event_type: &str) {
        self.dead_lettered_total
            .with_label_values(&[tenant_id, worker_type, event_type])
            .inc();
    }

    pub fn set_dlq_size(&self, tenant_id: &str, worker_type: &str, size: i64) {
        self.dlq_size.with_label_values(&[tenant_id, worker_type]).set(size);
    }

    pub fn observe_processing_duration(&self, worker_type: &str, event_type: &str, seconds: f64) {
        self.processing_duration_seconds
            .with_label_values(&[worker_type, event_type])
            .observe(seconds);
    }

    pub fn observe_processing_duration_ms(&self, tenant_id: &str, worker_type: &str, millis: f64) {
        self.processing_duration_ms
            .with_label_values(&[tenant_id, worker_type])
            .observe(millis);
    }

    pub fn observe_broker_publish_duration(&self, topic: &str, seconds: f64) {
        self.broker_publish_duration_seconds
            .with_label_values(&[topic])
            .observe(seconds);
    }

    pub fn set_active_workers(&self, worker_type: &str, count: i64) {
        self.active_workers.with_label_values(&[worker_type]).set(count);
    }

    pub fn set_events_in_processing(&self, tenant_id: &str, worker_type: &str, count: i64) {
        self.events_in_processing
            .with_label_values(&[tenant_id, worker_type])
            .set(count);
    }

    pub fn set_kafka_consumer_lag(&self, topic: &str, group_id: &str, lag: i64) {
        self.kafka_consumer_lag.with_label_values(&[topic, group_id]).set(lag);
    }

    /// Render the registry in Prometheus text exposition format, for the
    /// `/metrics` endpoint.
    pub fn export(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|e| SubstrateError::internal(format!("failed to encode metrics: {e}")))?;
        String::from_utf8(buffer)
            .map_err(|e| SubstrateError::internal(format!("metrics output was not utf-8: {e}")))
    }
}

fn registration_error(e: prometheus::Error) -> SubstrateError {
    SubstrateError::internal(format!("failed to register metric: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_construction_succeeds() {
        let metrics = Metrics::new(true);
        assert!(metrics.is_ok());
    }

    #[test]
    fn test_record_published_appears_in_export() {
        let metrics = Metrics::new_for_test();
        metrics.record_published("tenant-a", "ExceptionIngested", "exceptions");
        let exported = metrics.export().unwrap();
        assert!(exported.contains("events_published_total"));
        assert!(exported.contains("tenant-a"));
    }

    #[test]
    fn test_dlq_size_gauge_round_trip() {
        let metrics = Metrics::new_for_test();
        metrics.set_dlq_size("tenant-a", "intake", 7);
        let exported = metrics.export().unwrap();
        assert!(exported.contains("dlq_size"));
    }

    #[test]
    fn test_unlabeled_tenant_bucket_used_when_disabled() {
        let metrics = Metrics::new(false).unwrap();
        metrics.record_published("tenant-a", "ExceptionIngested", "exceptions");
        let exported = metrics.export().unwrap();
        assert!(exported.contains("tenant_bucket"));
    }

    #[test]
    fn test_processed_status_and_retry_attempt_labels_appear_in_export() {
        let metrics = Metrics::new_for_test();
        metrics.record_processed("tenant-a", "intake", "ExceptionIngested", "success");
        metrics.record_retry_scheduled("tenant-a", "intake", "ExceptionIngested", 2);
        metrics.observe_processing_duration_ms("tenant-a", "intake", 12.5);
        let exported = metrics.export().unwrap();
        assert!(exported.contains("status=\"success\""));
        assert!(exported.contains("retry_attempt=\"2\""));
        assert!(exported.contains("processing_duration_ms"));
    }
}
