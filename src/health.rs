//! # Worker Health Surface
//!
//! The per-worker-type HTTP server: `/healthz`, `/readyz`, and `/` for
//! worker metadata. Modeled on the teacher service's `axum` router, narrowed
//! to the three endpoints a worker process needs — no REST surface for
//! events, streams, or replay lives here.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{extract::State, http::StatusCode, response::Json, routing::get, Router};
use serde::Serialize;
use tracing::info;

use crate::broker::Broker;
use crate::worker::WorkerRuntime;

#[derive(Clone)]
pub struct HealthServerState {
    pub broker: Arc<dyn Broker>,
    pub worker: Arc<WorkerRuntime>,
    pub worker_type: String,
    pub group_id: String,
    pub concurrency: u32,
    pub started_at: Instant,
}

#[derive(Serialize)]
struct WorkerMetadata {
    worker_type: String,
    group_id: String,
    concurrency: u32,
    uptime_seconds: u64,
}

pub fn router(state: HealthServerState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/", get(metadata))
        .with_state(Arc::new(state))
}

/// Binds and serves the health router until the process exits; the caller
/// runs this as a background task alongside the worker's consume loop.
pub async fn serve(host: &str, port: u16, state: HealthServerState) -> crate::error::Result<()> {
    let addr: SocketAddr = format!("{host}:{port}")
        .parse()
        .map_err(|e| crate::error::SubstrateError::configuration(format!("invalid health bind address: {e}")))?;

    info!(%addr, "starting worker health server");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| crate::error::SubstrateError::internal(format!("failed to bind health server: {e}")))?;

    axum::serve(listener, router(state))
        .await
        .map_err(|e| crate::error::SubstrateError::internal(format!("health server exited: {e}")))
}

async fn healthz(State(state): State<Arc<HealthServerState>>) -> StatusCode {
    let worker_health = state.worker.health();
    let broker_health = state.broker.health().await;
    if worker_health.is_running && broker_health.status == crate::types::HealthStatus::Healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn readyz(State(state): State<Arc<HealthServerState>>) -> StatusCode {
    if state.worker.health().is_running {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn metadata(State(state): State<Arc<HealthServerState>>) -> Json<WorkerMetadata> {
    Json(WorkerMetadata {
        worker_type: state.worker_type.clone(),
        group_id: state.group_id.clone(),
        concurrency: state.concurrency,
        uptime_seconds: state.started_at.elapsed().as_secs(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::InMemoryBroker;
    use crate::metrics::Metrics;
    use crate::publisher::EventPublisher;
    use crate::rate_limiter::{PerTenantRateLimiter, TenantRateLimit};
    use crate::retry_policy::RetryPolicyRegistry;
    use crate::retry_scheduler::RetryScheduler;
    use crate::topic_naming::{TopicNamingStrategy, TopicStrategy};
    use crate::worker::EventProcessor;
    use async_trait::async_trait;

    struct NoopProcessor;
    #[async_trait]
    impl EventProcessor for NoopProcessor {
        async fn process_event(&self, _event: &crate::events::CanonicalEvent) -> crate::error::Result<()> {
            Ok(())
        }
    }

    fn build_state() -> HealthServerState {
        let broker: Arc<dyn Broker> = Arc::new(InMemoryBroker::new());
        let metrics = Arc::new(Metrics::new_for_test());
        let store = Arc::new(crate::storage::EventStore::from_pool_for_test());
        let topics = TopicNamingStrategy::new(TopicStrategy::Shared);
        let rate_limiter = Arc::new(PerTenantRateLimiter::new(TenantRateLimit::default()));
        let publisher = Arc::new(EventPublisher::new(
            broker.clone(),
            store.clone(),
            rate_limiter,
            topics,
            metrics.clone(),
            false,
        ));
        let retry_scheduler = Arc::new(RetryScheduler::new(
            store.clone(),
            publisher.clone(),
            RetryPolicyRegistry::default(),
            metrics.clone(),
        ));
        let worker = Arc::new(WorkerRuntime::new(
            "intake",
            Arc::new(NoopProcessor) as Arc<dyn EventProcessor>,
            store,
            publisher,
            retry_scheduler,
            metrics,
            false,
            None,
            4,
        ));
        HealthServerState {
            broker,
            worker,
            worker_type: "intake".to_string(),
            group_id: "intake".to_string(),
            concurrency: 4,
            started_at: Instant::now(),
        }
    }

    #[tokio::test]
    async fn test_healthz_ok_when_running() {
        let state = Arc::new(build_state());
        let status = healthz(State(state)).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_readyz_unavailable_after_shutdown() {
        let state = build_state();
        state.worker.shutdown();
        let state = Arc::new(state);
        let status = readyz(State(state)).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }
}
