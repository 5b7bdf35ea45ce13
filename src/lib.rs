//! # Exception Worker Substrate
//!
//! The shared async event-processing substrate for the exception pipeline's
//! worker fleet: a canonical event model, an at-least-once publisher, a
//! broker abstraction over Kafka (or an in-memory stand-in for tests), a
//! per-tenant token-bucket rate limiter, a retry/DLQ scheduler, an
//! append-only event store, and the worker framework every worker type
//! (intake, triage, policy, playbook, tool, feedback, sla_monitor) runs on
//! top of. Business logic for each agent lives elsewhere; this crate only
//! carries the plumbing that dispatches events to it reliably.

pub mod broker;
pub mod config;
pub mod error;
pub mod events;
pub mod health;
#[cfg(feature = "kafka")]
pub mod kafka;
pub mod metrics;
pub mod partitioning;
pub mod processors;
pub mod publisher;
pub mod rate_limiter;
pub mod retry_policy;
pub mod retry_scheduler;
pub mod storage;
pub mod topic_naming;
pub mod types;
pub mod worker;

pub use broker::{Broker, InMemoryBroker, MessageHandler};
pub use config::Config;
pub use error::{Result, SubstrateError};
pub use events::CanonicalEvent;
#[cfg(feature = "kafka")]
pub use kafka::KafkaBroker;
pub use metrics::Metrics;
pub use publisher::EventPublisher;
pub use rate_limiter::PerTenantRateLimiter;
pub use retry_scheduler::RetryScheduler;
pub use storage::EventStore;
pub use types::WorkerType;
pub use worker::{EventProcessor, WorkerRuntime};

/// Crate version, surfaced on the `/` health endpoint and in startup logs.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const SERVICE_NAME: &str = "exception-worker";
