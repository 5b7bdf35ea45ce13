//! # Reference Worker Stand-ins
//!
//! One thin [`EventProcessor`] per worker type. Each acknowledges the event
//! types it owns and, where the event-type catalog implies a next step,
//! emits the derived event — the actual classification/evaluation/execution
//! logic belongs to the agents these stand in for, and stays out of this
//! substrate.

use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use tracing::debug;

use crate::events::{event_types, CanonicalEvent};
use crate::publisher::EventPublisher;
use crate::error::Result;
use crate::types::WorkerType;
use crate::worker::EventProcessor;

/// Topics each worker type subscribes to, matching the shared-topics
/// (Option A) layout: every agent worker reads `exceptions`, the SLA
/// monitor reads `sla`.
pub fn topics_for_worker_type(worker_type: WorkerType) -> Vec<String> {
    match worker_type {
        WorkerType::SlaMonitor => vec![crate::topic_naming::TOPIC_SLA.to_string()],
        _ => vec![crate::topic_naming::TOPIC_EXCEPTIONS.to_string()],
    }
}

pub fn build_processor(worker_type: WorkerType, publisher: Arc<EventPublisher>) -> Arc<dyn EventProcessor> {
    match worker_type {
        WorkerType::Intake => Arc::new(IntakeProcessor { publisher }),
        WorkerType::Triage => Arc::new(TriageProcessor { publisher }),
        WorkerType::Policy => Arc::new(PolicyProcessor { publisher }),
        WorkerType::Playbook => Arc::new(PlaybookProcessor { publisher }),
        WorkerType::Tool => Arc::new(ToolProcessor { publisher }),
        WorkerType::Feedback => Arc::new(FeedbackProcessor { publisher }),
        WorkerType::SlaMonitor => Arc::new(SlaMonitorProcessor),
    }
}

async fn emit_next(publisher: &EventPublisher, source: &CanonicalEvent, next_type: &str, payload: serde_json::Value) -> Result<()> {
    let derived = source.derive(next_type, payload, Default::default())?;
    publisher.publish_routed(&derived, false).await
}

/// Normalizes a raw `ExceptionIngested` event into `ExceptionNormalized`.
pub struct IntakeProcessor {
    publisher: Arc<EventPublisher>,
}

#[async_trait]
impl EventProcessor for IntakeProcessor {
    async fn process_event(&self, event: &CanonicalEvent) -> Result<()> {
        if event.event_type != event_types::EXCEPTION_INGESTED {
            return Ok(());
        }
        debug!(event_id = %event.event_id, "intake processing exception");
        emit_next(
            &self.publisher,
            event,
            event_types::EXCEPTION_NORMALIZED,
            json!({"normalized_from": event.event_id, "payload": event.payload}),
        )
        .await
    }
}

/// Classifies a normalized exception, emitting `TriageCompleted`.
pub struct TriageProcessor {
    publisher: Arc<EventPublisher>,
}

#[async_trait]
impl EventProcessor for TriageProcessor {
    async fn process_event(&self, event: &CanonicalEvent) -> Result<()> {
        if event.event_type != event_types::EXCEPTION_NORMALIZED {
            return Ok(());
        }
        emit_next(
            &self.publisher,
            event,
            event_types::TRIAGE_COMPLETED,
            json!({"triaged_from": event.event_id, "classification": "unclassified"}),
        )
        .await
    }
}

/// Evaluates tenant policy against a triaged exception, emitting
/// `PolicyEvaluationCompleted`.
pub struct PolicyProcessor {
    publisher: Arc<EventPublisher>,
}

#[async_trait]
impl EventProcessor for PolicyProcessor {
    async fn process_event(&self, event: &CanonicalEvent) -> Result<()> {
        if event.event_type != event_types::TRIAGE_COMPLETED {
            return Ok(());
        }
        emit_next(
            &self.publisher,
            event,
            event_types::POLICY_EVALUATION_COMPLETED,
            json!({"evaluated_from": event.event_id, "decision": "allow"}),
        )
        .await
    }
}

/// Matches a policy-evaluated exception against a playbook, emitting
/// `PlaybookMatched`.
pub struct PlaybookProcessor {
    publisher: Arc<EventPublisher>,
}

#[async_trait]
impl EventProcessor for PlaybookProcessor {
    async fn process_event(&self, event: &CanonicalEvent) -> Result<()> {
        if event.event_type != event_types::POLICY_EVALUATION_COMPLETED {
            return Ok(());
        }
        emit_next(
            &self.publisher,
            event,
            event_types::PLAYBOOK_MATCHED,
            json!({"matched_from": event.event_id, "playbook_id": "none"}),
        )
        .await
    }
}

/// Executes a requested remediation step, emitting `ToolExecutionCompleted`.
pub struct ToolProcessor {
    publisher: Arc<EventPublisher>,
}

#[async_trait]
impl EventProcessor for ToolProcessor {
    async fn process_event(&self, event: &CanonicalEvent) -> Result<()> {
        if event.event_type != event_types::STEP_EXECUTION_REQUESTED {
            return Ok(());
        }
        emit_next(
            &self.publisher,
            event,
            event_types::TOOL_EXECUTION_COMPLETED,
            json!({"executed_from": event.event_id, "outcome": "noop"}),
        )
        .await
    }
}

/// Captures operator/automation feedback on a resolved exception, emitting
/// `FeedbackCaptured`.
pub struct FeedbackProcessor {
    publisher: Arc<EventPublisher>,
}

#[async_trait]
impl EventProcessor for FeedbackProcessor {
    async fn process_event(&self, event: &CanonicalEvent) -> Result<()> {
        if event.event_type != event_types::TOOL_EXECUTION_COMPLETED {
            return Ok(());
        }
        emit_next(
            &self.publisher,
            event,
            event_types::FEEDBACK_CAPTURED,
            json!({"feedback_for": event.event_id, "outcome": "resolved"}),
        )
        .await
    }
}

/// Acknowledges SLA signals. Nothing downstream is implied by the catalog
/// for `SLAImminent`/`SLAExpired` — they are terminal in this substrate.
pub struct SlaMonitorProcessor;

#[async_trait]
impl EventProcessor for SlaMonitorProcessor {
    async fn process_event(&self, event: &CanonicalEvent) -> Result<()> {
        debug!(event_id = %event.event_id, event_type = %event.event_type, "sla monitor acknowledged event");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topics_for_sla_monitor() {
        assert_eq!(topics_for_worker_type(WorkerType::SlaMonitor), vec!["sla".to_string()]);
    }

    #[test]
    fn test_topics_for_intake() {
        assert_eq!(topics_for_worker_type(WorkerType::Intake), vec!["exceptions".to_string()]);
    }
}
