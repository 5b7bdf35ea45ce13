//! # Canonical Event
//!
//! The single immutable message shape used across every topic and the event
//! store. A [`CanonicalEvent`] is constructed once via [`CanonicalEvent::create`]
//! and never mutated afterward; workers and the publisher pass it by value or
//! by shared reference.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

use crate::error::{Result, SubstrateError};

/// Schema envelope version this build of the substrate understands.
/// Events with `version > SUPPORTED_SCHEMA_VERSION` are rejected unless the
/// consuming worker has `ALLOW_FUTURE_SCHEMA` set.
pub const SUPPORTED_SCHEMA_VERSION: u32 = 1;

/// Well-known event type names. Workers match on these; the catalog is not
/// closed (arbitrary `event_type` strings are permitted) but these are the
/// ones the substrate and the reference workers emit and recognize.
pub mod event_types {
    pub const EXCEPTION_INGESTED: &str = "ExceptionIngested";
    pub const EXCEPTION_NORMALIZED: &str = "ExceptionNormalized";
    pub const MANUAL_EXCEPTION_CREATED: &str = "ManualExceptionCreated";
    pub const TRIAGE_REQUESTED: &str = "TriageRequested";
    pub const TRIAGE_COMPLETED: &str = "TriageCompleted";
    pub const POLICY_EVALUATION_REQUESTED: &str = "PolicyEvaluationRequested";
    pub const POLICY_EVALUATION_COMPLETED: &str = "PolicyEvaluationCompleted";
    pub const PLAYBOOK_MATCHED: &str = "PlaybookMatched";
    pub const STEP_EXECUTION_REQUESTED: &str = "StepExecutionRequested";
    pub const TOOL_EXECUTION_REQUESTED: &str = "ToolExecutionRequested";
    pub const TOOL_EXECUTION_COMPLETED: &str = "ToolExecutionCompleted";
    pub const FEEDBACK_CAPTURED: &str = "FeedbackCaptured";
    pub const RETRY_SCHEDULED: &str = "RetryScheduled";
    pub const DEAD_LETTERED: &str = "DeadLettered";
    pub const SLA_IMMINENT: &str = "SLAImminent";
    pub const SLA_EXPIRED: &str = "SLAExpired";
    pub const BACKPRESSURE_DETECTED: &str = "BackpressureDetected";
}

/// The canonical, immutable event envelope.
///
/// Field semantics follow the event model: `tenant_id` is always required
/// and non-empty; `correlation_id` equals `exception_id` once the latter
/// exists, and `event_id` otherwise; `metadata.correlation_id` always
/// mirrors `correlation_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CanonicalEvent {
    pub event_id: Uuid,
    pub event_type: String,
    pub tenant_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exception_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub correlation_id: String,
    pub payload: Value,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
    #[serde(default = "default_version")]
    pub version: u32,
}

fn default_version() -> u32 {
    1
}

impl CanonicalEvent {
    /// Construct a canonical event, applying the defaulting and
    /// correlation-id-derivation algorithm.
    ///
    /// `correlation_id`, when not supplied explicitly, is derived as
    /// `exception_id` if present, else the event's own `event_id` (which
    /// itself defaults to a freshly generated UUID when `event_id` is not
    /// supplied). This means correlation_id and event_id converge whenever
    /// neither an explicit correlation_id nor an exception_id is given.
    #[allow(clippy::too_many_arguments)]
    pub fn create(
        event_type: impl Into<String>,
        tenant_id: impl Into<String>,
        payload: Value,
        exception_id: Option<String>,
        correlation_id: Option<String>,
        metadata: Option<HashMap<String, Value>>,
        version: Option<u32>,
        event_id: Option<Uuid>,
        timestamp: Option<DateTime<Utc>>,
    ) -> Result<Self> {
        let event_type = event_type.into();
        let tenant_id = tenant_id.into();

        if event_type.trim().is_empty() {
            return Err(SubstrateError::schema_invalid(
                "event_type must not be empty",
                event_id,
            ));
        }
        if tenant_id.trim().is_empty() {
            return Err(SubstrateError::schema_invalid(
                "tenant_id must not be empty",
                event_id,
            ));
        }
        if payload.is_null() {
            return Err(SubstrateError::schema_invalid(
                "payload must not be null",
                event_id,
            ));
        }

        let version = version.unwrap_or(1);
        if version < 1 {
            return Err(SubstrateError::schema_invalid(
                "version must be >= 1",
                event_id,
            ));
        }

        let event_id = event_id.unwrap_or_else(Uuid::new_v4);
        let timestamp = timestamp.unwrap_or_else(Utc::now);

        let final_correlation_id = correlation_id
            .or_else(|| exception_id.clone())
            .unwrap_or_else(|| event_id.to_string());

        let mut metadata = metadata.unwrap_or_default();
        metadata
            .entry("correlation_id".to_string())
            .or_insert_with(|| Value::String(final_correlation_id.clone()));

        Ok(Self {
            event_id,
            event_type,
            tenant_id,
            exception_id,
            timestamp,
            correlation_id: final_correlation_id,
            payload,
            metadata,
            version,
        })
    }

    /// Deserialize a canonical event from wire bytes (a consumed Kafka
    /// record's value). Rejects malformed JSON and schema-invalid events
    /// (missing required fields are caught by `deny_unknown_fields` plus
    /// serde's own required-field checks).
    pub fn from_bytes(value: &[u8]) -> Result<Self> {
        serde_json::from_slice::<Self>(value).map_err(|e| {
            SubstrateError::schema_invalid(format!("failed to decode event: {e}"), None)
        })
    }

    /// Serialize to the wire representation used for publish.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(SubstrateError::from)
    }

    /// Returns true if `exception_id` is present and correlation_id was
    /// derived from it (rather than from `event_id`).
    pub fn correlation_from_exception(&self) -> bool {
        matches!(&self.exception_id, Some(id) if id == &self.correlation_id)
    }

    /// Builds a derived event of a different type carrying the same
    /// tenant/correlation lineage — used by control-plane emitters
    /// (RetryScheduled, DeadLettered, BackpressureDetected) that need to
    /// preserve traceability back to the originating event.
    pub fn derive(
        &self,
        event_type: impl Into<String>,
        payload: Value,
        extra_metadata: HashMap<String, Value>,
    ) -> Result<Self> {
        let mut metadata = extra_metadata;
        metadata
            .entry("correlation_id".to_string())
            .or_insert_with(|| Value::String(self.correlation_id.clone()));
        CanonicalEvent::create(
            event_type,
            self.tenant_id.clone(),
            payload,
            self.exception_id.clone(),
            Some(self.correlation_id.clone()),
            Some(metadata),
            None,
            None,
            None,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_correlation_id_defaults_to_event_id() {
        let e = CanonicalEvent::create(
            "ExceptionIngested",
            "tenant-a",
            json!({"k": "v"}),
            None,
            None,
            None,
            None,
            None,
            None,
        )
        .unwrap();
        assert_eq!(e.correlation_id, e.event_id.to_string());
        assert_eq!(
            e.metadata.get("correlation_id").unwrap(),
            &Value::String(e.event_id.to_string())
        );
    }

    #[test]
    fn test_correlation_id_derives_from_exception_id() {
        let e = CanonicalEvent::create(
            "TriageRequested",
            "tenant-a",
            json!({"k": "v"}),
            Some("exc-123".to_string()),
            None,
            None,
            None,
            None,
            None,
        )
        .unwrap();
        assert_eq!(e.correlation_id, "exc-123");
        assert!(e.correlation_from_exception());
    }

    #[test]
    fn test_explicit_correlation_id_wins() {
        let e = CanonicalEvent::create(
            "TriageRequested",
            "tenant-a",
            json!({}),
            Some("exc-123".to_string()),
            Some("explicit-corr".to_string()),
            None,
            None,
            None,
            None,
        )
        .unwrap();
        assert_eq!(e.correlation_id, "explicit-corr");
    }

    #[test]
    fn test_empty_tenant_rejected() {
        let err = CanonicalEvent::create(
            "TriageRequested",
            "",
            json!({}),
            None,
            None,
            None,
            None,
            None,
            None,
        )
        .unwrap_err();
        assert!(matches!(err, SubstrateError::SchemaInvalid { .. }));
    }

    #[test]
    fn test_empty_event_type_rejected() {
        let err = CanonicalEvent::create(
            "",
            "tenant-a",
            json!({}),
            None,
            None,
            None,
            None,
            None,
            None,
        )
        .unwrap_err();
        assert!(matches!(err, SubstrateError::SchemaInvalid { .. }));
    }

    #[test]
    fn test_version_defaults_to_one() {
        let e = CanonicalEvent::create(
            "TriageRequested",
            "tenant-a",
            json!({}),
            None,
            None,
            None,
            None,
            None,
            None,
        )
        .unwrap();
        assert_eq!(e.version, 1);
    }

    #[test]
    fn test_serialize_deserialize_round_trip() {
        let e = CanonicalEvent::create(
            "ExceptionIngested",
            "tenant-a",
            json!({"amount": 42}),
            Some("exc-1".to_string()),
            None,
            None,
            Some(1),
            None,
            None,
        )
        .unwrap();
        let bytes = e.to_bytes().unwrap();
        let roundtripped = CanonicalEvent::from_bytes(&bytes).unwrap();
        assert_eq!(e, roundtripped);
    }

    #[test]
    fn test_unknown_fields_rejected() {
        let raw = br#"{"event_id":"00000000-0000-0000-0000-000000000000","event_type":"X","tenant_id":"t","timestamp":"2024-01-01T00:00:00Z","correlation_id":"c","payload":{},"metadata":{},"version":1,"bogus":true}"#;
        let result = CanonicalEvent::from_bytes(raw);
        assert!(result.is_err());
    }

    #[test]
    fn test_derive_preserves_correlation_and_tenant() {
        let original = CanonicalEvent::create(
            "ExceptionIngested",
            "tenant-a",
            json!({}),
            Some("exc-1".to_string()),
            None,
            None,
            None,
            None,
            None,
        )
        .unwrap();
        let derived = original
            .derive(event_types::RETRY_SCHEDULED, json!({"retry": 1}), HashMap::new())
            .unwrap();
        assert_eq!(derived.tenant_id, original.tenant_id);
        assert_eq!(derived.correlation_id, original.correlation_id);
        assert_eq!(derived.exception_id, original.exception_id);
    }
}
