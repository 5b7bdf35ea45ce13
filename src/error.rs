//! # Error Handling Module
//!
//! Structured error types for the event-processing substrate: canonical event
//! validation, broker I/O, the event store, the retry/DLQ subsystem, and the
//! worker framework all surface through a single enum so callers can inspect
//! severity, retryability, and category uniformly.

use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Main error type for the event-processing substrate.
#[derive(Error, Debug)]
pub enum SubstrateError {
    /// Configuration failed to load or did not pass validation.
    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// A canonical event failed construction or deserialization validation
    /// (missing `tenant_id`, empty `event_type`, malformed JSON, ...).
    #[error("schema invalid: {message}")]
    SchemaInvalid {
        message: String,
        event_id: Option<Uuid>,
    },

    /// An event's envelope `version` exceeds what this worker supports and
    /// `ALLOW_FUTURE_SCHEMA` is not set.
    #[error("schema version {found} unsupported (supported: {supported})")]
    SchemaVersionUnsupported {
        event_id: Uuid,
        found: u32,
        supported: u32,
    },

    /// An event's `tenant_id` was missing, empty, or did not match the
    /// worker's expected tenant.
    #[error("tenant violation: {message}")]
    TenantViolation {
        message: String,
        event_id: Option<Uuid>,
        tenant_id: Option<String>,
    },

    /// `(event_id, worker_type)` was already marked completed; the message
    /// is a duplicate delivery and was skipped.
    #[error("duplicate event {event_id} for worker {worker_type}")]
    DuplicateEvent { event_id: Uuid, worker_type: String },

    /// The per-tenant rate limiter denied the request.
    #[error("rate limited: tenant {tenant_id}, retry after {retry_after_secs:.3}s")]
    RateLimited {
        tenant_id: String,
        retry_after_secs: f64,
    },

    /// The event store could not persist or read a row.
    #[error("event store error: {message}")]
    EventStore {
        message: String,
        event_id: Option<Uuid>,
        operation: Option<String>,
    },

    /// The broker rejected a publish after exhausting its internal retries.
    #[error("broker publish error: {message}")]
    BrokerPublish {
        message: String,
        topic: String,
        retryable: bool,
    },

    /// The broker connection could not be established or was lost.
    #[error("broker connection error: {message}")]
    BrokerConnection { message: String },

    /// The broker's consume loop failed.
    #[error("broker subscribe error: {message}")]
    BrokerSubscribe { message: String },

    /// A worker's `process_event` failed; classified for the retry
    /// scheduler and for metrics.
    #[error("processing error ({error_type}): {message}")]
    Processing {
        message: String,
        event_id: Uuid,
        event_type: String,
        error_type: ProcessingErrorType,
    },

    /// The retry budget for `(event_id, worker_type)` is exhausted; the
    /// event has been (or is being) routed to the dead-letter queue.
    #[error("dlq exhausted for event {event_id} after {retry_count} attempts")]
    DlqExhausted { event_id: Uuid, retry_count: u32 },

    /// Serialization/deserialization of an event or internal record failed.
    #[error("serialization error: {message}")]
    Serialization { message: String },

    /// Internal invariant violation; should not occur in correct operation.
    #[error("internal error: {message}")]
    Internal { message: String },
}

/// Fine-grained classification of a [`SubstrateError::Processing`] failure,
/// mirrored into the `failures_total{error_type}` metric label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingErrorType {
    ValidationError,
    Timeout,
    DatabaseError,
    ProcessingError,
}

impl fmt::Display for ProcessingErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessingErrorType::ValidationError => write!(f, "validation_error"),
            ProcessingErrorType::Timeout => write!(f, "timeout"),
            ProcessingErrorType::DatabaseError => write!(f, "database_error"),
            ProcessingErrorType::ProcessingError => write!(f, "processing_error"),
        }
    }
}

/// Error severity levels for categorization and alerting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorSeverity::Low => write!(f, "low"),
            ErrorSeverity::Medium => write!(f, "medium"),
            ErrorSeverity::High => write!(f, "high"),
            ErrorSeverity::Critical => write!(f, "critical"),
        }
    }
}

impl SubstrateError {
    /// Get the error severity level.
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            SubstrateError::Configuration { .. } => ErrorSeverity::High,
            SubstrateError::SchemaInvalid { .. } => ErrorSeverity::Low,
            SubstrateError::SchemaVersionUnsupported { .. } => ErrorSeverity::Medium,
            SubstrateError::TenantViolation { .. } => ErrorSeverity::High,
            SubstrateError::DuplicateEvent { .. } => ErrorSeverity::Low,
            SubstrateError::RateLimited { .. } => ErrorSeverity::Low,
            SubstrateError::EventStore { .. } => ErrorSeverity::High,
            SubstrateError::BrokerPublish { .. } => ErrorSeverity::Medium,
            SubstrateError::BrokerConnection { .. } => ErrorSeverity::High,
            SubstrateError::BrokerSubscribe { .. } => ErrorSeverity::High,
            SubstrateError::Processing { .. } => ErrorSeverity::Medium,
            SubstrateError::DlqExhausted { .. } => ErrorSeverity::Medium,
            SubstrateError::Serialization { .. } => ErrorSeverity::Low,
            SubstrateError::Internal { .. } => ErrorSeverity::Critical,
        }
    }

    /// Whether the caller may retry the operation that produced this error.
    pub fn is_retryable(&self) -> bool {
        match self {
            SubstrateError::Configuration { .. } => false,
            SubstrateError::SchemaInvalid { .. } => false,
            SubstrateError::SchemaVersionUnsupported { .. } => false,
            SubstrateError::TenantViolation { .. } => false,
            SubstrateError::DuplicateEvent { .. } => false,
            SubstrateError::RateLimited { .. } => true,
            SubstrateError::EventStore { .. } => true,
            SubstrateError::BrokerPublish { retryable, .. } => *retryable,
            SubstrateError::BrokerConnection { .. } => true,
            SubstrateError::BrokerSubscribe { .. } => true,
            SubstrateError::Processing { .. } => true,
            SubstrateError::DlqExhausted { .. } => false,
            SubstrateError::Serialization { .. } => false,
            SubstrateError::Internal { .. } => false,
        }
    }

    /// Category string used as the `error_type`/metrics label for this error.
    pub fn category(&self) -> &'static str {
        match self {
            SubstrateError::Configuration { .. } => "configuration",
            SubstrateError::SchemaInvalid { .. } => "schema_invalid",
            SubstrateError::SchemaVersionUnsupported { .. } => "schema_incompatible",
            SubstrateError::TenantViolation { .. } => "tenant_violation",
            SubstrateError::DuplicateEvent { .. } => "duplicate_event",
            SubstrateError::RateLimited { .. } => "rate_limited",
            SubstrateError::EventStore { .. } => "event_store",
            SubstrateError::BrokerPublish { .. } => "broker_publish",
            SubstrateError::BrokerConnection { .. } => "broker_connection",
            SubstrateError::BrokerSubscribe { .. } => "broker_subscribe",
            SubstrateError::Processing { error_type, .. } => match error_type {
                ProcessingErrorType::ValidationError => "validation_error",
                ProcessingErrorType::Timeout => "timeout",
                ProcessingErrorType::DatabaseError => "database_error",
                ProcessingErrorType::ProcessingError => "processing_error",
            },
            SubstrateError::DlqExhausted { .. } => "dlq_exhausted",
            SubstrateError::Serialization { .. } => "serialization",
            SubstrateError::Internal { .. } => "internal",
        }
    }

    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn schema_invalid<S: Into<String>>(message: S, event_id: Option<Uuid>) -> Self {
        Self::SchemaInvalid {
            message: message.into(),
            event_id,
        }
    }

    pub fn tenant_violation<S: Into<String>>(
        message: S,
        event_id: Option<Uuid>,
        tenant_id: Option<String>,
    ) -> Self {
        Self::TenantViolation {
            message: message.into(),
            event_id,
            tenant_id,
        }
    }

    pub fn event_store<S: Into<String>>(message: S) -> Self {
        Self::EventStore {
            message: message.into(),
            event_id: None,
            operation: None,
        }
    }

    pub fn broker_publish<S: Into<String>>(message: S, topic: S, retryable: bool) -> Self {
        Self::BrokerPublish {
            message: message.into(),
            topic: topic.into(),
            retryable,
        }
    }

    pub fn processing<S: Into<String>>(
        message: S,
        event_id: Uuid,
        event_type: S,
        error_type: ProcessingErrorType,
    ) -> Self {
        Self::Processing {
            message: message.into(),
            event_id,
            event_type: event_type.into(),
            error_type,
        }
    }

    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

/// Result type for substrate operations.
pub type Result<T> = std::result::Result<T, SubstrateError>;

impl From<serde_json::Error> for SubstrateError {
    fn from(err: serde_json::Error) -> Self {
        SubstrateError::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<sqlx::Error> for SubstrateError {
    fn from(err: sqlx::Error) -> Self {
        SubstrateError::EventStore {
            message: err.to_string(),
            event_id: None,
            operation: None,
        }
    }
}

#[cfg(feature = "kafka")]
impl From<rdkafka::error::KafkaError> for SubstrateError {
    fn from(err: rdkafka::error::KafkaError) -> Self {
        SubstrateError::BrokerPublish {
            message: err.to_string(),
            topic: String::new(),
            retryable: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_severity() {
        let config_error = SubstrateError::configuration("test");
        assert_eq!(config_error.severity(), ErrorSeverity::High);

        let internal_error = SubstrateError::internal("test");
        assert_eq!(internal_error.severity(), ErrorSeverity::Critical);
    }

    #[test]
    fn test_schema_invalid_not_retryable() {
        let err = SubstrateError::schema_invalid("bad json", None);
        assert!(!err.is_retryable());
        assert_eq!(err.category(), "schema_invalid");
    }

    #[test]
    fn test_rate_limited_is_retryable() {
        let err = SubstrateError::RateLimited {
            tenant_id: "t1".to_string(),
            retry_after_secs: 1.0,
        };
        assert!(err.is_retryable());
        assert_eq!(err.category(), "rate_limited");
    }

    #[test]
    fn test_duplicate_event_not_retryable() {
        let err = SubstrateError::DuplicateEvent {
            event_id: Uuid::new_v4(),
            worker_type: "intake".to_string(),
        };
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_processing_error_type_display() {
        assert_eq!(ProcessingErrorType::ValidationError.to_string(), "validation_error");
        assert_eq!(ProcessingErrorType::DatabaseError.to_string(), "database_error");
    }

    #[test]
    fn test_error_severity_ordering() {
        assert!(ErrorSeverity::Low < ErrorSeverity::Medium);
        assert!(ErrorSeverity::Medium < ErrorSeverity::High);
        assert!(ErrorSeverity::High < ErrorSeverity::Critical);
    }

    #[test]
    fn test_json_error_conversion() {
        let json_error =
            serde_json::Error::syntax(serde_json::error::ErrorCode::ExpectedColon, 1, 1);
        let substrate_error: SubstrateError = json_error.into();
        assert!(matches!(substrate_error, SubstrateError::Serialization { .. }));
    }
}
