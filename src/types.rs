//! # Substrate Types
//!
//! Shared enums and small value types used across the event store, worker
//! framework, and retry/DLQ subsystem.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// The seven worker types the reference pipeline runs. `WORKER_TYPE`
/// selects exactly one of these per process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerType {
    Intake,
    Triage,
    Policy,
    Playbook,
    Tool,
    Feedback,
    SlaMonitor,
}

impl WorkerType {
    /// Parse from the lowercase string used in `WORKER_TYPE` and topic
    /// suffixes (e.g. `"sla_monitor"`).
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "intake" => Some(Self::Intake),
            "triage" => Some(Self::Triage),
            "policy" => Some(Self::Policy),
            "playbook" => Some(Self::Playbook),
            "tool" => Some(Self::Tool),
            "feedback" => Some(Self::Feedback),
            "sla_monitor" => Some(Self::SlaMonitor),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Intake => "intake",
            Self::Triage => "triage",
            Self::Policy => "policy",
            Self::Playbook => "playbook",
            Self::Tool => "tool",
            Self::Feedback => "feedback",
            Self::SlaMonitor => "sla_monitor",
        }
    }

    /// Default health-check port for this worker type, per the reference
    /// deployment's port map. Unrecognized types (not reachable through
    /// `parse`) would fall back to 9000.
    pub fn default_health_port(&self) -> u16 {
        match self {
            Self::Intake => 9001,
            Self::Triage => 9002,
            Self::Policy => 9003,
            Self::Playbook => 9004,
            Self::Tool => 9005,
            Self::Feedback => 9006,
            Self::SlaMonitor => 9007,
        }
    }

    pub fn all() -> [WorkerType; 7] {
        [
            Self::Intake,
            Self::Triage,
            Self::Policy,
            Self::Playbook,
            Self::Tool,
            Self::Feedback,
            Self::SlaMonitor,
        ]
    }
}

impl fmt::Display for WorkerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Status of a row in the idempotency ledger (`event_processing`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    Processing,
    Completed,
    Failed,
}

impl fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessingStatus::Processing => write!(f, "processing"),
            ProcessingStatus::Completed => write!(f, "completed"),
            ProcessingStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Operator-managed lifecycle status of a dead-letter entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DlqStatus {
    Pending,
    Retrying,
    Succeeded,
    Discarded,
}

impl fmt::Display for DlqStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DlqStatus::Pending => write!(f, "pending"),
            DlqStatus::Retrying => write!(f, "retrying"),
            DlqStatus::Succeeded => write!(f, "succeeded"),
            DlqStatus::Discarded => write!(f, "discarded"),
        }
    }
}

/// Health check status reported by `/healthz`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
    Unknown,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Degraded => write!(f, "degraded"),
            HealthStatus::Unhealthy => write!(f, "unhealthy"),
            HealthStatus::Unknown => write!(f, "unknown"),
        }
    }
}

/// Component-level health, reported by the broker and surfaced in
/// `/healthz` responses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub component: String,
    pub status: HealthStatus,
    pub last_check: DateTime<Utc>,
    pub details: HashMap<String, String>,
}

/// Pagination parameters shared by the audit query service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub page: u32,
    pub page_size: u32,
}

impl Default for Page {
    fn default() -> Self {
        Self {
            page: 1,
            page_size: 50,
        }
    }
}

impl Page {
    pub fn offset(&self) -> i64 {
        (self.page.saturating_sub(1) as i64) * self.page_size as i64
    }

    pub fn limit(&self) -> i64 {
        self.page_size as i64
    }
}

/// A page of results plus enough metadata to compute further pages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PagedResult<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub page: u32,
    pub page_size: u32,
    pub total_pages: u32,
}

impl<T> PagedResult<T> {
    pub fn new(items: Vec<T>, total: i64, page: Page) -> Self {
        let total_pages = if page.page_size == 0 {
            0
        } else {
            ((total as f64) / (page.page_size as f64)).ceil() as u32
        };
        Self {
            items,
            total,
            page: page.page,
            page_size: page.page_size,
            total_pages,
        }
    }
}

/// Optional filters accepted by `by_tenant`/`by_exception` queries.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventQueryFilter {
    pub event_type: Option<String>,
    pub exception_id: Option<String>,
    pub correlation_id: Option<String>,
    pub from_timestamp: Option<DateTime<Utc>>,
    pub to_timestamp: Option<DateTime<Utc>>,
    pub version: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_type_parse_roundtrip() {
        for wt in WorkerType::all() {
            assert_eq!(WorkerType::parse(wt.as_str()), Some(wt));
        }
        assert_eq!(WorkerType::parse("bogus"), None);
    }

    #[test]
    fn test_worker_type_ports() {
        assert_eq!(WorkerType::Intake.default_health_port(), 9001);
        assert_eq!(WorkerType::SlaMonitor.default_health_port(), 9007);
    }

    #[test]
    fn test_page_offset_limit() {
        let p = Page {
            page: 3,
            page_size: 20,
        };
        assert_eq!(p.offset(), 40);
        assert_eq!(p.limit(), 20);
    }

    #[test]
    fn test_paged_result_total_pages() {
        let result: PagedResult<i32> = PagedResult::new(
            vec![1, 2],
            45,
            Page {
                page: 1,
                page_size: 20,
            },
        );
        assert_eq!(result.total_pages, 3);
    }

    #[test]
    fn test_processing_status_display() {
        assert_eq!(ProcessingStatus::Completed.to_string(), "completed");
    }
}
