//! # Per-Tenant Rate Limiter
//!
//! A token-bucket limiter keyed by tenant. State is process-local and
//! in-memory only: the sum of per-pod limits can exceed a tenant's intended
//! fleet-wide ceiling, which is an accepted limitation (see `SPEC_FULL.md`
//! §9) rather than a bug to fix here.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Per-tenant limit configuration. `burst_size` is the bucket capacity;
/// `events_per_second` is the refill rate. `events_per_minute` is kept for
/// operator-facing configuration/reporting but the check itself only uses
/// the per-second rate, matching the reference limiter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TenantRateLimit {
    pub events_per_second: f64,
    pub events_per_minute: f64,
    pub burst_size: u32,
}

impl Default for TenantRateLimit {
    fn default() -> Self {
        Self {
            events_per_second: 10.0,
            events_per_minute: 600.0,
            burst_size: 20,
        }
    }
}

impl TenantRateLimit {
    pub fn validate(&self) -> Result<(), String> {
        if self.events_per_second <= 0.0 {
            return Err("events_per_second must be > 0".to_string());
        }
        if self.events_per_minute <= 0.0 {
            return Err("events_per_minute must be > 0".to_string());
        }
        if self.burst_size < 1 {
            return Err("burst_size must be >= 1".to_string());
        }
        Ok(())
    }
}

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// Read-only projection of a tenant's current bucket state, for
/// diagnostics/metrics. Computing it never mutates stored state.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TenantRateStats {
    pub tenant_id_hash_present: bool,
    pub current_tokens: f64,
    pub burst_size: u32,
    pub events_per_second: f64,
}

/// Outcome of a rate-limit check. On denial, `wait_seconds` is the time
/// until enough tokens would be available; tokens are not consumed on
/// denial.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub wait_seconds: Option<f64>,
}

/// Token-bucket rate limiter, one bucket per tenant. Buckets are created
/// lazily on first check and start **full** (`tokens = burst_size`), so a
/// tenant's first `burst_size` consecutive calls are allowed before any
/// are denied.
pub struct PerTenantRateLimiter {
    default_limit: TenantRateLimit,
    overrides: DashMap<String, TenantRateLimit>,
    buckets: DashMap<String, BucketState>,
}

impl PerTenantRateLimiter {
    pub fn new(default_limit: TenantRateLimit) -> Self {
        Self {
            default_limit,
            overrides: DashMap::new(),
            buckets: DashMap::new(),
        }
    }

    /// Install a tenant-specific limit, overriding the process default for
    /// that tenant only.
    pub fn set_tenant_limit(&self, tenant_id: impl Into<String>, limit: TenantRateLimit) {
        self.overrides.insert(tenant_id.into(), limit);
    }

    fn limit_for(&self, tenant_id: &str) -> TenantRateLimit {
        self.overrides
            .get(tenant_id)
            .map(|r| *r)
            .unwrap_or(self.default_limit)
    }

    /// Check whether `num_events` may proceed for `tenant_id`, refilling
    /// the bucket first. On success, the consumed tokens are deducted; on
    /// denial, no tokens are consumed.
    pub fn check_rate_limit(&self, tenant_id: &str, num_events: u32) -> RateLimitDecision {
        let limit = self.limit_for(tenant_id);
        let now = Instant::now();
        let mut entry = self
            .buckets
            .entry(tenant_id.to_string())
            .or_insert_with(|| BucketState {
                tokens: limit.burst_size as f64,
                last_refill: now,
            });

        let elapsed = now.duration_since(entry.last_refill).as_secs_f64();
        entry.tokens = (entry.tokens + elapsed * limit.events_per_second)
            .min(limit.burst_size as f64);
        entry.last_refill = now;

        let requested = num_events as f64;
        if entry.tokens >= requested {
            entry.tokens -= requested;
            RateLimitDecision {
                allowed: true,
                wait_seconds: None,
            }
        } else {
            let wait = (requested - entry.tokens) / limit.events_per_second;
            RateLimitDecision {
                allowed: false,
                wait_seconds: Some(wait),
            }
        }
    }

    /// Pure, read-only projection of current bucket state for a tenant.
    /// Does not mutate stored state, even though it recomputes the refill.
    pub fn get_tenant_stats(&self, tenant_id: &str) -> TenantRateStats {
        let limit = self.limit_for(tenant_id);
        let now = Instant::now();
        match self.buckets.get(tenant_id) {
            Some(entry) => {
                let elapsed = now.duration_since(entry.last_refill).as_secs_f64();
                let projected = (entry.tokens + elapsed * limit.events_per_second)
                    .min(limit.burst_size as f64);
                TenantRateStats {
                    tenant_id_hash_present: true,
                    current_tokens: projected,
                    burst_size: limit.burst_size,
                    events_per_second: limit.events_per_second,
                }
            }
            None => TenantRateStats {
                tenant_id_hash_present: false,
                current_tokens: 0.0,
                burst_size: limit.burst_size,
                events_per_second: limit.events_per_second,
            },
        }
    }
}
