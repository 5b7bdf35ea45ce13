//! Property-based tests for the invariants enumerated for this substrate:
//! partition-key determinism, the correlation-id derivation rule, wire
//! round-tripping, and token-bucket bounds.

use std::collections::HashMap;
use std::time::Duration;

use proptest::prelude::*;
use serde_json::json;

use event_substrate::events::CanonicalEvent;
use event_substrate::partitioning::{partition_for, partition_key, partition_number};
use event_substrate::rate_limiter::{PerTenantRateLimiter, TenantRateLimit};

fn tenant_id_strategy() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9_-]{1,24}"
}

fn exception_id_strategy() -> impl Strategy<Value = Option<String>> {
    proptest::option::of("[a-zA-Z0-9_-]{1,24}")
}

proptest! {
    /// `partition_key`/`partition_number` are pure functions of their
    /// inputs: calling them twice with the same arguments always agrees,
    /// and the resulting partition number is always in range.
    #[test]
    fn partition_is_deterministic_and_in_range(
        tenant in tenant_id_strategy(),
        exception in exception_id_strategy(),
        num_partitions in 1u32..10_000,
    ) {
        let (key_a, n_a) = partition_for(&tenant, exception.as_deref(), num_partitions).unwrap();
        let (key_b, n_b) = partition_for(&tenant, exception.as_deref(), num_partitions).unwrap();
        prop_assert_eq!(&key_a, &key_b);
        prop_assert_eq!(n_a, n_b);
        prop_assert!(n_a < num_partitions);

        let direct_key = partition_key(&tenant, exception.as_deref()).unwrap();
        let direct_n = partition_number(&direct_key, num_partitions).unwrap();
        prop_assert_eq!(direct_n, n_a);
    }

    /// Same `(tenant, exception)` pair always resolves to the same
    /// partition number across an arbitrary partition count, and two
    /// inputs differing only in exception_id never collapse to the same
    /// partition key.
    #[test]
    fn same_exception_same_partition(
        tenant in tenant_id_strategy(),
        exception_a in "[a-zA-Z0-9_-]{1,24}",
        exception_b in "[a-zA-Z0-9_-]{1,24}",
        num_partitions in 1u32..10_000,
    ) {
        prop_assume!(exception_a != exception_b);
        let (key_a, _) = partition_for(&tenant, Some(&exception_a), num_partitions).unwrap();
        let (key_b, _) = partition_for(&tenant, Some(&exception_b), num_partitions).unwrap();
        prop_assert_ne!(key_a, key_b);
    }

    /// `correlation_id` always lands in `{exception_id, event_id}`, and
    /// `metadata.correlation_id` always mirrors it, for any combination of
    /// optional exception_id / explicit correlation_id.
    #[test]
    fn correlation_id_invariant_holds(
        tenant in tenant_id_strategy(),
        exception in exception_id_strategy(),
        explicit_correlation in proptest::option::of("[a-zA-Z0-9_-]{1,24}"),
    ) {
        let event = CanonicalEvent::create(
            "ExceptionIngested",
            tenant,
            json!({"k": "v"}),
            exception.clone(),
            explicit_correlation.clone(),
            None,
            None,
            None,
            None,
        )
        .unwrap();

        let expected = explicit_correlation
            .or(exception)
            .unwrap_or_else(|| event.event_id.to_string());
        prop_assert_eq!(&event.correlation_id, &expected);
        prop_assert_eq!(
            event.metadata.get("correlation_id").and_then(|v| v.as_str()),
            Some(event.correlation_id.as_str())
        );
    }

    /// Serializing a canonical event to wire bytes and deserializing it
    /// back always reproduces the original value.
    #[test]
    fn event_round_trips_through_wire_bytes(
        tenant in tenant_id_strategy(),
        event_type in "[A-Za-z]{3,20}",
        exception in exception_id_strategy(),
        payload_value in "[a-zA-Z0-9 ]{0,40}",
    ) {
        let mut metadata = HashMap::new();
        metadata.insert("source".to_string(), json!("property-test"));

        let original = CanonicalEvent::create(
            event_type,
            tenant,
            json!({"value": payload_value}),
            exception,
            None,
            Some(metadata),
            None,
            None,
            None,
        )
        .unwrap();

        let bytes = original.to_bytes().unwrap();
        let restored = CanonicalEvent::from_bytes(&bytes).unwrap();
        prop_assert_eq!(original, restored);
    }

    /// A tenant's token count never exceeds its burst size, regardless of
    /// how many requests were made or how much time elapsed.
    #[test]
    fn token_bucket_never_exceeds_burst_size(
        burst_size in 1u32..50,
        events_per_second in 1.0f64..500.0,
        num_checks in 0usize..20,
    ) {
        let limiter = PerTenantRateLimiter::new(TenantRateLimit {
            events_per_second,
            events_per_minute: events_per_second * 60.0,
            burst_size,
        });
        std::thread::sleep(Duration::from_millis(2));
        for _ in 0..num_checks {
            let _ = limiter.check_rate_limit("tenant-under-test", 1);
        }
        let stats = limiter.get_tenant_stats("tenant-under-test");
        prop_assert!(stats.current_tokens >= 0.0);
        prop_assert!(stats.current_tokens <= burst_size as f64 + 1e-9);
    }
}
