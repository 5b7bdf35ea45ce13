//! # Deterministic Partitioning
//!
//! Derives a broker partition key and partition number from `(tenant_id,
//! exception_id)` so that all events concerning the same exception — and,
//! failing that, the same tenant — land on the same partition and are
//! observed by consumers in publish order.

use md5::{Digest, Md5};

use crate::error::{Result, SubstrateError};

/// Builds the partition key string. When `exception_id` is present and
/// non-blank the key is `"{tenant_id}:{exception_id}"`; otherwise it is
/// `tenant_id` alone. `tenant_id` must be non-empty.
pub fn partition_key(tenant_id: &str, exception_id: Option<&str>) -> Result<String> {
    if tenant_id.trim().is_empty() {
        return Err(SubstrateError::internal(
            "partition_key requires a non-empty tenant_id",
        ));
    }
    match exception_id.map(str::trim).filter(|s| !s.is_empty()) {
        Some(exc) => Ok(format!("{tenant_id}:{exc}")),
        None => Ok(tenant_id.to_string()),
    }
}

/// Hashes `key` with MD5, takes the first 8 hex characters of the digest,
/// parses them as a base-16 integer, and reduces modulo `num_partitions`.
///
/// MD5 is used here purely as a stable, language-agnostic string hash for
/// partition assignment — not for any security property — so that this
/// scheme stays reproducible against other implementations of the same
/// partitioning contract.
pub fn partition_number(key: &str, num_partitions: u32) -> Result<u32> {
    if num_partitions == 0 {
        return Err(SubstrateError::internal(
            "num_partitions must be greater than zero",
        ));
    }
    let mut hasher = Md5::new();
    hasher.update(key.as_bytes());
    let digest = hasher.finalize();
    let hex = format!("{digest:x}");
    let prefix = &hex[0..8];
    let value = u32::from_str_radix(prefix, 16)
        .map_err(|e| SubstrateError::internal(format!("failed to parse partition hash: {e}")))?;
    Ok(value % num_partitions)
}

/// Convenience wrapper computing both the key and the partition number.
pub fn partition_for(
    tenant_id: &str,
    exception_id: Option<&str>,
    num_partitions: u32,
) -> Result<(String, u32)> {
    let key = partition_key(tenant_id, exception_id)?;
    let number = partition_number(&key, num_partitions)?;
    Ok((key, number))
}
