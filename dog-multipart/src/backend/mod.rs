pub mod memory;
#[cfg(feature = "redis")]
pub mod redis;

use async_trait::async_trait;
use std::time::Duration;

use crate::MultipartResult;

/// Key-value/list primitives backing the part registry.
///
/// Every method must be atomic on the backing store: concurrent appends to
/// one key may interleave but never lose a value.
#[async_trait]
pub trait RegistryBackend: Send + Sync {
    /// Append `value` to the list at `key` and reset its TTL, as one atomic step
    async fn append_with_ttl(
        &self,
        key: &str,
        value: String,
        ttl: Duration,
    ) -> MultipartResult<()>;

    /// All values of the list at `key` in insertion order; empty when absent
    async fn range_all(&self, key: &str) -> MultipartResult<Vec<String>>;

    /// Delete `key`; succeeds when it does not exist
    async fn delete(&self, key: &str) -> MultipartResult<()>;

    /// Set `key` to `value` with a TTL only if `key` is absent. Returns whether it was set.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> MultipartResult<bool>;

    /// Delete `key` only if it currently holds `value`. Returns whether it was deleted.
    async fn delete_if_equals(&self, key: &str, value: &str) -> MultipartResult<bool>;

    /// Reset the TTL of `key` only if it currently holds `value`. Returns whether it was
    /// extended.
    async fn extend_if_equals(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> MultipartResult<bool>;
}
