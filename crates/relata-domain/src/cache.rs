//! Content-addressed cache of check decisions.
//!
//! Keys are the canonical string form of a check request hashed with
//! xxh64 and rendered as hex. Because the canonical form carries the
//! schema version and snapshot token, advancing either produces fresh
//! keys; no explicit invalidation is needed. Only terminal decisions are
//! stored, and racing writers overwrite idempotently since the decision
//! is deterministic for a given key.

use async_trait::async_trait;
use moka::future::Cache;
use xxhash_rust::xxh64::xxh64;

use crate::engine::{CheckRequest, Decision};

/// Builds the cache key for a check request. The request must carry its
/// resolved snapshot token and schema version; the depth budget is not
/// part of the identity.
pub fn cache_key(request: &CheckRequest) -> String {
    let canonical = format!(
        "check_{}_{}:{}:{}#{}@{}",
        request.tenant_id,
        request.schema_version.as_deref().unwrap_or_default(),
        request.snap_token.as_deref().unwrap_or_default(),
        request.entity,
        request.permission,
        request.subject,
    );
    format!("{:016x}", xxh64(canonical.as_bytes(), 0))
}

/// Cache of terminal check decisions.
#[async_trait]
pub trait CheckResultCache: Send + Sync {
    async fn get(&self, request: &CheckRequest) -> Option<Decision>;
    async fn set(&self, request: &CheckRequest, decision: Decision);
}

/// Configuration for [`MokaCheckCache`].
#[derive(Debug, Clone)]
pub struct CheckCacheConfig {
    /// Maximum number of cached decisions.
    pub max_capacity: u64,
}

impl Default for CheckCacheConfig {
    fn default() -> Self {
        Self {
            max_capacity: 100_000,
        }
    }
}

impl CheckCacheConfig {
    pub fn with_max_capacity(mut self, max_capacity: u64) -> Self {
        self.max_capacity = max_capacity;
        self
    }
}

/// Size-bounded concurrent cache backed by moka (TinyLFU eviction).
pub struct MokaCheckCache {
    cache: Cache<String, Decision>,
}

impl MokaCheckCache {
    pub fn new(config: CheckCacheConfig) -> Self {
        Self {
            cache: Cache::builder().max_capacity(config.max_capacity).build(),
        }
    }
}

impl Default for MokaCheckCache {
    fn default() -> Self {
        Self::new(CheckCacheConfig::default())
    }
}

#[async_trait]
impl CheckResultCache for MokaCheckCache {
    async fn get(&self, request: &CheckRequest) -> Option<Decision> {
        self.cache.get(&cache_key(request)).await
    }

    async fn set(&self, request: &CheckRequest, decision: Decision) {
        self.cache.insert(cache_key(request), decision).await;
    }
}

/// Cache that never hits, for disabling caching behind the same
/// interface.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCheckCache;

#[async_trait]
impl CheckResultCache for NoopCheckCache {
    async fn get(&self, _request: &CheckRequest) -> Option<Decision> {
        None
    }

    async fn set(&self, _request: &CheckRequest, _decision: Decision) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tuple::{Entity, Subject};

    fn request(snap: &str) -> CheckRequest {
        CheckRequest::new(
            "t1",
            Entity::new("doc", "1"),
            "read",
            Subject::concrete("user", "1"),
        )
        .with_snap_token(snap)
        .with_schema_version("v1")
    }

    #[test]
    fn key_depends_on_snapshot_and_version() {
        let base = request("s1");
        assert_eq!(cache_key(&base), cache_key(&base.clone()));
        assert_ne!(cache_key(&base), cache_key(&request("s2")));
        assert_ne!(
            cache_key(&base),
            cache_key(&request("s1").with_schema_version("v2"))
        );
    }

    #[test]
    fn key_ignores_depth() {
        let shallow = request("s1").with_depth(3);
        let deep = request("s1").with_depth(50);
        assert_eq!(cache_key(&shallow), cache_key(&deep));
    }

    #[tokio::test]
    async fn moka_cache_round_trips() {
        let cache = MokaCheckCache::default();
        let req = request("s1");
        assert_eq!(cache.get(&req).await, None);
        cache.set(&req, Decision::Allowed).await;
        assert_eq!(cache.get(&req).await, Some(Decision::Allowed));
    }

    #[tokio::test]
    async fn noop_cache_never_hits() {
        let cache = NoopCheckCache;
        let req = request("s1");
        cache.set(&req, Decision::Allowed).await;
        assert_eq!(cache.get(&req).await, None);
    }
}
