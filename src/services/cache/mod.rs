// Result cache and single-flight deduplication.
//
// The cache is an optimization, never a source of truth: when the backing
// store is unreachable the gateway keeps serving as if the cache were
// empty.

pub mod fingerprint;
pub mod single_flight;
pub mod store;

pub use fingerprint::fingerprint;
pub use store::{CacheStore, MemoryCacheStore, RedisCacheStore};

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::time::Instant;

use crate::models::QueryResult;
use crate::utils::{ApiError, ApiResult};

use single_flight::{Flight, FlightOutcome, InflightMap};

/// What a follower does when the leader outlives the wait window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CoalesceFallback {
    /// Execute the query itself after the timeout.
    #[default]
    Promote,
    /// Surface a coalesce-timeout error.
    Fail,
}

impl CoalesceFallback {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "fail" => CoalesceFallback::Fail,
            _ => CoalesceFallback::Promote,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub default_ttl: Duration,
    pub lock_ttl: Duration,
    pub wait_timeout: Duration,
    pub poll_interval: Duration,
    pub error_sentinel_ttl: Duration,
    pub value_max_bytes: usize,
    pub fallback: CoalesceFallback,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(60),
            lock_ttl: Duration::from_secs(30),
            wait_timeout: Duration::from_secs(10),
            poll_interval: Duration::from_millis(50),
            error_sentinel_ttl: Duration::from_secs(5),
            value_max_bytes: 5 * 1024 * 1024,
            fallback: CoalesceFallback::Promote,
        }
    }
}

const SENTINEL_KEY: &str = "__flight_error";

enum Decoded {
    Result(Box<QueryResult>),
    Sentinel(ApiError),
    Garbage,
}

fn decode(bytes: &[u8]) -> Decoded {
    if let Ok(value) = serde_json::from_slice::<Value>(bytes) {
        if let Some(err) = value.get(SENTINEL_KEY) {
            let code = err["code"].as_str().unwrap_or("ERR_INTERNAL");
            let message = err["message"].as_str().unwrap_or("upstream execution failed");
            return Decoded::Sentinel(ApiError::with_kind(
                crate::utils::ErrorKind::from_code(code),
                message,
            ));
        }
        if let Ok(result) = serde_json::from_value::<QueryResult>(value) {
            return Decoded::Result(Box::new(result));
        }
    }
    Decoded::Garbage
}

fn encode_sentinel(err: &ApiError) -> Vec<u8> {
    serde_json::json!({
        "__flight_error": { "code": err.code(), "message": err.message }
    })
    .to_string()
    .into_bytes()
}

/// Tenant-scoped result cache with at-most-one concurrent execution per
/// fingerprint.
///
/// With a backing store, coalescing uses the distributed lock protocol;
/// without one, an in-process flight map provides the same semantics minus
/// cross-request reuse.
pub struct QueryCache {
    store: Option<Arc<dyn CacheStore>>,
    inflight: InflightMap,
    settings: CacheSettings,
}

impl QueryCache {
    pub fn new(store: Option<Arc<dyn CacheStore>>, settings: CacheSettings) -> Self {
        Self { store, inflight: InflightMap::new(), settings }
    }

    pub fn settings(&self) -> &CacheSettings {
        &self.settings
    }

    /// Serves the fingerprint from cache, an in-flight leader, or by
    /// executing. Returns the result and whether it was a cache hit.
    pub async fn get_or_execute<F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        no_cache: bool,
        exec: F,
    ) -> ApiResult<(QueryResult, bool)>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ApiResult<QueryResult>>,
    {
        if no_cache {
            return Ok((exec().await?, false));
        }

        match &self.store {
            Some(store) => self.run_with_store(store.clone(), key, ttl, exec).await,
            None => self.run_in_process(key, exec).await,
        }
    }

    async fn run_with_store<F, Fut>(
        &self,
        store: Arc<dyn CacheStore>,
        key: &str,
        ttl: Duration,
        exec: F,
    ) -> ApiResult<(QueryResult, bool)>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ApiResult<QueryResult>>,
    {
        // 1. Plain lookup. A sentinel here is treated as a miss: the failed
        //    leader is gone and this caller may retry the query.
        match store.get(key).await {
            Ok(Some(bytes)) => {
                if let Decoded::Result(result) = decode(&bytes) {
                    return Ok((*result, true));
                }
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!("Cache lookup failed, bypassing cache: {}", e);
                return Ok((exec().await?, false));
            }
        }

        // 2. Race for the lock.
        let owner = uuid::Uuid::new_v4().to_string();
        match store.acquire_lock(key, &owner, self.settings.lock_ttl).await {
            Ok(true) => self.lead(store, key, &owner, ttl, exec).await,
            Ok(false) => self.follow(store, key, ttl, exec).await,
            Err(e) => {
                tracing::warn!("Cache lock failed, bypassing cache: {}", e);
                Ok((exec().await?, false))
            }
        }
    }

    async fn lead<F, Fut>(
        &self,
        store: Arc<dyn CacheStore>,
        key: &str,
        owner: &str,
        ttl: Duration,
        exec: F,
    ) -> ApiResult<(QueryResult, bool)>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ApiResult<QueryResult>>,
    {
        // Another leader may have finished between lookup and lock.
        if let Ok(Some(bytes)) = store.get(key).await {
            if let Decoded::Result(result) = decode(&bytes) {
                let _ = store.release_lock(key, owner).await;
                return Ok((*result, true));
            }
        }

        match exec().await {
            Ok(result) => {
                self.store_result(&store, key, &result, ttl).await;
                let _ = store.release_lock(key, owner).await;
                Ok((result, false))
            }
            Err(err) => {
                // Propagate the failure to followers so they do not starve.
                let _ = store
                    .set_with_ttl(key, &encode_sentinel(&err), self.settings.error_sentinel_ttl)
                    .await;
                let _ = store.release_lock(key, owner).await;
                Err(err)
            }
        }
    }

    async fn follow<F, Fut>(
        &self,
        store: Arc<dyn CacheStore>,
        key: &str,
        ttl: Duration,
        exec: F,
    ) -> ApiResult<(QueryResult, bool)>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ApiResult<QueryResult>>,
    {
        let deadline = Instant::now() + self.settings.wait_timeout;
        while Instant::now() < deadline {
            tokio::time::sleep(self.settings.poll_interval).await;
            match store.get(key).await {
                Ok(Some(bytes)) => match decode(&bytes) {
                    Decoded::Result(result) => return Ok((*result, true)),
                    Decoded::Sentinel(err) => return Err(err),
                    Decoded::Garbage => {}
                },
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!("Cache poll failed, bypassing cache: {}", e);
                    return Ok((exec().await?, false));
                }
            }
        }

        match self.settings.fallback {
            CoalesceFallback::Promote => {
                tracing::debug!(
                    "Follower promoted to leader after wait timeout for {}",
                    &key[..key.len().min(12)]
                );
                let result = exec().await?;
                self.store_result(&store, key, &result, ttl).await;
                Ok((result, false))
            }
            CoalesceFallback::Fail => Err(ApiError::coalesce_timeout(key)),
        }
    }

    async fn store_result(
        &self,
        store: &Arc<dyn CacheStore>,
        key: &str,
        result: &QueryResult,
        ttl: Duration,
    ) {
        match serde_json::to_vec(result) {
            Ok(bytes) if bytes.len() <= self.settings.value_max_bytes => {
                if let Err(e) = store.set_with_ttl(key, &bytes, ttl).await {
                    tracing::warn!("Cache store failed (continuing): {}", e);
                }
            }
            Ok(bytes) => {
                tracing::debug!(
                    "Result of {} bytes exceeds cache value cap, not stored",
                    bytes.len()
                );
            }
            Err(e) => tracing::warn!("Result serialization for cache failed: {}", e),
        }
    }

    async fn run_in_process<F, Fut>(&self, key: &str, exec: F) -> ApiResult<(QueryResult, bool)>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ApiResult<QueryResult>>,
    {
        match self.inflight.begin(key) {
            // The guard retires the entry if this future is dropped before
            // the outcome is published, so followers never wait on an
            // abandoned leader.
            Flight::Leader(guard) => match exec().await {
                Ok(result) => {
                    guard.finish(FlightOutcome::Ready(result.clone()));
                    Ok((result, false))
                }
                Err(err) => {
                    guard.finish(FlightOutcome::from_error(&err));
                    Err(err)
                }
            },
            Flight::Follower(mut rx) => {
                let waited = tokio::time::timeout(self.settings.wait_timeout, async {
                    loop {
                        if let Some(outcome) = rx.borrow().clone() {
                            return Some(outcome);
                        }
                        if rx.changed().await.is_err() {
                            // Leader dropped without publishing.
                            return rx.borrow().clone();
                        }
                    }
                })
                .await;

                match waited {
                    Ok(Some(outcome)) => outcome.into_result().map(|r| (r, false)),
                    Ok(None) | Err(_) => match self.settings.fallback {
                        CoalesceFallback::Promote => Ok((exec().await?, false)),
                        CoalesceFallback::Fail => Err(ApiError::coalesce_timeout(key)),
                    },
                }
            }
        }
    }
}
