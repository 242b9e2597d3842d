use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use redis::AsyncCommands;

use crate::utils::{ApiError, ApiResult};

/// Storage primitives the cache layer needs. Any backend that offers these
/// five operations suffices; values are opaque byte strings.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> ApiResult<Option<Vec<u8>>>;

    async fn set_with_ttl(&self, key: &str, value: &[u8], ttl: Duration) -> ApiResult<()>;

    async fn del(&self, key: &str) -> ApiResult<()>;

    /// Returns true when this owner now holds the lock.
    async fn acquire_lock(&self, key: &str, owner: &str, ttl: Duration) -> ApiResult<bool>;

    /// Releases the lock if this owner still holds it.
    async fn release_lock(&self, key: &str, owner: &str) -> ApiResult<()>;
}

/// In-process store over a concurrent map with expiry stamps. Used on its
/// own in single-binary deployments and as the test double everywhere.
#[derive(Default)]
pub struct MemoryCacheStore {
    entries: DashMap<String, (Vec<u8>, Instant)>,
    locks: DashMap<String, (String, Instant)>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get(&self, key: &str) -> ApiResult<Option<Vec<u8>>> {
        if let Some(entry) = self.entries.get(key) {
            let (value, expires_at) = entry.value();
            if Instant::now() < *expires_at {
                return Ok(Some(value.clone()));
            }
        }
        // Expired entries are dropped on the read path.
        self.entries.remove_if(key, |_, (_, expires_at)| Instant::now() >= *expires_at);
        Ok(None)
    }

    async fn set_with_ttl(&self, key: &str, value: &[u8], ttl: Duration) -> ApiResult<()> {
        self.entries
            .insert(key.to_string(), (value.to_vec(), Instant::now() + ttl));
        Ok(())
    }

    async fn del(&self, key: &str) -> ApiResult<()> {
        self.entries.remove(key);
        Ok(())
    }

    async fn acquire_lock(&self, key: &str, owner: &str, ttl: Duration) -> ApiResult<bool> {
        let now = Instant::now();
        match self.locks.entry(key.to_string()) {
            dashmap::Entry::Occupied(mut occupied) => {
                let (holder, expires_at) = occupied.get_mut();
                // Expired locks are taken over; re-acquiring one this owner
                // already holds extends it.
                if now >= *expires_at || holder.as_str() == owner {
                    *holder = owner.to_string();
                    *expires_at = now + ttl;
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            dashmap::Entry::Vacant(vacant) => {
                vacant.insert((owner.to_string(), now + ttl));
                Ok(true)
            }
        }
    }

    async fn release_lock(&self, key: &str, owner: &str) -> ApiResult<()> {
        self.locks.remove_if(key, |_, (holder, _)| holder.as_str() == owner);
        Ok(())
    }
}

/// Networked KV store over Redis. Lock acquisition maps to `SET NX PX`.
pub struct RedisCacheStore {
    client: redis::Client,
}

impl RedisCacheStore {
    pub fn new(url: &str) -> ApiResult<Self> {
        let client =
            redis::Client::open(url).map_err(|e| ApiError::cache_unavailable(e))?;
        Ok(Self { client })
    }

    async fn conn(&self) -> ApiResult<redis::aio::MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(ApiError::cache_unavailable)
    }
}

#[async_trait]
impl CacheStore for RedisCacheStore {
    async fn get(&self, key: &str) -> ApiResult<Option<Vec<u8>>> {
        let mut conn = self.conn().await?;
        conn.get(key).await.map_err(ApiError::cache_unavailable)
    }

    async fn set_with_ttl(&self, key: &str, value: &[u8], ttl: Duration) -> ApiResult<()> {
        let mut conn = self.conn().await?;
        conn.set_ex(key, value, ttl.as_secs().max(1))
            .await
            .map_err(ApiError::cache_unavailable)
    }

    async fn del(&self, key: &str) -> ApiResult<()> {
        let mut conn = self.conn().await?;
        conn.del(key).await.map_err(ApiError::cache_unavailable)
    }

    async fn acquire_lock(&self, key: &str, owner: &str, ttl: Duration) -> ApiResult<bool> {
        let mut conn = self.conn().await?;
        let lock_key = format!("{key}:lock");
        let response: Option<String> = redis::cmd("SET")
            .arg(&lock_key)
            .arg(owner)
            .arg("NX")
            .arg("PX")
            .arg(ttl.as_millis() as u64)
            .query_async(&mut conn)
            .await
            .map_err(ApiError::cache_unavailable)?;
        Ok(response.is_some())
    }

    async fn release_lock(&self, key: &str, owner: &str) -> ApiResult<()> {
        let mut conn = self.conn().await?;
        let lock_key = format!("{key}:lock");
        // Owner check then delete; the lock TTL bounds the stale window of
        // the non-atomic pair.
        let holder: Option<String> =
            conn.get(&lock_key).await.map_err(ApiError::cache_unavailable)?;
        if holder.as_deref() == Some(owner) {
            let _: () = conn.del(&lock_key).await.map_err(ApiError::cache_unavailable)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_store_roundtrip_and_ttl() {
        let store = MemoryCacheStore::new();
        store
            .set_with_ttl("k", b"value", Duration::from_millis(40))
            .await
            .expect("set failed");
        assert_eq!(store.get("k").await.expect("get failed"), Some(b"value".to_vec()));

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(store.get("k").await.expect("get failed"), None);
    }

    #[tokio::test]
    async fn test_memory_lock_is_exclusive_until_released() {
        let store = MemoryCacheStore::new();
        let ttl = Duration::from_secs(5);
        assert!(store.acquire_lock("k", "a", ttl).await.expect("acquire failed"));
        assert!(!store.acquire_lock("k", "b", ttl).await.expect("acquire failed"));

        // Releasing with the wrong owner is a no-op.
        store.release_lock("k", "b").await.expect("release failed");
        assert!(!store.acquire_lock("k", "b", ttl).await.expect("acquire failed"));

        store.release_lock("k", "a").await.expect("release failed");
        assert!(store.acquire_lock("k", "b", ttl).await.expect("acquire failed"));
    }

    #[tokio::test]
    async fn test_memory_lock_expires() {
        let store = MemoryCacheStore::new();
        assert!(store
            .acquire_lock("k", "a", Duration::from_millis(30))
            .await
            .expect("acquire failed"));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(store
            .acquire_lock("k", "b", Duration::from_secs(5))
            .await
            .expect("acquire failed"));
    }
}
