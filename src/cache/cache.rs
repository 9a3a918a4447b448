//! Typed cache access.
//!
//! Values are stored as JSON strings with an optional TTL. Callers treat every
//! error as a miss; the cache never decides correctness.

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use super::error::CacheResult;

#[async_trait]
pub trait Cache<T>: Send + Sync
where
    T: Serialize + DeserializeOwned + Send + Sync,
{
    async fn get(&self, key: &str) -> CacheResult<Option<T>>;

    async fn set(&self, key: &str, value: &T, ttl: Option<Duration>) -> CacheResult<()>;

    /// Returns whether a value was removed.
    async fn delete(&self, key: &str) -> CacheResult<bool>;
}

#[cfg(feature = "cache")]
pub use redis_backend::RedisCache;

#[cfg(feature = "cache")]
mod redis_backend {
    use super::*;
    use crate::cache::error::CacheError;
    use crate::cache::RedisPool;
    use bb8::PooledConnection;
    use bb8_redis::RedisConnectionManager;
    use redis::AsyncCommands;

    #[derive(Clone)]
    pub struct RedisCache {
        pool: RedisPool,
    }

    impl RedisCache {
        pub fn new(pool: RedisPool) -> Self {
            Self { pool }
        }

        pub fn pool(&self) -> &RedisPool {
            &self.pool
        }

        pub async fn get_connection(
            &self,
        ) -> CacheResult<PooledConnection<'_, RedisConnectionManager>> {
            self.pool.get().await.map_err(CacheError::from)
        }
    }

    #[async_trait]
    impl<T> Cache<T> for RedisCache
    where
        T: Serialize + DeserializeOwned + Send + Sync,
    {
        async fn get(&self, key: &str) -> CacheResult<Option<T>> {
            let mut conn = self.get_connection().await?;
            let raw: Option<String> = conn.get(key).await?;
            match raw {
                Some(json) => Ok(Some(serde_json::from_str(&json)?)),
                None => Ok(None),
            }
        }

        async fn set(&self, key: &str, value: &T, ttl: Option<Duration>) -> CacheResult<()> {
            let json = serde_json::to_string(value)?;
            let mut conn = self.get_connection().await?;
            match ttl {
                Some(ttl) => {
                    let secs = ttl.as_secs().max(1);
                    let _: () = conn.set_ex(key, json, secs).await?;
                }
                None => {
                    let _: () = conn.set(key, json).await?;
                }
            }
            Ok(())
        }

        async fn delete(&self, key: &str) -> CacheResult<bool> {
            let mut conn = self.get_connection().await?;
            let removed: i64 = conn.del(key).await?;
            Ok(removed > 0)
        }
    }
}

/// Process-local cache for tests and single-node development.
#[derive(Clone, Default)]
pub struct InMemoryCache {
    entries: Arc<Mutex<HashMap<String, (String, Option<Instant>)>>>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        let now = Instant::now();
        let entries = self.entries.lock().await;
        entries
            .values()
            .filter(|(_, expires)| expires.map_or(true, |at| at > now))
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl<T> Cache<T> for InMemoryCache
where
    T: Serialize + DeserializeOwned + Send + Sync,
{
    async fn get(&self, key: &str) -> CacheResult<Option<T>> {
        let mut entries = self.entries.lock().await;
        let expired = match entries.get(key) {
            Some((_, Some(at))) => *at <= Instant::now(),
            Some((_, None)) => false,
            None => return Ok(None),
        };
        if expired {
            entries.remove(key);
            return Ok(None);
        }
        match entries.get(key) {
            Some((json, _)) => Ok(Some(serde_json::from_str(json)?)),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &T, ttl: Option<Duration>) -> CacheResult<()> {
        let json = serde_json::to_string(value)?;
        let expires = ttl.map(|ttl| Instant::now() + ttl);
        self.entries
            .lock()
            .await
            .insert(key.to_string(), (json, expires));
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        Ok(self.entries.lock().await.remove(key).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_round_trip_and_delete() {
        let cache = InMemoryCache::new();
        Cache::<Vec<u32>>::set(&cache, "k", &vec![1, 2, 3], None)
            .await
            .unwrap();

        let value: Option<Vec<u32>> = cache.get("k").await.unwrap();
        assert_eq!(value, Some(vec![1, 2, 3]));

        assert!(Cache::<Vec<u32>>::delete(&cache, "k").await.unwrap());
        assert!(!Cache::<Vec<u32>>::delete(&cache, "k").await.unwrap());
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_in_memory_entries_expire() {
        let cache = InMemoryCache::new();
        Cache::<String>::set(
            &cache,
            "short",
            &"v".to_string(),
            Some(Duration::from_millis(20)),
        )
        .await
        .unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;

        let value: Option<String> = cache.get("short").await.unwrap();
        assert!(value.is_none());
    }

    #[tokio::test]
    async fn test_type_mismatch_is_an_error() {
        let cache = InMemoryCache::new();
        Cache::<String>::set(&cache, "k", &"not a number".to_string(), None)
            .await
            .unwrap();
        let result: CacheResult<Option<u64>> = cache.get("k").await;
        assert!(result.is_err());
    }
}
