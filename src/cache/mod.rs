//! Caching layer
//!
//! Best-effort only: a miss or an error always falls back to the store, and
//! writes invalidate synchronously.

pub mod cache;
pub mod error;
pub mod keys;

pub use cache::{Cache, InMemoryCache};
#[cfg(feature = "cache")]
pub use cache::RedisCache;
pub use error::{CacheError, CacheResult};

#[cfg(feature = "cache")]
pub use pool::*;

#[cfg(feature = "cache")]
mod pool {
    use bb8::Pool;
    use bb8_redis::RedisConnectionManager;
    use std::time::Duration;
    use tracing::{error, info, warn};

    use super::error::CacheError;

    /// Redis connection pool type alias
    pub type RedisPool = Pool<RedisConnectionManager>;

    /// Redis pool settings
    #[derive(Debug, Clone)]
    pub struct RedisPoolConfig {
        pub redis_url: String,
        pub max_connections: u32,
        pub min_idle: u32,
        pub connection_timeout: Duration,
        pub max_lifetime: Duration,
        pub idle_timeout: Duration,
    }

    impl Default for RedisPoolConfig {
        fn default() -> Self {
            Self {
                redis_url: "redis://127.0.0.1:6379".to_string(),
                max_connections: 10,
                min_idle: 1,
                connection_timeout: Duration::from_secs(5),
                max_lifetime: Duration::from_secs(300),
                idle_timeout: Duration::from_secs(60),
            }
        }
    }

    impl From<&crate::config::CacheConfig> for RedisPoolConfig {
        fn from(config: &crate::config::CacheConfig) -> Self {
            Self {
                redis_url: config.redis_url.clone(),
                max_connections: config.max_connections,
                ..Self::default()
            }
        }
    }

    /// Initialize the Redis pool. A failed initial PING is logged, not fatal.
    pub async fn init_cache_pool(config: RedisPoolConfig) -> Result<RedisPool, CacheError> {
        info!(
            max_connections = config.max_connections,
            "Initializing Redis cache pool"
        );

        let manager = RedisConnectionManager::new(config.redis_url.clone()).map_err(|e| {
            error!("Failed to create Redis connection manager: {}", e);
            CacheError::ConnectionError(e.to_string())
        })?;

        let pool = Pool::builder()
            .max_size(config.max_connections)
            .min_idle(Some(config.min_idle))
            .connection_timeout(config.connection_timeout)
            .max_lifetime(Some(config.max_lifetime))
            .idle_timeout(Some(config.idle_timeout))
            .test_on_check_out(false)
            .build(manager)
            .await
            .map_err(|e| {
                error!("Failed to build Redis connection pool: {}", e);
                CacheError::ConnectionError(e.to_string())
            })?;

        if let Err(e) = health_check(&pool).await {
            warn!("Initial Redis connection test failed, continuing degraded: {}", e);
        }

        info!("Redis cache pool initialized");
        Ok(pool)
    }

    /// PING through a pooled connection
    pub async fn health_check(pool: &RedisPool) -> Result<(), CacheError> {
        let mut conn = pool.get().await?;
        let _: String = redis::cmd("PING").query_async(&mut *conn).await?;
        Ok(())
    }
}
