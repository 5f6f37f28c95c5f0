//! Cache layer
//!
//! Short-lived shared state: login failure counters and blocks, cached
//! category listings and public settings.
//!
//! - In-memory cache (moka) - default, state lives as long as the process
//! - Redis cache - optional (`redis-cache` feature), shared between instances
//!   and survives restarts
//!
//! ```rust,ignore
//! use tirestore::cache::{create_cache, CacheLayer};
//!
//! let cache = create_cache(&config.cache).await?;
//! cache.set("settings:public", &settings, Duration::from_secs(60)).await?;
//! ```

pub mod memory;
#[cfg(feature = "redis-cache")]
pub mod redis;

use anyhow::Result;
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::config::{CacheConfig, CacheDriver};

/// Cache operations.
///
/// The generic methods make this trait unusable as `dyn CacheLayer`; the
/// `Cache` enum provides runtime selection instead.
#[async_trait]
pub trait CacheLayer: Send + Sync {
    async fn get<T: DeserializeOwned + Send>(&self, key: &str) -> Result<Option<T>>;

    /// Store a value that expires after `ttl`
    async fn set<T: Serialize + Send + Sync>(&self, key: &str, value: &T, ttl: Duration) -> Result<()>;

    /// Increment a counter and return the new value. A new counter starts at
    /// 1 and expires `ttl` after creation; later increments keep that expiry.
    async fn incr(&self, key: &str, ttl: Duration) -> Result<i64>;

    async fn delete(&self, key: &str) -> Result<()>;

    /// Delete every key matching a glob pattern (`*` and `?`)
    async fn delete_pattern(&self, pattern: &str) -> Result<()>;
}

pub use memory::MemoryCache;
#[cfg(feature = "redis-cache")]
pub use redis::RedisCache;

#[derive(Debug)]
pub enum Cache {
    Memory(MemoryCache),
    #[cfg(feature = "redis-cache")]
    Redis(RedisCache),
}

impl Cache {
    pub fn driver_name(&self) -> &'static str {
        match self {
            Cache::Memory(_) => "memory",
            #[cfg(feature = "redis-cache")]
            Cache::Redis(_) => "redis",
        }
    }
}

#[async_trait]
impl CacheLayer for Cache {
    async fn get<T: DeserializeOwned + Send>(&self, key: &str) -> Result<Option<T>> {
        match self {
            Cache::Memory(cache) => cache.get(key).await,
            #[cfg(feature = "redis-cache")]
            Cache::Redis(cache) => cache.get(key).await,
        }
    }

    async fn set<T: Serialize + Send + Sync>(&self, key: &str, value: &T, ttl: Duration) -> Result<()> {
        match self {
            Cache::Memory(cache) => cache.set(key, value, ttl).await,
            #[cfg(feature = "redis-cache")]
            Cache::Redis(cache) => cache.set(key, value, ttl).await,
        }
    }

    async fn incr(&self, key: &str, ttl: Duration) -> Result<i64> {
        match self {
            Cache::Memory(cache) => cache.incr(key, ttl).await,
            #[cfg(feature = "redis-cache")]
            Cache::Redis(cache) => cache.incr(key, ttl).await,
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        match self {
            Cache::Memory(cache) => cache.delete(key).await,
            #[cfg(feature = "redis-cache")]
            Cache::Redis(cache) => cache.delete(key).await,
        }
    }

    async fn delete_pattern(&self, pattern: &str) -> Result<()> {
        match self {
            Cache::Memory(cache) => cache.delete_pattern(pattern).await,
            #[cfg(feature = "redis-cache")]
            Cache::Redis(cache) => cache.delete_pattern(pattern).await,
        }
    }
}

/// Build the cache selected by configuration.
pub async fn create_cache(config: &CacheConfig) -> Result<Arc<Cache>> {
    let ttl = Duration::from_secs(config.ttl_seconds);

    match config.driver {
        CacheDriver::Memory => {
            let cache = MemoryCache::with_capacity_and_ttl(50_000, ttl);
            Ok(Arc::new(Cache::Memory(cache)))
        }
        CacheDriver::Redis => {
            #[cfg(feature = "redis-cache")]
            {
                let redis_url = config.redis_url.as_ref().ok_or_else(|| {
                    anyhow::anyhow!(
                        "Redis URL is required when using the Redis cache driver. \
                         Set 'redis_url' in the cache section or REDIS_URL."
                    )
                })?;

                let cache = RedisCache::with_ttl(redis_url, ttl).await?;
                Ok(Arc::new(Cache::Redis(cache)))
            }

            #[cfg(not(feature = "redis-cache"))]
            {
                anyhow::bail!(
                    "Redis cache driver is configured but the 'redis-cache' feature is not enabled. \
                     Rebuild with `--features redis-cache` or use the 'memory' driver."
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_memory_cache() {
        let config = CacheConfig::default();
        let cache = create_cache(&config).await.unwrap();
        assert_eq!(cache.driver_name(), "memory");

        cache
            .set("settings:public", &"value".to_string(), Duration::from_secs(60))
            .await
            .unwrap();
        let result: Option<String> = cache.get("settings:public").await.unwrap();
        assert_eq!(result, Some("value".to_string()));
    }

    #[tokio::test]
    async fn test_counter_through_enum() {
        let cache = create_cache(&CacheConfig::default()).await.unwrap();
        assert_eq!(cache.incr("login:fail:x", Duration::from_secs(60)).await.unwrap(), 1);
        assert_eq!(cache.incr("login:fail:x", Duration::from_secs(60)).await.unwrap(), 2);
        let stored: Option<i64> = cache.get("login:fail:x").await.unwrap();
        assert_eq!(stored, Some(2));
    }

    #[cfg(not(feature = "redis-cache"))]
    #[tokio::test]
    async fn test_redis_driver_without_feature() {
        let config = CacheConfig {
            driver: CacheDriver::Redis,
            redis_url: Some("redis://127.0.0.1:6379".to_string()),
            ttl_seconds: 60,
        };
        let err = create_cache(&config).await.unwrap_err();
        assert!(err.to_string().contains("redis-cache"));
    }
}
