//! Redis cache backend
//!
//! Keys are namespaced under `tirestore:` so pattern deletes never touch
//! other applications sharing the database.

use super::CacheLayer;
use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client};
use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;

const DEFAULT_TTL: Duration = Duration::from_secs(3600);

const KEY_PREFIX: &str = "tirestore:";

const SCAN_COUNT: usize = 100;

pub struct RedisCache {
    connection: MultiplexedConnection,
    default_ttl: Duration,
}

impl std::fmt::Debug for RedisCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisCache")
            .field("default_ttl", &self.default_ttl)
            .finish_non_exhaustive()
    }
}

impl RedisCache {
    pub async fn new(redis_url: &str) -> Result<Self> {
        Self::with_ttl(redis_url, DEFAULT_TTL).await
    }

    pub async fn with_ttl(redis_url: &str, default_ttl: Duration) -> Result<Self> {
        let client = Client::open(redis_url).context("Failed to create Redis client")?;

        let connection = client
            .get_multiplexed_async_connection()
            .await
            .context("Failed to connect to Redis")?;

        tracing::info!("Connected to Redis cache");
        Ok(Self {
            connection,
            default_ttl,
        })
    }

    fn key(key: &str) -> String {
        format!("{}{}", KEY_PREFIX, key)
    }

    /// Whole seconds, at least one; Redis rejects a zero expiry
    fn ttl_secs(&self, ttl: Duration) -> u64 {
        let ttl = if ttl.is_zero() { self.default_ttl } else { ttl };
        ttl.as_secs().max(1)
    }
}

#[async_trait]
impl CacheLayer for RedisCache {
    async fn get<T: DeserializeOwned + Send>(&self, key: &str) -> Result<Option<T>> {
        let mut conn = self.connection.clone();
        let result: Option<String> = conn
            .get(Self::key(key))
            .await
            .context("Failed to get value from Redis")?;

        match result {
            Some(json) => {
                let value =
                    serde_json::from_str(&json).context("Failed to deserialize cached value")?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    async fn set<T: Serialize + Send + Sync>(&self, key: &str, value: &T, ttl: Duration) -> Result<()> {
        let mut conn = self.connection.clone();
        let json = serde_json::to_string(value).context("Failed to serialize cache value")?;

        let _: () = conn
            .set_ex(Self::key(key), json, self.ttl_secs(ttl))
            .await
            .context("Failed to set value in Redis")?;
        Ok(())
    }

    async fn incr(&self, key: &str, ttl: Duration) -> Result<i64> {
        let mut conn = self.connection.clone();
        let key = Self::key(key);

        let count: i64 = conn
            .incr(&key, 1)
            .await
            .context("Failed to increment Redis counter")?;
        if count == 1 {
            let _: () = conn
                .expire(&key, self.ttl_secs(ttl) as i64)
                .await
                .context("Failed to set counter expiry")?;
        }
        Ok(count)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.connection.clone();
        let _: () = conn
            .del(Self::key(key))
            .await
            .context("Failed to delete key from Redis")?;
        Ok(())
    }

    async fn delete_pattern(&self, pattern: &str) -> Result<()> {
        let mut conn = self.connection.clone();
        let redis_pattern = Self::key(pattern);

        // SCAN instead of KEYS so a large keyspace doesn't block the server
        let mut cursor: u64 = 0;
        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&redis_pattern)
                .arg("COUNT")
                .arg(SCAN_COUNT)
                .query_async(&mut conn)
                .await
                .context("Failed to scan keys in Redis")?;

            if !keys.is_empty() {
                let _: () = conn
                    .del(&keys)
                    .await
                    .context("Failed to delete keys from Redis")?;
            }

            cursor = next;
            if cursor == 0 {
                break;
            }
        }
        Ok(())
    }
}
