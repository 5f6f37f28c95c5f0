//! Login rate limiter
//!
//! Brute-force protection for the login route, kept in the cache layer so
//! state expires on its own and, with the Redis driver, is shared between
//! instances and survives restarts:
//! - failed attempts per identifier+IP, counted over a window; reaching the
//!   limit sets a block key for the block duration
//! - raw request count per IP per minute

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::cache::{Cache, CacheLayer};
use crate::config::AuthConfig;
use crate::services::error::{ServiceError, ServiceResult};

pub struct LoginRateLimiter {
    cache: Arc<Cache>,
    max_attempts: i64,
    window: Duration,
    block: Duration,
    ip_requests_per_minute: i64,
}

impl LoginRateLimiter {
    pub fn new(cache: Arc<Cache>, config: &AuthConfig) -> Self {
        Self {
            cache,
            max_attempts: i64::from(config.max_login_attempts.max(1)),
            window: Duration::from_secs(config.login_window_secs),
            block: Duration::from_secs(config.login_block_secs),
            ip_requests_per_minute: i64::from(config.ip_requests_per_minute.max(1)),
        }
    }

    fn subject(identifier: &str, ip: IpAddr) -> String {
        format!("{}|{}", identifier.trim().to_lowercase(), ip)
    }

    fn failures_key(identifier: &str, ip: IpAddr) -> String {
        format!("login:fail:{}", Self::subject(identifier, ip))
    }

    fn block_key(identifier: &str, ip: IpAddr) -> String {
        format!("login:block:{}", Self::subject(identifier, ip))
    }

    /// Fails with `RateLimited` while a block is in place.
    pub async fn check(&self, identifier: &str, ip: IpAddr) -> ServiceResult<()> {
        let blocked_until: Option<i64> = self.cache.get(&Self::block_key(identifier, ip)).await?;
        match blocked_until {
            Some(until) => {
                let remaining = (until - Utc::now().timestamp()).max(1) as u64;
                Err(ServiceError::RateLimited {
                    retry_after_secs: remaining,
                })
            }
            None => Ok(()),
        }
    }

    /// Count a failed attempt. Returns true when this attempt triggered a block.
    pub async fn record_failure(&self, identifier: &str, ip: IpAddr) -> ServiceResult<bool> {
        let failures = self
            .cache
            .incr(&Self::failures_key(identifier, ip), self.window)
            .await?;

        if failures < self.max_attempts {
            return Ok(false);
        }

        let until = Utc::now().timestamp() + self.block.as_secs() as i64;
        self.cache
            .set(&Self::block_key(identifier, ip), &until, self.block)
            .await?;
        self.cache.delete(&Self::failures_key(identifier, ip)).await?;

        tracing::warn!(
            identifier = %identifier.trim().to_lowercase(),
            %ip,
            attempts = failures,
            block_secs = self.block.as_secs(),
            "Login blocked after repeated failures"
        );
        Ok(true)
    }

    /// Successful login resets the failure count.
    pub async fn record_success(&self, identifier: &str, ip: IpAddr) -> ServiceResult<()> {
        self.cache.delete(&Self::failures_key(identifier, ip)).await?;
        Ok(())
    }

    /// Per-IP request throttle, counted in one-minute windows.
    pub async fn check_ip(&self, ip: IpAddr) -> ServiceResult<()> {
        let requests = self
            .cache
            .incr(&format!("login:ip:{}", ip), Duration::from_secs(60))
            .await?;
        if requests > self.ip_requests_per_minute {
            tracing::warn!(%ip, requests, "Login requests throttled");
            return Err(ServiceError::RateLimited {
                retry_after_secs: 60,
            });
        }
        Ok(())
    }
}
