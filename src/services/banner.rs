//! Banner service
//!
//! Live banners are cached per position for a few minutes so that a
//! banner's start or end time takes effect without a write.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

use crate::cache::{Cache, CacheLayer};
use crate::db::repositories::BannerRepository;
use crate::models::{Banner, BannerInput};
use crate::services::error::{ServiceError, ServiceResult};

const BANNER_CACHE_TTL: Duration = Duration::from_secs(300);
const CACHE_KEY_LIVE: &str = "banner:live:";
const CACHE_PATTERN_BANNER: &str = "banner:*";
const DEFAULT_POSITION: &str = "home";

pub struct BannerService {
    repo: Arc<dyn BannerRepository>,
    cache: Arc<Cache>,
}

impl BannerService {
    pub fn new(repo: Arc<dyn BannerRepository>, cache: Arc<Cache>) -> Self {
        Self { repo, cache }
    }

    /// Active banners inside their date window, by sort order
    pub async fn live(&self, position: Option<&str>) -> ServiceResult<Vec<Banner>> {
        let position = position.map(str::trim).filter(|p| !p.is_empty());
        let key = format!("{}{}", CACHE_KEY_LIVE, position.unwrap_or("*all"));
        if let Ok(Some(banners)) = self.cache.get::<Vec<Banner>>(&key).await {
            return Ok(banners);
        }

        let banners = self.repo.list_live(position, Utc::now()).await?;
        let _ = self.cache.set(&key, &banners, BANNER_CACHE_TTL).await;
        Ok(banners)
    }

    pub async fn list_all(&self) -> ServiceResult<Vec<Banner>> {
        Ok(self.repo.list_all().await?)
    }

    pub async fn create(&self, input: BannerInput) -> ServiceResult<Banner> {
        let title = input
            .title
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ServiceError::validation("Title is required"))?;
        let image_url = input
            .image_url
            .map(|u| u.trim().to_string())
            .filter(|u| !u.is_empty())
            .ok_or_else(|| ServiceError::validation("Image URL is required"))?;

        let now = Utc::now();
        let banner = Banner {
            id: 0,
            title,
            subtitle: clean(input.subtitle),
            image_url,
            link_url: clean(input.link_url),
            position: clean(input.position).unwrap_or_else(|| DEFAULT_POSITION.to_string()),
            sort_order: input.sort_order.unwrap_or(0),
            is_active: input.is_active.unwrap_or(true),
            starts_at: input.starts_at,
            ends_at: input.ends_at,
            created_at: now,
            updated_at: now,
        };
        check_window(&banner)?;

        let created = self.repo.create(&banner).await?;
        self.invalidate().await;
        tracing::info!(banner_id = created.id, position = %created.position, "Banner created");
        Ok(created)
    }

    pub async fn update(&self, id: i64, input: BannerInput) -> ServiceResult<Banner> {
        let mut banner = self
            .repo
            .get(id)
            .await?
            .ok_or_else(|| ServiceError::not_found("Banner"))?;

        if let Some(title) = input.title {
            let title = title.trim();
            if title.is_empty() {
                return Err(ServiceError::validation("Title cannot be empty"));
            }
            banner.title = title.to_string();
        }
        if let Some(url) = input.image_url {
            let url = url.trim();
            if url.is_empty() {
                return Err(ServiceError::validation("Image URL cannot be empty"));
            }
            banner.image_url = url.to_string();
        }
        if input.subtitle.is_some() {
            banner.subtitle = clean(input.subtitle);
        }
        if input.link_url.is_some() {
            banner.link_url = clean(input.link_url);
        }
        if let Some(position) = clean(input.position) {
            banner.position = position;
        }
        if let Some(order) = input.sort_order {
            banner.sort_order = order;
        }
        if let Some(active) = input.is_active {
            banner.is_active = active;
        }
        if input.starts_at.is_some() {
            banner.starts_at = input.starts_at;
        }
        if input.ends_at.is_some() {
            banner.ends_at = input.ends_at;
        }
        check_window(&banner)?;

        let updated = self.repo.update(&banner).await?;
        self.invalidate().await;
        Ok(updated)
    }

    pub async fn delete(&self, id: i64) -> ServiceResult<()> {
        if !self.repo.delete(id).await? {
            return Err(ServiceError::not_found("Banner"));
        }
        self.invalidate().await;
        Ok(())
    }

    async fn invalidate(&self) {
        if let Err(e) = self.cache.delete_pattern(CACHE_PATTERN_BANNER).await {
            tracing::warn!("Failed to invalidate banner cache: {:#}", e);
        }
    }
}

fn check_window(banner: &Banner) -> ServiceResult<()> {
    if let (Some(start), Some(end)) = (banner.starts_at, banner.ends_at) {
        if end < start {
            return Err(ServiceError::validation("Banner end date is before its start date"));
        }
    }
    Ok(())
}

fn clean(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}
