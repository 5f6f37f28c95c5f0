//! Category service
//!
//! Category CRUD with slug generation. Listings and lookups are cached;
//! any write (including product writes, which change product counts)
//! drops every `category:*` entry.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

use crate::cache::{Cache, CacheLayer};
use crate::db::repositories::CategoryRepository;
use crate::models::{Category, CategoryInput};
use crate::services::error::{slugify, ServiceError, ServiceResult};

const CATEGORY_CACHE_TTL_SECS: u64 = 3600;

const CACHE_KEY_CATEGORY_LIST: &str = "category:list";
const CACHE_KEY_CATEGORY_BY_ID: &str = "category:id:";
const CACHE_KEY_CATEGORY_BY_SLUG: &str = "category:slug:";
pub(crate) const CACHE_PATTERN_CATEGORY: &str = "category:*";

const CONFLICT: &str = "A category with this name or slug already exists";

pub struct CategoryService {
    repo: Arc<dyn CategoryRepository>,
    cache: Arc<Cache>,
    cache_ttl: Duration,
}

impl CategoryService {
    pub fn new(repo: Arc<dyn CategoryRepository>, cache: Arc<Cache>) -> Self {
        Self {
            repo,
            cache,
            cache_ttl: Duration::from_secs(CATEGORY_CACHE_TTL_SECS),
        }
    }

    pub async fn list(&self) -> ServiceResult<Vec<Category>> {
        if let Some(list) = self
            .cache
            .get::<Vec<Category>>(CACHE_KEY_CATEGORY_LIST)
            .await
            .ok()
            .flatten()
        {
            return Ok(list);
        }

        let list = self.repo.list().await?;
        let _ = self
            .cache
            .set(CACHE_KEY_CATEGORY_LIST, &list, self.cache_ttl)
            .await;
        Ok(list)
    }

    /// Lookup by numeric id or by slug
    pub async fn get(&self, id_or_slug: &str) -> ServiceResult<Category> {
        let id_or_slug = id_or_slug.trim();
        let cache_key = match id_or_slug.parse::<i64>() {
            Ok(id) => format!("{}{}", CACHE_KEY_CATEGORY_BY_ID, id),
            Err(_) => format!("{}{}", CACHE_KEY_CATEGORY_BY_SLUG, id_or_slug.to_lowercase()),
        };
        if let Some(category) = self.cache.get::<Category>(&cache_key).await.ok().flatten() {
            return Ok(category);
        }

        let category = match id_or_slug.parse::<i64>() {
            Ok(id) => self.repo.get_by_id(id).await?,
            Err(_) => self.repo.get_by_slug(id_or_slug).await?,
        }
        .ok_or_else(|| ServiceError::not_found("Category"))?;

        let _ = self.cache.set(&cache_key, &category, self.cache_ttl).await;
        Ok(category)
    }

    pub async fn create(&self, input: CategoryInput) -> ServiceResult<Category> {
        let name = input
            .name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .ok_or_else(|| ServiceError::validation("Category name is required"))?
            .to_string();
        if name.chars().count() > 100 {
            return Err(ServiceError::validation("Category name must be at most 100 characters"));
        }
        let slug = resolve_slug(input.slug.as_deref(), &name)?;

        let now = Utc::now();
        let category = Category {
            id: 0,
            name,
            slug,
            description: clean(input.description),
            image_url: clean(input.image_url),
            product_count: 0,
            created_at: now,
            updated_at: now,
        };

        let created = self
            .repo
            .create(&category)
            .await
            .map_err(|e| ServiceError::from_write(e, CONFLICT))?;
        self.invalidate_cache().await;
        tracing::info!(category_id = created.id, slug = %created.slug, "Category created");
        Ok(created)
    }

    /// Partial update; absent fields keep their value
    pub async fn update(&self, id: i64, input: CategoryInput) -> ServiceResult<Category> {
        let mut category = self
            .repo
            .get_by_id(id)
            .await?
            .ok_or_else(|| ServiceError::not_found("Category"))?;

        if let Some(name) = input.name {
            let name = name.trim();
            if name.is_empty() {
                return Err(ServiceError::validation("Category name cannot be empty"));
            }
            category.name = name.to_string();
        }
        if let Some(slug) = input.slug.as_deref() {
            category.slug = resolve_slug(Some(slug), &category.name)?;
        }
        if input.description.is_some() {
            category.description = clean(input.description);
        }
        if input.image_url.is_some() {
            category.image_url = clean(input.image_url);
        }

        let updated = self
            .repo
            .update(&category)
            .await
            .map_err(|e| ServiceError::from_write(e, CONFLICT))?;
        self.invalidate_cache().await;
        Ok(updated)
    }

    /// Products keep existing; only their link to the category goes.
    pub async fn delete(&self, id: i64) -> ServiceResult<()> {
        if !self.repo.delete(id).await? {
            return Err(ServiceError::not_found("Category"));
        }
        self.invalidate_cache().await;
        tracing::info!(category_id = id, "Category deleted");
        Ok(())
    }

    pub async fn invalidate_cache(&self) {
        if let Err(e) = self.cache.delete_pattern(CACHE_PATTERN_CATEGORY).await {
            tracing::warn!("Failed to invalidate category cache: {:#}", e);
        }
    }
}

fn resolve_slug(requested: Option<&str>, name: &str) -> ServiceResult<String> {
    let slug = match requested.map(str::trim).filter(|s| !s.is_empty()) {
        Some(slug) => slugify(slug),
        None => slugify(name),
    };
    if slug.is_empty() {
        return Err(ServiceError::validation(
            "Category slug must contain letters or digits",
        ));
    }
    Ok(slug)
}

fn clean(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::db::repositories::SqlxCategoryRepository;
    use crate::db::{create_test_pool, migrations};

    async fn service() -> CategoryService {
        let pool = create_test_pool().await.unwrap();
        migrations::run_migrations(&pool).await.unwrap();
        CategoryService::new(
            SqlxCategoryRepository::boxed(pool),
            Arc::new(Cache::Memory(MemoryCache::new())),
        )
    }

    fn named(name: &str) -> CategoryInput {
        CategoryInput {
            name: Some(name.to_string()),
            ..CategoryInput::default()
        }
    }

    #[tokio::test]
    async fn test_create_generates_slug() {
        let svc = service().await;
        let created = svc.create(named("All Season")).await.unwrap();
        assert_eq!(created.slug, "all-season");

        let by_slug = svc.get("all-season").await.unwrap();
        let by_id = svc.get(&created.id.to_string()).await.unwrap();
        assert_eq!(by_slug.id, created.id);
        assert_eq!(by_id.name, "All Season");
    }

    #[tokio::test]
    async fn test_duplicate_is_conflict() {
        let svc = service().await;
        svc.create(named("Winter")).await.unwrap();
        assert!(matches!(svc.create(named("Winter")).await, Err(ServiceError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_validation() {
        let svc = service().await;
        assert!(matches!(
            svc.create(CategoryInput::default()).await,
            Err(ServiceError::Validation(_))
        ));
        assert!(matches!(svc.create(named("!!!")).await, Err(ServiceError::Validation(_))));
    }

    #[tokio::test]
    async fn test_update_invalidates_cached_list() {
        let svc = service().await;
        let created = svc.create(named("Summer")).await.unwrap();
        assert_eq!(svc.list().await.unwrap().len(), 1);

        svc.update(
            created.id,
            CategoryInput {
                name: Some("Summer Performance".into()),
                slug: Some("summer-performance".into()),
                ..CategoryInput::default()
            },
        )
        .await
        .unwrap();

        let list = svc.list().await.unwrap();
        assert_eq!(list[0].name, "Summer Performance");
        assert!(matches!(svc.get("summer").await, Err(ServiceError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_delete_missing_is_not_found() {
        let svc = service().await;
        let created = svc.create(named("Truck")).await.unwrap();
        svc.delete(created.id).await.unwrap();
        assert!(matches!(svc.delete(created.id).await, Err(ServiceError::NotFound(_))));
        assert!(svc.list().await.unwrap().is_empty());
    }
}
