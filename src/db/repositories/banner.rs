//! Banner repository

use crate::db::DynDatabasePool;
use crate::models::Banner;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row};
use std::sync::Arc;

#[async_trait]
pub trait BannerRepository: Send + Sync {
    async fn create(&self, banner: &Banner) -> Result<Banner>;

    async fn get(&self, id: i64) -> Result<Option<Banner>>;

    /// Every banner, by position then sort order
    async fn list_all(&self) -> Result<Vec<Banner>>;

    /// Banners live at `now`, optionally limited to one position
    async fn list_live(&self, position: Option<&str>, now: DateTime<Utc>) -> Result<Vec<Banner>>;

    async fn update(&self, banner: &Banner) -> Result<Banner>;

    async fn delete(&self, id: i64) -> Result<bool>;
}

pub struct SqlxBannerRepository {
    pool: DynDatabasePool,
}

impl SqlxBannerRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn BannerRepository> {
        Arc::new(Self::new(pool))
    }
}

const BANNER_COLUMNS: &str = r#"
    id, title, subtitle, image_url, link_url, position, sort_order, is_active,
    starts_at, ends_at, created_at, updated_at
"#;

#[async_trait]
impl BannerRepository for SqlxBannerRepository {
    async fn create(&self, banner: &Banner) -> Result<Banner> {
        let result = sqlx::query(
            r#"
            INSERT INTO banners (title, subtitle, image_url, link_url, position, sort_order, is_active, starts_at, ends_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&banner.title)
        .bind(&banner.subtitle)
        .bind(&banner.image_url)
        .bind(&banner.link_url)
        .bind(&banner.position)
        .bind(banner.sort_order)
        .bind(banner.is_active)
        .bind(banner.starts_at)
        .bind(banner.ends_at)
        .execute(self.pool.sqlite())
        .await
        .context("Failed to create banner")?;

        self.get(result.last_insert_rowid())
            .await?
            .context("Banner not found after insert")
    }

    async fn get(&self, id: i64) -> Result<Option<Banner>> {
        let row = sqlx::query(&format!("SELECT {} FROM banners WHERE id = ?", BANNER_COLUMNS))
            .bind(id)
            .fetch_optional(self.pool.sqlite())
            .await
            .context("Failed to get banner")?;
        Ok(row.as_ref().map(row_to_banner))
    }

    async fn list_all(&self) -> Result<Vec<Banner>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM banners ORDER BY position, sort_order, id",
            BANNER_COLUMNS
        ))
        .fetch_all(self.pool.sqlite())
        .await
        .context("Failed to list banners")?;
        Ok(rows.iter().map(row_to_banner).collect())
    }

    async fn list_live(&self, position: Option<&str>, now: DateTime<Utc>) -> Result<Vec<Banner>> {
        let rows = match position {
            Some(position) => {
                sqlx::query(&format!(
                    "SELECT {} FROM banners WHERE is_active = 1 AND position = ? ORDER BY sort_order, id",
                    BANNER_COLUMNS
                ))
                .bind(position)
                .fetch_all(self.pool.sqlite())
                .await
            }
            None => {
                sqlx::query(&format!(
                    "SELECT {} FROM banners WHERE is_active = 1 ORDER BY sort_order, id",
                    BANNER_COLUMNS
                ))
                .fetch_all(self.pool.sqlite())
                .await
            }
        }
        .context("Failed to list active banners")?;

        // Date windows are compared here; stored timestamps mix formats.
        Ok(rows
            .iter()
            .map(row_to_banner)
            .filter(|b| b.is_live_at(now))
            .collect())
    }

    async fn update(&self, banner: &Banner) -> Result<Banner> {
        sqlx::query(
            r#"
            UPDATE banners SET
                title = ?, subtitle = ?, image_url = ?, link_url = ?, position = ?, sort_order = ?,
                is_active = ?, starts_at = ?, ends_at = ?, updated_at = CURRENT_TIMESTAMP
            WHERE id = ?
            "#,
        )
        .bind(&banner.title)
        .bind(&banner.subtitle)
        .bind(&banner.image_url)
        .bind(&banner.link_url)
        .bind(&banner.position)
        .bind(banner.sort_order)
        .bind(banner.is_active)
        .bind(banner.starts_at)
        .bind(banner.ends_at)
        .bind(banner.id)
        .execute(self.pool.sqlite())
        .await
        .context("Failed to update banner")?;

        self.get(banner.id)
            .await?
            .context("Banner not found after update")
    }

    async fn delete(&self, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM banners WHERE id = ?")
            .bind(id)
            .execute(self.pool.sqlite())
            .await
            .context("Failed to delete banner")?;
        Ok(result.rows_affected() > 0)
    }
}

fn row_to_banner(row: &SqliteRow) -> Banner {
    Banner {
        id: row.get("id"),
        title: row.get("title"),
        subtitle: row.get("subtitle"),
        image_url: row.get("image_url"),
        link_url: row.get("link_url"),
        position: row.get("position"),
        sort_order: row.get("sort_order"),
        is_active: row.get("is_active"),
        starts_at: row.get("starts_at"),
        ends_at: row.get("ends_at"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{create_test_pool, migrations};
    use chrono::Duration;

    fn banner(title: &str, position: &str, sort_order: i64) -> Banner {
        let now = Utc::now();
        Banner {
            id: 0,
            title: title.into(),
            subtitle: None,
            image_url: format!("/uploads/{}.jpg", title),
            link_url: None,
            position: position.into(),
            sort_order,
            is_active: true,
            starts_at: None,
            ends_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_list_live_filters_window_and_position() {
        let pool = create_test_pool().await.unwrap();
        migrations::run_migrations(&pool).await.unwrap();
        let repo = SqlxBannerRepository::new(pool);
        let now = Utc::now();

        repo.create(&banner("second", "home", 2)).await.unwrap();
        repo.create(&banner("first", "home", 1)).await.unwrap();
        repo.create(&banner("shop", "shop", 0)).await.unwrap();

        let mut expired = banner("expired", "home", 0);
        expired.ends_at = Some(now - Duration::days(1));
        repo.create(&expired).await.unwrap();

        let mut hidden = banner("hidden", "home", 0);
        hidden.is_active = false;
        repo.create(&hidden).await.unwrap();

        let home = repo.list_live(Some("home"), now).await.unwrap();
        let titles: Vec<_> = home.iter().map(|b| b.title.as_str()).collect();
        assert_eq!(titles, vec!["first", "second"]);

        assert_eq!(repo.list_live(None, now).await.unwrap().len(), 3);
        assert_eq!(repo.list_all().await.unwrap().len(), 5);
    }
}
