//! Category repository
//!
//! Database operations for product categories.

use crate::db::DynDatabasePool;
use crate::models::Category;
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{sqlite::SqliteRow, QueryBuilder, Row, Sqlite, SqlitePool};
use std::sync::Arc;

/// Category repository trait
#[async_trait]
pub trait CategoryRepository: Send + Sync {
    async fn create(&self, category: &Category) -> Result<Category>;

    async fn get_by_id(&self, id: i64) -> Result<Option<Category>>;

    async fn get_by_slug(&self, slug: &str) -> Result<Option<Category>>;

    /// All categories ordered by name, with product counts
    async fn list(&self) -> Result<Vec<Category>>;

    /// Resolve names or slugs (case-insensitive) to IDs. Unknown entries are
    /// dropped.
    async fn resolve_ids(&self, names_or_slugs: &[String]) -> Result<Vec<i64>>;

    async fn update(&self, category: &Category) -> Result<Category>;

    async fn delete(&self, id: i64) -> Result<bool>;
}

pub struct SqlxCategoryRepository {
    pool: DynDatabasePool,
}

impl SqlxCategoryRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn CategoryRepository> {
        Arc::new(Self::new(pool))
    }
}

#[async_trait]
impl CategoryRepository for SqlxCategoryRepository {
    async fn create(&self, category: &Category) -> Result<Category> {
        let pool = self.pool.sqlite();
        let result = sqlx::query(
            "INSERT INTO categories (name, slug, description, image_url) VALUES (?, ?, ?, ?)",
        )
        .bind(&category.name)
        .bind(&category.slug)
        .bind(&category.description)
        .bind(&category.image_url)
        .execute(pool)
        .await
        .context("Failed to create category")?;

        get_category_by_id(pool, result.last_insert_rowid())
            .await?
            .context("Category not found after insert")
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<Category>> {
        get_category_by_id(self.pool.sqlite(), id).await
    }

    async fn get_by_slug(&self, slug: &str) -> Result<Option<Category>> {
        let row = sqlx::query(&format!(
            "{} WHERE LOWER(c.slug) = LOWER(?) GROUP BY c.id",
            SELECT_CATEGORY
        ))
        .bind(slug)
        .fetch_optional(self.pool.sqlite())
        .await
        .context("Failed to get category by slug")?;
        Ok(row.as_ref().map(row_to_category))
    }

    async fn list(&self) -> Result<Vec<Category>> {
        let rows = sqlx::query(&format!("{} GROUP BY c.id ORDER BY c.name", SELECT_CATEGORY))
            .fetch_all(self.pool.sqlite())
            .await
            .context("Failed to list categories")?;
        Ok(rows.iter().map(row_to_category).collect())
    }

    async fn resolve_ids(&self, names_or_slugs: &[String]) -> Result<Vec<i64>> {
        let wanted: Vec<String> = names_or_slugs
            .iter()
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty())
            .collect();
        if wanted.is_empty() {
            return Ok(Vec::new());
        }

        let mut qb: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT id FROM categories WHERE LOWER(name) IN (");
        push_list(&mut qb, &wanted);
        qb.push(") OR LOWER(slug) IN (");
        push_list(&mut qb, &wanted);
        qb.push(") ORDER BY id");

        let rows = qb
            .build()
            .fetch_all(self.pool.sqlite())
            .await
            .context("Failed to resolve category names")?;
        Ok(rows.iter().map(|r| r.get("id")).collect())
    }

    async fn update(&self, category: &Category) -> Result<Category> {
        let pool = self.pool.sqlite();
        sqlx::query(
            r#"
            UPDATE categories
            SET name = ?, slug = ?, description = ?, image_url = ?, updated_at = CURRENT_TIMESTAMP
            WHERE id = ?
            "#,
        )
        .bind(&category.name)
        .bind(&category.slug)
        .bind(&category.description)
        .bind(&category.image_url)
        .bind(category.id)
        .execute(pool)
        .await
        .context("Failed to update category")?;

        get_category_by_id(pool, category.id)
            .await?
            .context("Category not found after update")
    }

    async fn delete(&self, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM categories WHERE id = ?")
            .bind(id)
            .execute(self.pool.sqlite())
            .await
            .context("Failed to delete category")?;
        Ok(result.rows_affected() > 0)
    }
}

const SELECT_CATEGORY: &str = r#"
    SELECT c.id, c.name, c.slug, c.description, c.image_url, c.created_at, c.updated_at,
           COUNT(pc.product_id) AS product_count
    FROM categories c
    LEFT JOIN product_categories pc ON pc.category_id = c.id
"#;

fn push_list(qb: &mut QueryBuilder<'_, Sqlite>, values: &[String]) {
    let mut separated = qb.separated(", ");
    for value in values {
        separated.push_bind(value.clone());
    }
}

async fn get_category_by_id(pool: &SqlitePool, id: i64) -> Result<Option<Category>> {
    let row = sqlx::query(&format!("{} WHERE c.id = ? GROUP BY c.id", SELECT_CATEGORY))
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("Failed to get category")?;
    Ok(row.as_ref().map(row_to_category))
}

fn row_to_category(row: &SqliteRow) -> Category {
    Category {
        id: row.get("id"),
        name: row.get("name"),
        slug: row.get("slug"),
        description: row.get("description"),
        image_url: row.get("image_url"),
        product_count: row.get("product_count"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}
