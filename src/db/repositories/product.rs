//! Product repository
//!
//! Catalog storage plus the SQL half of the listing filter: every filter
//! field becomes a bound predicate in one `WHERE` clause shared by the row
//! query, the count query and the search candidate query.

use crate::db::DynDatabasePool;
use crate::models::{
    CreateProductInput, ImageInput, ListParams, Product, ProductFilter, ProductImage,
    ProductStatus, SortField,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{sqlite::SqliteRow, QueryBuilder, Row, Sqlite, SqliteConnection, SqlitePool};
use std::collections::HashMap;
use std::sync::Arc;

/// Category restriction resolved before querying.
#[derive(Debug, Clone, Copy)]
pub enum CategoryScope<'a> {
    /// No category filter requested
    Any,
    /// Products linked to at least one of these categories. An empty slice
    /// matches nothing.
    Within(&'a [i64]),
}

/// Product repository trait
#[async_trait]
pub trait ProductRepository: Send + Sync {
    /// Insert a product with its category links and images
    async fn create(&self, input: &CreateProductInput, slug: &str) -> Result<Product>;

    async fn get_by_id(&self, id: i64) -> Result<Option<Product>>;

    async fn get_by_slug(&self, slug: &str) -> Result<Option<Product>>;

    async fn get_many(&self, ids: &[i64]) -> Result<Vec<Product>>;

    /// Filtered, sorted page plus the total row count of the filter
    async fn list(
        &self,
        filter: &ProductFilter,
        scope: CategoryScope<'_>,
        params: &ListParams,
    ) -> Result<(Vec<Product>, i64)>;

    /// Filtered and sorted rows without paging, at most `limit` of them
    async fn list_candidates(
        &self,
        filter: &ProductFilter,
        scope: CategoryScope<'_>,
        limit: i64,
    ) -> Result<Vec<Product>>;

    async fn featured(&self, limit: i64) -> Result<Vec<Product>>;

    /// Distinct brands of active products
    async fn brands(&self) -> Result<Vec<String>>;

    async fn update(&self, product: &Product) -> Result<Product>;

    async fn set_categories(&self, product_id: i64, category_ids: &[i64]) -> Result<()>;

    async fn delete(&self, id: i64) -> Result<bool>;

    /// Images keyed by product ID, each list ordered by sort_order
    async fn images_for(&self, product_ids: &[i64]) -> Result<HashMap<i64, Vec<ProductImage>>>;

    async fn category_ids_for(&self, product_ids: &[i64]) -> Result<HashMap<i64, Vec<i64>>>;

    async fn add_image(&self, product_id: i64, image: &ImageInput) -> Result<ProductImage>;

    async fn delete_image(&self, product_id: i64, image_id: i64) -> Result<bool>;
}

pub struct SqlxProductRepository {
    pool: DynDatabasePool,
}

impl SqlxProductRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn ProductRepository> {
        Arc::new(Self::new(pool))
    }
}

const PRODUCT_COLUMNS: &str = r#"
    p.id, p.name, p.slug, p.sku, p.brand, p.model, p.size, p.width, p.aspect_ratio,
    p.rim_diameter, p.load_index, p.speed_rating, p.season_type, p.price, p.sale_price,
    p.stock_quantity, p.status, p.description, p.tags, p.is_featured, p.rating_average,
    p.review_count, p.created_at, p.updated_at
"#;

#[async_trait]
impl ProductRepository for SqlxProductRepository {
    async fn create(&self, input: &CreateProductInput, slug: &str) -> Result<Product> {
        let pool = self.pool.sqlite();
        let mut tx = pool.begin().await?;

        let result = sqlx::query(
            r#"
            INSERT INTO products (
                name, slug, sku, brand, model, size, width, aspect_ratio, rim_diameter,
                load_index, speed_rating, season_type, price, sale_price, stock_quantity,
                status, description, tags, is_featured
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(input.name.trim())
        .bind(slug)
        .bind(input.sku.trim())
        .bind(input.brand.trim())
        .bind(input.model.trim())
        .bind(input.size.trim())
        .bind(input.width)
        .bind(input.aspect_ratio)
        .bind(input.rim_diameter)
        .bind(&input.load_index)
        .bind(&input.speed_rating)
        .bind(&input.season_type)
        .bind(input.price)
        .bind(input.sale_price)
        .bind(input.stock_quantity)
        .bind(input.status.unwrap_or_default().as_str())
        .bind(&input.description)
        .bind(serde_json::to_string(&input.tags)?)
        .bind(input.is_featured)
        .execute(&mut *tx)
        .await
        .context("Failed to create product")?;
        let id = result.last_insert_rowid();

        replace_categories(&mut tx, id, &input.category_ids).await?;
        for (index, image) in input.images.iter().enumerate() {
            insert_image(&mut tx, id, image, index as i64).await?;
        }

        tx.commit().await?;

        get_product(pool, id)
            .await?
            .context("Product not found after insert")
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<Product>> {
        get_product(self.pool.sqlite(), id).await
    }

    async fn get_by_slug(&self, slug: &str) -> Result<Option<Product>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM products p WHERE p.slug = ?",
            PRODUCT_COLUMNS
        ))
        .bind(slug)
        .fetch_optional(self.pool.sqlite())
        .await
        .context("Failed to get product by slug")?;
        row.as_ref().map(row_to_product).transpose()
    }

    async fn get_many(&self, ids: &[i64]) -> Result<Vec<Product>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
            "SELECT {} FROM products p WHERE p.id IN (",
            PRODUCT_COLUMNS
        ));
        push_ids(&mut qb, ids);
        qb.push(")");

        let rows = qb
            .build()
            .fetch_all(self.pool.sqlite())
            .await
            .context("Failed to get products")?;
        rows.iter().map(row_to_product).collect()
    }

    async fn list(
        &self,
        filter: &ProductFilter,
        scope: CategoryScope<'_>,
        params: &ListParams,
    ) -> Result<(Vec<Product>, i64)> {
        let pool = self.pool.sqlite();

        let mut count_qb: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT COUNT(*) AS count FROM products p");
        push_conditions(&mut count_qb, filter, scope);
        let total: i64 = count_qb
            .build()
            .fetch_one(pool)
            .await
            .context("Failed to count products")?
            .get("count");

        let mut qb: QueryBuilder<Sqlite> =
            QueryBuilder::new(format!("SELECT {} FROM products p", PRODUCT_COLUMNS));
        push_conditions(&mut qb, filter, scope);
        push_order(&mut qb, filter);
        qb.push(" LIMIT ");
        qb.push_bind(params.limit());
        qb.push(" OFFSET ");
        qb.push_bind(params.offset());

        let rows = qb
            .build()
            .fetch_all(pool)
            .await
            .context("Failed to list products")?;
        let products = rows.iter().map(row_to_product).collect::<Result<Vec<_>>>()?;

        Ok((products, total))
    }

    async fn list_candidates(
        &self,
        filter: &ProductFilter,
        scope: CategoryScope<'_>,
        limit: i64,
    ) -> Result<Vec<Product>> {
        let mut qb: QueryBuilder<Sqlite> =
            QueryBuilder::new(format!("SELECT {} FROM products p", PRODUCT_COLUMNS));
        push_conditions(&mut qb, filter, scope);
        push_order(&mut qb, filter);
        qb.push(" LIMIT ");
        qb.push_bind(limit);

        let rows = qb
            .build()
            .fetch_all(self.pool.sqlite())
            .await
            .context("Failed to load search candidates")?;
        rows.iter().map(row_to_product).collect()
    }

    async fn featured(&self, limit: i64) -> Result<Vec<Product>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {} FROM products p
            WHERE p.is_featured = 1 AND p.status = 'active'
            ORDER BY p.created_at DESC, p.id DESC
            LIMIT ?
            "#,
            PRODUCT_COLUMNS
        ))
        .bind(limit)
        .fetch_all(self.pool.sqlite())
        .await
        .context("Failed to list featured products")?;
        rows.iter().map(row_to_product).collect()
    }

    async fn brands(&self) -> Result<Vec<String>> {
        let rows = sqlx::query(
            "SELECT DISTINCT brand FROM products WHERE status = 'active' AND brand <> '' ORDER BY brand",
        )
        .fetch_all(self.pool.sqlite())
        .await
        .context("Failed to list brands")?;
        Ok(rows.iter().map(|r| r.get("brand")).collect())
    }

    async fn update(&self, product: &Product) -> Result<Product> {
        let pool = self.pool.sqlite();
        sqlx::query(
            r#"
            UPDATE products SET
                name = ?, slug = ?, sku = ?, brand = ?, model = ?, size = ?, width = ?,
                aspect_ratio = ?, rim_diameter = ?, load_index = ?, speed_rating = ?,
                season_type = ?, price = ?, sale_price = ?, stock_quantity = ?, status = ?,
                description = ?, tags = ?, is_featured = ?, updated_at = CURRENT_TIMESTAMP
            WHERE id = ?
            "#,
        )
        .bind(&product.name)
        .bind(&product.slug)
        .bind(&product.sku)
        .bind(&product.brand)
        .bind(&product.model)
        .bind(&product.size)
        .bind(product.width)
        .bind(product.aspect_ratio)
        .bind(product.rim_diameter)
        .bind(&product.load_index)
        .bind(&product.speed_rating)
        .bind(&product.season_type)
        .bind(product.price)
        .bind(product.sale_price)
        .bind(product.stock_quantity)
        .bind(product.status.as_str())
        .bind(&product.description)
        .bind(serde_json::to_string(&product.tags)?)
        .bind(product.is_featured)
        .bind(product.id)
        .execute(pool)
        .await
        .context("Failed to update product")?;

        get_product(pool, product.id)
            .await?
            .context("Product not found after update")
    }

    async fn set_categories(&self, product_id: i64, category_ids: &[i64]) -> Result<()> {
        let mut tx = self.pool.sqlite().begin().await?;
        replace_categories(&mut tx, product_id, category_ids).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn delete(&self, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM products WHERE id = ?")
            .bind(id)
            .execute(self.pool.sqlite())
            .await
            .context("Failed to delete product")?;
        Ok(result.rows_affected() > 0)
    }

    async fn images_for(&self, product_ids: &[i64]) -> Result<HashMap<i64, Vec<ProductImage>>> {
        let mut map: HashMap<i64, Vec<ProductImage>> = HashMap::new();
        if product_ids.is_empty() {
            return Ok(map);
        }
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT id, product_id, url, alt_text, sort_order, is_primary FROM product_images WHERE product_id IN (",
        );
        push_ids(&mut qb, product_ids);
        qb.push(") ORDER BY product_id, sort_order, id");

        let rows = qb
            .build()
            .fetch_all(self.pool.sqlite())
            .await
            .context("Failed to load product images")?;
        for row in &rows {
            let image = row_to_image(row);
            map.entry(image.product_id).or_default().push(image);
        }
        Ok(map)
    }

    async fn category_ids_for(&self, product_ids: &[i64]) -> Result<HashMap<i64, Vec<i64>>> {
        let mut map: HashMap<i64, Vec<i64>> = HashMap::new();
        if product_ids.is_empty() {
            return Ok(map);
        }
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT product_id, category_id FROM product_categories WHERE product_id IN (",
        );
        push_ids(&mut qb, product_ids);
        qb.push(") ORDER BY product_id, category_id");

        let rows = qb
            .build()
            .fetch_all(self.pool.sqlite())
            .await
            .context("Failed to load product categories")?;
        for row in &rows {
            map.entry(row.get("product_id"))
                .or_default()
                .push(row.get("category_id"));
        }
        Ok(map)
    }

    async fn add_image(&self, product_id: i64, image: &ImageInput) -> Result<ProductImage> {
        let pool = self.pool.sqlite();
        let next_order: i64 = sqlx::query(
            "SELECT COALESCE(MAX(sort_order) + 1, 0) AS next FROM product_images WHERE product_id = ?",
        )
        .bind(product_id)
        .fetch_one(pool)
        .await?
        .get("next");

        let mut tx = pool.begin().await?;
        let id = insert_image(&mut tx, product_id, image, next_order).await?;
        tx.commit().await?;

        let row = sqlx::query(
            "SELECT id, product_id, url, alt_text, sort_order, is_primary FROM product_images WHERE id = ?",
        )
        .bind(id)
        .fetch_one(pool)
        .await
        .context("Image not found after insert")?;
        Ok(row_to_image(&row))
    }

    async fn delete_image(&self, product_id: i64, image_id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM product_images WHERE id = ? AND product_id = ?")
            .bind(image_id)
            .bind(product_id)
            .execute(self.pool.sqlite())
            .await
            .context("Failed to delete product image")?;
        Ok(result.rows_affected() > 0)
    }
}

async fn get_product(pool: &SqlitePool, id: i64) -> Result<Option<Product>> {
    let row = sqlx::query(&format!("SELECT {} FROM products p WHERE p.id = ?", PRODUCT_COLUMNS))
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("Failed to get product")?;
    row.as_ref().map(row_to_product).transpose()
}

async fn replace_categories(
    conn: &mut SqliteConnection,
    product_id: i64,
    category_ids: &[i64],
) -> Result<()> {
    sqlx::query("DELETE FROM product_categories WHERE product_id = ?")
        .bind(product_id)
        .execute(&mut *conn)
        .await?;
    for category_id in category_ids {
        sqlx::query("INSERT OR IGNORE INTO product_categories (product_id, category_id) VALUES (?, ?)")
            .bind(product_id)
            .bind(category_id)
            .execute(&mut *conn)
            .await
            .with_context(|| format!("Failed to link category {}", category_id))?;
    }
    Ok(())
}

/// Insert an image. A primary image demotes the product's other images.
async fn insert_image(
    conn: &mut SqliteConnection,
    product_id: i64,
    image: &ImageInput,
    default_order: i64,
) -> Result<i64> {
    let is_primary = image.is_primary.unwrap_or(false);
    if is_primary {
        sqlx::query("UPDATE product_images SET is_primary = 0 WHERE product_id = ?")
            .bind(product_id)
            .execute(&mut *conn)
            .await?;
    }
    let result = sqlx::query(
        "INSERT INTO product_images (product_id, url, alt_text, sort_order, is_primary) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(product_id)
    .bind(&image.url)
    .bind(&image.alt_text)
    .bind(image.sort_order.unwrap_or(default_order))
    .bind(is_primary)
    .execute(&mut *conn)
    .await
    .context("Failed to add product image")?;
    Ok(result.last_insert_rowid())
}

fn push_ids(qb: &mut QueryBuilder<'_, Sqlite>, ids: &[i64]) {
    let mut separated = qb.separated(", ");
    for id in ids {
        separated.push_bind(*id);
    }
}

/// Append the `WHERE` clause for a filter. Text filters compare
/// case-insensitively.
fn push_conditions(qb: &mut QueryBuilder<'_, Sqlite>, filter: &ProductFilter, scope: CategoryScope<'_>) {
    qb.push(" WHERE 1 = 1");

    let text_filters = [
        ("p.brand", &filter.brand),
        ("p.model", &filter.model),
        ("p.size", &filter.size),
        ("p.season_type", &filter.season_type),
        ("p.speed_rating", &filter.speed_rating),
        ("p.load_index", &filter.load_index),
    ];
    for (column, value) in text_filters {
        if let Some(value) = value {
            qb.push(format!(" AND LOWER({}) = LOWER(", column));
            qb.push_bind(value.clone());
            qb.push(")");
        }
    }

    if let Some(width) = filter.width {
        qb.push(" AND p.width = ").push_bind(width);
    }
    if let Some(aspect_ratio) = filter.aspect_ratio {
        qb.push(" AND p.aspect_ratio = ").push_bind(aspect_ratio);
    }
    if let Some(rim) = filter.rim_diameter {
        qb.push(" AND p.rim_diameter = ").push_bind(rim);
    }
    if let Some(status) = filter.status {
        qb.push(" AND p.status = ").push_bind(status.as_str());
    }
    if let Some(min) = filter.min_price {
        qb.push(" AND p.price >= ").push_bind(min);
    }
    if let Some(max) = filter.max_price {
        qb.push(" AND p.price <= ").push_bind(max);
    }
    match filter.in_stock {
        Some(true) => {
            qb.push(" AND p.stock_quantity > 0");
        }
        Some(false) => {
            qb.push(" AND p.stock_quantity <= 0");
        }
        None => {}
    }
    if let Some(featured) = filter.featured {
        qb.push(" AND p.is_featured = ").push_bind(featured);
    }

    if let CategoryScope::Within(ids) = scope {
        if ids.is_empty() {
            qb.push(" AND 1 = 0");
        } else {
            qb.push(" AND p.id IN (SELECT product_id FROM product_categories WHERE category_id IN (");
            push_ids(qb, ids);
            qb.push("))");
        }
    }
}

fn push_order(qb: &mut QueryBuilder<'_, Sqlite>, filter: &ProductFilter) {
    let field = filter.sort_by.unwrap_or(SortField::CreatedAt);
    qb.push(format!(
        " ORDER BY {} {}, p.id DESC",
        field.column(),
        filter.sort_order.as_sql()
    ));
}

fn row_to_product(row: &SqliteRow) -> Result<Product> {
    let status: String = row.get("status");
    let tags: String = row.get("tags");
    Ok(Product {
        id: row.get("id"),
        name: row.get("name"),
        slug: row.get("slug"),
        sku: row.get("sku"),
        brand: row.get("brand"),
        model: row.get("model"),
        size: row.get("size"),
        width: row.get("width"),
        aspect_ratio: row.get("aspect_ratio"),
        rim_diameter: row.get("rim_diameter"),
        load_index: row.get("load_index"),
        speed_rating: row.get("speed_rating"),
        season_type: row.get("season_type"),
        price: row.get("price"),
        sale_price: row.get("sale_price"),
        stock_quantity: row.get("stock_quantity"),
        status: status.parse::<ProductStatus>()?,
        description: row.get("description"),
        tags: serde_json::from_str(&tags).unwrap_or_default(),
        is_featured: row.get("is_featured"),
        rating_average: row.get("rating_average"),
        review_count: row.get("review_count"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn row_to_image(row: &SqliteRow) -> ProductImage {
    ProductImage {
        id: row.get("id"),
        product_id: row.get("product_id"),
        url: row.get("url"),
        alt_text: row.get("alt_text"),
        sort_order: row.get("sort_order"),
        is_primary: row.get("is_primary"),
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Minimal valid product input for tests
    pub fn product_input(name: &str, sku: &str, brand: &str, price: f64) -> CreateProductInput {
        CreateProductInput {
            name: name.to_string(),
            slug: None,
            sku: sku.to_string(),
            brand: brand.to_string(),
            model: String::new(),
            size: "225/45R17".to_string(),
            width: Some(225),
            aspect_ratio: Some(45),
            rim_diameter: Some(17.0),
            load_index: Some("94".to_string()),
            speed_rating: Some("W".to_string()),
            season_type: Some("summer".to_string()),
            price,
            sale_price: None,
            stock_quantity: 10,
            status: None,
            description: String::new(),
            tags: Vec::new(),
            is_featured: false,
            category_ids: Vec::new(),
            images: Vec::new(),
        }
    }
}
