//! Review repository

use crate::db::DynDatabasePool;
use crate::models::{ListParams, Review, ReviewSort, ReviewStatus};
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{sqlite::SqliteRow, QueryBuilder, Row, Sqlite, SqlitePool};
use std::collections::HashMap;
use std::sync::Arc;

/// Fields of a review being written
#[derive(Debug, Clone)]
pub struct NewReview {
    pub product_id: i64,
    pub user_id: i64,
    pub rating: i64,
    pub title: String,
    pub comment: String,
    pub status: ReviewStatus,
    pub verified_purchase: bool,
    pub images: Vec<String>,
}

#[async_trait]
pub trait ReviewRepository: Send + Sync {
    /// Insert a review. A second review of the same product by the same user
    /// is a unique violation.
    async fn create(&self, review: &NewReview) -> Result<Review>;

    async fn get(&self, id: i64) -> Result<Option<Review>>;

    async fn list_approved(
        &self,
        product_id: i64,
        sort: ReviewSort,
        params: &ListParams,
    ) -> Result<(Vec<Review>, i64)>;

    async fn list_all(
        &self,
        status: Option<ReviewStatus>,
        params: &ListParams,
    ) -> Result<(Vec<Review>, i64)>;

    /// Approved review counts per star (index 0 is one star)
    async fn rating_distribution(&self, product_id: i64) -> Result<[i64; 5]>;

    async fn update_status(&self, id: i64, status: ReviewStatus) -> Result<bool>;

    async fn delete(&self, id: i64) -> Result<bool>;

    /// Add or remove the user's helpful vote. Returns the new helpful count.
    async fn toggle_helpful(&self, review_id: i64, user_id: i64) -> Result<i64>;

    /// Recompute the product's cached rating average and count
    async fn refresh_product_rating(&self, product_id: i64) -> Result<()>;
}

pub struct SqlxReviewRepository {
    pool: DynDatabasePool,
}

impl SqlxReviewRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn ReviewRepository> {
        Arc::new(Self::new(pool))
    }
}

const SELECT_REVIEW: &str = r#"
    SELECT r.id, r.product_id, r.user_id, r.rating, r.title, r.comment, r.status,
           r.verified_purchase, r.helpful_count, r.created_at, r.updated_at,
           TRIM(COALESCE(u.first_name, '') || ' ' || COALESCE(u.last_name, '')) AS author_name
    FROM reviews r
    LEFT JOIN users u ON u.id = r.user_id
"#;

#[async_trait]
impl ReviewRepository for SqlxReviewRepository {
    async fn create(&self, review: &NewReview) -> Result<Review> {
        let pool = self.pool.sqlite();
        let mut tx = pool.begin().await?;

        let result = sqlx::query(
            r#"
            INSERT INTO reviews (product_id, user_id, rating, title, comment, status, verified_purchase)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(review.product_id)
        .bind(review.user_id)
        .bind(review.rating)
        .bind(&review.title)
        .bind(&review.comment)
        .bind(review.status.as_str())
        .bind(review.verified_purchase)
        .execute(&mut *tx)
        .await
        .context("Failed to create review")?;
        let id = result.last_insert_rowid();

        for url in &review.images {
            sqlx::query("INSERT INTO review_images (review_id, url) VALUES (?, ?)")
                .bind(id)
                .bind(url)
                .execute(&mut *tx)
                .await
                .context("Failed to attach review image")?;
        }
        tx.commit().await?;

        get_review(pool, id)
            .await?
            .context("Review not found after insert")
    }

    async fn get(&self, id: i64) -> Result<Option<Review>> {
        get_review(self.pool.sqlite(), id).await
    }

    async fn list_approved(
        &self,
        product_id: i64,
        sort: ReviewSort,
        params: &ListParams,
    ) -> Result<(Vec<Review>, i64)> {
        let pool = self.pool.sqlite();
        let total: i64 = sqlx::query(
            "SELECT COUNT(*) AS count FROM reviews WHERE product_id = ? AND status = 'approved'",
        )
        .bind(product_id)
        .fetch_one(pool)
        .await
        .context("Failed to count reviews")?
        .get("count");

        let rows = sqlx::query(&format!(
            "{} WHERE r.product_id = ? AND r.status = 'approved' ORDER BY {} LIMIT ? OFFSET ?",
            SELECT_REVIEW,
            sort.order_by()
        ))
        .bind(product_id)
        .bind(params.limit())
        .bind(params.offset())
        .fetch_all(pool)
        .await
        .context("Failed to list reviews")?;

        let reviews = with_images(pool, &rows).await?;
        Ok((reviews, total))
    }

    async fn list_all(
        &self,
        status: Option<ReviewStatus>,
        params: &ListParams,
    ) -> Result<(Vec<Review>, i64)> {
        let pool = self.pool.sqlite();

        let mut count_qb: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT COUNT(*) AS count FROM reviews r WHERE 1 = 1");
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(format!("{} WHERE 1 = 1", SELECT_REVIEW));
        if let Some(status) = status {
            count_qb.push(" AND r.status = ").push_bind(status.as_str());
            qb.push(" AND r.status = ").push_bind(status.as_str());
        }
        qb.push(" ORDER BY r.created_at DESC, r.id DESC LIMIT ")
            .push_bind(params.limit())
            .push(" OFFSET ")
            .push_bind(params.offset());

        let total: i64 = count_qb
            .build()
            .fetch_one(pool)
            .await
            .context("Failed to count reviews")?
            .get("count");
        let rows = qb
            .build()
            .fetch_all(pool)
            .await
            .context("Failed to list reviews")?;

        let reviews = with_images(pool, &rows).await?;
        Ok((reviews, total))
    }

    async fn rating_distribution(&self, product_id: i64) -> Result<[i64; 5]> {
        let rows = sqlx::query(
            r#"
            SELECT rating, COUNT(*) AS count FROM reviews
            WHERE product_id = ? AND status = 'approved'
            GROUP BY rating
            "#,
        )
        .bind(product_id)
        .fetch_all(self.pool.sqlite())
        .await
        .context("Failed to load rating distribution")?;

        let mut distribution = [0i64; 5];
        for row in &rows {
            let rating: i64 = row.get("rating");
            if (1..=5).contains(&rating) {
                distribution[(rating - 1) as usize] = row.get("count");
            }
        }
        Ok(distribution)
    }

    async fn update_status(&self, id: i64, status: ReviewStatus) -> Result<bool> {
        let result =
            sqlx::query("UPDATE reviews SET status = ?, updated_at = CURRENT_TIMESTAMP WHERE id = ?")
                .bind(status.as_str())
                .bind(id)
                .execute(self.pool.sqlite())
                .await
                .context("Failed to update review status")?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete(&self, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM reviews WHERE id = ?")
            .bind(id)
            .execute(self.pool.sqlite())
            .await
            .context("Failed to delete review")?;
        Ok(result.rows_affected() > 0)
    }

    async fn toggle_helpful(&self, review_id: i64, user_id: i64) -> Result<i64> {
        let mut tx = self.pool.sqlite().begin().await?;

        let removed = sqlx::query("DELETE FROM review_helpful_votes WHERE review_id = ? AND user_id = ?")
            .bind(review_id)
            .bind(user_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        if removed == 0 {
            sqlx::query("INSERT INTO review_helpful_votes (review_id, user_id) VALUES (?, ?)")
                .bind(review_id)
                .bind(user_id)
                .execute(&mut *tx)
                .await
                .context("Failed to record helpful vote")?;
        }

        sqlx::query(
            r#"
            UPDATE reviews
            SET helpful_count = (SELECT COUNT(*) FROM review_helpful_votes WHERE review_id = ?)
            WHERE id = ?
            "#,
        )
        .bind(review_id)
        .bind(review_id)
        .execute(&mut *tx)
        .await?;

        let count: i64 = sqlx::query("SELECT helpful_count FROM reviews WHERE id = ?")
            .bind(review_id)
            .fetch_one(&mut *tx)
            .await?
            .get("helpful_count");

        tx.commit().await?;
        Ok(count)
    }

    async fn refresh_product_rating(&self, product_id: i64) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE products SET
                rating_average = COALESCE((
                    SELECT ROUND(AVG(rating), 2) FROM reviews
                    WHERE product_id = ? AND status = 'approved'
                ), 0),
                review_count = (
                    SELECT COUNT(*) FROM reviews WHERE product_id = ? AND status = 'approved'
                )
            WHERE id = ?
            "#,
        )
        .bind(product_id)
        .bind(product_id)
        .bind(product_id)
        .execute(self.pool.sqlite())
        .await
        .context("Failed to refresh product rating")?;
        Ok(())
    }
}

async fn get_review(pool: &SqlitePool, id: i64) -> Result<Option<Review>> {
    let row = sqlx::query(&format!("{} WHERE r.id = ?", SELECT_REVIEW))
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("Failed to get review")?;

    match row {
        Some(row) => Ok(with_images(pool, std::slice::from_ref(&row)).await?.pop()),
        None => Ok(None),
    }
}

/// Map review rows and attach their image URLs
async fn with_images(pool: &SqlitePool, rows: &[SqliteRow]) -> Result<Vec<Review>> {
    let mut reviews = rows.iter().map(row_to_review).collect::<Result<Vec<_>>>()?;
    if reviews.is_empty() {
        return Ok(reviews);
    }

    let mut qb: QueryBuilder<Sqlite> =
        QueryBuilder::new("SELECT review_id, url FROM review_images WHERE review_id IN (");
    {
        let mut separated = qb.separated(", ");
        for review in &reviews {
            separated.push_bind(review.id);
        }
    }
    qb.push(") ORDER BY id");

    let image_rows = qb
        .build()
        .fetch_all(pool)
        .await
        .context("Failed to load review images")?;
    let mut images: HashMap<i64, Vec<String>> = HashMap::new();
    for row in &image_rows {
        images
            .entry(row.get("review_id"))
            .or_default()
            .push(row.get("url"));
    }
    for review in &mut reviews {
        review.images = images.remove(&review.id).unwrap_or_default();
    }
    Ok(reviews)
}

fn row_to_review(row: &SqliteRow) -> Result<Review> {
    let status: String = row.get("status");
    Ok(Review {
        id: row.get("id"),
        product_id: row.get("product_id"),
        user_id: row.get("user_id"),
        author_name: row.get("author_name"),
        rating: row.get("rating"),
        title: row.get("title"),
        comment: row.get("comment"),
        status: status.parse()?,
        verified_purchase: row.get("verified_purchase"),
        helpful_count: row.get("helpful_count"),
        images: Vec::new(),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{create_test_pool, migrations};

    async fn setup() -> (DynDatabasePool, SqlxReviewRepository) {
        let pool = create_test_pool().await.unwrap();
        migrations::run_migrations(&pool).await.unwrap();
        for sql in [
            "INSERT INTO users (id, email, password_hash, first_name, last_name) VALUES (1, 'a@b.c', 'x', 'Ana', 'Lee')",
            "INSERT INTO users (id, email, password_hash) VALUES (2, 'b@b.c', 'x')",
            "INSERT INTO products (id, name, slug, sku) VALUES (1, 'A', 'a', 'S1')",
        ] {
            pool.execute(sql).await.unwrap();
        }
        (pool.clone(), SqlxReviewRepository::new(pool))
    }

    fn review(user_id: i64, rating: i64, status: ReviewStatus) -> NewReview {
        NewReview {
            product_id: 1,
            user_id,
            rating,
            title: "Grippy".into(),
            comment: "Great in the wet".into(),
            status,
            verified_purchase: false,
            images: vec!["/uploads/r1.jpg".into()],
        }
    }

    #[tokio::test]
    async fn test_create_with_images_and_author() {
        let (_pool, repo) = setup().await;
        let created = repo.create(&review(1, 5, ReviewStatus::Pending)).await.unwrap();
        assert_eq!(created.author_name, "Ana Lee");
        assert_eq!(created.images, vec!["/uploads/r1.jpg".to_string()]);
    }

    #[tokio::test]
    async fn test_one_review_per_user_and_product() {
        let (_pool, repo) = setup().await;
        repo.create(&review(1, 5, ReviewStatus::Pending)).await.unwrap();
        let err = repo.create(&review(1, 4, ReviewStatus::Pending)).await.unwrap_err();
        assert!(crate::db::is_unique_violation(&err));
    }

    #[tokio::test]
    async fn test_only_approved_are_listed_and_rated() {
        let (pool, repo) = setup().await;
        repo.create(&review(1, 5, ReviewStatus::Approved)).await.unwrap();
        repo.create(&review(2, 2, ReviewStatus::Pending)).await.unwrap();

        let (items, total) = repo
            .list_approved(1, ReviewSort::Newest, &ListParams::new(1, 10))
            .await
            .unwrap();
        assert_eq!(total, 1);
        assert_eq!(items[0].rating, 5);
        assert_eq!(repo.rating_distribution(1).await.unwrap(), [0, 0, 0, 0, 1]);

        repo.refresh_product_rating(1).await.unwrap();
        let row = sqlx::query("SELECT rating_average, review_count FROM products WHERE id = 1")
            .fetch_one(pool.sqlite())
            .await
            .unwrap();
        assert_eq!(row.get::<f64, _>("rating_average"), 5.0);
        assert_eq!(row.get::<i64, _>("review_count"), 1);
    }

    #[tokio::test]
    async fn test_toggle_helpful() {
        let (_pool, repo) = setup().await;
        let created = repo.create(&review(1, 5, ReviewStatus::Approved)).await.unwrap();

        assert_eq!(repo.toggle_helpful(created.id, 2).await.unwrap(), 1);
        assert_eq!(repo.toggle_helpful(created.id, 1).await.unwrap(), 2);
        assert_eq!(repo.toggle_helpful(created.id, 2).await.unwrap(), 1);
    }
}
