//! Review service
//!
//! Product reviews with moderation. The product's cached rating average and
//! count only ever reflect approved reviews, so every status change or
//! deletion refreshes them.

use serde::Serialize;
use std::sync::Arc;

use crate::db::repositories::{NewReview, OrderRepository, ProductRepository, ReviewRepository};
use crate::models::{
    CreateReviewInput, ListParams, PagedResult, RatingSummary, Review, ReviewSort, ReviewStatus,
};
use crate::services::error::{ServiceError, ServiceResult};
use crate::services::settings::SettingsService;

const MAX_TITLE_LEN: usize = 200;
const MAX_COMMENT_LEN: usize = 5000;
const MAX_IMAGES: usize = 5;

/// Public review page for one product
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductReviews {
    #[serde(flatten)]
    pub reviews: PagedResult<Review>,
    pub summary: RatingSummary,
}

pub struct ReviewService {
    reviews: Arc<dyn ReviewRepository>,
    products: Arc<dyn ProductRepository>,
    orders: Arc<dyn OrderRepository>,
    settings: Arc<SettingsService>,
}

impl ReviewService {
    pub fn new(
        reviews: Arc<dyn ReviewRepository>,
        products: Arc<dyn ProductRepository>,
        orders: Arc<dyn OrderRepository>,
        settings: Arc<SettingsService>,
    ) -> Self {
        Self {
            reviews,
            products,
            orders,
            settings,
        }
    }

    pub async fn list_for_product(
        &self,
        product_id: i64,
        sort: Option<&str>,
        params: &ListParams,
    ) -> ServiceResult<ProductReviews> {
        let sort = sort.map(ReviewSort::parse).unwrap_or_default();
        let (items, total) = self.reviews.list_approved(product_id, sort, params).await?;
        let summary = self.summary(product_id).await?;
        Ok(ProductReviews {
            reviews: PagedResult::new(items, total, params),
            summary,
        })
    }

    pub async fn summary(&self, product_id: i64) -> ServiceResult<RatingSummary> {
        let distribution = self.reviews.rating_distribution(product_id).await?;
        Ok(RatingSummary::from_distribution(distribution))
    }

    pub async fn create(&self, user_id: i64, input: CreateReviewInput) -> ServiceResult<Review> {
        if !(1..=5).contains(&input.rating) {
            return Err(ServiceError::validation("Rating must be between 1 and 5"));
        }
        let title = input.title.trim().to_string();
        let comment = input.comment.trim().to_string();
        if title.chars().count() > MAX_TITLE_LEN {
            return Err(ServiceError::Validation(format!(
                "Title must be at most {} characters",
                MAX_TITLE_LEN
            )));
        }
        if comment.chars().count() > MAX_COMMENT_LEN {
            return Err(ServiceError::Validation(format!(
                "Comment must be at most {} characters",
                MAX_COMMENT_LEN
            )));
        }
        let images: Vec<String> = input
            .images
            .into_iter()
            .map(|url| url.trim().to_string())
            .filter(|url| !url.is_empty())
            .collect();
        if images.len() > MAX_IMAGES {
            return Err(ServiceError::Validation(format!(
                "At most {} images per review",
                MAX_IMAGES
            )));
        }

        if self.products.get_by_id(input.product_id).await?.is_none() {
            return Err(ServiceError::not_found("Product"));
        }

        let verified_purchase = self.orders.has_purchased(user_id, input.product_id).await?;
        let status = if self.settings.store_settings().await?.auto_approve_reviews {
            ReviewStatus::Approved
        } else {
            ReviewStatus::Pending
        };

        let review = self
            .reviews
            .create(&NewReview {
                product_id: input.product_id,
                user_id,
                rating: input.rating,
                title,
                comment,
                status,
                verified_purchase,
                images,
            })
            .await
            .map_err(|e| ServiceError::from_write(e, "You have already reviewed this product"))?;

        if status == ReviewStatus::Approved {
            self.reviews.refresh_product_rating(review.product_id).await?;
        }
        tracing::info!(
            review_id = review.id,
            product_id = review.product_id,
            user_id,
            status = %review.status,
            verified_purchase,
            "Review submitted"
        );
        Ok(review)
    }

    /// Toggle the caller's helpful vote; returns the new count
    pub async fn toggle_helpful(&self, review_id: i64, user_id: i64) -> ServiceResult<i64> {
        match self.reviews.get(review_id).await? {
            Some(review) if review.status == ReviewStatus::Approved => {}
            _ => return Err(ServiceError::not_found("Review")),
        }
        Ok(self.reviews.toggle_helpful(review_id, user_id).await?)
    }

    pub async fn delete(&self, id: i64, user_id: i64, is_admin: bool) -> ServiceResult<()> {
        let review = self
            .reviews
            .get(id)
            .await?
            .ok_or_else(|| ServiceError::not_found("Review"))?;
        if !is_admin && review.user_id != user_id {
            return Err(ServiceError::Forbidden(
                "You can only delete your own reviews".to_string(),
            ));
        }
        self.reviews.delete(id).await?;
        self.reviews.refresh_product_rating(review.product_id).await?;
        tracing::info!(review_id = id, user_id, is_admin, "Review deleted");
        Ok(())
    }

    pub async fn list_all(
        &self,
        status: Option<&str>,
        params: &ListParams,
    ) -> ServiceResult<PagedResult<Review>> {
        let status = match status.map(str::trim).filter(|s| !s.is_empty() && *s != "all") {
            Some(s) => Some(
                s.parse::<ReviewStatus>()
                    .map_err(|_| ServiceError::Validation(format!("Unknown review status '{}'", s)))?,
            ),
            None => None,
        };
        let (items, total) = self.reviews.list_all(status, params).await?;
        Ok(PagedResult::new(items, total, params))
    }

    pub async fn update_status(&self, id: i64, status: &str) -> ServiceResult<Review> {
        let status = status
            .parse::<ReviewStatus>()
            .map_err(|_| ServiceError::Validation(format!("Unknown review status '{}'", status)))?;
        if !self.reviews.update_status(id, status).await? {
            return Err(ServiceError::not_found("Review"));
        }
        let review = self
            .reviews
            .get(id)
            .await?
            .ok_or_else(|| ServiceError::not_found("Review"))?;
        self.reviews.refresh_product_rating(review.product_id).await?;
        Ok(review)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{Cache, MemoryCache};
    use crate::db::repositories::product::test_support::product_input;
    use crate::db::repositories::{
        SqlxOrderRepository, SqlxProductRepository, SqlxReviewRepository, SqlxSettingsRepository,
    };
    use crate::db::{create_test_pool, migrations, DynDatabasePool};
    use std::collections::HashMap;

    struct Fixture {
        pool: DynDatabasePool,
        service: ReviewService,
        settings: Arc<SettingsService>,
        products: Arc<dyn ProductRepository>,
    }

    async fn fixture() -> Fixture {
        let pool = create_test_pool().await.unwrap();
        migrations::run_migrations(&pool).await.unwrap();
        sqlx::query(
            "INSERT INTO users (id, email, password_hash, first_name) VALUES (1, 'a@example.com', 'x', 'Ann'), (2, 'b@example.com', 'x', 'Ben')",
        )
        .execute(pool.sqlite())
        .await
        .unwrap();

        let products = SqlxProductRepository::boxed(pool.clone());
        products
            .create(&product_input("Pilot Sport 4", "PS4", "Michelin", 200.0), "pilot-sport-4")
            .await
            .unwrap();

        let settings = Arc::new(SettingsService::new(
            SqlxSettingsRepository::boxed(pool.clone()),
            Arc::new(Cache::Memory(MemoryCache::new())),
        ));
        let service = ReviewService::new(
            SqlxReviewRepository::boxed(pool.clone()),
            products.clone(),
            SqlxOrderRepository::boxed(pool.clone()),
            settings.clone(),
        );
        Fixture {
            pool,
            service,
            settings,
            products,
        }
    }

    fn input(rating: i64) -> CreateReviewInput {
        CreateReviewInput {
            product_id: 1,
            rating,
            title: "Great grip".into(),
            comment: "Quiet and sticky in the wet.".into(),
            images: vec![],
        }
    }

    async fn auto_approve(f: &Fixture) {
        f.settings
            .update(HashMap::from([(
                "auto_approve_reviews".to_string(),
                "true".to_string(),
            )]))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_new_review_is_pending_and_hidden() {
        let f = fixture().await;
        let review = f.service.create(1, input(5)).await.unwrap();
        assert_eq!(review.status, ReviewStatus::Pending);
        assert!(!review.verified_purchase);

        let page = f.service.list_for_product(1, None, &ListParams::default()).await.unwrap();
        assert_eq!(page.reviews.total, 0);
        assert_eq!(page.summary.count, 0);
    }

    #[tokio::test]
    async fn test_validation_and_duplicates() {
        let f = fixture().await;
        assert!(matches!(f.service.create(1, input(0)).await, Err(ServiceError::Validation(_))));
        assert!(matches!(f.service.create(1, input(6)).await, Err(ServiceError::Validation(_))));

        let mut missing = input(4);
        missing.product_id = 42;
        assert!(matches!(f.service.create(1, missing).await, Err(ServiceError::NotFound(_))));

        f.service.create(1, input(4)).await.unwrap();
        assert!(matches!(f.service.create(1, input(3)).await, Err(ServiceError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_approval_updates_product_rating() {
        let f = fixture().await;
        let first = f.service.create(1, input(5)).await.unwrap();
        let second = f.service.create(2, input(2)).await.unwrap();

        f.service.update_status(first.id, "approved").await.unwrap();
        f.service.update_status(second.id, "approved").await.unwrap();

        let product = f.products.get_by_id(1).await.unwrap().unwrap();
        assert_eq!(product.review_count, 2);
        assert_eq!(product.rating_average, 3.5);

        let page = f
            .service
            .list_for_product(1, Some("rating"), &ListParams::default())
            .await
            .unwrap();
        assert_eq!(page.reviews.items[0].rating, 5);
        assert_eq!(page.summary.distribution, [0, 1, 0, 0, 1]);

        f.service.update_status(first.id, "rejected").await.unwrap();
        let product = f.products.get_by_id(1).await.unwrap().unwrap();
        assert_eq!(product.review_count, 1);
        assert_eq!(product.rating_average, 2.0);
    }

    #[tokio::test]
    async fn test_auto_approve_and_verified_purchase() {
        let f = fixture().await;
        auto_approve(&f).await;
        sqlx::query(
            r#"INSERT INTO orders (id, order_number, user_id, email, status, payment_status, subtotal, tax, shipping, total, shipping_address)
               VALUES (1, 'TS-1', 1, 'a@example.com', 'processing', 'paid', 200, 16, 25, 241, '{}')"#,
        )
        .execute(f.pool.sqlite())
        .await
        .unwrap();
        sqlx::query(
            "INSERT INTO order_items (order_id, product_id, product_name, sku, quantity, unit_price, total_price) VALUES (1, 1, 'Pilot Sport 4', 'PS4', 1, 200, 200)",
        )
        .execute(f.pool.sqlite())
        .await
        .unwrap();

        let review = f.service.create(1, input(5)).await.unwrap();
        assert_eq!(review.status, ReviewStatus::Approved);
        assert!(review.verified_purchase);

        let other = f.service.create(2, input(4)).await.unwrap();
        assert!(!other.verified_purchase);
    }

    #[tokio::test]
    async fn test_helpful_toggle() {
        let f = fixture().await;
        auto_approve(&f).await;
        let review = f.service.create(1, input(5)).await.unwrap();

        assert_eq!(f.service.toggle_helpful(review.id, 2).await.unwrap(), 1);
        assert_eq!(f.service.toggle_helpful(review.id, 1).await.unwrap(), 2);
        assert_eq!(f.service.toggle_helpful(review.id, 2).await.unwrap(), 1);
        assert!(matches!(
            f.service.toggle_helpful(999, 2).await,
            Err(ServiceError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_own_or_admin() {
        let f = fixture().await;
        let review = f.service.create(1, input(5)).await.unwrap();
        assert!(matches!(
            f.service.delete(review.id, 2, false).await,
            Err(ServiceError::Forbidden(_))
        ));
        f.service.delete(review.id, 1, false).await.unwrap();

        let again = f.service.create(1, input(3)).await.unwrap();
        f.service.delete(again.id, 2, true).await.unwrap();
        assert_eq!(
            f.service.list_all(Some("all"), &ListParams::default()).await.unwrap().total,
            0
        );
        assert!(f.service.list_all(Some("bogus"), &ListParams::default()).await.is_err());
    }
}
