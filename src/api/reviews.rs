//! Review API endpoints
//!
//! - GET /api/reviews/product/{product_id}?sort=newest|helpful|rating
//! - POST /api/reviews (authenticated)
//! - POST /api/reviews/{id}/helpful (authenticated)
//! - DELETE /api/reviews/{id} (owner or admin)
//! - GET /api/reviews/admin/all?status=, PUT /api/reviews/{id}/status (admin)

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::api::common::{default_limit, default_page, MessageResponse, PageQuery, StatusUpdate};
use crate::api::middleware::{ApiError, ApiJson, ApiQuery, AppState, AuthenticatedUser};
use crate::api::responses::PageResponse;
use crate::models::{CreateReviewInput, ListParams, RatingSummary, Review};

#[derive(Debug, Deserialize)]
pub struct ProductReviewsQuery {
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_limit")]
    pub limit: u32,
    pub sort: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ProductReviewsResponse {
    #[serde(flatten)]
    pub reviews: PageResponse<Review>,
    pub summary: RatingSummary,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HelpfulResponse {
    pub helpful_count: i64,
}

pub fn public_router() -> Router<AppState> {
    Router::new().route("/product/{product_id}", get(list_product_reviews))
}

pub fn protected_router() -> Router<AppState> {
    Router::new()
        .route("/", post(create_review))
        .route("/{id}/helpful", post(toggle_helpful))
        .route("/{id}", delete(delete_review))
}

pub fn admin_router() -> Router<AppState> {
    Router::new()
        .route("/admin/all", get(list_all_reviews))
        .route("/{id}/status", put(update_status))
}

async fn list_product_reviews(
    State(state): State<AppState>,
    Path(product_id): Path<i64>,
    ApiQuery(query): ApiQuery<ProductReviewsQuery>,
) -> Result<Json<ProductReviewsResponse>, ApiError> {
    let params = ListParams::new(query.page, query.limit);
    let result = state
        .review_service
        .list_for_product(product_id, query.sort.as_deref(), &params)
        .await?;
    Ok(Json(ProductReviewsResponse {
        reviews: result.reviews.into(),
        summary: result.summary,
    }))
}

async fn create_review(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    ApiJson(input): ApiJson<CreateReviewInput>,
) -> Result<(StatusCode, Json<Review>), ApiError> {
    let review = state.review_service.create(user.id, input).await?;
    Ok((StatusCode::CREATED, Json(review)))
}

async fn toggle_helpful(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    Path(id): Path<i64>,
) -> Result<Json<HelpfulResponse>, ApiError> {
    let helpful_count = state.review_service.toggle_helpful(id, user.id).await?;
    Ok(Json(HelpfulResponse { helpful_count }))
}

async fn delete_review(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    Path(id): Path<i64>,
) -> Result<Json<MessageResponse>, ApiError> {
    state
        .review_service
        .delete(id, user.id, user.is_admin())
        .await?;
    Ok(Json(MessageResponse::new("Review deleted")))
}

async fn list_all_reviews(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<PageQuery>,
) -> Result<Json<PageResponse<Review>>, ApiError> {
    let reviews = state
        .review_service
        .list_all(query.status(), &query.params())
        .await?;
    Ok(Json(reviews.into()))
}

async fn update_status(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    ApiJson(body): ApiJson<StatusUpdate>,
) -> Result<Json<Review>, ApiError> {
    Ok(Json(state.review_service.update_status(id, &body.status).await?))
}
