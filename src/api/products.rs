//! Product API endpoints
//!
//! - GET /api/products - Filtered, searched and paginated catalog
//! - GET /api/products/featured - Featured products
//! - GET /api/products/brands - Brands of active products
//! - GET /api/products/{id_or_slug} - Product page
//!
//! Admin:
//! - POST /api/products, PUT/DELETE /api/products/{id}
//! - POST /api/products/{id}/images, DELETE /api/products/{id}/images/{image_id}

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get, post, put},
    Json, Router,
};
use serde::Deserialize;

use crate::api::common::MessageResponse;
use crate::api::middleware::{ApiError, ApiJson, ApiQuery, AppState};
use crate::api::responses::PageResponse;
use crate::models::{
    CreateProductInput, ImageInput, ProductImage, ProductWithDetails, UpdateProductInput,
};
use crate::services::{ProductDetail, ProductQuery};

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<i64>,
}

pub fn public_router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_products))
        .route("/featured", get(featured_products))
        .route("/brands", get(list_brands))
        .route("/{id}", get(get_product))
}

pub fn admin_router() -> Router<AppState> {
    Router::new()
        .route("/", post(create_product))
        .route("/{id}", put(update_product).delete(delete_product))
        .route("/{id}/images", post(add_image))
        .route("/{id}/images/{image_id}", delete(delete_image))
}

/// GET /api/products
async fn list_products(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<ProductQuery>,
) -> Result<Json<PageResponse<ProductWithDetails>>, ApiError> {
    let result = state.product_service.list(&query).await?;
    Ok(Json(result.into()))
}

/// GET /api/products/featured
async fn featured_products(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<LimitQuery>,
) -> Result<Json<Vec<ProductWithDetails>>, ApiError> {
    Ok(Json(state.product_service.featured(query.limit).await?))
}

/// GET /api/products/brands
async fn list_brands(State(state): State<AppState>) -> Result<Json<Vec<String>>, ApiError> {
    Ok(Json(state.product_service.brands().await?))
}

/// GET /api/products/{id_or_slug}
async fn get_product(
    State(state): State<AppState>,
    Path(id_or_slug): Path<String>,
) -> Result<Json<ProductDetail>, ApiError> {
    Ok(Json(state.product_service.get(&id_or_slug).await?))
}

/// POST /api/products
async fn create_product(
    State(state): State<AppState>,
    ApiJson(input): ApiJson<CreateProductInput>,
) -> Result<(StatusCode, Json<ProductDetail>), ApiError> {
    let product = state.product_service.create(input).await?;
    Ok((StatusCode::CREATED, Json(product)))
}

/// PUT /api/products/{id}
async fn update_product(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    ApiJson(input): ApiJson<UpdateProductInput>,
) -> Result<Json<ProductDetail>, ApiError> {
    Ok(Json(state.product_service.update(id, input).await?))
}

/// DELETE /api/products/{id}
async fn delete_product(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<MessageResponse>, ApiError> {
    state.product_service.delete(id).await?;
    Ok(Json(MessageResponse::new("Product deleted")))
}

/// POST /api/products/{id}/images
async fn add_image(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    ApiJson(image): ApiJson<ImageInput>,
) -> Result<(StatusCode, Json<ProductImage>), ApiError> {
    let image = state.product_service.add_image(id, image).await?;
    Ok((StatusCode::CREATED, Json(image)))
}

/// DELETE /api/products/{id}/images/{image_id}
async fn delete_image(
    State(state): State<AppState>,
    Path((id, image_id)): Path<(i64, i64)>,
) -> Result<Json<MessageResponse>, ApiError> {
    state.product_service.delete_image(id, image_id).await?;
    Ok(Json(MessageResponse::new("Image deleted")))
}
