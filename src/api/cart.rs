//! Cart API endpoints (authenticated)
//!
//! - GET /api/cart
//! - POST /api/cart/items - Add a product, merging with an existing line
//! - PUT /api/cart/items/{product_id} - Set quantity (0 removes)
//! - DELETE /api/cart/items/{product_id}
//! - DELETE /api/cart - Empty the cart

use axum::{
    extract::{Path, State},
    routing::{get, post, put},
    Json, Router,
};
use serde::Deserialize;

use crate::api::common::MessageResponse;
use crate::api::middleware::{ApiError, ApiJson, AppState, AuthenticatedUser};
use crate::models::CartSummary;

fn default_quantity() -> i64 {
    1
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddItemRequest {
    pub product_id: i64,
    #[serde(default = "default_quantity")]
    pub quantity: i64,
}

#[derive(Debug, Deserialize)]
pub struct UpdateItemRequest {
    pub quantity: i64,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(get_cart).delete(clear_cart))
        .route("/items", post(add_item))
        .route("/items/{product_id}", put(update_item).delete(remove_item))
}

async fn get_cart(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
) -> Result<Json<CartSummary>, ApiError> {
    Ok(Json(state.cart_service.summary(user.id).await?))
}

async fn add_item(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    ApiJson(body): ApiJson<AddItemRequest>,
) -> Result<Json<CartSummary>, ApiError> {
    let cart = state
        .cart_service
        .add(user.id, body.product_id, body.quantity)
        .await?;
    Ok(Json(cart))
}

async fn update_item(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    Path(product_id): Path<i64>,
    ApiJson(body): ApiJson<UpdateItemRequest>,
) -> Result<Json<CartSummary>, ApiError> {
    let cart = state
        .cart_service
        .set_quantity(user.id, product_id, body.quantity)
        .await?;
    Ok(Json(cart))
}

async fn remove_item(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    Path(product_id): Path<i64>,
) -> Result<Json<CartSummary>, ApiError> {
    Ok(Json(state.cart_service.remove(user.id, product_id).await?))
}

async fn clear_cart(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
) -> Result<Json<MessageResponse>, ApiError> {
    state.cart_service.clear(user.id).await?;
    Ok(Json(MessageResponse::new("Cart cleared")))
}
