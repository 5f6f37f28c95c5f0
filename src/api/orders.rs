//! Order API endpoints
//!
//! Customers list, view and cancel their own orders. Admins see every
//! order and move it through its statuses.

use axum::{
    extract::{Path, State},
    routing::{get, post, put},
    Json, Router,
};

use crate::api::common::{PageQuery, StatusUpdate};
use crate::api::middleware::{ApiError, ApiJson, ApiQuery, AppState, AuthenticatedUser};
use crate::api::responses::PageResponse;
use crate::models::{Order, OrderWithItems};

pub fn protected_router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_my_orders))
        .route("/{id}", get(get_order))
        .route("/{id}/cancel", post(cancel_order))
}

pub fn admin_router() -> Router<AppState> {
    Router::new()
        .route("/admin/all", get(list_all_orders))
        .route("/{id}/status", put(update_status))
}

/// GET /api/orders
async fn list_my_orders(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    ApiQuery(query): ApiQuery<PageQuery>,
) -> Result<Json<PageResponse<Order>>, ApiError> {
    let orders = state
        .order_service
        .list_for_user(user.id, &query.params())
        .await?;
    Ok(Json(orders.into()))
}

/// GET /api/orders/{id}
async fn get_order(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    Path(id): Path<i64>,
) -> Result<Json<OrderWithItems>, ApiError> {
    let order = state
        .order_service
        .get(id, user.id, user.is_admin())
        .await?;
    Ok(Json(order))
}

/// POST /api/orders/{id}/cancel
async fn cancel_order(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    Path(id): Path<i64>,
) -> Result<Json<OrderWithItems>, ApiError> {
    Ok(Json(state.order_service.cancel(id, user.id).await?))
}

/// GET /api/orders/admin/all?status=&page=&limit=
async fn list_all_orders(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<PageQuery>,
) -> Result<Json<PageResponse<Order>>, ApiError> {
    let orders = state
        .order_service
        .list_all(query.status(), &query.params())
        .await?;
    Ok(Json(orders.into()))
}

/// PUT /api/orders/{id}/status
async fn update_status(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    ApiJson(body): ApiJson<StatusUpdate>,
) -> Result<Json<OrderWithItems>, ApiError> {
    Ok(Json(state.order_service.update_status(id, &body.status).await?))
}
