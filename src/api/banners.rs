//! Banner endpoints
//!
//! - GET /api/banners?position= - Live banners
//! - GET /api/banners/admin/all, POST, PUT/DELETE /{id} (admin)

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use serde::Deserialize;

use crate::api::common::MessageResponse;
use crate::api::middleware::{ApiError, ApiJson, ApiQuery, AppState};
use crate::models::{Banner, BannerInput};

#[derive(Debug, Deserialize)]
pub struct PositionQuery {
    pub position: Option<String>,
}

pub fn public_router() -> Router<AppState> {
    Router::new().route("/", get(live_banners))
}

pub fn admin_router() -> Router<AppState> {
    Router::new()
        .route("/admin/all", get(list_all_banners))
        .route("/", post(create_banner))
        .route("/{id}", put(update_banner).delete(delete_banner))
}

async fn live_banners(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<PositionQuery>,
) -> Result<Json<Vec<Banner>>, ApiError> {
    Ok(Json(state.banner_service.live(query.position.as_deref()).await?))
}

async fn list_all_banners(State(state): State<AppState>) -> Result<Json<Vec<Banner>>, ApiError> {
    Ok(Json(state.banner_service.list_all().await?))
}

async fn create_banner(
    State(state): State<AppState>,
    ApiJson(input): ApiJson<BannerInput>,
) -> Result<(StatusCode, Json<Banner>), ApiError> {
    let banner = state.banner_service.create(input).await?;
    Ok((StatusCode::CREATED, Json(banner)))
}

async fn update_banner(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    ApiJson(input): ApiJson<BannerInput>,
) -> Result<Json<Banner>, ApiError> {
    Ok(Json(state.banner_service.update(id, input).await?))
}

async fn delete_banner(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<MessageResponse>, ApiError> {
    state.banner_service.delete(id).await?;
    Ok(Json(MessageResponse::new("Banner deleted")))
}
