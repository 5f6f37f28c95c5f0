//! Admin dashboard endpoints

use axum::{extract::State, routing::get, Json, Router};
use serde::Deserialize;

use crate::api::middleware::{ApiError, ApiQuery, AppState};
use crate::db::repositories::{DailySales, TopProduct};
use crate::services::DashboardStats;

#[derive(Debug, Deserialize)]
pub struct SalesQuery {
    pub days: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct TopProductsQuery {
    pub limit: Option<i64>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/stats", get(stats))
        .route("/sales", get(sales))
        .route("/top-products", get(top_products))
}

async fn stats(State(state): State<AppState>) -> Result<Json<DashboardStats>, ApiError> {
    Ok(Json(state.dashboard_service.stats().await?))
}

/// GET /api/dashboard/sales?days=N
async fn sales(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<SalesQuery>,
) -> Result<Json<Vec<DailySales>>, ApiError> {
    Ok(Json(state.dashboard_service.sales(query.days).await?))
}

async fn top_products(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<TopProductsQuery>,
) -> Result<Json<Vec<TopProduct>>, ApiError> {
    Ok(Json(state.dashboard_service.top_products(query.limit).await?))
}
