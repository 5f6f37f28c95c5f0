//! Newsletter API endpoints
//!
//! Public subscribe/unsubscribe, admin subscriber list and campaigns.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;

use crate::api::common::{MessageResponse, PageQuery};
use crate::api::middleware::{ApiError, ApiJson, ApiQuery, AppState};
use crate::api::responses::PageResponse;
use crate::models::{Campaign, CampaignInput, Subscriber};

#[derive(Debug, Deserialize)]
pub struct SubscribeRequest {
    pub email: String,
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UnsubscribeRequest {
    pub token: String,
}

pub fn public_router() -> Router<AppState> {
    Router::new()
        .route("/subscribe", post(subscribe))
        .route("/unsubscribe", post(unsubscribe))
}

pub fn admin_router() -> Router<AppState> {
    Router::new()
        .route("/subscribers", get(list_subscribers))
        .route("/campaigns", get(list_campaigns).post(create_campaign))
        .route(
            "/campaigns/{id}",
            get(get_campaign).put(update_campaign).delete(delete_campaign),
        )
        .route("/campaigns/{id}/send", post(send_campaign))
}

async fn subscribe(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<SubscribeRequest>,
) -> Result<(StatusCode, Json<Subscriber>), ApiError> {
    let subscriber = state
        .newsletter_service
        .subscribe(&body.email, body.name)
        .await?;
    Ok((StatusCode::CREATED, Json(subscriber)))
}

async fn unsubscribe(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<UnsubscribeRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    state.newsletter_service.unsubscribe(&body.token).await?;
    Ok(Json(MessageResponse::new("You have been unsubscribed")))
}

async fn list_subscribers(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<PageQuery>,
) -> Result<Json<PageResponse<Subscriber>>, ApiError> {
    let subscribers = state
        .newsletter_service
        .list_subscribers(query.status(), &query.params())
        .await?;
    Ok(Json(subscribers.into()))
}

async fn list_campaigns(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<PageQuery>,
) -> Result<Json<PageResponse<Campaign>>, ApiError> {
    let campaigns = state
        .newsletter_service
        .list_campaigns(&query.params())
        .await?;
    Ok(Json(campaigns.into()))
}

async fn get_campaign(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Campaign>, ApiError> {
    Ok(Json(state.newsletter_service.get_campaign(id).await?))
}

async fn create_campaign(
    State(state): State<AppState>,
    ApiJson(input): ApiJson<CampaignInput>,
) -> Result<(StatusCode, Json<Campaign>), ApiError> {
    let campaign = state.newsletter_service.create_campaign(input).await?;
    Ok((StatusCode::CREATED, Json(campaign)))
}

async fn update_campaign(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    ApiJson(input): ApiJson<CampaignInput>,
) -> Result<Json<Campaign>, ApiError> {
    Ok(Json(state.newsletter_service.update_campaign(id, input).await?))
}

async fn delete_campaign(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<MessageResponse>, ApiError> {
    state.newsletter_service.delete_campaign(id).await?;
    Ok(Json(MessageResponse::new("Campaign deleted")))
}

/// POST /api/newsletter/campaigns/{id}/send
async fn send_campaign(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Campaign>, ApiError> {
    Ok(Json(state.newsletter_service.send_campaign(id).await?))
}
