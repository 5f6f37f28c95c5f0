//! Contact form endpoints

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get, post, put},
    Json, Router,
};

use crate::api::common::{MessageResponse, PageQuery, StatusUpdate};
use crate::api::middleware::{ApiError, ApiJson, ApiQuery, AppState};
use crate::api::responses::PageResponse;
use crate::models::{ContactMessage, CreateContactInput};

pub fn public_router() -> Router<AppState> {
    Router::new().route("/", post(submit))
}

pub fn admin_router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_messages))
        .route("/{id}/status", put(update_status))
        .route("/{id}", delete(delete_message))
}

async fn submit(
    State(state): State<AppState>,
    ApiJson(input): ApiJson<CreateContactInput>,
) -> Result<(StatusCode, Json<MessageResponse>), ApiError> {
    state.contact_service.submit(input).await?;
    Ok((
        StatusCode::CREATED,
        Json(MessageResponse::new("Thanks for reaching out, we'll get back to you soon")),
    ))
}

async fn list_messages(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<PageQuery>,
) -> Result<Json<PageResponse<ContactMessage>>, ApiError> {
    let messages = state
        .contact_service
        .list(query.status(), &query.params())
        .await?;
    Ok(Json(messages.into()))
}

async fn update_status(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    ApiJson(body): ApiJson<StatusUpdate>,
) -> Result<Json<ContactMessage>, ApiError> {
    Ok(Json(state.contact_service.update_status(id, &body.status).await?))
}

async fn delete_message(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<MessageResponse>, ApiError> {
    state.contact_service.delete(id).await?;
    Ok(Json(MessageResponse::new("Message deleted")))
}
