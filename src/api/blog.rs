//! Blog API endpoints
//!
//! Public:
//! - GET /api/blog/posts?search=&tag=&page=&limit=
//! - GET /api/blog/posts/{slug} (counts a view)
//! - GET/POST /api/blog/posts/{slug}/comments
//! - POST /api/blog/subscribe
//!
//! Admin:
//! - GET /api/blog/admin/posts, GET /api/blog/admin/posts/{id}
//! - POST /api/blog/posts, PUT/DELETE /api/blog/posts/{id}
//! - GET /api/blog/admin/comments?status=, PUT /api/blog/comments/{id}/status,
//!   DELETE /api/blog/comments/{id}
//! - GET /api/blog/admin/subscribers
//!
//! `/posts/{post}` is a slug on public routes and an id on admin ones.

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
use crate::models::{
    BlogComment, BlogPost, BlogPostInput, BlogSubscriber, CreateCommentInput, ListParams,
};

#[derive(Debug, Deserialize)]
pub struct PostsQuery {
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_limit")]
    pub limit: u32,
    pub search: Option<String>,
    pub tag: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SubscribeRequest {
    pub email: String,
}

#[derive(Debug, Serialize)]
pub struct SubscribeResponse {
    pub subscribed: bool,
    pub message: String,
}

pub fn public_router() -> Router<AppState> {
    Router::new()
        .route("/posts", get(list_posts))
        .route("/posts/{post}", get(get_post))
        .route("/posts/{post}/comments", get(list_post_comments).post(add_comment))
        .route("/subscribe", post(subscribe))
}

pub fn admin_router() -> Router<AppState> {
    Router::new()
        .route("/admin/posts", get(admin_list_posts))
        .route("/admin/posts/{id}", get(admin_get_post))
        .route("/posts", post(create_post))
        .route("/posts/{post}", put(update_post).delete(delete_post))
        .route("/admin/comments", get(admin_list_comments))
        .route("/comments/{id}/status", put(update_comment_status))
        .route("/comments/{id}", delete(delete_comment))
        .route("/admin/subscribers", get(admin_list_subscribers))
}

async fn list_posts(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<PostsQuery>,
) -> Result<Json<PageResponse<BlogPost>>, ApiError> {
    let params = ListParams::new(query.page, query.limit);
    let posts = state
        .blog_service
        .list_published(query.search, query.tag, &params)
        .await?;
    Ok(Json(posts.into()))
}

async fn get_post(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> Result<Json<BlogPost>, ApiError> {
    Ok(Json(state.blog_service.view(&slug).await?))
}

async fn list_post_comments(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> Result<Json<Vec<BlogComment>>, ApiError> {
    Ok(Json(state.blog_service.comments(&slug).await?))
}

async fn add_comment(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    ApiJson(input): ApiJson<CreateCommentInput>,
) -> Result<(StatusCode, Json<BlogComment>), ApiError> {
    let comment = state.blog_service.add_comment(&slug, input).await?;
    Ok((StatusCode::CREATED, Json(comment)))
}

async fn subscribe(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<SubscribeRequest>,
) -> Result<Json<SubscribeResponse>, ApiError> {
    let added = state.blog_service.subscribe(&body.email).await?;
    let message = if added {
        "Subscribed to blog updates"
    } else {
        "Already subscribed"
    };
    Ok(Json(SubscribeResponse {
        subscribed: true,
        message: message.to_string(),
    }))
}

async fn admin_list_posts(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<PageQuery>,
) -> Result<Json<PageResponse<BlogPost>>, ApiError> {
    let posts = state
        .blog_service
        .list_all(query.search.clone(), &query.params())
        .await?;
    Ok(Json(posts.into()))
}

async fn admin_get_post(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<BlogPost>, ApiError> {
    Ok(Json(state.blog_service.get(id).await?))
}

async fn create_post(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    ApiJson(input): ApiJson<BlogPostInput>,
) -> Result<(StatusCode, Json<BlogPost>), ApiError> {
    let post = state.blog_service.create(user.id, input).await?;
    Ok((StatusCode::CREATED, Json(post)))
}

async fn update_post(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    ApiJson(input): ApiJson<BlogPostInput>,
) -> Result<Json<BlogPost>, ApiError> {
    Ok(Json(state.blog_service.update(id, input).await?))
}

async fn delete_post(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<MessageResponse>, ApiError> {
    state.blog_service.delete(id).await?;
    Ok(Json(MessageResponse::new("Post deleted")))
}

async fn admin_list_comments(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<PageQuery>,
) -> Result<Json<PageResponse<BlogComment>>, ApiError> {
    let comments = state
        .blog_service
        .list_comments(query.status(), &query.params())
        .await?;
    Ok(Json(comments.into()))
}

async fn update_comment_status(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    ApiJson(body): ApiJson<StatusUpdate>,
) -> Result<Json<MessageResponse>, ApiError> {
    state
        .blog_service
        .update_comment_status(id, &body.status)
        .await?;
    Ok(Json(MessageResponse::new("Comment updated")))
}

async fn delete_comment(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<MessageResponse>, ApiError> {
    state.blog_service.delete_comment(id).await?;
    Ok(Json(MessageResponse::new("Comment deleted")))
}

async fn admin_list_subscribers(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<PageQuery>,
) -> Result<Json<PageResponse<BlogSubscriber>>, ApiError> {
    let subscribers = state
        .blog_service
        .list_subscribers(&query.params())
        .await?;
    Ok(Json(subscribers.into()))
}
