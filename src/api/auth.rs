//! Authentication API endpoints
//!
//! Handles HTTP requests for user authentication:
//! - POST /api/auth/register - Create an account (the first one is admin)
//! - POST /api/auth/login - Exchange credentials for a token
//! - POST /api/auth/forgot-password - Email a reset link
//! - POST /api/auth/reset-password - Set a new password with a reset token
//! - GET /api/auth/me - Current user
//! - PUT /api/auth/profile - Update name and phone
//! - PUT /api/auth/password - Change password

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use serde::Deserialize;

use crate::api::common::MessageResponse;
use crate::api::middleware::{ApiError, ApiJson, AppState, AuthenticatedUser, ClientIp};
use crate::models::{CreateUserInput, UpdateProfileInput, User};
use crate::services::AuthResponse;

/// Request body for user login
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct ForgotPasswordRequest {
    pub email: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetPasswordRequest {
    pub token: String,
    #[serde(alias = "password")]
    pub new_password: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

/// Routes that don't need a token
pub fn public_router() -> Router<AppState> {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/forgot-password", post(forgot_password))
        .route("/reset-password", post(reset_password))
}

/// Routes for signed-in users
pub fn protected_router() -> Router<AppState> {
    Router::new()
        .route("/me", get(me))
        .route("/profile", put(update_profile))
        .route("/password", put(change_password))
}

/// POST /api/auth/register
async fn register(
    State(state): State<AppState>,
    ApiJson(input): ApiJson<CreateUserInput>,
) -> Result<(StatusCode, Json<AuthResponse>), ApiError> {
    let response = state.user_service.register(input).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

/// POST /api/auth/login
async fn login(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    ApiJson(body): ApiJson<LoginRequest>,
) -> Result<Json<AuthResponse>, ApiError> {
    let email = body.email.trim().to_lowercase();
    let response = state.user_service.login(&email, &body.password, ip).await?;
    Ok(Json(response))
}

/// GET /api/auth/me
async fn me(AuthenticatedUser(user): AuthenticatedUser) -> Json<User> {
    Json(user)
}

/// PUT /api/auth/profile
async fn update_profile(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    ApiJson(input): ApiJson<UpdateProfileInput>,
) -> Result<Json<User>, ApiError> {
    let user = state.user_service.update_profile(user.id, input).await?;
    Ok(Json(user))
}

/// PUT /api/auth/password
async fn change_password(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    ApiJson(body): ApiJson<ChangePasswordRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    state
        .user_service
        .change_password(user.id, &body.current_password, &body.new_password)
        .await?;
    Ok(Json(MessageResponse::new("Password updated")))
}

/// POST /api/auth/forgot-password
///
/// Answers the same way whether or not the account exists.
async fn forgot_password(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<ForgotPasswordRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    let email = body.email.trim().to_lowercase();
    state.user_service.forgot_password(&email).await?;
    Ok(Json(MessageResponse::new(
        "If an account exists for this email, a reset link has been sent",
    )))
}

/// POST /api/auth/reset-password
async fn reset_password(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<ResetPasswordRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    state
        .user_service
        .reset_password(&body.token, &body.new_password)
        .await?;
    Ok(Json(MessageResponse::new("Password has been reset")))
}
