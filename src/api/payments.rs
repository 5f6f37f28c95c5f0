//! Payment API endpoints
//!
//! - POST /api/payments/create-intent (authenticated) - Start checkout
//! - POST /api/payments/webhook - Stripe event delivery
//!
//! The webhook consumes the raw body: the signature covers the exact bytes
//! Stripe sent.

use axum::{
    body::Bytes,
    extract::State,
    http::HeaderMap,
    routing::post,
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::api::middleware::{ApiError, ApiJson, AppState, AuthenticatedUser};
use crate::models::ShippingAddress;
use crate::services::{CheckoutDetails, CheckoutSession, WebhookOutcome};

const SIGNATURE_HEADER: &str = "stripe-signature";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateIntentRequest {
    pub shipping_address: ShippingAddress,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct WebhookAck {
    pub received: bool,
    pub duplicate: bool,
}

pub fn protected_router() -> Router<AppState> {
    Router::new().route("/create-intent", post(create_intent))
}

pub fn public_router() -> Router<AppState> {
    Router::new().route("/webhook", post(webhook))
}

/// POST /api/payments/create-intent
async fn create_intent(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    ApiJson(body): ApiJson<CreateIntentRequest>,
) -> Result<Json<CheckoutSession>, ApiError> {
    let details = CheckoutDetails {
        email: body.email.unwrap_or_default(),
        shipping_address: body.shipping_address,
        notes: body.notes,
    };
    let session = state
        .payment_service
        .create_intent(user.id, &user.email, details)
        .await?;
    Ok(Json(session))
}

/// POST /api/payments/webhook
async fn webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>, ApiError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());

    let outcome = state.payment_service.handle_webhook(&body, signature).await?;
    Ok(Json(WebhookAck {
        received: true,
        duplicate: outcome == WebhookOutcome::Duplicate,
    }))
}
