//! Store settings endpoints
//!
//! - GET /api/settings/public - What the storefront needs to price a cart
//! - GET /api/settings, PUT /api/settings (admin)

use axum::{extract::State, routing::get, Json, Router};
use serde_json::Value;
use std::collections::HashMap;

use crate::api::middleware::{ApiError, ApiJson, AppState};
use crate::db::repositories::Setting;
use crate::services::PublicSettings;

pub fn public_router() -> Router<AppState> {
    Router::new().route("/public", get(public_settings))
}

pub fn admin_router() -> Router<AppState> {
    Router::new().route("/", get(all_settings).put(update_settings))
}

async fn public_settings(State(state): State<AppState>) -> Result<Json<PublicSettings>, ApiError> {
    let settings = state.settings_service.store_settings().await?;
    Ok(Json(settings.public()))
}

async fn all_settings(State(state): State<AppState>) -> Result<Json<Vec<Setting>>, ApiError> {
    Ok(Json(state.settings_service.all().await?))
}

/// PUT /api/settings
///
/// Body is a flat object; numbers and booleans are stored as their text.
async fn update_settings(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<HashMap<String, Value>>,
) -> Result<Json<Vec<Setting>>, ApiError> {
    let mut values = HashMap::with_capacity(body.len());
    for (key, value) in body {
        let text = match value {
            Value::String(s) => s,
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            _ => {
                return Err(ApiError::validation_error(format!(
                    "Setting '{}' must be a string, number or boolean",
                    key
                )))
            }
        };
        values.insert(key, text);
    }
    Ok(Json(state.settings_service.update(values).await?))
}
