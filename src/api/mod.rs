//! API layer - HTTP handlers and routing
//!
//! Everything lives under `/api`:
//! - auth, products, categories, cart, orders, payments
//! - reviews, blog, newsletter, contact, banners
//! - settings, dashboard, upload, health
//!
//! Routes are grouped by access level. Admin routes run `require_auth`
//! then `require_admin`; protected routes only `require_auth`.

pub mod auth;
pub mod banners;
pub mod blog;
pub mod cart;
pub mod categories;
pub mod common;
pub mod contact;
pub mod dashboard;
pub mod health;
pub mod middleware;
pub mod newsletter;
pub mod orders;
pub mod payments;
pub mod products;
pub mod responses;
pub mod reviews;
pub mod settings;
pub mod upload;

use axum::{
    http::{header, HeaderValue, Method},
    middleware as axum_middleware,
    Router,
};
use tower::ServiceBuilder;
use tower_http::{
    compression::CompressionLayer,
    cors::{AllowOrigin, Any, CorsLayer},
    services::ServeDir,
    trace::TraceLayer,
};

use crate::config::StorageDriver;

pub use middleware::{ApiError, AppState, AuthenticatedUser};

/// Build the `/api` router
pub fn build_api_router(state: AppState) -> Router<AppState> {
    // Admin routes (need admin role)
    let admin_routes = Router::new()
        .nest("/products", products::admin_router())
        .nest("/categories", categories::admin_router())
        .nest("/orders", orders::admin_router())
        .nest("/reviews", reviews::admin_router())
        .nest("/blog", blog::admin_router())
        .nest("/newsletter", newsletter::admin_router())
        .nest("/contact", contact::admin_router())
        .nest("/banners", banners::admin_router())
        .nest("/settings", settings::admin_router())
        .nest("/dashboard", dashboard::router())
        .nest("/upload", upload::router(state.upload_service.max_file_size()))
        .route_layer(axum_middleware::from_fn(middleware::require_admin))
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::require_auth,
        ));

    // Protected routes (need auth but not admin)
    let protected_routes = Router::new()
        .nest("/auth", auth::protected_router())
        .nest("/cart", cart::router())
        .nest("/orders", orders::protected_router())
        .nest("/payments", payments::protected_router())
        .nest("/reviews", reviews::protected_router())
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::require_auth,
        ));

    // Public routes
    Router::new()
        .merge(health::router())
        .nest("/auth", auth::public_router())
        .nest("/products", products::public_router())
        .nest("/categories", categories::public_router())
        .nest("/payments", payments::public_router())
        .nest("/reviews", reviews::public_router())
        .nest("/blog", blog::public_router())
        .nest("/newsletter", newsletter::public_router())
        .nest("/contact", contact::public_router())
        .nest("/banners", banners::public_router())
        .nest("/settings", settings::public_router())
        .merge(admin_routes)
        .merge(protected_routes)
}

/// Parse the configured origin list; `*` allows any origin
fn cors_layer(cors_origin: &str) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
        ])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    if cors_origin.trim() == "*" {
        return cors.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = cors_origin
        .split(',')
        .map(str::trim)
        .filter(|o| !o.is_empty())
        .filter_map(|o| match o.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("Ignoring invalid CORS origin: {}", o);
                None
            }
        })
        .collect();
    cors.allow_origin(AllowOrigin::list(origins))
}

/// Build the complete router with middleware
pub fn build_router(state: AppState, cors_origin: &str) -> Router {
    let mut router = Router::new()
        .nest("/api", build_api_router(state.clone()))
        .fallback(|| async { ApiError::not_found("Route not found") });

    if state.storage_config.driver == StorageDriver::Local {
        router = router.nest_service("/uploads", ServeDir::new(&state.storage_config.path));
    }

    router
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CompressionLayer::new())
                .layer(cors_layer(cors_origin)),
        )
        .with_state(state)
}
